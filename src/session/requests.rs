//! One typed record per session operation
//!
//! Each record carries exactly the fields its operation accepts; `validate`
//! rejects malformed combinations before any I/O happens.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::breakpoints::BreakpointLocation;
use crate::error::{DebugError, Result};

/// How the debuggee is brought under control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    /// Build and debug a source package
    Source,
    /// Debug a precompiled executable
    Binary,
    /// Attach to a running process
    Attach,
}

impl LaunchMode {
    /// Delve's name for this mode.
    pub fn delve_mode(&self) -> &'static str {
        match self {
            LaunchMode::Source => "debug",
            LaunchMode::Binary => "exec",
            LaunchMode::Attach => "local",
        }
    }

    pub fn is_attach(&self) -> bool {
        matches!(self, LaunchMode::Attach)
    }
}

impl FromStr for LaunchMode {
    type Err = DebugError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "source" => Ok(LaunchMode::Source),
            "binary" => Ok(LaunchMode::Binary),
            "attach" => Ok(LaunchMode::Attach),
            other => Err(DebugError::validation(format!(
                "unknown mode '{}': expected source, binary or attach",
                other
            ))),
        }
    }
}

impl fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LaunchMode::Source => "source",
            LaunchMode::Binary => "binary",
            LaunchMode::Attach => "attach",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct StartRequest {
    pub mode: LaunchMode,
    /// Source package or executable; required unless attaching
    pub path: Option<String>,
    /// Required when attaching
    pub process_id: Option<i64>,
    pub args: Vec<String>,
    pub breakpoints: Vec<BreakpointLocation>,
    pub stop_on_entry: bool,
    /// Listen port for the adapter; falls back to the configured default
    pub port: Option<u16>,
}

impl StartRequest {
    pub fn launch(mode: LaunchMode, path: impl Into<String>) -> Self {
        Self {
            mode,
            path: Some(path.into()),
            process_id: None,
            args: Vec::new(),
            breakpoints: Vec::new(),
            stop_on_entry: false,
            port: None,
        }
    }

    pub fn attach(process_id: i64) -> Self {
        Self {
            mode: LaunchMode::Attach,
            path: None,
            process_id: Some(process_id),
            args: Vec::new(),
            breakpoints: Vec::new(),
            stop_on_entry: false,
            port: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.mode {
            LaunchMode::Source | LaunchMode::Binary => {
                if self.path.as_deref().map_or(true, |p| p.trim().is_empty()) {
                    return Err(DebugError::validation(format!("path is required for {} mode", self.mode)));
                }
            }
            LaunchMode::Attach => match self.process_id {
                Some(pid) if pid > 0 => {}
                Some(pid) => {
                    return Err(DebugError::validation(format!("processId must be positive, got {}", pid)))
                }
                None => return Err(DebugError::validation("processId is required for attach mode")),
            },
        }
        if self.port == Some(0) {
            return Err(DebugError::validation("port must be non-zero"));
        }
        Ok(())
    }

    /// Human readable target: the path, or the attached pid.
    pub fn target(&self) -> String {
        match (&self.path, self.process_id) {
            (Some(path), _) => path.clone(),
            (None, Some(pid)) => format!("process {}", pid),
            (None, None) => "<none>".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContinueRequest {
    pub thread_id: Option<i64>,
    /// Run-to location, armed as a temporary breakpoint
    pub to: Option<BreakpointLocation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    Over,
    In,
    Out,
}

impl StepMode {
    pub fn command(&self) -> &'static str {
        match self {
            StepMode::Over => "next",
            StepMode::In => "stepIn",
            StepMode::Out => "stepOut",
        }
    }
}

impl FromStr for StepMode {
    type Err = DebugError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "over" | "next" => Ok(StepMode::Over),
            "in" => Ok(StepMode::In),
            "out" => Ok(StepMode::Out),
            other => Err(DebugError::validation(format!(
                "unknown step mode '{}': expected over, in or out",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StepRequest {
    pub mode: StepMode,
    pub thread_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContextRequest {
    pub thread_id: Option<i64>,
    pub frame_id: Option<i64>,
    pub max_frames: Option<i64>,
}

impl ContextRequest {
    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.max_frames {
            if n <= 0 {
                return Err(DebugError::validation(format!("maxFrames must be positive, got {}", n)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct EvaluateRequest {
    pub expression: String,
    pub frame_id: Option<i64>,
    /// "repl", "watch", "hover" or "clipboard"; defaults to "repl"
    pub context: Option<String>,
}

impl EvaluateRequest {
    pub fn new(expression: impl Into<String>) -> Self {
        Self { expression: expression.into(), frame_id: None, context: None }
    }

    pub fn validate(&self) -> Result<()> {
        if self.expression.trim().is_empty() {
            return Err(DebugError::validation("expression must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SetVariableRequest {
    pub name: String,
    pub value: String,
    /// Container holding the variable; found by searching the frame's scopes when absent
    pub variables_reference: Option<i64>,
    pub frame_id: Option<i64>,
}

impl SetVariableRequest {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DebugError::validation("name must not be empty"));
        }
        if self.variables_reference.is_some_and(|r| r <= 0) {
            return Err(DebugError::validation("variablesReference must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClearBreakpointsRequest {
    pub file: Option<String>,
    pub ids: Vec<i64>,
    pub all: bool,
}

impl ClearBreakpointsRequest {
    pub fn validate(&self) -> Result<()> {
        let has_file = self.file.as_deref().is_some_and(|f| !f.trim().is_empty());
        if !has_file && self.ids.is_empty() && !self.all {
            return Err(DebugError::validation("specify at least one of file, ids or all"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoKind {
    Sources,
    Modules,
}

impl FromStr for InfoKind {
    type Err = DebugError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sources" => Ok(InfoKind::Sources),
            "modules" => Ok(InfoKind::Modules),
            other => Err(DebugError::validation(format!(
                "unknown info type '{}': expected sources or modules",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DisassembleRequest {
    pub memory_reference: String,
    pub instruction_offset: Option<i64>,
    pub instruction_count: Option<i64>,
}

impl DisassembleRequest {
    pub fn validate(&self) -> Result<()> {
        if self.memory_reference.trim().is_empty() {
            return Err(DebugError::validation("memoryReference must not be empty"));
        }
        if self.instruction_count.is_some_and(|c| c <= 0) {
            return Err(DebugError::validation("instructionCount must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_requires_path_or_pid() {
        assert!(StartRequest::launch(LaunchMode::Source, "./cmd/app").validate().is_ok());
        assert!(StartRequest::launch(LaunchMode::Binary, "  ").validate().is_err());
        assert!(StartRequest::attach(4242).validate().is_ok());
        assert!(StartRequest::attach(0).validate().is_err());

        let mut attach = StartRequest::attach(1);
        attach.process_id = None;
        let err = attach.validate().unwrap_err();
        assert!(err.to_string().contains("processId"));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("Source".parse::<LaunchMode>().unwrap(), LaunchMode::Source);
        assert_eq!(LaunchMode::Binary.delve_mode(), "exec");
        assert_eq!(LaunchMode::Attach.delve_mode(), "local");
        assert!("remote".parse::<LaunchMode>().is_err());
        assert_eq!("over".parse::<StepMode>().unwrap().command(), "next");
        assert_eq!("out".parse::<StepMode>().unwrap().command(), "stepOut");
        assert!("sideways".parse::<StepMode>().is_err());
        assert_eq!("modules".parse::<InfoKind>().unwrap(), InfoKind::Modules);
    }

    #[test]
    fn test_clear_needs_a_selector() {
        assert!(ClearBreakpointsRequest::default().validate().is_err());
        assert!(ClearBreakpointsRequest { all: true, ..Default::default() }.validate().is_ok());
        assert!(ClearBreakpointsRequest { ids: vec![2], ..Default::default() }.validate().is_ok());
        assert!(ClearBreakpointsRequest { file: Some("".into()), ..Default::default() }.validate().is_err());
    }

    #[test]
    fn test_field_validation() {
        assert!(EvaluateRequest::new(" ").validate().is_err());
        assert!(ContextRequest { max_frames: Some(0), ..Default::default() }.validate().is_err());
        let disasm = DisassembleRequest {
            memory_reference: "0x4a1b20".into(),
            instruction_offset: None,
            instruction_count: Some(-1),
        };
        assert!(disasm.validate().is_err());
    }
}
