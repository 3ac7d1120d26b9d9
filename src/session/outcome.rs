//! Results returned by session operations

use std::fmt;

use serde::Serialize;

use super::breakpoints::TrackedBreakpoint;
use super::context::ContextSnapshot;
use super::requests::LaunchMode;
use crate::dap::protocol::{DisassembledInstruction, Module, Source};

/// Where a resume-type operation ended up.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Stopped(ContextSnapshot),
    Terminated { exit_code: Option<i64> },
}

impl ExecutionOutcome {
    pub fn snapshot(&self) -> Option<&ContextSnapshot> {
        match self {
            ExecutionOutcome::Stopped(snapshot) => Some(snapshot),
            ExecutionOutcome::Terminated { .. } => None,
        }
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionOutcome::Stopped(snapshot) => write!(f, "{}", snapshot),
            ExecutionOutcome::Terminated { exit_code: Some(code) } => {
                write!(f, "Program terminated (exit code {})", code)
            }
            ExecutionOutcome::Terminated { exit_code: None } => write!(f, "Program terminated"),
        }
    }
}

/// Lightweight status returned when a session starts without running.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReady {
    pub session_id: String,
    pub mode: LaunchMode,
    pub target: String,
    pub stopped_on_entry: bool,
    pub breakpoints: Vec<TrackedBreakpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StartOutcome {
    Ready(SessionReady),
    Ran(ExecutionOutcome),
}

impl fmt::Display for StartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartOutcome::Ready(ready) => {
                writeln!(f, "Debug session started for {} ({} mode).", ready.target, ready.mode)?;
                if ready.stopped_on_entry {
                    writeln!(f, "Stopped at program entry.")?;
                }
                for bp in &ready.breakpoints {
                    writeln!(f, "{}", bp)?;
                }
                write!(f, "Use 'breakpoint' to set breakpoints and 'continue' to run.")
            }
            StartOutcome::Ran(outcome) => write!(f, "{}", outcome),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StopOutcome {
    NothingToStop,
    Stopped { session_id: String, target: String },
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOutcome::NothingToStop => write!(f, "No debug session is active. Nothing to stop."),
            StopOutcome::Stopped { target, .. } => write!(f, "Debug session for {} stopped.", target),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluateOutcome {
    pub expression: String,
    pub result: String,
    pub type_name: Option<String>,
    pub variables_reference: i64,
}

impl fmt::Display for EvaluateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.type_name {
            Some(t) if !t.is_empty() => write!(f, "{} ({}) = {}", self.expression, t, self.result),
            _ => write!(f, "{} = {}", self.expression, self.result),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetVariableOutcome {
    pub name: String,
    pub value: String,
    pub type_name: Option<String>,
}

impl fmt::Display for SetVariableOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.type_name {
            Some(t) if !t.is_empty() => write!(f, "Set {} ({}) = {}", self.name, t, self.value),
            _ => write!(f, "Set {} = {}", self.name, self.value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum InfoListing {
    Sources(Vec<Source>),
    Modules(Vec<Module>),
}

impl fmt::Display for InfoListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfoListing::Sources(sources) => {
                writeln!(f, "## Loaded Sources ({})", sources.len())?;
                for (i, source) in sources.iter().enumerate() {
                    let shown = source.path.as_deref().or(source.name.as_deref()).unwrap_or("<unnamed>");
                    writeln!(f, "{}. {}", i + 1, shown)?;
                }
            }
            InfoListing::Modules(modules) => {
                writeln!(f, "## Modules ({})", modules.len())?;
                for (i, module) in modules.iter().enumerate() {
                    match &module.path {
                        Some(path) => writeln!(f, "{}. {} ({})", i + 1, module.name, path)?,
                        None => writeln!(f, "{}. {}", i + 1, module.name)?,
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Disassembly {
    pub memory_reference: String,
    pub instructions: Vec<DisassembledInstruction>,
}

impl fmt::Display for Disassembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "## Disassembly at {}", self.memory_reference)?;
        for (i, ins) in self.instructions.iter().enumerate() {
            write!(f, "{:>3}. {}  {}", i + 1, ins.address, ins.instruction)?;
            if let Some(symbol) = &ins.symbol {
                write!(f, "  <{}>", symbol)?;
            }
            if let (Some(source), Some(line)) = (&ins.location, ins.line) {
                if let Some(path) = source.path.as_deref().or(source.name.as_deref()) {
                    write!(f, "  ; {}:{}", path, line)?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: String,
    pub session_id: Option<String>,
    pub mode: Option<LaunchMode>,
    pub target: Option<String>,
    pub args: Vec<String>,
    pub port: Option<u16>,
    pub started_at: Option<String>,
    pub thread_id: Option<i64>,
    pub frame_id: Option<i64>,
    pub breakpoints: Vec<TrackedBreakpoint>,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "## Session")?;
        writeln!(f, "State: {}", self.state)?;
        let Some(id) = &self.session_id else {
            return write!(f, "No active debug session.");
        };
        writeln!(f, "Session ID: {}", id)?;
        if let Some(mode) = self.mode {
            writeln!(f, "Mode: {}", mode)?;
        }
        if let Some(target) = &self.target {
            writeln!(f, "Target: {}", target)?;
        }
        if !self.args.is_empty() {
            writeln!(f, "Args: {:?}", self.args)?;
        }
        if let Some(port) = self.port {
            writeln!(f, "Adapter port: {}", port)?;
        }
        if let Some(started) = &self.started_at {
            writeln!(f, "Started: {}", started)?;
        }
        if let Some(thread) = self.thread_id {
            writeln!(f, "Thread: {}", thread)?;
        }
        writeln!(f, "\n## Breakpoints ({})", self.breakpoints.len())?;
        for bp in &self.breakpoints {
            writeln!(f, "{}", bp)?;
        }
        Ok(())
    }
}
