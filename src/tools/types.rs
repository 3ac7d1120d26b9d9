//! Type definitions for dap-debug MCP tools

use schemars::JsonSchema;
use serde::Deserialize;

use crate::error::Result;
use crate::session::{
    BreakpointLocation, ClearBreakpointsRequest, ContextRequest, ContinueRequest, DisassembleRequest,
    EvaluateRequest, InfoKind, LaunchMode, SetVariableRequest, StartRequest, StepRequest,
};

// ============================================================================
// shared
// ============================================================================

/// A source line or a function
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct BreakpointSpec {
    /// Absolute path of the source file
    #[serde(default)]
    pub file: Option<String>,
    /// 1-based line number (required with file)
    #[serde(default)]
    pub line: Option<i64>,
    /// Fully qualified function name (e.g., "main.main"); takes precedence over file+line
    #[serde(default)]
    pub function: Option<String>,
}

impl BreakpointSpec {
    pub fn to_location(&self) -> Result<BreakpointLocation> {
        BreakpointLocation::from_parts(self.file.clone(), self.line, self.function.clone())
    }
}

// ============================================================================
// debug
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DebugArgs {
    /// "source" (build and debug a Go package), "binary" (debug an executable) or "attach"
    pub mode: String,
    /// Package directory or executable (required for source and binary)
    #[serde(default)]
    pub path: Option<String>,
    /// Process to attach to (required for attach)
    #[serde(default, alias = "processId")]
    pub process_id: Option<i64>,
    /// Command line arguments for the program
    #[serde(default)]
    pub args: Vec<String>,
    /// Initial breakpoints. Without any, the program stops at entry.
    #[serde(default)]
    pub breakpoints: Vec<BreakpointSpec>,
    /// Stop at program entry instead of running to the first breakpoint
    #[serde(default, alias = "stopOnEntry")]
    pub stop_on_entry: bool,
    /// Port for the DAP server (default from configuration, 9090)
    #[serde(default)]
    pub port: Option<u16>,
}

impl DebugArgs {
    pub fn into_request(self) -> Result<StartRequest> {
        let mode: LaunchMode = self.mode.parse()?;
        let breakpoints = self
            .breakpoints
            .iter()
            .map(BreakpointSpec::to_location)
            .collect::<Result<Vec<_>>>()?;
        Ok(StartRequest {
            mode,
            path: self.path,
            process_id: self.process_id,
            args: self.args,
            breakpoints,
            stop_on_entry: self.stop_on_entry,
            port: self.port,
        })
    }
}

// ============================================================================
// breakpoint / clear_breakpoints
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BreakpointArgs {
    /// Absolute path of the source file
    #[serde(default)]
    pub file: Option<String>,
    /// 1-based line number (required with file)
    #[serde(default)]
    pub line: Option<i64>,
    /// Function name; takes precedence over file+line
    #[serde(default)]
    pub function: Option<String>,
}

impl BreakpointArgs {
    pub fn to_location(&self) -> Result<BreakpointLocation> {
        BreakpointLocation::from_parts(self.file.clone(), self.line, self.function.clone())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ClearBreakpointsArgs {
    /// Clear every breakpoint in this file
    #[serde(default)]
    pub file: Option<String>,
    /// Clear breakpoints with these ids
    #[serde(default)]
    pub ids: Vec<i64>,
    /// Clear all breakpoints
    #[serde(default)]
    pub all: bool,
}

impl From<ClearBreakpointsArgs> for ClearBreakpointsRequest {
    fn from(args: ClearBreakpointsArgs) -> Self {
        Self { file: args.file, ids: args.ids, all: args.all }
    }
}

// ============================================================================
// continue / step / pause
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ContinueArgs {
    /// Thread to resume (default: current thread)
    #[serde(default, alias = "threadId")]
    pub thread_id: Option<i64>,
    /// Run to this location, then remove the temporary breakpoint
    #[serde(default)]
    pub to: Option<BreakpointSpec>,
}

impl ContinueArgs {
    pub fn into_request(self) -> Result<ContinueRequest> {
        let to = self.to.as_ref().map(BreakpointSpec::to_location).transpose()?;
        Ok(ContinueRequest { thread_id: self.thread_id, to })
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StepArgs {
    /// "over" (default), "in" or "out"
    #[serde(default = "default_step_mode")]
    pub mode: String,
    /// Thread to step (default: current thread)
    #[serde(default, alias = "threadId")]
    pub thread_id: Option<i64>,
}

fn default_step_mode() -> String { "over".to_string() }

impl StepArgs {
    pub fn into_request(self) -> Result<StepRequest> {
        Ok(StepRequest { mode: self.mode.parse()?, thread_id: self.thread_id })
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PauseArgs {
    /// Thread to pause
    #[serde(alias = "threadId")]
    pub thread_id: i64,
}

// ============================================================================
// context / evaluate / set_variable
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ContextArgs {
    /// Thread to inspect (default: current thread)
    #[serde(default, alias = "threadId")]
    pub thread_id: Option<i64>,
    /// Frame to focus on (default: top frame)
    #[serde(default, alias = "frameId")]
    pub frame_id: Option<i64>,
    /// Maximum stack frames (default: 20)
    #[serde(default, alias = "maxFrames")]
    pub max_frames: Option<i64>,
}

impl From<ContextArgs> for ContextRequest {
    fn from(args: ContextArgs) -> Self {
        Self { thread_id: args.thread_id, frame_id: args.frame_id, max_frames: args.max_frames }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EvaluateArgs {
    /// Expression to evaluate
    pub expression: String,
    /// Frame to evaluate in (default: current frame)
    #[serde(default, alias = "frameId", alias = "frameID")]
    pub frame_id: Option<i64>,
    /// Evaluation context: "repl" (default), "watch", "hover" or "clipboard"
    #[serde(default)]
    pub context: Option<String>,
}

impl From<EvaluateArgs> for EvaluateRequest {
    fn from(args: EvaluateArgs) -> Self {
        Self { expression: args.expression, frame_id: args.frame_id, context: args.context }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetVariableArgs {
    /// Variable name
    pub name: String,
    /// New value, in Go syntax
    pub value: String,
    /// Frame whose scopes are searched for the variable (default: current frame)
    #[serde(default, alias = "frameId")]
    pub frame_id: Option<i64>,
    /// Container holding the variable; skips the scope search
    #[serde(default, alias = "variablesReference")]
    pub variables_reference: Option<i64>,
}

impl From<SetVariableArgs> for SetVariableRequest {
    fn from(args: SetVariableArgs) -> Self {
        Self {
            name: args.name,
            value: args.value,
            variables_reference: args.variables_reference,
            frame_id: args.frame_id,
        }
    }
}

// ============================================================================
// restart / info / disassemble
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RestartArgs {
    /// New command line arguments; omit to reuse the previous ones
    #[serde(default)]
    pub args: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct InfoArgs {
    /// "sources" or "modules"
    #[serde(rename = "type")]
    pub info_type: String,
}

impl InfoArgs {
    pub fn kind(&self) -> Result<InfoKind> {
        self.info_type.parse()
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DisassembleArgs {
    /// Memory reference to start at (e.g., an instruction pointer reference)
    #[serde(alias = "memoryReference")]
    pub memory_reference: String,
    /// Offset in instructions from the reference (default: 0)
    #[serde(default, alias = "instructionOffset")]
    pub instruction_offset: Option<i64>,
    /// Number of instructions (default: 20)
    #[serde(default, alias = "instructionCount")]
    pub instruction_count: Option<i64>,
}

impl From<DisassembleArgs> for DisassembleRequest {
    fn from(args: DisassembleArgs) -> Self {
        Self {
            memory_reference: args.memory_reference,
            instruction_offset: args.instruction_offset,
            instruction_count: args.instruction_count,
        }
    }
}
