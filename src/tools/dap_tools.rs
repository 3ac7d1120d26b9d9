//! RMCP 0.3.2 implementation of the debugging tools
//!
//! Every tool maps onto one [`SessionController`] operation and renders its
//! result as markdown text.

use rmcp::{
    tool, tool_handler, tool_router, ServerHandler,
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::*,
    service::RequestContext,
    ErrorData as McpError,
    RoleServer,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use super::types::*;
use crate::error::DebugError;
use crate::session::{ClearBreakpointsRequest, SessionController};

/// DAP debug tool handler
#[derive(Clone)]
pub struct DapDebugToolHandler {
    #[allow(dead_code)]
    tool_router: ToolRouter<DapDebugToolHandler>,
    controller: Arc<SessionController>,
}

impl DapDebugToolHandler {
    pub fn new(controller: Arc<SessionController>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            controller,
        }
    }

    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }
}

/// Caller mistakes become `invalid_params`; everything else is an internal error.
fn to_mcp_error(error: DebugError) -> McpError {
    match error {
        DebugError::Validation(_)
        | DebugError::NoActiveSession
        | DebugError::InvalidState { .. }
        | DebugError::NotFound(_) => McpError::invalid_params(error.to_string(), None),
        other => {
            warn!("Tool failed: {}", other);
            McpError::internal_error(other.to_string(), None)
        }
    }
}

fn text(message: impl Into<String>) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(message.into())]))
}

#[tool_router]
impl DapDebugToolHandler {
    // =========================================================================
    // Session Management
    // =========================================================================

    #[tool(description = "Start a debug session. mode is 'source' (build and debug a Go package at path), 'binary' (debug the executable at path) or 'attach' (attach to processId). With breakpoints and without stopOnEntry the program runs to the first breakpoint and the current context is returned.")]
    async fn debug(&self, Parameters(args): Parameters<DebugArgs>) -> Result<CallToolResult, McpError> {
        let request = args.into_request().map_err(to_mcp_error)?;
        let outcome = self.controller.start(request).await.map_err(to_mcp_error)?;
        text(outcome.to_string())
    }

    #[tool(description = "Stop the debug session, terminating the debuggee and the debug adapter. Safe to call when no session is active.")]
    async fn stop(&self) -> Result<CallToolResult, McpError> {
        let outcome = self.controller.stop().await;
        text(outcome.to_string())
    }

    #[tool(description = "Restart the program with optional new command line arguments. Breakpoints are kept; use 'continue' to run.")]
    async fn restart(&self, Parameters(args): Parameters<RestartArgs>) -> Result<CallToolResult, McpError> {
        let ready = self.controller.restart(args.args).await.map_err(to_mcp_error)?;
        text(format!("Restarted debugging session for {}", ready.target))
    }

    #[tool(description = "Show the session state, target and breakpoint table")]
    async fn status(&self) -> Result<CallToolResult, McpError> {
        let status = self.controller.status().await;
        text(status.to_string())
    }

    // =========================================================================
    // Breakpoints
    // =========================================================================

    #[tool(description = "Set a breakpoint at file+line or at a function. Existing breakpoints are kept.")]
    async fn breakpoint(&self, Parameters(args): Parameters<BreakpointArgs>) -> Result<CallToolResult, McpError> {
        let location = args.to_location().map_err(to_mcp_error)?;
        let breakpoint = self.controller.set_breakpoint(location).await.map_err(to_mcp_error)?;
        text(breakpoint.to_string())
    }

    #[tool(description = "Clear breakpoints in a file, by id, or all of them")]
    async fn clear_breakpoints(&self, Parameters(args): Parameters<ClearBreakpointsArgs>) -> Result<CallToolResult, McpError> {
        let removed = self
            .controller
            .clear_breakpoints(ClearBreakpointsRequest::from(args))
            .await
            .map_err(to_mcp_error)?;
        text(format!("Cleared {} breakpoint(s)", removed))
    }

    // =========================================================================
    // Execution Control
    // =========================================================================

    #[tool(name = "continue", description = "Continue execution until the next breakpoint or program exit. Optionally run to a location ('to') first. Returns the context at the stop.")]
    async fn continue_execution(&self, Parameters(args): Parameters<ContinueArgs>) -> Result<CallToolResult, McpError> {
        let request = args.into_request().map_err(to_mcp_error)?;
        let outcome = self.controller.continue_execution(request).await.map_err(to_mcp_error)?;
        text(outcome.to_string())
    }

    #[tool(description = "Step over (default), into or out of the current line and return the new context")]
    async fn step(&self, Parameters(args): Parameters<StepArgs>) -> Result<CallToolResult, McpError> {
        let request = args.into_request().map_err(to_mcp_error)?;
        let outcome = self.controller.step(request).await.map_err(to_mcp_error)?;
        text(outcome.to_string())
    }

    #[tool(description = "Pause a running thread. Returns once the request is acknowledged; use 'context' to inspect the stop.")]
    async fn pause(&self, Parameters(args): Parameters<PauseArgs>) -> Result<CallToolResult, McpError> {
        self.controller.pause(args.thread_id).await.map_err(to_mcp_error)?;
        text(format!("Pause requested for thread {}", args.thread_id))
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    #[tool(description = "Get the current location, stack trace and variables")]
    async fn context(&self, Parameters(args): Parameters<ContextArgs>) -> Result<CallToolResult, McpError> {
        let snapshot = self.controller.context(args.into()).await.map_err(to_mcp_error)?;
        text(snapshot.to_string())
    }

    #[tool(description = "Evaluate an expression in the current (or given) frame")]
    async fn evaluate(&self, Parameters(args): Parameters<EvaluateArgs>) -> Result<CallToolResult, McpError> {
        let outcome = self.controller.evaluate(args.into()).await.map_err(to_mcp_error)?;
        text(outcome.to_string())
    }

    #[tool(description = "Change the value of a variable in the current (or given) frame")]
    async fn set_variable(&self, Parameters(args): Parameters<SetVariableArgs>) -> Result<CallToolResult, McpError> {
        let outcome = self.controller.set_variable(args.into()).await.map_err(to_mcp_error)?;
        text(outcome.to_string())
    }

    #[tool(description = "List loaded sources ('sources') or modules ('modules') of the program")]
    async fn info(&self, Parameters(args): Parameters<InfoArgs>) -> Result<CallToolResult, McpError> {
        let kind = args.kind().map_err(to_mcp_error)?;
        let listing = self.controller.info(kind).await.map_err(to_mcp_error)?;
        text(listing.to_string())
    }

    #[tool(description = "Disassemble instructions starting at a memory reference")]
    async fn disassemble(&self, Parameters(args): Parameters<DisassembleArgs>) -> Result<CallToolResult, McpError> {
        let disassembly = self.controller.disassemble(args.into()).await.map_err(to_mcp_error)?;
        text(disassembly.to_string())
    }
}

#[tool_handler]
impl ServerHandler for DapDebugToolHandler {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some("Debug Go programs through Delve's Debug Adapter Protocol server. Start with 'debug', set breakpoints with 'breakpoint', run with 'continue' or 'step', inspect with 'context' and 'evaluate', and finish with 'stop'. Tools: debug, stop, restart, status, breakpoint, clear_breakpoints, continue, step, pause, context, evaluate, set_variable, info, disassemble.".to_string()),
        }
    }

    async fn initialize(
        &self,
        _request: InitializeRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, McpError> {
        info!("dap-debug MCP server initialized");
        Ok(self.get_info())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_mapping() {
        let err = to_mcp_error(DebugError::NoActiveSession);
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);

        let err = to_mcp_error(DebugError::Timeout(Duration::from_secs(1)));
        assert_eq!(err.code, ErrorCode::INTERNAL_ERROR);

        let err = to_mcp_error(DebugError::Protocol {
            command: "evaluate".into(),
            message: "could not find symbol value for nope".into(),
        });
        assert!(err.message.contains("could not find symbol"));
    }
}
