//! Snapshot aggregation
//!
//! One snapshot is composed from several round trips: `stackTrace`, then `scopes`
//! for the focus frame, then `variables` for each scope. Only the stack is
//! mandatory; the rest degrades inline.

use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::dap::protocol::{
    ExceptionInfoBody, ScopesArguments, ScopesBody, StackFrame, StackTraceArguments, StackTraceBody,
    ThreadArguments, Variable, VariablesArguments, VariablesBody,
};
use crate::dap::CorrelationRouter;
use crate::error::Result;

/// One entry of the call stack.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameSummary {
    pub id: i64,
    pub name: String,
    pub file: Option<String>,
    pub line: i64,
    /// Frame belongs to the runtime rather than user code
    pub runtime_internal: bool,
}

impl From<&StackFrame> for FrameSummary {
    fn from(frame: &StackFrame) -> Self {
        Self {
            id: frame.id,
            name: frame.name.clone(),
            file: frame
                .source
                .as_ref()
                .and_then(|s| s.path.clone().or_else(|| s.name.clone())),
            line: frame.line,
            runtime_internal: frame.presentation_hint.as_deref() == Some("subtle"),
        }
    }
}

impl FrameSummary {
    fn location(&self) -> String {
        match &self.file {
            Some(file) => format!("{}:{}", file, self.line),
            None => "<unknown>".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableEntry {
    pub name: String,
    pub type_name: Option<String>,
    pub value: String,
    /// Non-zero when the value has children
    pub variables_reference: i64,
}

impl From<Variable> for VariableEntry {
    fn from(var: Variable) -> Self {
        Self {
            name: var.name,
            type_name: var.type_name.filter(|t| !t.is_empty()),
            value: var.value,
            variables_reference: var.variables_reference,
        }
    }
}

impl fmt::Display for VariableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.type_name {
            Some(t) => write!(f, "{} ({}) = {}", self.name, t, self.value),
            None => write!(f, "{} = {}", self.name, self.value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScopeVariables {
    Loaded { variables: Vec<VariableEntry> },
    /// Scope has no variable container
    NotExpanded,
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeSection {
    pub name: String,
    pub variables_reference: i64,
    pub variables: ScopeVariables,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VariablesSection {
    Scopes { scopes: Vec<ScopeSection> },
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExceptionDetail {
    Available {
        id: String,
        description: Option<String>,
        break_mode: Option<String>,
    },
    Unavailable { reason: String },
}

/// Aggregated view of execution state at one point in time. Never cached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSnapshot {
    pub thread_id: i64,
    pub stop_reason: Option<String>,
    pub frames: Vec<FrameSummary>,
    pub focus_frame_id: Option<i64>,
    pub variables: VariablesSection,
    pub exception: Option<ExceptionDetail>,
}

impl ContextSnapshot {
    /// Frame the variables belong to.
    pub fn focus_frame(&self) -> Option<&FrameSummary> {
        let id = self.focus_frame_id?;
        self.frames.iter().find(|f| f.id == id)
    }

    /// Top of the stack.
    pub fn location(&self) -> Option<&FrameSummary> {
        self.frames.first()
    }

    pub fn line(&self) -> Option<i64> {
        self.location().map(|f| f.line)
    }

    /// First variable with `name` across all loaded scopes.
    pub fn variable(&self, name: &str) -> Option<&VariableEntry> {
        let VariablesSection::Scopes { scopes } = &self.variables else {
            return None;
        };
        scopes.iter().find_map(|scope| match &scope.variables {
            ScopeVariables::Loaded { variables } => variables.iter().find(|v| v.name == name),
            _ => None,
        })
    }
}

impl fmt::Display for ContextSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "## Current Location")?;
        match self.location() {
            Some(top) => {
                writeln!(f, "Function: {}", top.name)?;
                writeln!(f, "File: {}", top.location())?;
            }
            None => writeln!(f, "(no stack frames)")?,
        }
        writeln!(f, "Thread: {}", self.thread_id)?;
        if let Some(reason) = &self.stop_reason {
            writeln!(f, "Stop reason: {}", reason)?;
        }

        if let Some(exception) = &self.exception {
            writeln!(f, "\n## Exception")?;
            match exception {
                ExceptionDetail::Available { id, description, .. } => {
                    writeln!(f, "{}", id)?;
                    if let Some(desc) = description {
                        writeln!(f, "{}", desc)?;
                    }
                }
                ExceptionDetail::Unavailable { reason } => {
                    writeln!(f, "(exception details unavailable: {})", reason)?;
                }
            }
        }

        writeln!(f, "\n## Stack Trace")?;
        for (index, frame) in self.frames.iter().enumerate() {
            write!(f, "#{} (Frame ID: {}) {} at {}", index, frame.id, frame.name, frame.location())?;
            if frame.runtime_internal {
                write!(f, " (runtime)")?;
            }
            writeln!(f)?;
        }

        writeln!(f, "\n## Variables")?;
        match &self.variables {
            VariablesSection::Unavailable { reason } => {
                writeln!(f, "(variables unavailable: {})", reason)?;
            }
            VariablesSection::Scopes { scopes } => {
                for scope in scopes {
                    writeln!(f, "### {}", scope.name)?;
                    match &scope.variables {
                        ScopeVariables::Loaded { variables } if variables.is_empty() => {
                            writeln!(f, "  (none)")?;
                        }
                        ScopeVariables::Loaded { variables } => {
                            for var in variables {
                                writeln!(f, "  {}", var)?;
                            }
                        }
                        ScopeVariables::NotExpanded => writeln!(f, "  (not expanded)")?,
                        ScopeVariables::Unavailable { reason } => {
                            writeln!(f, "  (unable to retrieve variables: {})", reason)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Parameters of one snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    pub thread_id: i64,
    pub frame_id: Option<i64>,
    pub max_frames: i64,
    pub stop_reason: Option<String>,
}

/// Composes stack, scope and variable round trips into a [`ContextSnapshot`].
pub struct ContextAggregator<'a> {
    router: &'a CorrelationRouter,
}

impl<'a> ContextAggregator<'a> {
    pub fn new(router: &'a CorrelationRouter) -> Self {
        Self { router }
    }

    pub async fn snapshot(&self, req: &SnapshotRequest) -> Result<ContextSnapshot> {
        debug!(
            "Building snapshot for thread {} (frame {:?}, max {} frames)",
            req.thread_id, req.frame_id, req.max_frames
        );

        // Without a stack there is no location: this one is fatal
        let stack: StackTraceBody = self
            .router
            .request(
                "stackTrace",
                &StackTraceArguments {
                    thread_id: req.thread_id,
                    start_frame: 0,
                    levels: req.max_frames,
                },
            )
            .await?;
        let frames: Vec<FrameSummary> = stack.stack_frames.iter().map(FrameSummary::from).collect();

        // An explicit frame may lie below the fetched window; the adapter judges it
        let focus_frame_id = req.frame_id.or_else(|| frames.first().map(|f| f.id));

        let variables = match focus_frame_id {
            Some(frame_id) => self.variables_for(frame_id).await?,
            None => VariablesSection::Unavailable { reason: "no stack frames".to_string() },
        };

        let exception = if req.stop_reason.as_deref() == Some("exception") {
            Some(self.exception_detail(req.thread_id).await?)
        } else {
            None
        };

        Ok(ContextSnapshot {
            thread_id: req.thread_id,
            stop_reason: req.stop_reason.clone(),
            frames,
            focus_frame_id,
            variables,
            exception,
        })
    }

    /// Adapter refusals degrade inline; a dead or hung connection is returned as an error.
    async fn variables_for(&self, frame_id: i64) -> Result<VariablesSection> {
        let scopes: ScopesBody = match self.router.request("scopes", &ScopesArguments { frame_id }).await {
            Ok(body) => body,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("scopes for frame {} unavailable: {}", frame_id, e);
                return Ok(VariablesSection::Unavailable { reason: e.to_string() });
            }
        };

        let mut sections = Vec::with_capacity(scopes.scopes.len());
        for scope in scopes.scopes {
            let variables = if scope.variables_reference == 0 {
                ScopeVariables::NotExpanded
            } else {
                self.scope_variables(&scope.name, scope.variables_reference).await?
            };
            sections.push(ScopeSection {
                name: scope.name,
                variables_reference: scope.variables_reference,
                variables,
            });
        }
        Ok(VariablesSection::Scopes { scopes: sections })
    }

    async fn scope_variables(&self, scope: &str, variables_reference: i64) -> Result<ScopeVariables> {
        let result: Result<VariablesBody> = self
            .router
            .request("variables", &VariablesArguments { variables_reference })
            .await;
        match result {
            Ok(body) => Ok(ScopeVariables::Loaded {
                variables: body.variables.into_iter().map(VariableEntry::from).collect(),
            }),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("variables for scope '{}' unavailable: {}", scope, e);
                Ok(ScopeVariables::Unavailable { reason: e.to_string() })
            }
        }
    }

    async fn exception_detail(&self, thread_id: i64) -> Result<ExceptionDetail> {
        let result: Result<ExceptionInfoBody> = self
            .router
            .request("exceptionInfo", &ThreadArguments { thread_id })
            .await;
        match result {
            Ok(info) => Ok(ExceptionDetail::Available {
                id: info.exception_id,
                description: info.description,
                break_mode: info.break_mode,
            }),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("exceptionInfo unavailable: {}", e);
                Ok(ExceptionDetail::Unavailable { reason: e.to_string() })
            }
        }
    }
}
