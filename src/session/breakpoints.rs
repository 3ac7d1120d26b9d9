//! Breakpoint tables
//!
//! The adapter keeps one breakpoint table per source file and a single table of
//! function breakpoints. Every `setBreakpoints` / `setFunctionBreakpoints` request
//! REPLACES the whole table it addresses. This manager mirrors those tables locally
//! so that adding or removing one breakpoint resends the complete set.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dap::protocol::{
    Breakpoint, BreakpointsBody, FunctionBreakpoint, SetBreakpointsArguments,
    SetFunctionBreakpointsArguments, Source, SourceBreakpoint,
};
use crate::dap::CorrelationRouter;
use crate::error::{DebugError, Result};

/// Where a breakpoint is requested.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BreakpointLocation {
    Source { file: String, line: i64 },
    Function { name: String },
}

impl BreakpointLocation {
    /// Build a location from loosely typed parts. A function name wins over file+line.
    pub fn from_parts(file: Option<String>, line: Option<i64>, function: Option<String>) -> Result<Self> {
        if let Some(name) = function.filter(|f| !f.trim().is_empty()) {
            return Ok(BreakpointLocation::Function { name });
        }
        match (file.filter(|f| !f.trim().is_empty()), line) {
            (Some(file), Some(line)) if line > 0 => Ok(BreakpointLocation::Source { file, line }),
            (Some(_), Some(line)) => Err(DebugError::validation(format!(
                "line must be a positive number, got {}",
                line
            ))),
            (Some(_), None) => Err(DebugError::validation("line is required when file is given")),
            (None, _) => Err(DebugError::validation("either function or file+line is required")),
        }
    }
}

impl fmt::Display for BreakpointLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakpointLocation::Source { file, line } => write!(f, "{}:{}", file, line),
            BreakpointLocation::Function { name } => write!(f, "function {}", name),
        }
    }
}

/// A breakpoint as acknowledged by the adapter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedBreakpoint {
    /// Identity assigned by the adapter, if any
    pub id: Option<i64>,
    pub location: BreakpointLocation,
    pub verified: bool,
    /// Line the adapter actually placed the breakpoint on
    pub actual_line: Option<i64>,
    pub message: Option<String>,
}

impl TrackedBreakpoint {
    fn from_adapter(location: BreakpointLocation, reported: Option<&Breakpoint>) -> Self {
        match reported {
            Some(bp) => Self {
                id: bp.id,
                location,
                verified: bp.verified,
                actual_line: bp.line,
                message: bp.message.clone(),
            },
            None => Self {
                id: None,
                location,
                verified: false,
                actual_line: None,
                message: Some("adapter did not report this breakpoint".to_string()),
            },
        }
    }
}

impl fmt::Display for TrackedBreakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "Breakpoint {} at {}", id, self.location)?,
            None => write!(f, "Breakpoint at {}", self.location)?,
        }
        if let (BreakpointLocation::Source { line, .. }, Some(actual)) = (&self.location, self.actual_line) {
            if *line != actual {
                write!(f, " (moved to line {})", actual)?;
            }
        }
        if !self.verified {
            write!(f, " [unverified")?;
            if let Some(msg) = &self.message {
                write!(f, ": {}", msg)?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// Local mirror of the adapter's breakpoint tables.
#[derive(Debug, Default)]
pub struct BreakpointManager {
    files: BTreeMap<String, Vec<TrackedBreakpoint>>,
    functions: Vec<TrackedBreakpoint>,
}

impl BreakpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the table for `file` with exactly `lines`.
    pub async fn set_source_breakpoints(
        &mut self,
        router: &CorrelationRouter,
        file: &str,
        lines: &[i64],
    ) -> Result<Vec<TrackedBreakpoint>> {
        debug!("setBreakpoints {} -> {:?}", file, lines);
        let args = SetBreakpointsArguments {
            source: Source::from_path(file),
            breakpoints: lines.iter().map(|&line| SourceBreakpoint { line }).collect(),
        };
        let body: BreakpointsBody = router.request("setBreakpoints", &args).await?;

        // The adapter answers in request order
        let tracked: Vec<TrackedBreakpoint> = lines
            .iter()
            .enumerate()
            .map(|(i, &line)| {
                let location = BreakpointLocation::Source { file: file.to_string(), line };
                TrackedBreakpoint::from_adapter(location, body.breakpoints.get(i))
            })
            .collect();

        for bp in tracked.iter().filter(|bp| !bp.verified) {
            warn!("{}", bp);
        }

        if tracked.is_empty() {
            self.files.remove(file);
        } else {
            self.files.insert(file.to_string(), tracked.clone());
        }
        Ok(tracked)
    }

    /// Replace the function breakpoint table with exactly `names`.
    pub async fn set_function_breakpoints(
        &mut self,
        router: &CorrelationRouter,
        names: &[String],
    ) -> Result<Vec<TrackedBreakpoint>> {
        debug!("setFunctionBreakpoints -> {:?}", names);
        let args = SetFunctionBreakpointsArguments {
            breakpoints: names.iter().map(|name| FunctionBreakpoint { name: name.clone() }).collect(),
        };
        let body: BreakpointsBody = router.request("setFunctionBreakpoints", &args).await?;

        let tracked: Vec<TrackedBreakpoint> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let location = BreakpointLocation::Function { name: name.clone() };
                TrackedBreakpoint::from_adapter(location, body.breakpoints.get(i))
            })
            .collect();

        for bp in tracked.iter().filter(|bp| !bp.verified) {
            warn!("{}", bp);
        }

        self.functions = tracked.clone();
        Ok(tracked)
    }

    /// Add one breakpoint, resending the full table it belongs to.
    pub async fn add(&mut self, router: &CorrelationRouter, location: &BreakpointLocation) -> Result<TrackedBreakpoint> {
        let tracked = match location {
            BreakpointLocation::Source { file, line } => {
                let mut lines = self.lines_for(file);
                if !lines.contains(line) {
                    lines.push(*line);
                }
                self.set_source_breakpoints(router, file, &lines).await?
            }
            BreakpointLocation::Function { name } => {
                let mut names = self.function_names();
                if !names.contains(name) {
                    names.push(name.clone());
                }
                self.set_function_breakpoints(router, &names).await?
            }
        };

        let added = tracked
            .into_iter()
            .find(|bp| &bp.location == location)
            .ok_or_else(|| DebugError::UnexpectedResponse {
                command: "setBreakpoints".to_string(),
                reason: format!("{} missing from result", location),
            })?;
        info!("{}", added);
        Ok(added)
    }

    /// Remove one location from its table. Returns false if it was not present.
    pub async fn remove(&mut self, router: &CorrelationRouter, location: &BreakpointLocation) -> Result<bool> {
        if !self.contains(location) {
            return Ok(false);
        }
        match location {
            BreakpointLocation::Source { file, line } => {
                let lines: Vec<i64> = self.lines_for(file).into_iter().filter(|l| l != line).collect();
                self.set_source_breakpoints(router, file, &lines).await?;
            }
            BreakpointLocation::Function { name } => {
                let names: Vec<String> = self.function_names().into_iter().filter(|n| n != name).collect();
                self.set_function_breakpoints(router, &names).await?;
            }
        }
        Ok(true)
    }

    /// Arm a run-to breakpoint. Returns the location to disarm afterwards, or
    /// `None` when the location was already a regular breakpoint.
    pub async fn arm_temporary(
        &mut self,
        router: &CorrelationRouter,
        location: &BreakpointLocation,
    ) -> Result<Option<BreakpointLocation>> {
        if self.contains(location) {
            return Ok(None);
        }
        self.add(router, location).await?;
        Ok(Some(location.clone()))
    }

    /// Clear every breakpoint in `file`. Returns how many were removed.
    pub async fn clear_file(&mut self, router: &CorrelationRouter, file: &str) -> Result<usize> {
        let removed = self.files.get(file).map(Vec::len).unwrap_or(0);
        self.set_source_breakpoints(router, file, &[]).await?;
        Ok(removed)
    }

    /// Clear breakpoints by adapter id, resending only the tables that change.
    pub async fn clear_ids(&mut self, router: &CorrelationRouter, ids: &[i64]) -> Result<usize> {
        let matches = |bp: &TrackedBreakpoint| bp.id.is_some_and(|id| ids.contains(&id));
        let mut removed = 0;

        let affected_files: Vec<String> = self
            .files
            .iter()
            .filter(|(_, bps)| bps.iter().any(matches))
            .map(|(file, _)| file.clone())
            .collect();
        for file in affected_files {
            let keep: Vec<i64> = self.files[&file]
                .iter()
                .filter(|bp| !matches(bp))
                .filter_map(|bp| match &bp.location {
                    BreakpointLocation::Source { line, .. } => Some(*line),
                    BreakpointLocation::Function { .. } => None,
                })
                .collect();
            removed += self.files[&file].len() - keep.len();
            self.set_source_breakpoints(router, &file, &keep).await?;
        }

        if self.functions.iter().any(matches) {
            let keep: Vec<String> = self
                .functions
                .iter()
                .filter(|bp| !matches(bp))
                .filter_map(|bp| match &bp.location {
                    BreakpointLocation::Function { name } => Some(name.clone()),
                    BreakpointLocation::Source { .. } => None,
                })
                .collect();
            removed += self.functions.len() - keep.len();
            self.set_function_breakpoints(router, &keep).await?;
        }

        Ok(removed)
    }

    /// Clear the function table and every tracked file table.
    pub async fn clear_all(&mut self, router: &CorrelationRouter) -> Result<usize> {
        let removed = self.len();
        self.set_function_breakpoints(router, &[]).await?;
        let files: Vec<String> = self.files.keys().cloned().collect();
        for file in files {
            self.set_source_breakpoints(router, &file, &[]).await?;
        }
        Ok(removed)
    }

    pub fn contains(&self, location: &BreakpointLocation) -> bool {
        match location {
            BreakpointLocation::Source { file, line } => self.lines_for(file).contains(line),
            BreakpointLocation::Function { name } => self.function_names().contains(name),
        }
    }

    pub fn lines_for(&self, file: &str) -> Vec<i64> {
        self.files
            .get(file)
            .map(|bps| {
                bps.iter()
                    .filter_map(|bp| match &bp.location {
                        BreakpointLocation::Source { line, .. } => Some(*line),
                        BreakpointLocation::Function { .. } => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn function_names(&self) -> Vec<String> {
        self.functions
            .iter()
            .filter_map(|bp| match &bp.location {
                BreakpointLocation::Function { name } => Some(name.clone()),
                BreakpointLocation::Source { .. } => None,
            })
            .collect()
    }

    /// All tracked breakpoints, files first (sorted by path), then functions.
    pub fn list(&self) -> Vec<TrackedBreakpoint> {
        self.files
            .values()
            .flatten()
            .chain(self.functions.iter())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.files.values().map(Vec::len).sum::<usize>() + self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
