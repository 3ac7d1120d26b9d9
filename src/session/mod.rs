//! Debug session lifecycle
//!
//! A [`SessionController`] owns at most one live session: the adapter process, the
//! connection to it and the breakpoint tables. Every operation takes the session
//! mutex for its whole duration, so a resume that is waiting for the program to
//! stop is never interleaved with another request.
//!
//! ```text
//! Idle → Initializing → Configuring → Running ⇄ Stopped → Terminated → Idle
//! ```

pub mod breakpoints;
pub mod context;
pub mod outcome;
pub mod process;
pub mod requests;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::dap::protocol::{
    AttachArguments, Capabilities, DisassembleArguments, DisassembleBody, DisconnectArguments,
    EvaluateArguments, EvaluateBody, EventClass, InitializeArguments, LaunchArguments,
    LoadedSourcesBody, ModulesBody, RestartArguments, ScopesArguments, ScopesBody,
    SetVariableArguments, SetVariableBody, StackTraceArguments, StackTraceBody, StoppedEventBody,
    ThreadArguments, VariablesArguments, VariablesBody,
};
use crate::dap::{CorrelationRouter, EventSubscription, ExecutionStatus};
use crate::error::{DebugError, Result};

pub use breakpoints::{BreakpointLocation, BreakpointManager, TrackedBreakpoint};
pub use context::{ContextAggregator, ContextSnapshot, SnapshotRequest};
pub use outcome::{
    Disassembly, EvaluateOutcome, ExecutionOutcome, InfoListing, SessionReady, SessionStatus,
    SetVariableOutcome, StartOutcome, StopOutcome,
};
pub use process::{AdapterConnection, AdapterLauncher, AdapterProcess, DelveLauncher};
pub use requests::{
    ClearBreakpointsRequest, ContextRequest, ContinueRequest, DisassembleRequest, EvaluateRequest,
    InfoKind, LaunchMode, SetVariableRequest, StartRequest, StepMode, StepRequest,
};

/// Upper bound for each request of a graceful shutdown.
const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Initializing,
    Configuring,
    Running,
    Stopped,
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Initializing => "initializing",
            SessionState::Configuring => "configuring",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
            SessionState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Tunables for session operations.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub default_port: u16,
    pub request_timeout: Duration,
    /// Bound on waiting for a resumed program to stop; `None` waits forever
    pub resume_timeout: Option<Duration>,
    pub max_frames: i64,
    pub default_thread_id: i64,
    pub eval_context: String,
    pub disassemble_count: i64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_port: 9090,
            request_timeout: Duration::from_secs(30),
            resume_timeout: None,
            max_frames: 20,
            default_thread_id: 1,
            eval_context: "repl".to_string(),
            disassemble_count: 20,
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_port: config.adapter.default_port,
            request_timeout: Duration::from_secs(config.session.request_timeout_secs),
            resume_timeout: config.session.resume_timeout_secs.map(Duration::from_secs),
            max_frames: config.session.default_max_frames,
            default_thread_id: config.session.default_thread_id,
            eval_context: config.session.eval_context.clone(),
            disassemble_count: config.session.default_disassemble_count,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Focus {
    thread_id: i64,
    frame_id: Option<i64>,
}

struct ActiveSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    mode: LaunchMode,
    program: Option<String>,
    process_id: Option<i64>,
    args: Vec<String>,
    port: u16,
    capabilities: Capabilities,
    router: CorrelationRouter,
    process: Option<AdapterProcess>,
    breakpoints: BreakpointManager,
    focus: Focus,
}

impl ActiveSession {
    fn target(&self) -> String {
        match (&self.program, self.process_id) {
            (Some(program), _) => program.clone(),
            (None, Some(pid)) => format!("process {}", pid),
            (None, None) => "<none>".to_string(),
        }
    }

    fn ready(&self, stopped_on_entry: bool) -> SessionReady {
        SessionReady {
            session_id: self.id.to_string(),
            mode: self.mode,
            target: self.target(),
            stopped_on_entry,
            breakpoints: self.breakpoints.list(),
        }
    }
}

struct SessionSlot {
    state: SessionState,
    active: Option<ActiveSession>,
}

/// Tears the session down if a resume wait is abandoned mid-flight.
struct CancelGuard<'a> {
    slot: &'a mut SessionSlot,
    armed: bool,
}

impl<'a> CancelGuard<'a> {
    fn new(slot: &'a mut SessionSlot) -> Self {
        Self { slot, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Dropping the session closes the connection and kills the adapter
        if let Some(session) = self.slot.active.take() {
            warn!("Resume wait cancelled; closing debug session {}", session.id);
        }
        self.slot.state = SessionState::Idle;
    }
}

fn active_mut(active: &mut Option<ActiveSession>) -> Result<&mut ActiveSession> {
    active.as_mut().ok_or(DebugError::NoActiveSession)
}

fn require(slot: &SessionSlot, allowed: &[SessionState], action: &str) -> Result<()> {
    if slot.active.is_none() {
        return Err(DebugError::NoActiveSession);
    }
    if allowed.contains(&slot.state) {
        return Ok(());
    }
    let reason = match slot.state {
        SessionState::Running => format!("cannot {} while the program is running; use 'pause' first", action),
        SessionState::Terminated => format!("cannot {} after the program terminated; use 'restart' or 'stop'", action),
        _ => format!("cannot {} yet", action),
    };
    Err(DebugError::InvalidState { state: slot.state.to_string(), reason })
}

/// Drives one debug adapter session at a time.
pub struct SessionController {
    launcher: Arc<dyn AdapterLauncher>,
    settings: SessionSettings,
    slot: Mutex<SessionSlot>,
}

impl SessionController {
    pub fn new(launcher: Arc<dyn AdapterLauncher>, settings: SessionSettings) -> Self {
        Self {
            launcher,
            settings,
            slot: Mutex::new(SessionSlot { state: SessionState::Idle, active: None }),
        }
    }

    /// Controller launching Delve as configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        let launcher = DelveLauncher::from_config(config)?;
        Ok(Self::new(Arc::new(launcher), SessionSettings::from_config(config)))
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub async fn state(&self) -> SessionState {
        let mut guard = self.slot.lock().await;
        self.reconcile(&mut guard).await;
        guard.state
    }

    pub async fn status(&self) -> SessionStatus {
        let mut guard = self.slot.lock().await;
        let slot = &mut *guard;
        self.reconcile(slot).await;

        let state = slot.state.to_string();
        match &slot.active {
            None => SessionStatus {
                state,
                session_id: None,
                mode: None,
                target: None,
                args: Vec::new(),
                port: None,
                started_at: None,
                thread_id: None,
                frame_id: None,
                breakpoints: Vec::new(),
            },
            Some(session) => SessionStatus {
                state,
                session_id: Some(session.id.to_string()),
                mode: Some(session.mode),
                target: Some(session.target()),
                args: session.args.clone(),
                port: Some(session.port),
                started_at: Some(session.started_at.to_rfc3339()),
                thread_id: Some(session.focus.thread_id),
                frame_id: session.focus.frame_id,
                breakpoints: session.breakpoints.list(),
            },
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Launch the adapter and bring a debuggee under control.
    pub async fn start(&self, req: StartRequest) -> Result<StartOutcome> {
        req.validate()?;

        let mut guard = self.slot.lock().await;
        let slot = &mut *guard;
        if slot.active.is_some() {
            info!("Stopping the active session before starting a new one");
            self.teardown(slot, true).await;
        }

        let port = req.port.unwrap_or(self.settings.default_port);
        info!("Starting {} session for {} on port {}", req.mode, req.target(), port);
        slot.state = SessionState::Initializing;

        let result = self.bring_up(slot, &req, port).await;
        if let Err(e) = &result {
            error!("Failed to start debug session: {}", e);
            let configured = matches!(slot.state, SessionState::Running | SessionState::Stopped);
            if !configured || e.is_fatal() {
                self.teardown(slot, false).await;
            }
        }
        result
    }

    async fn bring_up(&self, slot: &mut SessionSlot, req: &StartRequest, port: u16) -> Result<StartOutcome> {
        let connection = self.launcher.launch(port).await?;
        let router = CorrelationRouter::new(connection.channel, self.settings.request_timeout);

        let session = slot.active.insert(ActiveSession {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            mode: req.mode,
            program: req.path.clone(),
            process_id: req.process_id,
            args: req.args.clone(),
            port,
            capabilities: Capabilities::default(),
            router,
            process: connection.process,
            breakpoints: BreakpointManager::new(),
            focus: Focus { thread_id: self.settings.default_thread_id, frame_id: None },
        });

        // Subscribe first: `initialized` may follow the initialize response immediately
        let mut events = session.router.subscribe()?;
        session.capabilities = session
            .router
            .request("initialize", &InitializeArguments::default())
            .await?;
        slot.state = SessionState::Configuring;

        let stop_on_entry = req.stop_on_entry || req.breakpoints.is_empty();
        match req.mode {
            LaunchMode::Attach => {
                let args = AttachArguments {
                    request: "attach".to_string(),
                    mode: req.mode.delve_mode().to_string(),
                    process_id: req.process_id.unwrap_or_default(),
                    stop_on_entry,
                };
                session.router.request_ack("attach", &args).await?;
            }
            LaunchMode::Source | LaunchMode::Binary => {
                let args = LaunchArguments {
                    request: "launch".to_string(),
                    mode: req.mode.delve_mode().to_string(),
                    program: req.path.clone().unwrap_or_default(),
                    stop_on_entry,
                    args: req.args.clone(),
                    rebuild: None,
                };
                session.router.request_ack("launch", &args).await?;
            }
        }

        match events
            .next_matching_within(&[EventClass::Initialized], Some(self.settings.request_timeout))
            .await
        {
            Ok(_) => debug!("Adapter initialized"),
            Err(DebugError::Timeout(limit)) => {
                warn!("No 'initialized' event within {:?}; configuring anyway", limit)
            }
            Err(e) => return Err(e),
        }

        // Each set replaces a whole table, so group initial breakpoints per table
        let mut files: BTreeMap<String, Vec<i64>> = BTreeMap::new();
        let mut functions = Vec::new();
        for location in &req.breakpoints {
            match location {
                BreakpointLocation::Source { file, line } => {
                    let lines = files.entry(file.clone()).or_default();
                    if !lines.contains(line) {
                        lines.push(*line);
                    }
                }
                BreakpointLocation::Function { name } => {
                    if !functions.contains(name) {
                        functions.push(name.clone());
                    }
                }
            }
        }
        for (file, lines) in &files {
            session.breakpoints.set_source_breakpoints(&session.router, file, lines).await?;
        }
        if !functions.is_empty() {
            session.breakpoints.set_function_breakpoints(&session.router, &functions).await?;
        }

        if !stop_on_entry {
            // configurationDone itself sets the program running
            session.router.set_status(ExecutionStatus::Running);
        }
        session.router.request_ack("configurationDone", &json!({})).await?;
        info!("Debug session {} configured ({} breakpoint(s))", session.id, session.breakpoints.len());

        if stop_on_entry {
            slot.state = SessionState::Stopped;
            return Ok(StartOutcome::Ready(session.ready(true)));
        }

        slot.state = SessionState::Running;
        let outcome = self.await_stop(slot, self.settings.default_thread_id, events).await?;
        Ok(StartOutcome::Ran(outcome))
    }

    /// Re-launch the debuggee, optionally with new arguments.
    pub async fn restart(&self, args: Option<Vec<String>>) -> Result<SessionReady> {
        let mut guard = self.slot.lock().await;
        let slot = &mut *guard;
        self.reconcile(slot).await;
        let result = self.restart_inner(slot, args).await;
        self.settle(slot, result).await
    }

    async fn restart_inner(&self, slot: &mut SessionSlot, args: Option<Vec<String>>) -> Result<SessionReady> {
        require(
            slot,
            &[SessionState::Running, SessionState::Stopped, SessionState::Terminated],
            "restart",
        )?;
        let session = active_mut(&mut slot.active)?;
        if session.mode.is_attach() {
            return Err(DebugError::validation("restart is only supported for launched programs, not attach sessions"));
        }

        let args = args.unwrap_or_else(|| session.args.clone());
        let launch = LaunchArguments {
            request: "launch".to_string(),
            mode: session.mode.delve_mode().to_string(),
            program: session.program.clone().unwrap_or_default(),
            stop_on_entry: false,
            args: args.clone(),
            rebuild: Some(false),
        };

        let previous = slot.state;
        slot.state = SessionState::Configuring;
        info!("Restarting {} with args {:?}", session.target(), args);
        if let Err(e) = session.router.request_ack("restart", &RestartArguments { arguments: launch }).await {
            slot.state = previous;
            return Err(e);
        }

        // Frame ids and variable references from before the restart are stale
        session.args = args;
        session.focus = Focus { thread_id: self.settings.default_thread_id, frame_id: None };
        session.router.set_status(ExecutionStatus::Unknown);
        slot.state = SessionState::Stopped;
        Ok(session.ready(false))
    }

    /// End the session. Never fails; with no session this is a no-op.
    pub async fn stop(&self) -> StopOutcome {
        let mut guard = self.slot.lock().await;
        let slot = &mut *guard;
        let Some(session) = slot.active.as_ref() else {
            slot.state = SessionState::Idle;
            debug!("stop: no active session");
            return StopOutcome::NothingToStop;
        };

        let outcome = StopOutcome::Stopped {
            session_id: session.id.to_string(),
            target: session.target(),
        };
        self.teardown(slot, true).await;
        outcome
    }

    // ========================================================================
    // Breakpoints
    // ========================================================================

    /// Add one breakpoint; the rest of its table is kept.
    pub async fn set_breakpoint(&self, location: BreakpointLocation) -> Result<TrackedBreakpoint> {
        let mut guard = self.slot.lock().await;
        let slot = &mut *guard;
        self.reconcile(slot).await;
        let result = match active_mut(&mut slot.active) {
            Ok(session) => session.breakpoints.add(&session.router, &location).await,
            Err(e) => Err(e),
        };
        self.settle(slot, result).await
    }

    /// Replace every breakpoint in `file` with exactly `lines`.
    pub async fn set_file_breakpoints(&self, file: &str, lines: &[i64]) -> Result<Vec<TrackedBreakpoint>> {
        if file.trim().is_empty() {
            return Err(DebugError::validation("file must not be empty"));
        }
        if let Some(bad) = lines.iter().find(|&&l| l <= 0) {
            return Err(DebugError::validation(format!("line must be a positive number, got {}", bad)));
        }

        let mut guard = self.slot.lock().await;
        let slot = &mut *guard;
        self.reconcile(slot).await;
        let result = match active_mut(&mut slot.active) {
            Ok(session) => session.breakpoints.set_source_breakpoints(&session.router, file, lines).await,
            Err(e) => Err(e),
        };
        self.settle(slot, result).await
    }

    /// Returns how many breakpoints were removed.
    pub async fn clear_breakpoints(&self, req: ClearBreakpointsRequest) -> Result<usize> {
        req.validate()?;

        let mut guard = self.slot.lock().await;
        let slot = &mut *guard;
        self.reconcile(slot).await;
        let result = Self::clear_inner(slot, &req).await;
        self.settle(slot, result).await
    }

    async fn clear_inner(slot: &mut SessionSlot, req: &ClearBreakpointsRequest) -> Result<usize> {
        let session = active_mut(&mut slot.active)?;
        let router = &session.router;
        if req.all {
            return session.breakpoints.clear_all(router).await;
        }
        let mut removed = 0;
        if let Some(file) = req.file.as_deref().filter(|f| !f.trim().is_empty()) {
            removed += session.breakpoints.clear_file(router, file).await?;
        }
        if !req.ids.is_empty() {
            removed += session.breakpoints.clear_ids(router, &req.ids).await?;
        }
        Ok(removed)
    }

    pub async fn breakpoints(&self) -> Vec<TrackedBreakpoint> {
        let guard = self.slot.lock().await;
        guard
            .active
            .as_ref()
            .map(|session| session.breakpoints.list())
            .unwrap_or_default()
    }

    // ========================================================================
    // Execution control
    // ========================================================================

    /// Resume until the program stops or terminates.
    pub async fn continue_execution(&self, req: ContinueRequest) -> Result<ExecutionOutcome> {
        let mut guard = self.slot.lock().await;
        let slot = &mut *guard;
        self.reconcile(slot).await;
        let result = self.continue_inner(slot, req).await;
        self.settle(slot, result).await
    }

    async fn continue_inner(&self, slot: &mut SessionSlot, req: ContinueRequest) -> Result<ExecutionOutcome> {
        require(slot, &[SessionState::Stopped], "continue")?;
        let session = active_mut(&mut slot.active)?;
        let thread_id = req.thread_id.unwrap_or(session.focus.thread_id);

        let temporary = match &req.to {
            Some(location) => {
                let armed = session.breakpoints.arm_temporary(&session.router, location).await?;
                debug!("Running to {}", location);
                armed
            }
            None => None,
        };

        let events = session.router.subscribe()?;
        let outcome = self.resume(slot, "continue", thread_id, events).await;

        if let Some(location) = temporary {
            if let Some(session) = slot.active.as_mut().filter(|s| !s.router.is_closed()) {
                if let Err(e) = session.breakpoints.remove(&session.router, &location).await {
                    warn!("Failed to remove temporary breakpoint at {}: {}", location, e);
                }
            }
        }
        outcome
    }

    /// Single-step and wait for the resulting stop.
    pub async fn step(&self, req: StepRequest) -> Result<ExecutionOutcome> {
        let mut guard = self.slot.lock().await;
        let slot = &mut *guard;
        self.reconcile(slot).await;
        let result = self.step_inner(slot, req).await;
        self.settle(slot, result).await
    }

    async fn step_inner(&self, slot: &mut SessionSlot, req: StepRequest) -> Result<ExecutionOutcome> {
        require(slot, &[SessionState::Stopped], "step")?;
        let session = active_mut(&mut slot.active)?;
        let thread_id = req.thread_id.unwrap_or(session.focus.thread_id);
        let events = session.router.subscribe()?;
        self.resume(slot, req.mode.command(), thread_id, events).await
    }

    /// Ask the adapter to suspend a thread. Only the acknowledgement is awaited;
    /// the stop itself is observed by the next operation.
    pub async fn pause(&self, thread_id: i64) -> Result<()> {
        let mut guard = self.slot.lock().await;
        let slot = &mut *guard;
        self.reconcile(slot).await;
        let result = Self::pause_inner(slot, thread_id).await;
        self.settle(slot, result).await
    }

    async fn pause_inner(slot: &mut SessionSlot, thread_id: i64) -> Result<()> {
        require(slot, &[SessionState::Running, SessionState::Stopped], "pause")?;
        let session = active_mut(&mut slot.active)?;
        session.router.request_ack("pause", &ThreadArguments { thread_id }).await?;
        info!("Pause requested for thread {}", thread_id);
        Ok(())
    }

    /// Send a resume-type command and wait for the next stop or termination.
    async fn resume(
        &self,
        slot: &mut SessionSlot,
        command: &str,
        thread_id: i64,
        events: EventSubscription,
    ) -> Result<ExecutionOutcome> {
        let session = active_mut(&mut slot.active)?;
        let previous = session.router.status();
        session.router.set_status(ExecutionStatus::Running);
        if let Err(e) = session.router.request_ack(command, &ThreadArguments { thread_id }).await {
            session.router.set_status(previous);
            return Err(e);
        }
        slot.state = SessionState::Running;
        debug!("'{}' acknowledged; waiting for the program to stop", command);
        self.await_stop(slot, thread_id, events).await
    }

    /// Wait for the running program to stop or terminate and describe where it ended up.
    async fn await_stop(
        &self,
        slot: &mut SessionSlot,
        thread_id: i64,
        mut events: EventSubscription,
    ) -> Result<ExecutionOutcome> {
        let cancel = CancelGuard::new(&mut *slot);
        let waited = events
            .next_matching_within(&[EventClass::Stopped, EventClass::Terminated], self.settings.resume_timeout)
            .await;
        cancel.disarm();
        let event = waited?;

        let session = active_mut(&mut slot.active)?;
        if event.class() == EventClass::Terminated {
            let exit_code = match session.router.status() {
                ExecutionStatus::Terminated { exit_code } => exit_code,
                ExecutionStatus::Exited { exit_code } => Some(exit_code),
                _ => None,
            };
            slot.state = SessionState::Terminated;
            info!("Program terminated (exit code {:?})", exit_code);
            return Ok(ExecutionOutcome::Terminated { exit_code });
        }

        let body: StoppedEventBody = event.body_as().unwrap_or_default();
        let stopped_thread = body.thread_id.unwrap_or(thread_id);
        slot.state = SessionState::Stopped;
        session.focus = Focus { thread_id: stopped_thread, frame_id: None };
        info!("Stopped on thread {} ({})", stopped_thread, body.reason);

        let request = SnapshotRequest {
            thread_id: stopped_thread,
            frame_id: None,
            max_frames: self.settings.max_frames,
            stop_reason: Some(body.reason),
        };
        let snapshot = ContextAggregator::new(&session.router).snapshot(&request).await?;
        session.focus.frame_id = snapshot.focus_frame_id;
        Ok(ExecutionOutcome::Stopped(snapshot))
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub async fn context(&self, req: ContextRequest) -> Result<ContextSnapshot> {
        req.validate()?;

        let mut guard = self.slot.lock().await;
        let slot = &mut *guard;
        self.reconcile(slot).await;
        let result = self.context_inner(slot, req).await;
        self.settle(slot, result).await
    }

    async fn context_inner(&self, slot: &mut SessionSlot, req: ContextRequest) -> Result<ContextSnapshot> {
        require(slot, &[SessionState::Stopped], "inspect the program")?;
        let session = active_mut(&mut slot.active)?;
        let thread_id = req.thread_id.unwrap_or(session.focus.thread_id);
        let stop_reason = match session.router.status() {
            ExecutionStatus::Stopped { reason, .. } if !reason.is_empty() => Some(reason),
            _ => None,
        };
        let request = SnapshotRequest {
            thread_id,
            frame_id: req.frame_id,
            max_frames: req.max_frames.unwrap_or(self.settings.max_frames),
            stop_reason,
        };
        let snapshot = ContextAggregator::new(&session.router).snapshot(&request).await?;
        session.focus = Focus { thread_id, frame_id: snapshot.focus_frame_id };
        Ok(snapshot)
    }

    pub async fn evaluate(&self, req: EvaluateRequest) -> Result<EvaluateOutcome> {
        req.validate()?;

        let mut guard = self.slot.lock().await;
        let slot = &mut *guard;
        self.reconcile(slot).await;
        let result = self.evaluate_inner(slot, req).await;
        self.settle(slot, result).await
    }

    async fn evaluate_inner(&self, slot: &mut SessionSlot, req: EvaluateRequest) -> Result<EvaluateOutcome> {
        require(slot, &[SessionState::Stopped], "evaluate")?;
        let session = active_mut(&mut slot.active)?;
        let args = EvaluateArguments {
            expression: req.expression.clone(),
            frame_id: req.frame_id.or(session.focus.frame_id),
            context: req.context.unwrap_or_else(|| self.settings.eval_context.clone()),
        };
        let body: EvaluateBody = session.router.request("evaluate", &args).await?;
        Ok(EvaluateOutcome {
            expression: req.expression,
            result: body.result,
            type_name: body.type_name,
            variables_reference: body.variables_reference,
        })
    }

    pub async fn set_variable(&self, req: SetVariableRequest) -> Result<SetVariableOutcome> {
        req.validate()?;

        let mut guard = self.slot.lock().await;
        let slot = &mut *guard;
        self.reconcile(slot).await;
        let result = Self::set_variable_inner(slot, req).await;
        self.settle(slot, result).await
    }

    async fn set_variable_inner(slot: &mut SessionSlot, req: SetVariableRequest) -> Result<SetVariableOutcome> {
        require(slot, &[SessionState::Stopped], "set a variable")?;
        let session = active_mut(&mut slot.active)?;
        let variables_reference = match req.variables_reference {
            Some(reference) => reference,
            None => {
                let frame_id = match req.frame_id.or(session.focus.frame_id) {
                    Some(id) => id,
                    None => top_frame(&session.router, session.focus.thread_id).await?,
                };
                find_container(&session.router, frame_id, &req.name).await?
            }
        };

        let args = SetVariableArguments {
            variables_reference,
            name: req.name.clone(),
            value: req.value,
        };
        let body: SetVariableBody = session.router.request("setVariable", &args).await?;
        info!("Set {} = {}", req.name, body.value);
        Ok(SetVariableOutcome { name: req.name, value: body.value, type_name: body.type_name })
    }

    pub async fn info(&self, kind: InfoKind) -> Result<InfoListing> {
        let mut guard = self.slot.lock().await;
        let slot = &mut *guard;
        self.reconcile(slot).await;
        let result = Self::info_inner(slot, kind).await;
        self.settle(slot, result).await
    }

    async fn info_inner(slot: &mut SessionSlot, kind: InfoKind) -> Result<InfoListing> {
        require(slot, &[SessionState::Stopped, SessionState::Terminated], "list program info")?;
        let session = active_mut(&mut slot.active)?;
        match kind {
            InfoKind::Sources => {
                let body: LoadedSourcesBody = session.router.request("loadedSources", &json!({})).await?;
                Ok(InfoListing::Sources(body.sources))
            }
            InfoKind::Modules => {
                let body: ModulesBody = session.router.request("modules", &json!({})).await?;
                Ok(InfoListing::Modules(body.modules))
            }
        }
    }

    pub async fn disassemble(&self, req: DisassembleRequest) -> Result<Disassembly> {
        req.validate()?;

        let mut guard = self.slot.lock().await;
        let slot = &mut *guard;
        self.reconcile(slot).await;
        let result = self.disassemble_inner(slot, req).await;
        self.settle(slot, result).await
    }

    async fn disassemble_inner(&self, slot: &mut SessionSlot, req: DisassembleRequest) -> Result<Disassembly> {
        require(slot, &[SessionState::Stopped], "disassemble")?;
        let session = active_mut(&mut slot.active)?;
        let args = DisassembleArguments {
            memory_reference: req.memory_reference.clone(),
            instruction_offset: req.instruction_offset.unwrap_or(0),
            instruction_count: req.instruction_count.unwrap_or(self.settings.disassemble_count),
            resolve_symbols: true,
        };
        let body: DisassembleBody = session.router.request("disassemble", &args).await?;
        Ok(Disassembly { memory_reference: req.memory_reference, instructions: body.instructions })
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Fold asynchronously observed events into the session state.
    async fn reconcile(&self, slot: &mut SessionSlot) {
        let Some(session) = slot.active.as_mut() else {
            slot.state = SessionState::Idle;
            return;
        };

        if session.router.is_closed() {
            warn!("Debug adapter connection lost; closing session {}", session.id);
            self.teardown(slot, false).await;
            return;
        }

        match session.router.status() {
            ExecutionStatus::Stopped { thread_id, .. } => {
                slot.state = SessionState::Stopped;
                if let Some(thread_id) = thread_id.filter(|&t| t != session.focus.thread_id) {
                    session.focus = Focus { thread_id, frame_id: None };
                }
            }
            ExecutionStatus::Running => slot.state = SessionState::Running,
            ExecutionStatus::Exited { .. } | ExecutionStatus::Terminated { .. } => {
                slot.state = SessionState::Terminated;
            }
            ExecutionStatus::Unknown => {}
        }
    }

    /// Fatal errors leave nothing worth keeping: close the session.
    async fn settle<T>(&self, slot: &mut SessionSlot, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() && slot.active.is_some() {
                error!("Closing debug session after fatal error: {}", e);
                self.teardown(slot, false).await;
            }
        }
        result
    }

    async fn teardown(&self, slot: &mut SessionSlot, graceful: bool) {
        let Some(mut session) = slot.active.take() else {
            slot.state = SessionState::Idle;
            return;
        };

        if graceful && !session.router.is_closed() {
            let limit = GRACEFUL_TIMEOUT.min(self.settings.request_timeout);
            let attach = session.mode.is_attach();
            if !attach && session.capabilities.supports_terminate_request {
                if let Err(e) = session.router.request_ack_within("terminate", &json!({}), limit).await {
                    debug!("terminate request failed: {}", e);
                }
            }
            let args = DisconnectArguments { terminate_debuggee: !attach };
            if let Err(e) = session.router.request_ack_within("disconnect", &args, limit).await {
                debug!("disconnect request failed: {}", e);
            }
        }

        session.router.shutdown().await;
        if let Some(process) = session.process.as_mut() {
            process.kill().await;
        }
        slot.state = SessionState::Idle;
        info!("Debug session {} closed", session.id);
    }
}

async fn top_frame(router: &CorrelationRouter, thread_id: i64) -> Result<i64> {
    let args = StackTraceArguments { thread_id, start_frame: 0, levels: 1 };
    let body: StackTraceBody = router.request("stackTrace", &args).await?;
    body.stack_frames
        .first()
        .map(|f| f.id)
        .ok_or_else(|| DebugError::NotFound(format!("no stack frames on thread {}", thread_id)))
}

/// Variables reference of the scope in `frame_id` that holds `name`.
async fn find_container(router: &CorrelationRouter, frame_id: i64, name: &str) -> Result<i64> {
    let scopes: ScopesBody = router.request("scopes", &ScopesArguments { frame_id }).await?;
    for scope in scopes.scopes.iter().filter(|s| s.variables_reference != 0) {
        let args = VariablesArguments { variables_reference: scope.variables_reference };
        match router.request::<_, VariablesBody>("variables", &args).await {
            Ok(body) if body.variables.iter().any(|v| v.name == name) => return Ok(scope.variables_reference),
            Ok(_) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => debug!("skipping scope '{}': {}", scope.name, e),
        }
    }
    Err(DebugError::NotFound(format!("variable '{}' in frame {}", name, frame_id)))
}
