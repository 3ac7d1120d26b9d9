//! In-process stand-in for `dlv dap` used by the integration tests.
//!
//! The fake runs a tiny scripted program: an ordered list of statements, each on
//! a source line and optionally assigning a local. It honours breakpoints,
//! stepping, evaluation and restarts closely enough to drive the controller
//! through whole debugging sessions without a Go toolchain.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use dap_debug::dap::protocol::{Event, ProtocolMessage, Request, Response};
use dap_debug::dap::{FrameWriter, TransportChannel};
use dap_debug::session::{AdapterConnection, AdapterLauncher};
use dap_debug::Result;

pub const HELLO_GO: &str = "/src/hello/main.go";
pub const STEP_GO: &str = "/src/step/main.go";
pub const SPIN_GO: &str = "/src/spin/main.go";

const LOCALS_REF: i64 = 1;
const GLOBALS_REF: i64 = 2;
const RUNTIME_LOCALS_REF: i64 = 3;
const MAIN_FRAME: i64 = 1000;
const RUNTIME_FRAME: i64 = 1001;

type Locals = BTreeMap<String, (String, String)>;

/// Computes the value a statement assigns from the current locals and program args.
type Compute = fn(&Locals, &[String]) -> String;

#[derive(Clone)]
pub struct Statement {
    pub line: i64,
    pub assign: Option<(&'static str, &'static str, Compute)>,
}

impl Statement {
    fn plain(line: i64) -> Self {
        Self { line, assign: None }
    }

    fn assign(line: i64, name: &'static str, type_name: &'static str, compute: Compute) -> Self {
        Self { line, assign: Some((name, type_name, compute)) }
    }
}

/// A scripted debuggee.
#[derive(Clone)]
pub struct Program {
    pub file: &'static str,
    pub statements: Vec<Statement>,
    pub loops_forever: bool,
    pub exit_code: i64,
}

fn local_int(locals: &Locals, name: &str) -> i64 {
    locals.get(name).and_then(|(_, v)| v.parse().ok()).unwrap_or_default()
}

impl Program {
    /// `greeting := "hello, world"` on line 5, then print and return.
    pub fn hello() -> Self {
        Self {
            file: HELLO_GO,
            statements: vec![
                Statement::assign(5, "greeting", "string", |_, _| "\"hello, world\"".to_string()),
                Statement::plain(7),
                Statement::plain(8),
            ],
            loops_forever: false,
            exit_code: 0,
        }
    }

    /// Greets whatever arguments the program was launched with.
    pub fn greeter() -> Self {
        Self {
            file: HELLO_GO,
            statements: vec![
                Statement::assign(5, "greeting", "string", |_, args| format!("\"hello {}\"", args.join(" "))),
                Statement::plain(7),
                Statement::plain(8),
            ],
            loops_forever: false,
            exit_code: 0,
        }
    }

    /// `x := 10` (7), `y := 20` (10), `sum := x + y` (13), print (16), return (17).
    pub fn arithmetic() -> Self {
        Self {
            file: STEP_GO,
            statements: vec![
                Statement::assign(7, "x", "int", |_, _| "10".to_string()),
                Statement::assign(10, "y", "int", |_, _| "20".to_string()),
                Statement::assign(13, "sum", "int", |locals, _| {
                    (local_int(locals, "x") + local_int(locals, "y")).to_string()
                }),
                Statement::plain(16),
                Statement::plain(17),
            ],
            loops_forever: false,
            exit_code: 0,
        }
    }

    /// `for {}` on line 5: never stops on its own.
    pub fn spin() -> Self {
        Self {
            file: SPIN_GO,
            statements: vec![Statement::plain(5)],
            loops_forever: true,
            exit_code: 0,
        }
    }

    pub fn exiting_with(mut self, code: i64) -> Self {
        self.exit_code = code;
        self
    }

    fn lines(&self) -> Vec<i64> {
        self.statements.iter().map(|s| s.line).collect()
    }
}

/// Adjustments to how the fake behaves.
#[derive(Clone, Default)]
pub struct FakeOptions {
    /// Drop the connection instead of answering this command
    pub crash_on: Option<&'static str>,
    /// Never answer this command
    pub silent_on: Option<&'static str>,
    /// `variables` requests for this reference fail
    pub failing_reference: Option<i64>,
}

/// What the fake saw, shared with the test.
#[derive(Default)]
pub struct FakeLog {
    pub requests: Vec<Request>,
    pub launches: usize,
    pub ports: Vec<u16>,
    pub source_breakpoints: BTreeMap<String, Vec<i64>>,
    pub function_breakpoints: Vec<String>,
    pub disconnected: usize,
}

/// Launches a fresh fake adapter for every session.
pub struct FakeLauncher {
    program: Program,
    options: FakeOptions,
    log: Arc<Mutex<FakeLog>>,
}

impl FakeLauncher {
    pub fn new(program: Program) -> Arc<Self> {
        Self::with_options(program, FakeOptions::default())
    }

    pub fn with_options(program: Program, options: FakeOptions) -> Arc<Self> {
        Arc::new(Self { program, options, log: Arc::new(Mutex::new(FakeLog::default())) })
    }

    pub fn launches(&self) -> usize {
        self.log.lock().unwrap().launches
    }

    pub fn disconnects(&self) -> usize {
        self.log.lock().unwrap().disconnected
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().requests.iter().map(|r| r.command.clone()).collect()
    }

    pub fn requests_for(&self, command: &str) -> Vec<Request> {
        self.log
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.command == command)
            .cloned()
            .collect()
    }

    /// Lines the adapter currently has armed in `file`.
    pub fn adapter_lines(&self, file: &str) -> Vec<i64> {
        self.log.lock().unwrap().source_breakpoints.get(file).cloned().unwrap_or_default()
    }

    pub fn adapter_functions(&self) -> Vec<String> {
        self.log.lock().unwrap().function_breakpoints.clone()
    }
}

#[async_trait]
impl AdapterLauncher for FakeLauncher {
    async fn launch(&self, port: u16) -> Result<AdapterConnection> {
        {
            let mut log = self.log.lock().unwrap();
            log.launches += 1;
            log.ports.push(port);
            log.source_breakpoints.clear();
            log.function_breakpoints.clear();
        }

        let (ours, theirs) = tokio::io::duplex(256 * 1024);
        let adapter = FakeAdapter::new(self.program.clone(), self.options.clone(), self.log.clone());
        tokio::spawn(adapter.serve(TransportChannel::from_stream(theirs)));

        Ok(AdapterConnection { channel: TransportChannel::from_stream(ours), process: None })
    }
}

/// Position of the debuggee: before the first statement, at one, or past the end.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Position {
    Entry,
    At(usize),
    Exited,
}

enum Next {
    Reply(std::result::Result<Value, String>),
    Silent,
    Crash,
}

struct FakeAdapter {
    program: Program,
    options: FakeOptions,
    log: Arc<Mutex<FakeLog>>,
    seq: i64,
    args: Vec<String>,
    stop_on_entry: bool,
    position: Position,
    locals: Locals,
    next_breakpoint_id: i64,
    /// Events queued behind the response being sent
    pending_events: Vec<(&'static str, Value)>,
    close_after_reply: bool,
}

impl FakeAdapter {
    fn new(program: Program, options: FakeOptions, log: Arc<Mutex<FakeLog>>) -> Self {
        Self {
            program,
            options,
            log,
            seq: 0,
            args: Vec::new(),
            stop_on_entry: false,
            position: Position::Entry,
            locals: Locals::new(),
            next_breakpoint_id: 1,
            pending_events: Vec::new(),
            close_after_reply: false,
        }
    }

    async fn serve(mut self, channel: TransportChannel) {
        let TransportChannel { mut reader, writer } = channel;
        while let Ok(message) = reader.receive().await {
            let ProtocolMessage::Request(request) = message else {
                continue;
            };
            self.log.lock().unwrap().requests.push(request.clone());

            let reply = match self.handle(&request) {
                Next::Crash => return,
                Next::Silent => continue,
                Next::Reply(reply) => reply,
            };
            let (success, message, body) = match reply {
                Ok(body) => (true, None, Some(body)),
                Err(message) => (false, Some(message), None),
            };
            let response = ProtocolMessage::Response(Response {
                seq: self.next_seq(),
                request_seq: request.seq,
                command: request.command.clone(),
                success,
                message,
                body,
            });
            if writer.send(&response).await.is_err() {
                return;
            }
            if self.flush_events(&writer).await.is_err() || self.close_after_reply {
                return;
            }
        }
    }

    fn next_seq(&mut self) -> i64 {
        self.seq += 1;
        self.seq
    }

    async fn flush_events(&mut self, writer: &FrameWriter) -> std::result::Result<(), ()> {
        for (event, body) in std::mem::take(&mut self.pending_events) {
            let message = ProtocolMessage::Event(Event { seq: self.next_seq(), event: event.to_string(), body: Some(body) });
            writer.send(&message).await.map_err(|_| ())?;
        }
        Ok(())
    }

    fn emit(&mut self, event: &'static str, body: Value) {
        self.pending_events.push((event, body));
    }

    fn handle(&mut self, request: &Request) -> Next {
        if self.options.crash_on == Some(request.command.as_str()) {
            return Next::Crash;
        }
        if self.options.silent_on == Some(request.command.as_str()) {
            return Next::Silent;
        }
        let args = request.arguments.clone().unwrap_or(Value::Null);

        let reply = match request.command.as_str() {
            "initialize" => Ok(json!({
                "supportsConfigurationDoneRequest": true,
                "supportsFunctionBreakpoints": true,
                "supportsSetVariable": true,
                "supportsRestartRequest": true,
                "supportsExceptionInfoRequest": true,
                "supportsLoadedSourcesRequest": true,
                "supportsDisassembleRequest": true,
                "supportsTerminateRequest": true,
            })),
            "launch" => {
                self.args = string_list(&args["args"]);
                self.stop_on_entry = args["stopOnEntry"].as_bool().unwrap_or(false);
                self.emit("initialized", json!({}));
                Ok(json!({}))
            }
            "attach" => {
                self.stop_on_entry = args["stopOnEntry"].as_bool().unwrap_or(false);
                self.emit("initialized", json!({}));
                Ok(json!({}))
            }
            "setBreakpoints" => Ok(self.set_breakpoints(&args)),
            "setFunctionBreakpoints" => Ok(self.set_function_breakpoints(&args)),
            "configurationDone" => {
                if self.stop_on_entry {
                    self.emit("stopped", json!({"reason": "entry", "threadId": 1, "allThreadsStopped": true}));
                } else {
                    self.run();
                }
                Ok(json!({}))
            }
            "continue" => {
                self.run();
                Ok(json!({"allThreadsContinued": true}))
            }
            "next" | "stepIn" | "stepOut" => {
                self.step();
                Ok(json!({}))
            }
            "pause" => {
                self.emit("stopped", json!({"reason": "pause", "threadId": 1, "allThreadsStopped": true}));
                Ok(json!({}))
            }
            "stackTrace" => Ok(self.stack_trace(&args)),
            "scopes" => Ok(self.scopes(&args)),
            "variables" => self.variables(&args),
            "evaluate" => self.evaluate(&args),
            "setVariable" => self.set_variable(&args),
            "exceptionInfo" => Err("no exception".to_string()),
            "loadedSources" => Ok(json!({"sources": [
                {"name": "main.go", "path": self.program.file},
                {"name": "proc.go", "path": "/usr/local/go/src/runtime/proc.go"},
            ]})),
            "modules" => Ok(json!({"modules": [
                {"id": "1", "name": "main", "path": "/tmp/__debug_bin"},
            ]})),
            "disassemble" => Ok(self.disassemble(&args)),
            "restart" => {
                let launch = &args["arguments"];
                self.args = string_list(&launch["args"]);
                self.position = Position::Entry;
                self.locals.clear();
                // A restarted target is a fresh process with its own numbering
                self.seq = 0;
                Ok(json!({}))
            }
            "terminate" => {
                self.position = Position::Exited;
                self.emit("terminated", json!({}));
                Ok(json!({}))
            }
            "disconnect" => {
                self.log.lock().unwrap().disconnected += 1;
                self.close_after_reply = true;
                Ok(json!({}))
            }
            other => Err(format!("unsupported command: {}", other)),
        };
        Next::Reply(reply)
    }

    fn set_breakpoints(&mut self, args: &Value) -> Value {
        let file = args["source"]["path"].as_str().unwrap_or_default().to_string();
        let lines: Vec<i64> = args["breakpoints"]
            .as_array()
            .map(|bps| bps.iter().filter_map(|bp| bp["line"].as_i64()).collect())
            .unwrap_or_default();

        let known = self.program.lines();
        let reported: Vec<Value> = lines
            .iter()
            .map(|&line| {
                let id = self.next_breakpoint_id;
                self.next_breakpoint_id += 1;
                if file == self.program.file && known.contains(&line) {
                    json!({"id": id, "verified": true, "line": line})
                } else {
                    json!({"id": id, "verified": false, "line": line,
                           "message": format!("could not find statement at {}:{}", file, line)})
                }
            })
            .collect();

        let mut log = self.log.lock().unwrap();
        if lines.is_empty() {
            log.source_breakpoints.remove(&file);
        } else {
            log.source_breakpoints.insert(file, lines);
        }
        json!({"breakpoints": reported})
    }

    fn set_function_breakpoints(&mut self, args: &Value) -> Value {
        let names: Vec<String> = args["breakpoints"]
            .as_array()
            .map(|bps| bps.iter().filter_map(|bp| bp["name"].as_str().map(String::from)).collect())
            .unwrap_or_default();
        let reported: Vec<Value> = names
            .iter()
            .map(|name| {
                let id = self.next_breakpoint_id;
                self.next_breakpoint_id += 1;
                let verified = name == "main.main";
                let line = if verified { self.program.statements[0].line } else { 0 };
                json!({"id": id, "verified": verified, "line": line})
            })
            .collect();
        self.log.lock().unwrap().function_breakpoints = names;
        json!({"breakpoints": reported})
    }

    fn breakpoint_hit(&self, index: usize) -> bool {
        let log = self.log.lock().unwrap();
        let line = self.program.statements[index].line;
        let on_line = log
            .source_breakpoints
            .get(self.program.file)
            .is_some_and(|lines| lines.contains(&line));
        let on_function = index == 0 && log.function_breakpoints.iter().any(|f| f == "main.main");
        on_line || on_function
    }

    /// Execute the current statement and move to the next one.
    fn advance(&mut self) {
        let next = match self.position {
            Position::Entry => 0,
            Position::At(index) => {
                if let Some((name, type_name, compute)) = self.program.statements[index].assign {
                    let value = compute(&self.locals, &self.args);
                    self.locals.insert(name.to_string(), (type_name.to_string(), value));
                }
                index + 1
            }
            Position::Exited => return,
        };
        self.position = if next < self.program.statements.len() { Position::At(next) } else { Position::Exited };
    }

    fn run(&mut self) {
        if self.program.loops_forever {
            self.position = Position::At(0);
            return;
        }
        loop {
            self.advance();
            match self.position {
                Position::At(index) if self.breakpoint_hit(index) => {
                    self.emit("stopped", json!({"reason": "breakpoint", "threadId": 1, "allThreadsStopped": true}));
                    return;
                }
                Position::At(_) | Position::Entry => {}
                Position::Exited => {
                    self.exit();
                    return;
                }
            }
        }
    }

    fn step(&mut self) {
        self.advance();
        if self.position == Position::Exited {
            self.exit();
        } else {
            self.emit("stopped", json!({"reason": "step", "threadId": 1, "allThreadsStopped": true}));
        }
    }

    fn exit(&mut self) {
        self.emit("exited", json!({"exitCode": self.program.exit_code}));
        self.emit("terminated", json!({}));
    }

    fn current_line(&self) -> i64 {
        match self.position {
            Position::At(index) => self.program.statements[index].line,
            _ => self.program.statements[0].line,
        }
    }

    fn stack_trace(&self, args: &Value) -> Value {
        let frames = vec![
            json!({"id": MAIN_FRAME, "name": "main.main", "line": self.current_line(), "column": 1,
                   "source": {"name": "main.go", "path": self.program.file}}),
            json!({"id": RUNTIME_FRAME, "name": "runtime.main", "line": 272, "column": 0,
                   "source": {"name": "proc.go", "path": "/usr/local/go/src/runtime/proc.go"},
                   "presentationHint": "subtle"}),
        ];
        let levels = args["levels"].as_u64().filter(|&l| l > 0).unwrap_or(frames.len() as u64) as usize;
        let shown: Vec<Value> = frames.iter().take(levels).cloned().collect();
        json!({"stackFrames": shown, "totalFrames": frames.len()})
    }

    fn scopes(&self, args: &Value) -> Value {
        match args["frameId"].as_i64() {
            Some(MAIN_FRAME) => json!({"scopes": [
                {"name": "Locals", "variablesReference": LOCALS_REF, "expensive": false},
                {"name": "Globals", "variablesReference": GLOBALS_REF, "expensive": false},
            ]}),
            _ => json!({"scopes": [
                {"name": "Locals", "variablesReference": RUNTIME_LOCALS_REF, "expensive": false},
            ]}),
        }
    }

    fn variables(&self, args: &Value) -> std::result::Result<Value, String> {
        let reference = args["variablesReference"].as_i64().unwrap_or_default();
        if self.options.failing_reference == Some(reference) {
            return Err(format!("could not read variables for reference {}", reference));
        }
        let variables: Vec<Value> = match reference {
            LOCALS_REF => self
                .locals
                .iter()
                .map(|(name, (type_name, value))| {
                    json!({"name": name, "type": type_name, "value": value, "variablesReference": 0})
                })
                .collect(),
            GLOBALS_REF => vec![json!({"name": "main.version", "type": "string", "value": "\"1.0\"", "variablesReference": 0})],
            _ => Vec::new(),
        };
        Ok(json!({"variables": variables}))
    }

    fn evaluate(&self, args: &Value) -> std::result::Result<Value, String> {
        let expression = args["expression"].as_str().unwrap_or_default();
        match self.locals.get(expression) {
            Some((type_name, value)) => Ok(json!({"result": value, "type": type_name, "variablesReference": 0})),
            None => Err(format!("could not find symbol value for {}", expression)),
        }
    }

    fn set_variable(&mut self, args: &Value) -> std::result::Result<Value, String> {
        let name = args["name"].as_str().unwrap_or_default();
        let value = args["value"].as_str().unwrap_or_default();
        if args["variablesReference"].as_i64() != Some(LOCALS_REF) {
            return Err(format!("could not find symbol value for {}", name));
        }
        match self.locals.get_mut(name) {
            Some((type_name, current)) => {
                *current = value.to_string();
                Ok(json!({"value": value, "type": type_name.clone()}))
            }
            None => Err(format!("could not find symbol value for {}", name)),
        }
    }

    fn disassemble(&self, args: &Value) -> Value {
        let count = args["instructionCount"].as_i64().unwrap_or(1).max(0);
        let instructions: Vec<Value> = (0..count)
            .map(|i| {
                json!({
                    "address": format!("0x{:x}", 0x4a_0000 + i * 4),
                    "instruction": if i == 0 { "MOVQ $0xa, AX" } else { "NOPL" },
                    "symbol": "main.main",
                    "line": self.current_line(),
                })
            })
            .collect();
        json!({"instructions": instructions})
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

/// Lines of every tracked breakpoint in `file`.
pub fn lines_of(breakpoints: &[dap_debug::session::TrackedBreakpoint], file: &str) -> HashSet<i64> {
    breakpoints
        .iter()
        .filter_map(|bp| match &bp.location {
            dap_debug::session::BreakpointLocation::Source { file: f, line } if f == file => Some(*line),
            _ => None,
        })
        .collect()
}
