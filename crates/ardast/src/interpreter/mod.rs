//! The AST tree-walking interpreter (spec §4.7): execution state machine,
//! evaluation rules, Arduino built-ins, and the request/response protocol a
//! host uses to answer calls the interpreter cannot compute itself.
//!
//! [`Value`]/[`Scope`] are `Rc`/`RefCell`-based (spec §9 chose shared,
//! mutable runtime storage over an immutable-value model), so they are not
//! `Send`. SPEC_FULL.md §9's "Asynchronous continuations" note allows
//! either an explicit resumable state machine or a single-threaded
//! cooperative task that yields at external-call boundaries, and warns
//! against assuming a multi-threaded host runtime. This module picks the
//! second option and gets there with a dedicated worker thread: the whole
//! `Rc`-based world lives on that one thread, and only plain owned values
//! — [`Command`]s out, [`CommandValue`] responses in, [`ControlMsg`]s for
//! pause/step/stop — cross the channel boundary, so nothing here needs to
//! be `Send` except the channel payloads themselves. At any instant only
//! one side is actually running, exactly the cooperative model the spec
//! describes.

pub mod builtins;
pub mod command;
pub mod library;
pub mod tracer;

use std::{
    cell::RefCell,
    rc::Rc,
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use ahash::AHashMap;
use rand::{Rng, SeedableRng};

use crate::{
    ast::{Ast, Literal, NodeId, NodeKind},
    error::InterpError,
    platform::{Platform, PlatformProfile},
    scope::{self, BindingFlags, Scope, ScopeHandle},
    value::{FunctionRef, Numeric, ObjectInstance, Pointer, PointerTarget, Value},
};

use command::{Command, CommandKind, CommandValue};
use library::{MethodKind, Registry};
use tracer::{InterpTracer, NoopTracer};

/// The interpreter's execution state (spec §5's state machine: `Idle` →
/// `Running` ⇄ `Paused`/`Stepping` → `Complete`, with `WaitingForResponse`
/// entered and left around every external call, and `Error` reachable from
/// a fatal, unrecoverable failure such as a channel disconnect).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ExecState {
    Idle,
    Running,
    Paused,
    Stepping,
    WaitingForResponse,
    Error,
    Complete,
}

/// Per-request-class timeouts (spec §4.7.4: "implementations SHOULD apply
/// a default timeout ... a shorter timeout is appropriate for `millis`/
/// `micros`, which a host can usually answer immediately").
#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    pub default_ms: u64,
    pub millis_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_ms: 5000,
            millis_ms: 1000,
        }
    }
}

/// Construction-time knobs for an [`Interpreter`] (spec §4.7.1, §6.1).
#[derive(Debug, Clone)]
pub struct InterpreterOptions {
    /// Bounds how many times `loop()` runs before `LOOP_LIMIT_REACHED`
    /// (spec §4.7.1: real Arduino `loop()`s never return, so simulation
    /// always needs a cap). Zero means `setup()` runs but `loop()` never
    /// does.
    pub max_loop_iterations: u32,
    /// Platform profile seeded into the global scope and used for
    /// `pinMode`/`analogWrite` pin-capability bookkeeping.
    pub platform: Platform,
    pub timeouts: TimeoutConfig,
    /// Wall-clock pause after every emitted command, for a host that wants
    /// to visualize execution in real time rather than drain the command
    /// stream as fast as possible. Zero (the default) never sleeps.
    pub step_delay_ms: u64,
    pub verbose: bool,
    pub debug: bool,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            max_loop_iterations: 3,
            platform: Platform::ArduinoUno,
            timeouts: TimeoutConfig::default(),
            step_delay_ms: 0,
            verbose: false,
            debug: false,
        }
    }
}

/// A single item pulled from [`Interpreter::step_until_event`] (spec §5:
/// the command stream plus an end-of-run sentinel).
#[derive(Debug, Clone)]
pub enum InterpreterEvent {
    Command(Command),
    Complete,
}

/// Messages the host sends to steer a running worker (spec §5 `pause`/
/// `resume`/`step`/`stop`).
enum ControlMsg {
    Pause,
    Resume,
    Step,
    Stop,
}

/// The host's answer to an outstanding request (spec §4.7.4
/// `handleResponse`/`handleResponseError`).
enum ResponseMsg {
    Value(CommandValue),
    Error(String),
}

/// The public, `Send`-safe handle to a running interpreter. Owns no
/// `Rc`-based state itself — every field here is either a channel end or
/// plain data; the actual tree walk lives entirely on `worker`.
pub struct Interpreter {
    cmd_rx: Receiver<InterpreterEvent>,
    ctrl_tx: Sender<ControlMsg>,
    resp_tx: Sender<ResponseMsg>,
    state: Arc<Mutex<ExecState>>,
    worker: Option<JoinHandle<()>>,
    started: bool,
}

impl Interpreter {
    /// Builds an interpreter for `ast`, but does not start executing it —
    /// call [`Interpreter::start`] to spawn the worker thread.
    #[must_use]
    pub fn new(ast: &Ast, options: InterpreterOptions) -> Self {
        Self::with_tracer(ast, options, NoopTracer)
    }

    /// Same as [`Interpreter::new`], but routes every statement/command/
    /// state-change hook through a caller-supplied [`InterpTracer`]
    /// (SPEC_FULL.md §12).
    #[must_use]
    pub fn with_tracer<T: InterpTracer + Send + 'static>(ast: &Ast, options: InterpreterOptions, tracer: T) -> Self {
        let ast = Arc::new(ast.clone());
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (ctrl_tx, ctrl_rx) = mpsc::channel();
        let (resp_tx, resp_rx) = mpsc::channel();
        let state = Arc::new(Mutex::new(ExecState::Idle));
        Self {
            cmd_rx,
            ctrl_tx,
            resp_tx,
            state: Arc::clone(&state),
            worker: Some(Self::spawn_worker(ast, options, cmd_tx, resp_rx, ctrl_rx, state, tracer)),
            started: false,
        }
    }

    fn spawn_worker<T: InterpTracer + Send + 'static>(
        ast: Arc<Ast>,
        options: InterpreterOptions,
        cmd_tx: Sender<InterpreterEvent>,
        resp_rx: Receiver<ResponseMsg>,
        ctrl_rx: Receiver<ControlMsg>,
        state: Arc<Mutex<ExecState>>,
        tracer: T,
    ) -> JoinHandle<()> {
        thread::Builder::new()
            .name("ardast-interpreter".to_owned())
            .spawn(move || {
                // The first control message blocks the worker until
                // `Interpreter::start` sends `Resume` (see `start`/`run_program`).
                let mut worker = Worker::new(ast, options, cmd_tx, resp_rx, ctrl_rx, state, tracer);
                worker.await_start();
                worker.run_program();
            })
            .expect("spawning the interpreter worker thread")
    }

    /// Begins execution: the top-level driver (VERSION_INFO, PROGRAM_START,
    /// globals, `setup()`, bounded `loop()`) runs on the worker thread and
    /// its commands become available through [`Interpreter::step_until_event`].
    pub fn start(&mut self) {
        if !self.started {
            self.started = true;
            let _ = self.ctrl_tx.send(ControlMsg::Resume);
        }
    }

    pub fn pause(&self) {
        let _ = self.ctrl_tx.send(ControlMsg::Pause);
    }

    pub fn resume(&self) {
        let _ = self.ctrl_tx.send(ControlMsg::Resume);
    }

    /// Runs exactly one more statement, then pauses again.
    pub fn step(&self) {
        let _ = self.ctrl_tx.send(ControlMsg::Step);
    }

    /// Aborts execution. The worker unwinds at its next statement boundary
    /// rather than being killed outright, so any in-flight command already
    /// queued is still delivered.
    pub fn stop(&self) {
        let _ = self.ctrl_tx.send(ControlMsg::Stop);
    }

    #[must_use]
    pub fn state(&self) -> ExecState {
        *self.state.lock().expect("interpreter state mutex poisoned")
    }

    /// Answers an outstanding `*_REQUEST`/`LIBRARY_METHOD_REQUEST` (spec
    /// §4.7.4 `handleResponse`).
    pub fn handle_response(&self, value: CommandValue) {
        let _ = self.resp_tx.send(ResponseMsg::Value(value));
    }

    /// Reports that the host could not answer an outstanding request (spec
    /// §4.7.4 `handleResponseError`); the interpreter falls back to a
    /// typed-zero value and emits an `ERROR` command.
    pub fn handle_response_error(&self, message: impl Into<String>) {
        let _ = self.resp_tx.send(ResponseMsg::Error(message.into()));
    }

    /// Blocks for the next command or the terminal `Complete` event,
    /// returning `None` once the worker thread has exited (the README's
    /// `while let Some(event) = interpreter.step_until_event()` pattern).
    pub fn step_until_event(&mut self) -> Option<InterpreterEvent> {
        match self.cmd_rx.recv() {
            Ok(event) => Some(event),
            Err(_) => None,
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        let _ = self.ctrl_tx.send(ControlMsg::Stop);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// Non-local control flow produced by executing a statement (spec
/// §4.7.2's `break`/`continue`/`return`). Program-level `stop()` is *not*
/// modeled here; it is a plain flag (`Worker::stopped`) checked at every
/// loop/call boundary, since it must unwind through all of them uniformly
/// rather than being caught by the nearest loop like `Break` is.
enum Signal {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// An assignable location resolved from an expression (spec §4.7.2
/// "assignment ... evaluates its target to an lvalue").
enum LValue {
    Var { name: String },
    ArrayElem { array: crate::value::ArrayRef, index: usize },
    StructField { object: crate::value::StructRef, field: String },
    PointerDeref { pointer: Rc<Pointer> },
}

/// The private, non-`Send` tree walker. Everything that touches `Rc`-based
/// [`Value`]s or [`ScopeHandle`]s lives here, and this type never leaves
/// the worker thread it was constructed on.
struct Worker<T: InterpTracer> {
    ast: Arc<Ast>,
    options: InterpreterOptions,
    global: ScopeHandle,
    functions: AHashMap<String, NodeId>,
    statics: AHashMap<(Option<NodeId>, String), Value>,
    registry: Registry,
    cmd_tx: Sender<InterpreterEvent>,
    resp_rx: Receiver<ResponseMsg>,
    ctrl_rx: Receiver<ControlMsg>,
    state: Arc<Mutex<ExecState>>,
    tracer: T,
    clock_us: u64,
    rng: rand_chacha::ChaCha8Rng,
    paused: bool,
    single_step: bool,
    stopped: bool,
    current_function: Option<NodeId>,
    call_depth: u32,
}

const MAX_CALL_DEPTH: u32 = 256;

impl<T: InterpTracer> Worker<T> {
    fn new(
        ast: Arc<Ast>,
        options: InterpreterOptions,
        cmd_tx: Sender<InterpreterEvent>,
        resp_rx: Receiver<ResponseMsg>,
        ctrl_rx: Receiver<ControlMsg>,
        state: Arc<Mutex<ExecState>>,
        tracer: T,
    ) -> Self {
        let global = Scope::root();
        let profile = PlatformProfile::for_platform(options.platform);
        seed_platform_globals(&global, &profile);
        Self {
            ast,
            options,
            global,
            functions: AHashMap::new(),
            statics: AHashMap::new(),
            registry: Registry::with_builtins(),
            cmd_tx,
            resp_rx,
            ctrl_rx,
            state,
            tracer,
            clock_us: 0,
            rng: rand_chacha::ChaCha8Rng::seed_from_u64(0x4152_4431_u64),
            paused: false,
            single_step: false,
            stopped: false,
            current_function: None,
            call_depth: 0,
        }
    }

    /// Blocks until the host calls `Interpreter::start` (its first
    /// `Resume`) or `stop()`, so construction can happen without racing the
    /// top-level driver.
    fn await_start(&mut self) {
        loop {
            match self.ctrl_rx.recv() {
                Ok(ControlMsg::Resume) => break,
                Ok(ControlMsg::Stop) => {
                    self.stopped = true;
                    break;
                }
                Ok(_) => {}
                Err(_) => {
                    self.stopped = true;
                    break;
                }
            }
        }
    }

    fn set_state(&mut self, new: ExecState) {
        let mut guard = self.state.lock().expect("interpreter state mutex poisoned");
        let old = *guard;
        if old != new {
            *guard = new;
            drop(guard);
            self.tracer.on_state_change(old, new);
        }
    }

    fn next_ts(&mut self) -> u64 {
        self.clock_us += 1;
        self.clock_us
    }

    fn emit(&mut self, kind: CommandKind) {
        let command = Command {
            timestamp: self.next_ts(),
            kind,
        };
        self.tracer.on_command(&command);
        let _ = self.cmd_tx.send(InterpreterEvent::Command(command));
        if self.options.step_delay_ms > 0 {
            thread::sleep(Duration::from_millis(self.options.step_delay_ms));
        }
    }

    fn emit_error(&mut self, err: InterpError) {
        self.emit(CommandKind::Error {
            message: err.message,
            error_type: err.kind.to_string(),
        });
    }

    /// Checked at every statement boundary: drains pending control
    /// messages, blocks while paused, and reports whether the worker
    /// should stop entirely.
    fn check_control(&mut self) -> bool {
        loop {
            match self.ctrl_rx.try_recv() {
                Ok(ControlMsg::Pause) => self.paused = true,
                Ok(ControlMsg::Resume) => {
                    self.paused = false;
                    self.single_step = false;
                }
                Ok(ControlMsg::Step) => {
                    self.paused = false;
                    self.single_step = true;
                }
                Ok(ControlMsg::Stop) => self.stopped = true,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.stopped = true;
                    break;
                }
            }
        }
        if self.stopped {
            return true;
        }
        if self.paused {
            self.set_state(ExecState::Paused);
            loop {
                match self.ctrl_rx.recv() {
                    Ok(ControlMsg::Resume) => {
                        self.paused = false;
                        self.single_step = false;
                        break;
                    }
                    Ok(ControlMsg::Step) => {
                        self.paused = false;
                        self.single_step = true;
                        break;
                    }
                    Ok(ControlMsg::Stop) => {
                        self.stopped = true;
                        return true;
                    }
                    Ok(ControlMsg::Pause) => {}
                    Err(_) => {
                        self.stopped = true;
                        return true;
                    }
                }
            }
            self.set_state(ExecState::Running);
        } else if self.single_step {
            self.set_state(ExecState::Stepping);
            self.paused = true;
        }
        false
    }

    fn next_request_id(&mut self, op: &str) -> String {
        self.clock_us += 1;
        let salt: u32 = self.rng.gen();
        format!("{op}_{}_{salt:08x}", self.clock_us)
    }

    /// Emits a `*_REQUEST` command and blocks for the host's answer (spec
    /// §4.7.4). On timeout, a reported error, or a disconnected channel, it
    /// emits an `ERROR` command and falls back to a typed zero value so
    /// execution can continue.
    fn request_value(&mut self, op: &'static str, build: impl FnOnce(String) -> CommandKind, timeout_ms: u64) -> Value {
        let request_id = self.next_request_id(op);
        let cmd = build(request_id);
        self.emit(cmd);
        let prior = self.state();
        self.set_state(ExecState::WaitingForResponse);
        let result = match self.resp_rx.recv_timeout(Duration::from_millis(timeout_ms)) {
            Ok(ResponseMsg::Value(v)) => Value::from(v),
            Ok(ResponseMsg::Error(message)) => {
                self.emit_error(InterpError::io(message));
                Value::Int32(0)
            }
            Err(RecvTimeoutError::Timeout) => {
                self.emit_error(InterpError::io(format!("{op} timed out waiting for a host response")));
                Value::Int32(0)
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.emit_error(InterpError::io(format!("{op} response channel disconnected")));
                self.stopped = true;
                Value::Int32(0)
            }
        };
        self.set_state(prior);
        result
    }

    fn state(&self) -> ExecState {
        *self.state.lock().expect("interpreter state mutex poisoned")
    }

    // ---- top-level driver (spec §4.7.1) --------------------------------

    fn run_program(&mut self) {
        if self.stopped {
            let _ = self.cmd_tx.send(InterpreterEvent::Complete);
            return;
        }
        self.set_state(ExecState::Running);
        for component in ["ardast", "parser", "interpreter"] {
            self.emit(CommandKind::VersionInfo {
                component: component.to_owned(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                status: "ready".to_owned(),
            });
        }
        self.emit(CommandKind::ProgramStart {
            message: "Program execution started".to_owned(),
        });

        let root_children = self.ast.get(self.ast.root).children.clone();
        for &decl in &root_children {
            if self.ast.kind(decl) == NodeKind::FuncDef {
                let (_, name_decl, _, _) = self.ast.func_def_parts(decl);
                let name = self.ast.declarator_name(name_decl).to_owned();
                self.functions.insert(name, decl);
            }
        }
        for &decl in &root_children {
            if self.stopped {
                break;
            }
            if self.ast.kind(decl) == NodeKind::VarDecl {
                let global = Rc::clone(&self.global);
                self.exec_stmt(decl, &global);
            } else if self.ast.kind(decl) == NodeKind::Error {
                self.emit_error(InterpError::source("a top-level declaration failed to parse"));
            }
        }

        if !self.stopped {
            if let Some(&setup) = self.functions.get("setup") {
                self.emit(CommandKind::SetupStart {
                    message: "setup() started".to_owned(),
                });
                self.invoke_function(setup, Vec::new());
                self.emit(CommandKind::SetupEnd {
                    message: "setup() completed".to_owned(),
                });
            }
        }

        let mut iterations_run = 0;
        if !self.stopped {
            if let Some(&loop_fn) = self.functions.get("loop") {
                for i in 1..=self.options.max_loop_iterations {
                    if self.stopped {
                        break;
                    }
                    iterations_run = i;
                    self.emit(CommandKind::LoopStart {
                        message: format!("loop() iteration {i}"),
                    });
                    self.emit(CommandKind::FunctionCall {
                        function: "loop".to_owned(),
                        arguments: Vec::new(),
                        iteration: Some(i),
                        completed: false,
                    });
                    self.invoke_function(loop_fn, Vec::new());
                    self.emit(CommandKind::FunctionCall {
                        function: "loop".to_owned(),
                        arguments: Vec::new(),
                        iteration: Some(i),
                        completed: true,
                    });
                    self.emit(CommandKind::LoopEnd {
                        message: format!("loop() iteration {i} completed"),
                    });
                }
                if !self.stopped {
                    self.emit(CommandKind::LoopLimitReached { iteration: iterations_run });
                }
            }
        }

        self.emit(CommandKind::ProgramEnd {
            message: "Program execution completed".to_owned(),
        });
        self.set_state(if self.stopped { ExecState::Idle } else { ExecState::Complete });
        let _ = self.cmd_tx.send(InterpreterEvent::Complete);
    }

    fn invoke_function(&mut self, def: NodeId, args: Vec<Value>) -> Value {
        match self.call_user_function(def, args, false) {
            Ok(v) => v,
            Err(e) => {
                self.emit_error(e);
                Value::Undefined
            }
        }
    }

    // ---- statements (spec §4.7.2) --------------------------------------

    fn exec_stmt(&mut self, id: NodeId, scope: &ScopeHandle) -> Signal {
        if self.stopped {
            return Signal::Normal;
        }
        if self.check_control() {
            return Signal::Normal;
        }
        self.tracer.on_statement(id);
        match self.ast.kind(id) {
            NodeKind::CompoundStmt => {
                let block = Scope::child(scope);
                let children = self.ast.get(id).children.clone();
                for stmt in children {
                    if self.stopped {
                        return Signal::Normal;
                    }
                    match self.exec_stmt(stmt, &block) {
                        Signal::Normal => {}
                        other => return other,
                    }
                }
                Signal::Normal
            }
            NodeKind::ExpressionStmt => {
                let expr = self.ast.expr_stmt_expr(id);
                if let Err(e) = self.eval_expr(expr, scope) {
                    self.emit_error(e);
                }
                Signal::Normal
            }
            NodeKind::If => self.exec_if(id, scope),
            NodeKind::While => self.exec_while(id, scope),
            NodeKind::DoWhile => self.exec_do_while(id, scope),
            NodeKind::For => self.exec_for(id, scope),
            NodeKind::RangeFor => self.exec_range_for(id, scope),
            NodeKind::Switch => self.exec_switch(id, scope),
            NodeKind::Return => {
                let child = self.ast.get(id).children.first().copied();
                match child {
                    Some(expr) => match self.eval_expr(expr, scope) {
                        Ok(v) => Signal::Return(v),
                        Err(e) => {
                            self.emit_error(e);
                            Signal::Return(Value::Undefined)
                        }
                    },
                    None => Signal::Return(Value::Undefined),
                }
            }
            NodeKind::Break => Signal::Break,
            NodeKind::Continue => Signal::Continue,
            NodeKind::VarDecl => self.exec_var_decl(id, scope),
            NodeKind::Error => {
                self.emit_error(InterpError::source("encountered a parse error in the executed tree"));
                Signal::Normal
            }
            _ => Signal::Normal,
        }
    }

    fn exec_if(&mut self, id: NodeId, scope: &ScopeHandle) -> Signal {
        let (cond, consequent, alternate) = self.ast.if_parts(id);
        let condition = match self.eval_expr(cond, scope) {
            Ok(v) => v,
            Err(e) => {
                self.emit_error(e);
                return Signal::Normal;
            }
        };
        let truthy = condition.truthy();
        self.emit(CommandKind::IfStatement {
            condition: truthy,
            branch: if truthy {
                "then".to_owned()
            } else if alternate.is_some() {
                "else".to_owned()
            } else {
                "none".to_owned()
            },
        });
        if truthy {
            self.exec_stmt(consequent, scope)
        } else if let Some(alt) = alternate {
            self.exec_stmt(alt, scope)
        } else {
            Signal::Normal
        }
    }

    fn exec_while(&mut self, id: NodeId, scope: &ScopeHandle) -> Signal {
        let (cond, body) = self.ast.while_parts(id);
        loop {
            if self.stopped {
                return Signal::Normal;
            }
            let continue_loop = match self.eval_expr(cond, scope) {
                Ok(v) => v.truthy(),
                Err(e) => {
                    self.emit_error(e);
                    false
                }
            };
            if !continue_loop {
                break;
            }
            match self.exec_stmt(body, scope) {
                Signal::Break => break,
                Signal::Return(v) => return Signal::Return(v),
                Signal::Continue | Signal::Normal => {}
            }
        }
        Signal::Normal
    }

    fn exec_do_while(&mut self, id: NodeId, scope: &ScopeHandle) -> Signal {
        let (cond, body) = self.ast.while_parts(id);
        loop {
            if self.stopped {
                return Signal::Normal;
            }
            match self.exec_stmt(body, scope) {
                Signal::Break => break,
                Signal::Return(v) => return Signal::Return(v),
                Signal::Continue | Signal::Normal => {}
            }
            let continue_loop = match self.eval_expr(cond, scope) {
                Ok(v) => v.truthy(),
                Err(e) => {
                    self.emit_error(e);
                    false
                }
            };
            if !continue_loop {
                break;
            }
        }
        Signal::Normal
    }

    fn exec_for(&mut self, id: NodeId, scope: &ScopeHandle) -> Signal {
        let (init, cond, incr, body) = self.ast.for_parts(id);
        let header = Scope::child(scope);
        self.exec_stmt(init, &header);
        loop {
            if self.stopped {
                return Signal::Normal;
            }
            if self.ast.kind(cond) != NodeKind::Empty {
                match self.eval_expr(cond, &header) {
                    Ok(v) if !v.truthy() => break,
                    Ok(_) => {}
                    Err(e) => {
                        self.emit_error(e);
                        break;
                    }
                }
            }
            match self.exec_stmt(body, &header) {
                Signal::Break => break,
                Signal::Return(v) => return Signal::Return(v),
                Signal::Continue | Signal::Normal => {}
            }
            if self.stopped {
                return Signal::Normal;
            }
            if self.ast.kind(incr) != NodeKind::Empty {
                if let Err(e) = self.eval_expr(incr, &header) {
                    self.emit_error(e);
                }
            }
        }
        Signal::Normal
    }

    fn exec_range_for(&mut self, id: NodeId, scope: &ScopeHandle) -> Signal {
        let (var_decl, iterable, body) = self.ast.range_for_parts(id);
        let items = match self.eval_expr(iterable, scope) {
            Ok(Value::Array(a)) => a.borrow().clone(),
            Ok(other) => vec![other],
            Err(e) => {
                self.emit_error(e);
                return Signal::Normal;
            }
        };
        let (_, decls) = self.ast.var_decl_parts(var_decl);
        let name = decls.first().map(|&(decl, _)| self.ast.declarator_name(decl).to_owned()).unwrap_or_default();
        for item in items {
            if self.stopped {
                return Signal::Normal;
            }
            let header = Scope::child(scope);
            scope::define(&header, name.clone(), item, String::new(), BindingFlags::default());
            match self.exec_stmt(body, &header) {
                Signal::Break => break,
                Signal::Return(v) => return Signal::Return(v),
                Signal::Continue | Signal::Normal => {}
            }
        }
        Signal::Normal
    }

    fn exec_switch(&mut self, id: NodeId, scope: &ScopeHandle) -> Signal {
        let (discriminant, cases) = self.ast.switch_parts(id);
        let cases = cases.to_vec();
        let disc_val = match self.eval_expr(discriminant, scope) {
            Ok(v) => v,
            Err(e) => {
                self.emit_error(e);
                return Signal::Normal;
            }
        };
        self.emit(CommandKind::SwitchStatement {
            discriminant: CommandValue::from(&disc_val),
        });

        let mut selected = None;
        let mut default_idx = None;
        for (i, &case) in cases.iter().enumerate() {
            let (test, _) = self.ast.case_parts(case);
            match test {
                Some(t) => {
                    let tv = match self.eval_expr(t, scope) {
                        Ok(v) => v,
                        Err(e) => {
                            self.emit_error(e);
                            continue;
                        }
                    };
                    let is_match = selected.is_none() && tv.loosely_equals(&disc_val);
                    self.emit(CommandKind::SwitchCase {
                        case_value: Some(CommandValue::from(&tv)),
                        matched: is_match,
                    });
                    if is_match {
                        selected = Some(i);
                    }
                }
                None => default_idx = Some(i),
            }
        }
        let start = selected.or(default_idx);
        if let Some(start) = start {
            if selected.is_none() && default_idx == Some(start) {
                self.emit(CommandKind::SwitchCase {
                    case_value: None,
                    matched: true,
                });
            }
            for &case in &cases[start..] {
                let (_, body) = self.ast.case_parts(case);
                for &stmt in body {
                    if self.stopped {
                        return Signal::Normal;
                    }
                    match self.exec_stmt(stmt, scope) {
                        Signal::Break => return Signal::Normal,
                        Signal::Return(v) => return Signal::Return(v),
                        Signal::Continue => return Signal::Continue,
                        Signal::Normal => {}
                    }
                }
            }
        }
        Signal::Normal
    }

    fn exec_var_decl(&mut self, id: NodeId, scope: &ScopeHandle) -> Signal {
        let (ty, decls) = self.ast.var_decl_parts(id);
        let (flags, type_name) = self.ast.type_flags(ty);
        let type_name = type_name.to_owned();
        for (decl, init) in decls {
            let name = self.ast.declarator_name(decl).to_owned();
            let array_size = self.ast.declarator_array_size(decl);
            let value = match init {
                Some(expr) if self.ast.kind(expr) == NodeKind::ConstructorCall => match self.construct_library_instance(&type_name, expr, scope) {
                    Ok(v) => v,
                    Err(e) => {
                        self.emit_error(e);
                        Value::Undefined
                    }
                },
                Some(expr) => match self.eval_expr(expr, scope) {
                    Ok(v) => v,
                    Err(e) => {
                        self.emit_error(e);
                        Value::Undefined
                    }
                },
                None => self.default_value_for_type(&type_name, array_size, scope),
            };
            let value = if flags.is_static {
                let key = (self.current_function, name.clone());
                self.statics.entry(key).or_insert_with(|| value.clone()).clone()
            } else {
                value
            };
            self.emit(CommandKind::VarSet {
                name: name.clone(),
                value: CommandValue::from(&value),
            });
            scope::define(scope, name, value, type_name.clone(), flags);
        }
        Signal::Normal
    }

    fn default_value_for_type(&mut self, type_name: &str, array_size: Option<Option<NodeId>>, scope: &ScopeHandle) -> Value {
        let scalar = match type_name {
            "bool" => Value::Bool(false),
            "float" | "double" => Value::Float64(0.0),
            "String" => Value::string(""),
            _ => Value::Int32(0),
        };
        match array_size {
            Some(Some(size_expr)) => {
                let len = self.eval_expr(size_expr, scope).map(|v| v.as_i64()).unwrap_or(0).max(0);
                Value::array(vec![scalar; len as usize])
            }
            Some(None) => Value::array(Vec::new()),
            None => scalar,
        }
    }

    fn construct_library_instance(&mut self, type_name: &str, ctor: NodeId, scope: &ScopeHandle) -> Result<Value, InterpError> {
        if !self.registry.is_known_library(type_name) {
            return Err(InterpError::library(format!("'{type_name}' is not a constructible library type")));
        }
        let args = self.ast.get(ctor).children.clone();
        for arg in args {
            self.eval_expr(arg, scope)?;
        }
        let instance_id = self.registry.instantiate();
        Ok(Value::Object(ObjectInstance {
            library: type_name.to_owned(),
            instance_id,
        }))
    }

    // ---- expressions (spec §4.7.2) --------------------------------------

    fn eval_expr(&mut self, id: NodeId, scope: &ScopeHandle) -> Result<Value, InterpError> {
        if self.stopped {
            return Ok(Value::Undefined);
        }
        match self.ast.kind(id) {
            NodeKind::NumberLiteral => Ok(match &self.ast.get(id).value {
                Some(Literal::Int32(n)) => Value::Int32(*n),
                Some(Literal::UInt32(n)) => Value::Int64(i64::from(*n)),
                Some(Literal::Float64(f)) => Value::Float64(*f),
                _ => Value::Undefined,
            }),
            NodeKind::StringLiteral => Ok(match &self.ast.get(id).value {
                Some(Literal::Str(s)) => Value::string(s.clone()),
                _ => Value::string(""),
            }),
            NodeKind::CharLiteral => Ok(match &self.ast.get(id).value {
                Some(Literal::Char(c)) => Value::Int32(*c as i32),
                _ => Value::Int32(0),
            }),
            NodeKind::Constant => Ok(match &self.ast.get(id).value {
                Some(Literal::Bool(b)) => Value::Bool(*b),
                _ => Value::Undefined,
            }),
            NodeKind::Identifier => self.eval_identifier(id, scope),
            NodeKind::BinaryOp => self.eval_binary(id, scope),
            NodeKind::UnaryOp => self.eval_unary(id, scope),
            NodeKind::Postfix => self.eval_postfix(id, scope),
            NodeKind::Assignment => self.eval_assignment(id, scope),
            NodeKind::Ternary => {
                let (c, t, e) = self.ast.ternary_parts(id);
                if self.eval_expr(c, scope)?.truthy() {
                    self.eval_expr(t, scope)
                } else {
                    self.eval_expr(e, scope)
                }
            }
            NodeKind::Comma => {
                let (l, r) = self.ast.binary_parts(id);
                self.eval_expr(l, scope)?;
                self.eval_expr(r, scope)
            }
            NodeKind::FuncCall => self.eval_call(id, scope),
            NodeKind::ConstructorCall => Err(InterpError::library("a constructor call needs a declared variable type")),
            NodeKind::MemberAccess => self.eval_member(id, scope),
            NodeKind::ArrayAccess => self.eval_array_access(id, scope),
            NodeKind::Cast => self.eval_cast(id, scope),
            NodeKind::Sizeof => self.eval_sizeof(id, scope),
            NodeKind::ArrayInitializer => self.eval_array_initializer(id, scope),
            _ => Ok(Value::Undefined),
        }
    }

    fn eval_identifier(&mut self, id: NodeId, scope: &ScopeHandle) -> Result<Value, InterpError> {
        let name = self.ast.get(id).value.as_ref().and_then(Literal::as_str).unwrap_or("").to_owned();
        if let Some(v) = scope::lookup(scope, &name) {
            return Ok(v);
        }
        if let Some(&def) = self.functions.get(&name) {
            return Ok(Value::Function(Rc::new(FunctionRef {
                def,
                name,
                captured: None,
            })));
        }
        Err(InterpError::link(format!("unknown identifier '{name}'")))
    }

    fn eval_binary(&mut self, id: NodeId, scope: &ScopeHandle) -> Result<Value, InterpError> {
        let (l, r) = self.ast.binary_parts(id);
        let op = self.ast.operator(id).to_owned();
        let lv = self.eval_expr(l, scope)?;
        match op.as_str() {
            "&&" => return Ok(Value::Bool(lv.truthy() && self.eval_expr(r, scope)?.truthy())),
            "||" => return Ok(Value::Bool(lv.truthy() || self.eval_expr(r, scope)?.truthy())),
            _ => {}
        }
        let rv = self.eval_expr(r, scope)?;
        Ok(self.apply_binary_op(&op, lv, rv))
    }

    /// All binary operators except the short-circuiting `&&`/`||` (already
    /// handled by the caller). Shared with compound assignment
    /// (`eval_assignment`), which applies the same operators to an lvalue's
    /// current value without re-evaluating the left operand expression.
    fn apply_binary_op(&mut self, op: &str, lv: Value, rv: Value) -> Value {
        if op == "+" && (matches!(lv, Value::Str(_)) || matches!(rv, Value::Str(_))) {
            return Value::string(format!("{}{}", lv.display_string(), rv.display_string()));
        }
        if op == "==" {
            return Value::Bool(lv.loosely_equals(&rv));
        }
        if op == "!=" {
            return Value::Bool(!lv.loosely_equals(&rv));
        }
        if matches!(op, "/" | "%") && Numeric::of(&rv).as_f64() == 0.0 {
            self.emit_error(InterpError::runtime("division by zero"));
            return Value::Int32(0);
        }
        let ln = Numeric::of(&lv);
        let rn = Numeric::of(&rv);
        match op {
            "<" => Value::Bool(ln.as_f64() < rn.as_f64()),
            ">" => Value::Bool(ln.as_f64() > rn.as_f64()),
            "<=" => Value::Bool(ln.as_f64() <= rn.as_f64()),
            ">=" => Value::Bool(ln.as_f64() >= rn.as_f64()),
            "+" | "-" | "*" => match (ln, rn) {
                (Numeric::Int(a), Numeric::Int(b)) => Numeric::Int(match op {
                    "+" => a.wrapping_add(b),
                    "-" => a.wrapping_sub(b),
                    _ => a.wrapping_mul(b),
                })
                .to_value(),
                _ => Value::Float64(match op {
                    "+" => ln.as_f64() + rn.as_f64(),
                    "-" => ln.as_f64() - rn.as_f64(),
                    _ => ln.as_f64() * rn.as_f64(),
                }),
            },
            "/" => match (ln, rn) {
                (Numeric::Int(a), Numeric::Int(b)) => Numeric::Int(a / b).to_value(),
                _ => Value::Float64(ln.as_f64() / rn.as_f64()),
            },
            "%" => Value::Int32((ln.as_i64() % rn.as_i64()) as i32),
            "&" => Numeric::Int(ln.as_i64() & rn.as_i64()).to_value(),
            "|" => Numeric::Int(ln.as_i64() | rn.as_i64()).to_value(),
            "^" => Numeric::Int(ln.as_i64() ^ rn.as_i64()).to_value(),
            "<<" => Numeric::Int(ln.as_i64() << rn.as_i64()).to_value(),
            ">>" => Numeric::Int(ln.as_i64() >> rn.as_i64()).to_value(),
            _ => Value::Undefined,
        }
    }

    fn eval_unary(&mut self, id: NodeId, scope: &ScopeHandle) -> Result<Value, InterpError> {
        let operand = self.ast.operand(id);
        let op = self.ast.operator(id).to_owned();
        match op.as_str() {
            "++" | "--" => {
                let lv = self.resolve_lvalue(operand, scope)?;
                let current = self.read_lvalue(&lv, scope)?;
                let new_value = step_numeric(&current, if op == "++" { 1 } else { -1 });
                self.write_lvalue(&lv, new_value.clone(), scope)?;
                Ok(new_value)
            }
            "&" => {
                let lv = self.resolve_lvalue(operand, scope)?;
                Ok(Value::Pointer(Rc::new(Pointer {
                    target: self.lvalue_to_pointer_target(lv, scope),
                    level: 1,
                })))
            }
            "*" => match self.eval_expr(operand, scope)? {
                Value::Pointer(p) => self.read_pointer(&p),
                _ => Err(InterpError::runtime("dereferencing a non-pointer value")),
            },
            "-" => {
                let v = self.eval_expr(operand, scope)?;
                Ok(match Numeric::of(&v) {
                    Numeric::Int(n) => Numeric::Int(-n).to_value(),
                    Numeric::Float(f) => Value::Float64(-f),
                })
            }
            "+" => self.eval_expr(operand, scope),
            "!" => Ok(Value::Bool(!self.eval_expr(operand, scope)?.truthy())),
            "~" => Ok(Value::Int32(!(self.eval_expr(operand, scope)?.as_i64()) as i32)),
            _ => Err(InterpError::runtime(format!("unsupported unary operator '{op}'"))),
        }
    }

    fn eval_postfix(&mut self, id: NodeId, scope: &ScopeHandle) -> Result<Value, InterpError> {
        let operand = self.ast.operand(id);
        let op = self.ast.operator(id).to_owned();
        let lv = self.resolve_lvalue(operand, scope)?;
        let old = self.read_lvalue(&lv, scope)?;
        let new_value = step_numeric(&old, if op == "++" { 1 } else { -1 });
        self.write_lvalue(&lv, new_value, scope)?;
        Ok(old)
    }

    fn eval_assignment(&mut self, id: NodeId, scope: &ScopeHandle) -> Result<Value, InterpError> {
        let (target, value_expr) = self.ast.binary_parts(id);
        let op = self.ast.operator(id).to_owned();
        let rhs = self.eval_expr(value_expr, scope)?;
        let lv = self.resolve_lvalue(target, scope)?;
        let new_value = if op == "=" {
            rhs
        } else {
            let current = self.read_lvalue(&lv, scope)?;
            let bin_op = op.trim_end_matches('=');
            self.apply_binary_op(bin_op, current, rhs)
        };
        self.write_lvalue(&lv, new_value.clone(), scope)?;
        if let LValue::Var { name } = &lv {
            self.emit(CommandKind::VarSet {
                name: name.clone(),
                value: CommandValue::from(&new_value),
            });
        }
        Ok(new_value)
    }

    fn eval_member(&mut self, id: NodeId, scope: &ScopeHandle) -> Result<Value, InterpError> {
        let (obj, field) = self.ast.member_parts(id);
        let object = self.eval_expr(obj, scope)?;
        let field_name = self.ast.get(field).value.as_ref().and_then(Literal::as_str).unwrap_or("");
        match object {
            Value::Struct(fields) => Ok(fields.borrow().get(field_name).cloned().unwrap_or(Value::Undefined)),
            Value::Object(instance) => Ok(self
                .registry
                .instance(instance.instance_id)
                .and_then(|s| s.fields.get(field_name).cloned())
                .unwrap_or(Value::Undefined)),
            _ => Err(InterpError::runtime(format!("member access '.{field_name}' on a non-struct value"))),
        }
    }

    fn eval_array_access(&mut self, id: NodeId, scope: &ScopeHandle) -> Result<Value, InterpError> {
        let (obj, index_expr) = self.ast.array_access_parts(id);
        let object = self.eval_expr(obj, scope)?;
        let index = self.eval_expr(index_expr, scope)?.as_i64();
        match object {
            Value::Array(array) => {
                let idx = usize::try_from(index).map_err(|_| InterpError::runtime("negative array index"))?;
                array.borrow().get(idx).cloned().ok_or_else(|| InterpError::runtime(format!("array index {idx} out of range")))
            }
            Value::Str(s) => {
                let idx = usize::try_from(index).map_err(|_| InterpError::runtime("negative string index"))?;
                s.as_bytes()
                    .get(idx)
                    .map(|b| Value::Int32(i32::from(*b)))
                    .ok_or_else(|| InterpError::runtime(format!("string index {idx} out of range")))
            }
            _ => Err(InterpError::runtime("indexing a non-array, non-string value")),
        }
    }

    fn eval_cast(&mut self, id: NodeId, scope: &ScopeHandle) -> Result<Value, InterpError> {
        let children = self.ast.get(id).children.clone();
        let (ty, operand) = (children[0], children[1]);
        let value = self.eval_expr(operand, scope)?;
        let (_, type_name) = self.ast.type_flags(ty);
        Ok(match type_name {
            "int" | "short" | "long" => Value::Int32(value.as_i64() as i32),
            "unsigned" | "byte" => Value::Int32((value.as_i64() as u32) as i32),
            "float" | "double" => Value::Float64(value.as_f64()),
            "bool" => Value::Bool(value.truthy()),
            "char" => Value::Int32(i32::from(value.as_i64() as u8)),
            "String" => Value::string(value.display_string()),
            _ => value,
        })
    }

    fn eval_sizeof(&mut self, id: NodeId, scope: &ScopeHandle) -> Result<Value, InterpError> {
        let operand = self.ast.operand(id);
        let size = if self.ast.kind(operand) == NodeKind::Type {
            let (_, name) = self.ast.type_flags(operand);
            type_size_bytes(name)
        } else {
            match self.eval_expr(operand, scope)? {
                Value::Bool(_) => 1,
                Value::Int32(_) | Value::Float32(_) => 4,
                Value::Int64(_) | Value::Float64(_) => 8,
                Value::Str(s) => i32::try_from(s.len()).unwrap_or(i32::MAX).saturating_add(1),
                _ => 4,
            }
        };
        Ok(Value::Int32(size))
    }

    fn eval_array_initializer(&mut self, id: NodeId, scope: &ScopeHandle) -> Result<Value, InterpError> {
        let children = self.ast.get(id).children.clone();
        let is_struct_literal = !children.is_empty() && children.iter().all(|&c| self.ast.kind(c) == NodeKind::Assignment);
        if is_struct_literal {
            let mut fields = indexmap::IndexMap::new();
            for c in children {
                let (target, value_expr) = self.ast.binary_parts(c);
                let name = self.ast.get(target).value.as_ref().and_then(Literal::as_str).unwrap_or("").to_owned();
                let value = self.eval_expr(value_expr, scope)?;
                fields.insert(name, value);
            }
            Ok(Value::Struct(Rc::new(RefCell::new(fields))))
        } else {
            let mut items = Vec::with_capacity(children.len());
            for c in children {
                items.push(self.eval_expr(c, scope)?);
            }
            Ok(Value::array(items))
        }
    }

    // ---- lvalues (spec §4.7.2, §9 pointers) -----------------------------

    fn resolve_lvalue(&mut self, id: NodeId, scope: &ScopeHandle) -> Result<LValue, InterpError> {
        match self.ast.kind(id) {
            NodeKind::Identifier => {
                let name = self.ast.get(id).value.as_ref().and_then(Literal::as_str).unwrap_or("").to_owned();
                Ok(LValue::Var { name })
            }
            NodeKind::ArrayAccess => {
                let (obj, index_expr) = self.ast.array_access_parts(id);
                match self.eval_expr(obj, scope)? {
                    Value::Array(array) => {
                        let index = self.eval_expr(index_expr, scope)?.as_i64();
                        let index = usize::try_from(index).map_err(|_| InterpError::runtime("negative array index"))?;
                        Ok(LValue::ArrayElem { array, index })
                    }
                    _ => Err(InterpError::runtime("indexing a non-array value")),
                }
            }
            NodeKind::MemberAccess => {
                let (obj, field) = self.ast.member_parts(id);
                match self.eval_expr(obj, scope)? {
                    Value::Struct(object) => {
                        let field_name = self.ast.get(field).value.as_ref().and_then(Literal::as_str).unwrap_or("").to_owned();
                        Ok(LValue::StructField { object, field: field_name })
                    }
                    _ => Err(InterpError::runtime("member assignment on a non-struct value")),
                }
            }
            NodeKind::UnaryOp if self.ast.operator(id) == "*" => {
                let operand = self.ast.operand(id);
                match self.eval_expr(operand, scope)? {
                    Value::Pointer(pointer) => Ok(LValue::PointerDeref { pointer }),
                    _ => Err(InterpError::runtime("dereferencing a non-pointer value")),
                }
            }
            _ => Err(InterpError::runtime("expression is not assignable")),
        }
    }

    fn read_lvalue(&self, lv: &LValue, scope: &ScopeHandle) -> Result<Value, InterpError> {
        match lv {
            LValue::Var { name } => scope::lookup(scope, name).ok_or_else(|| InterpError::link(format!("unknown identifier '{name}'"))),
            LValue::ArrayElem { array, index } => array.borrow().get(*index).cloned().ok_or_else(|| InterpError::runtime("array index out of range")),
            LValue::StructField { object, field } => Ok(object.borrow().get(field).cloned().unwrap_or(Value::Undefined)),
            LValue::PointerDeref { pointer } => self.read_pointer(pointer),
        }
    }

    fn write_lvalue(&self, lv: &LValue, value: Value, scope: &ScopeHandle) -> Result<(), InterpError> {
        match lv {
            LValue::Var { name } => {
                if scope::assign(scope, name, value) {
                    Ok(())
                } else {
                    Err(InterpError::link(format!("assignment to unknown identifier '{name}'")))
                }
            }
            LValue::ArrayElem { array, index } => {
                let mut items = array.borrow_mut();
                if *index < items.len() {
                    items[*index] = value;
                    Ok(())
                } else {
                    Err(InterpError::runtime("array index out of range"))
                }
            }
            LValue::StructField { object, field } => {
                object.borrow_mut().insert(field.clone(), value);
                Ok(())
            }
            LValue::PointerDeref { pointer } => self.write_pointer(pointer, value),
        }
    }

    fn read_pointer(&self, p: &Pointer) -> Result<Value, InterpError> {
        match &p.target {
            PointerTarget::ArrayElement { array, index } => array.borrow().get(*index).cloned().ok_or_else(|| InterpError::runtime("pointer index out of range")),
            PointerTarget::StructField { object, field } => Ok(object.borrow().get(field).cloned().unwrap_or(Value::Undefined)),
            PointerTarget::Variable { scope, name } => scope::lookup(scope, name).ok_or_else(|| InterpError::runtime("dereferencing a pointer to an out-of-scope variable")),
        }
    }

    fn write_pointer(&self, p: &Pointer, value: Value) -> Result<(), InterpError> {
        match &p.target {
            PointerTarget::ArrayElement { array, index } => {
                let mut items = array.borrow_mut();
                if *index < items.len() {
                    items[*index] = value;
                    Ok(())
                } else {
                    Err(InterpError::runtime("pointer index out of range"))
                }
            }
            PointerTarget::StructField { object, field } => {
                object.borrow_mut().insert(field.clone(), value);
                Ok(())
            }
            PointerTarget::Variable { scope, name } => {
                if scope::assign(scope, name, value) {
                    Ok(())
                } else {
                    Err(InterpError::runtime("dereferencing a pointer to an out-of-scope variable"))
                }
            }
        }
    }

    fn lvalue_to_pointer_target(&self, lv: LValue, scope: &ScopeHandle) -> PointerTarget {
        match lv {
            LValue::Var { name } => PointerTarget::Variable { scope: Rc::clone(scope), name },
            LValue::ArrayElem { array, index } => PointerTarget::ArrayElement { array, index },
            LValue::StructField { object, field } => PointerTarget::StructField { object, field },
            LValue::PointerDeref { pointer } => pointer.target.clone(),
        }
    }

    // ---- calls (spec §4.7.3 computable vs. external built-ins) ---------

    fn eval_call(&mut self, id: NodeId, scope: &ScopeHandle) -> Result<Value, InterpError> {
        let (callee, arg_ids) = self.ast.call_parts(id);
        let arg_ids = arg_ids.to_vec();
        let mut evaluated: smallvec::SmallVec<[Value; 4]> = smallvec::SmallVec::with_capacity(arg_ids.len());
        for a in arg_ids {
            evaluated.push(self.eval_expr(a, scope)?);
        }
        let args = evaluated.into_vec();
        match self.ast.kind(callee) {
            NodeKind::Identifier => {
                let name = self.ast.get(callee).value.as_ref().and_then(Literal::as_str).unwrap_or("").to_owned();
                self.dispatch_free_function(&name, args, scope)
            }
            NodeKind::MemberAccess => {
                let (obj, prop) = self.ast.member_parts(callee);
                let method = self.ast.get(prop).value.as_ref().and_then(Literal::as_str).unwrap_or("").to_owned();
                self.dispatch_method_call(obj, &method, args, scope)
            }
            _ => Err(InterpError::link("call target is neither a named function nor a method")),
        }
    }

    fn dispatch_free_function(&mut self, name: &str, args: Vec<Value>, scope: &ScopeHandle) -> Result<Value, InterpError> {
        if let Some(v) = builtins::call_computable(name, &args) {
            self.emit(CommandKind::FunctionCall {
                function: name.to_owned(),
                arguments: args.iter().map(CommandValue::from).collect(),
                iteration: None,
                completed: true,
            });
            return Ok(v);
        }
        let pin = |args: &[Value], i: usize| args.get(i).map(Value::as_i64).unwrap_or(0);
        match name {
            "pinMode" => {
                self.emit(CommandKind::PinMode {
                    pin: pin(&args, 0),
                    mode: pin_mode_name(pin(&args, 1)),
                });
                Ok(Value::Undefined)
            }
            "digitalWrite" => {
                self.emit(CommandKind::DigitalWrite {
                    pin: pin(&args, 0),
                    value: u8::from(pin(&args, 1) != 0),
                });
                Ok(Value::Undefined)
            }
            "analogWrite" => {
                self.emit(CommandKind::AnalogWrite {
                    pin: pin(&args, 0),
                    value: pin(&args, 1).clamp(0, 255) as u8,
                });
                Ok(Value::Undefined)
            }
            "delay" => {
                let duration = pin(&args, 0).max(0) as u64;
                self.emit(CommandKind::Delay { duration, actual_delay: duration });
                Ok(Value::Undefined)
            }
            "delayMicroseconds" => {
                let duration = pin(&args, 0).max(0) as u64;
                self.emit(CommandKind::DelayMicroseconds { duration, actual_delay: duration });
                Ok(Value::Undefined)
            }
            "tone" | "noTone" => {
                self.emit(CommandKind::FunctionCall {
                    function: name.to_owned(),
                    arguments: args.iter().map(CommandValue::from).collect(),
                    iteration: None,
                    completed: true,
                });
                Ok(Value::Undefined)
            }
            "digitalRead" => {
                let pin_no = pin(&args, 0);
                let timeout_ms = self.options.timeouts.default_ms;
                Ok(self.request_value("digitalRead", move |request_id| CommandKind::DigitalReadRequest { pin: pin_no, request_id }, timeout_ms))
            }
            "analogRead" => {
                let pin_no = pin(&args, 0);
                let timeout_ms = self.options.timeouts.default_ms;
                Ok(self.request_value("analogRead", move |request_id| CommandKind::AnalogReadRequest { pin: pin_no, request_id }, timeout_ms))
            }
            "millis" => {
                let timeout_ms = self.options.timeouts.millis_ms;
                Ok(self.request_value("millis", |request_id| CommandKind::MillisRequest { request_id }, timeout_ms))
            }
            "micros" => {
                let timeout_ms = self.options.timeouts.millis_ms;
                Ok(self.request_value("micros", |request_id| CommandKind::MicrosRequest { request_id }, timeout_ms))
            }
            "pulseIn" => {
                let pin_no = pin(&args, 0);
                let level = u8::from(pin(&args, 1) != 0);
                let timeout_ms = self.options.timeouts.default_ms;
                Ok(self.request_value(
                    "pulseIn",
                    move |request_id| CommandKind::PulseInRequest {
                        pin: pin_no,
                        value: level,
                        request_id,
                    },
                    timeout_ms,
                ))
            }
            _ => {
                if let Some(&def) = self.functions.get(name) {
                    // `setup`/`loop` bracket their own invocation (`run_program`
                    // emits its own `FUNCTION_CALL` pair around `invoke_function`,
                    // mod.rs `run_program`); an ordinary user-defined call has no
                    // other bracket, so `call_user_function` owns it here instead.
                    self.call_user_function(def, args, true)
                } else {
                    Err(InterpError::link(format!("call to undefined function '{name}'")))
                }
            }
        }
    }

    /// Runs a user-defined function's body. `bracket` controls whether this
    /// call emits its own `FUNCTION_CALL { completed: false }` / `{ completed:
    /// true }` pair around the body (spec §5 "a start command and the
    /// matching completion command bracket all commands produced during the
    /// call's execution") — `setup`/`loop` already get their bracket from
    /// `run_program` and pass `false` so the body's commands aren't
    /// double-bracketed.
    fn call_user_function(&mut self, def: NodeId, args: Vec<Value>, bracket: bool) -> Result<Value, InterpError> {
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(InterpError::limit("maximum call depth exceeded"));
        }
        let (_, name_decl, params, body) = self.ast.func_def_parts(def);
        let params = params.to_vec();
        let name = self.ast.declarator_name(name_decl).to_owned();
        let arguments: Vec<CommandValue> = args.iter().map(CommandValue::from).collect();
        if bracket {
            self.emit(CommandKind::FunctionCall {
                function: name.clone(),
                arguments: arguments.clone(),
                iteration: None,
                completed: false,
            });
        }
        let func_scope = Scope::child(&self.global);
        for (i, param) in params.iter().enumerate() {
            let (_, pdecl, default) = self.ast.param_parts(*param);
            let pname = self.ast.declarator_name(pdecl).to_owned();
            let value = match args.get(i) {
                Some(v) => v.clone(),
                None => match default {
                    Some(d) => self.eval_expr(d, &func_scope)?,
                    None => Value::Undefined,
                },
            };
            scope::define(&func_scope, pname, value, String::new(), BindingFlags::default());
        }
        let prev_fn = self.current_function.replace(def);
        self.call_depth += 1;
        let signal = self.exec_stmt(body, &func_scope);
        self.call_depth -= 1;
        self.current_function = prev_fn;
        if bracket {
            self.emit(CommandKind::FunctionCall {
                function: name,
                arguments,
                iteration: None,
                completed: true,
            });
        }
        Ok(match signal {
            Signal::Return(v) => v,
            _ => Value::Undefined,
        })
    }

    fn dispatch_method_call(&mut self, obj: NodeId, method: &str, args: Vec<Value>, scope: &ScopeHandle) -> Result<Value, InterpError> {
        let (library, object_id) = if self.ast.kind(obj) == NodeKind::Identifier {
            let name = self.ast.get(obj).value.as_ref().and_then(Literal::as_str).unwrap_or("").to_owned();
            match scope::lookup(scope, &name) {
                Some(Value::Object(o)) => (o.library, o.instance_id),
                Some(_) => return Err(InterpError::library(format!("'{name}' is not a library object"))),
                None if self.registry.is_known_library(&name) => (name, 0),
                None => return Err(InterpError::link(format!("unknown identifier '{name}'"))),
            }
        } else {
            match self.eval_expr(obj, scope)? {
                Value::Object(o) => (o.library, o.instance_id),
                _ => return Err(InterpError::library("method call on a non-library value")),
            }
        };

        let Some(descriptor) = self.registry.resolve(&library) else {
            return Err(InterpError::library(format!("unknown library '{library}'")));
        };
        let Some(kind) = descriptor.method_kind(method) else {
            return Err(InterpError::library(format!("unknown method '{library}.{method}'")));
        };

        match kind {
            MethodKind::Computable => Ok(self.compute_library_method(&library, method, &args)),
            MethodKind::External if library == "Serial" => Ok(self.dispatch_serial_method(method, args)),
            MethodKind::External => {
                let command_values: Vec<CommandValue> = args.iter().map(CommandValue::from).collect();
                if needs_response(method) {
                    let timeout_ms = self.options.timeouts.default_ms;
                    let lib = library.clone();
                    let meth = method.to_owned();
                    Ok(self.request_value(
                        "libraryMethod",
                        move |request_id| CommandKind::LibraryMethodRequest {
                            library: lib,
                            object: object_id,
                            method: meth,
                            args: command_values,
                            request_id,
                        },
                        timeout_ms,
                    ))
                } else {
                    self.emit(CommandKind::FunctionCall {
                        function: format!("{library}.{method}"),
                        arguments: command_values,
                        iteration: None,
                        completed: true,
                    });
                    Ok(Value::Undefined)
                }
            }
        }
    }

    fn compute_library_method(&self, library: &str, method: &str, args: &[Value]) -> Value {
        let n = |i: usize| args.get(i).map(|v| v.as_i64()).unwrap_or(0);
        match (library, method) {
            (_, "Color") if args.len() >= 3 => Value::Int64(i64::from(builtins::pack_rgb(n(0) as u8, n(1) as u8, n(2) as u8))),
            ("EEPROM", "length") => Value::Int32(1024),
            (_, "numPixels" | "getPixelColor") => Value::Int32(0),
            _ => Value::Undefined,
        }
    }

    fn dispatch_serial_method(&mut self, method: &str, args: Vec<Value>) -> Value {
        match method {
            "begin" => {
                self.emit(CommandKind::FunctionCall {
                    function: "Serial.begin".to_owned(),
                    arguments: args.iter().map(CommandValue::from).collect(),
                    iteration: None,
                    completed: true,
                });
                Value::Undefined
            }
            "print" => {
                self.emit(CommandKind::SerialPrint {
                    data: args.first().map(Value::display_string).unwrap_or_default(),
                    format: "AUTO".to_owned(),
                });
                Value::Undefined
            }
            "println" => {
                self.emit(CommandKind::SerialPrintln {
                    data: args.first().map(Value::display_string).unwrap_or_default(),
                    format: "AUTO".to_owned(),
                });
                Value::Undefined
            }
            "write" | "flush" => {
                self.emit(CommandKind::FunctionCall {
                    function: format!("Serial.{method}"),
                    arguments: args.iter().map(CommandValue::from).collect(),
                    iteration: None,
                    completed: true,
                });
                Value::Undefined
            }
            "available" | "read" | "readString" => {
                let timeout_ms = self.options.timeouts.default_ms;
                let op = format!("Serial.{method}");
                self.request_value(
                    "serial",
                    move |request_id| CommandKind::LibraryMethodRequest {
                        library: "Serial".to_owned(),
                        object: 0,
                        method: op,
                        args: Vec::new(),
                        request_id,
                    },
                    timeout_ms,
                )
            }
            _ => Value::Undefined,
        }
    }
}

impl From<CommandValue> for Value {
    fn from(value: CommandValue) -> Self {
        match value {
            CommandValue::Bool(b) => Self::Bool(b),
            CommandValue::Int(n) => Self::Int64(n),
            CommandValue::Float(f) => Self::Float64(f),
            CommandValue::Str(s) => Self::string(s),
            CommandValue::Array(items) => Self::array(items.into_iter().map(Value::from).collect()),
        }
    }
}

fn seed_platform_globals(global: &ScopeHandle, profile: &PlatformProfile) {
    for (name, pin) in &profile.pins {
        scope::define(global, name.clone(), Value::Int32(*pin as i32), "int", BindingFlags { is_const: true, ..BindingFlags::default() });
    }
    for key in ["HIGH", "LOW", "INPUT", "OUTPUT", "INPUT_PULLUP"] {
        let Some(raw) = profile.defines.get(key) else { continue };
        let n = raw
            .trim_end_matches(['L', 'l'])
            .parse::<i64>()
            .or_else(|_| i64::from_str_radix(raw.trim_start_matches("0x").trim_start_matches("0X"), 16));
        if let Ok(n) = n {
            scope::define(global, key, Numeric::Int(n).to_value(), "int", BindingFlags { is_const: true, ..BindingFlags::default() });
        }
    }
}

fn pin_mode_name(mode: i64) -> String {
    match mode {
        0 => "INPUT".to_owned(),
        1 => "OUTPUT".to_owned(),
        2 => "INPUT_PULLUP".to_owned(),
        other => other.to_string(),
    }
}

fn needs_response(method: &str) -> bool {
    matches!(method, "read" | "available" | "transfer" | "requestFrom" | "readString")
}

fn step_numeric(value: &Value, delta: i64) -> Value {
    match Numeric::of(value) {
        Numeric::Int(n) => Numeric::Int(n + delta).to_value(),
        Numeric::Float(f) => Value::Float64(f + delta as f64),
    }
}

fn type_size_bytes(name: &str) -> i32 {
    match name {
        "bool" | "char" | "byte" => 1,
        "float" | "int" | "unsigned" => 4,
        "double" | "long" => 8,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn run(source: &str, max_loop_iterations: u32) -> Vec<InterpreterEvent> {
        let ast = parse(source, Platform::ArduinoUno, true).expect("parses");
        let mut options = InterpreterOptions::default();
        options.max_loop_iterations = max_loop_iterations;
        let mut interp = Interpreter::new(&ast, options);
        interp.start();
        let mut events = Vec::new();
        while let Some(event) = interp.step_until_event() {
            let done = matches!(event, InterpreterEvent::Complete);
            events.push(event);
            if done {
                break;
            }
        }
        events
    }

    fn commands(events: &[InterpreterEvent]) -> Vec<&CommandKind> {
        events
            .iter()
            .filter_map(|e| match e {
                InterpreterEvent::Command(c) => Some(&c.kind),
                InterpreterEvent::Complete => None,
            })
            .collect()
    }

    #[test]
    fn blink_emits_pin_mode_and_digital_write() {
        let source = r"
            void setup() { pinMode(13, OUTPUT); }
            void loop() { digitalWrite(13, HIGH); delay(1000); digitalWrite(13, LOW); delay(1000); }
        ";
        let events = run(source, 1);
        let kinds = commands(&events);
        assert!(kinds.iter().any(|k| matches!(k, CommandKind::PinMode { pin: 13, .. })));
        assert!(kinds.iter().any(|k| matches!(k, CommandKind::DigitalWrite { pin: 13, value: 1 })));
        assert!(kinds.iter().any(|k| matches!(k, CommandKind::LoopLimitReached { iteration: 1 })));
    }

    #[test]
    fn zero_max_iterations_skips_loop_body() {
        let source = r"
            void setup() {}
            void loop() { digitalWrite(13, HIGH); }
        ";
        let events = run(source, 0);
        let kinds = commands(&events);
        assert!(!kinds.iter().any(|k| matches!(k, CommandKind::DigitalWrite { .. })));
        assert!(kinds.iter().any(|k| matches!(k, CommandKind::LoopLimitReached { iteration: 0 })));
    }

    #[test]
    fn switch_fall_through_executes_every_case_after_the_match() {
        let source = r"
            int total = 0;
            void setup() {
                int x = 1;
                switch (x) {
                    case 1: total = total + 1;
                    case 2: total = total + 10;
                    break;
                    case 3: total = total + 100;
                }
            }
            void loop() {}
        ";
        let events = run(source, 0);
        let kinds = commands(&events);
        let sets: Vec<_> = kinds
            .iter()
            .filter_map(|k| match k {
                CommandKind::VarSet { name, value } if name == "total" => Some(value.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(sets.last(), Some(&CommandValue::Int(11)));
    }

    #[test]
    fn division_by_zero_yields_zero_and_keeps_running() {
        let source = r"
            int result = 0;
            void setup() { int a = 10; int b = 0; result = a / b; }
            void loop() {}
        ";
        let events = run(source, 0);
        let kinds = commands(&events);
        assert!(kinds.iter().any(|k| matches!(k, CommandKind::Error { error_type, .. } if error_type == "RuntimeError")));
        let last_set = kinds.iter().rev().find_map(|k| match k {
            CommandKind::VarSet { name, value } if name == "result" => Some(value.clone()),
            _ => None,
        });
        assert_eq!(last_set, Some(CommandValue::Int(0)));
    }

    #[test]
    fn stop_unwinds_before_program_end() {
        let source = r"
            void setup() {}
            void loop() { digitalWrite(13, HIGH); }
        ";
        let ast = parse(source, Platform::ArduinoUno, true).expect("parses");
        let mut options = InterpreterOptions::default();
        options.max_loop_iterations = 5;
        let mut interp = Interpreter::new(&ast, options);
        interp.start();
        interp.stop();
        let mut saw_complete = false;
        while let Some(event) = interp.step_until_event() {
            if matches!(event, InterpreterEvent::Complete) {
                saw_complete = true;
                break;
            }
        }
        assert!(saw_complete);
    }
}
