//! Zero-cost interpreter instrumentation (SPEC_FULL.md §12), separate from
//! the command stream: commands are the interpreter's *product* (spec
//! §3.5); a tracer is a debugging aid over its internal steps, the same
//! split a bytecode VM draws between its emitted output and an internal
//! instruction trace.

use crate::{ast::NodeId, interpreter::command::Command, interpreter::ExecState};

/// Hook methods called at statement boundaries, command emission, and
/// state transitions. The default no-op bodies let `NoopTracer` monomorphize
/// away entirely in a release build.
pub trait InterpTracer {
    fn on_statement(&mut self, _node: NodeId) {}
    fn on_command(&mut self, _command: &Command) {}
    fn on_state_change(&mut self, _from: ExecState, _to: ExecState) {}
}

/// The default tracer: every hook is an empty inline function, so it costs
/// nothing once monomorphized (SPEC_FULL.md §12).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl InterpTracer for NoopTracer {}

/// A human-readable tracer for manual debugging; routes through the
/// `verbose`/`debug` [`crate::interpreter::InterpreterOptions`] fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrTracer;

impl InterpTracer for StderrTracer {
    fn on_statement(&mut self, node: NodeId) {
        eprintln!("[ardast] stmt {node}");
    }

    fn on_command(&mut self, command: &Command) {
        eprintln!("[ardast] command {command:?}");
    }

    fn on_state_change(&mut self, from: ExecState, to: ExecState) {
        eprintln!("[ardast] {from:?} -> {to:?}");
    }
}
