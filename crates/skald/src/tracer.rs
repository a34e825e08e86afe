//! Execution tracing hooks.
//!
//! The evaluator reports calls, returns, raises and suspension points
//! to a [`Tracer`] installed on the root scope. The default
//! [`NoopTracer`] compiles away to nothing interesting;
//! [`StderrTracer`] is handy when debugging embedded scripts.

use crate::source::Pos;

/// One evaluator event.
#[derive(Debug, Clone, Copy)]
pub enum TraceEvent<'a> {
    /// Entering a script or host function.
    Call { name: &'a str, pos: Pos, depth: usize },
    /// Leaving a function normally.
    Return { name: &'a str, depth: usize },
    /// An exception starting to unwind.
    Raise { kind: &'a str, message: &'a str, pos: Pos },
    /// Execution suspending at an external call.
    Suspend { name: &'a str, pos: Pos },
    /// Execution resuming after a host-provided result.
    Resume { name: &'a str },
}

pub trait Tracer {
    fn event(&mut self, event: &TraceEvent<'_>);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn event(&mut self, _event: &TraceEvent<'_>) {}
}

/// Writes events to stderr, one line each, indented by call depth.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrTracer;

impl Tracer for StderrTracer {
    fn event(&mut self, event: &TraceEvent<'_>) {
        match event {
            TraceEvent::Call { name, pos, depth } => {
                eprintln!("{:indent$}call {name} at {pos}", "", indent = depth * 2);
            }
            TraceEvent::Return { name, depth } => {
                eprintln!("{:indent$}ret  {name}", "", indent = depth * 2);
            }
            TraceEvent::Raise { kind, message, pos } => {
                eprintln!("raise {kind}: {message} at {pos}");
            }
            TraceEvent::Suspend { name, pos } => {
                eprintln!("suspend on {name} at {pos}");
            }
            TraceEvent::Resume { name } => {
                eprintln!("resume {name}");
            }
        }
    }
}

/// Collects events for inspection in tests.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    pub lines: Vec<String>,
}

impl Tracer for RecordingTracer {
    fn event(&mut self, event: &TraceEvent<'_>) {
        let line = match event {
            TraceEvent::Call { name, .. } => format!("call {name}"),
            TraceEvent::Return { name, .. } => format!("return {name}"),
            TraceEvent::Raise { kind, .. } => format!("raise {kind}"),
            TraceEvent::Suspend { name, .. } => format!("suspend {name}"),
            TraceEvent::Resume { name } => format!("resume {name}"),
        };
        self.lines.push(line);
    }
}
