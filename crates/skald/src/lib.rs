#![doc = include_str!("../../../README.md")]

mod args;
mod ast;
mod builtins;
mod class;
mod eval;
mod exception;
mod ic;
mod interp;
mod lex;
mod object;
mod ops;
mod parse;
mod resource;
mod run;
mod scope;
mod source;
mod token;
pub mod tracer;
mod value;

pub use crate::{
    exception::{ExcType, StackFrame},
    lex::LexError,
    object::Object,
    parse::ParseError,
    resource::{DEFAULT_MAX_RECURSION_DEPTH, ResourceLimits, RuntimeFlags},
    run::{
        CompileError, Error, Exception, ExecutionError, GlobalScope, HostCall, HostError,
        RunProgress, Script,
    },
    source::{Pos, Source},
    tracer::{NoopTracer, RecordingTracer, StderrTracer, TraceEvent, Tracer},
};
