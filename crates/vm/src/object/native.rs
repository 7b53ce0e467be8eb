//! Native (host) functions callable from bytecode.

use crate::error::VmResult;
use crate::execution_engine::ExecutionEngine;
use crate::memory::{Trace, Tracer};
use crate::value::Value;

/// The two callable shapes a native can take. The engine-taking shape is
/// for natives that allocate or re-enter the interpreter.
#[derive(Clone, Copy)]
pub enum NativeHandler {
    Simple(fn(&[Value]) -> VmResult<Value>),
    WithEngine(fn(&mut ExecutionEngine, &[Value]) -> VmResult<Value>),
}

impl std::fmt::Debug for NativeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NativeHandler::Simple(_) => f.write_str("NativeHandler::Simple"),
            NativeHandler::WithEngine(_) => f.write_str("NativeHandler::WithEngine"),
        }
    }
}

/// A host function, optionally bound to a receiver. Builtin methods fetched
/// off primitive receivers (`arr.push`) are materialised as a bound native;
/// the receiver is prepended to the argument list at call time.
#[derive(Debug)]
pub struct ObjNativeFunction {
    name: Box<str>,
    handler: NativeHandler,
    receiver: Option<Value>,
}

impl ObjNativeFunction {
    pub fn new(name: &str, handler: NativeHandler) -> Self {
        Self {
            name: name.into(),
            handler,
            receiver: None,
        }
    }

    pub fn bound(name: &str, handler: NativeHandler, receiver: Value) -> Self {
        Self {
            name: name.into(),
            handler,
            receiver: Some(receiver),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> NativeHandler {
        self.handler
    }

    pub fn receiver(&self) -> Option<Value> {
        self.receiver
    }
}

impl Trace for ObjNativeFunction {
    fn trace(&self, tracer: &mut Tracer) {
        if let Some(receiver) = self.receiver {
            tracer.visit_value(receiver);
        }
    }
}
