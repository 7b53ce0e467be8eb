//! The tracing side of the collector: the visitor every object implements
//! and the gray worklist it feeds.

use crate::memory::GcRef;
use crate::object::{
    ObjClass, ObjClosure, ObjFunctionProto, ObjInstance, ObjModule, ObjString, ObjUpvalue,
};
use crate::value::Value;

/// Implemented by every heap object kind: report each reachable value and
/// object reference to the tracer. Keeping this as a visitor decouples the
/// collector from concrete object layouts.
pub trait Trace {
    fn trace(&self, tracer: &mut Tracer);
}

/// The mark-phase worklist. Objects push their outgoing edges here; the
/// memory manager pops until the list runs dry. An explicit worklist keeps
/// deep object graphs from overflowing the host call stack.
#[derive(Default)]
pub struct Tracer {
    gray: Vec<Value>,
}

impl Tracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a value; primitives carry no references and are skipped.
    pub fn visit_value(&mut self, value: Value) {
        if value.is_object() {
            self.gray.push(value);
        }
    }

    pub fn visit_string(&mut self, string: GcRef<ObjString>) {
        self.gray.push(Value::String(string));
    }

    pub fn visit_class(&mut self, class: GcRef<ObjClass>) {
        self.gray.push(Value::Class(class));
    }

    pub fn visit_instance(&mut self, instance: GcRef<ObjInstance>) {
        self.gray.push(Value::Instance(instance));
    }

    pub fn visit_closure(&mut self, closure: GcRef<ObjClosure>) {
        self.gray.push(Value::Closure(closure));
    }

    pub fn visit_upvalue(&mut self, upvalue: GcRef<ObjUpvalue>) {
        self.gray.push(Value::Upvalue(upvalue));
    }

    pub fn visit_proto(&mut self, proto: GcRef<ObjFunctionProto>) {
        self.gray.push(Value::Proto(proto));
    }

    pub fn visit_module(&mut self, module: GcRef<ObjModule>) {
        self.gray.push(Value::Module(module));
    }

    pub(crate) fn pop(&mut self) -> Option<Value> {
        self.gray.pop()
    }
}
