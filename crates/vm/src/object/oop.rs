//! Classes, instances, and bound methods.

use hashbrown::HashMap;

use crate::memory::{GcRef, Trace, Tracer};
use crate::object::{ObjClosure, ObjString};
use crate::value::Value;

/// A class: name, optional superclass, and a method table. `INHERIT` copies
/// the superclass methods in, so lookup on the own table is usually enough;
/// the chain is still walked for methods installed on the super afterwards.
#[derive(Debug)]
pub struct ObjClass {
    name: GcRef<ObjString>,
    superclass: Option<GcRef<ObjClass>>,
    methods: HashMap<GcRef<ObjString>, Value>,
}

impl ObjClass {
    pub fn new(name: GcRef<ObjString>) -> Self {
        Self {
            name,
            superclass: None,
            methods: HashMap::new(),
        }
    }

    pub fn name(&self) -> GcRef<ObjString> {
        self.name
    }

    pub fn superclass(&self) -> Option<GcRef<ObjClass>> {
        self.superclass
    }

    pub fn set_superclass(&mut self, superclass: GcRef<ObjClass>) {
        self.superclass = Some(superclass);
    }

    pub fn method(&self, name: GcRef<ObjString>) -> Option<Value> {
        self.methods.get(&name).copied()
    }

    pub fn set_method(&mut self, name: GcRef<ObjString>, method: Value) {
        self.methods.insert(name, method);
    }

    pub fn methods(&self) -> impl Iterator<Item = (GcRef<ObjString>, Value)> + '_ {
        self.methods.iter().map(|(k, v)| (*k, *v))
    }
}

impl Trace for ObjClass {
    fn trace(&self, tracer: &mut Tracer) {
        tracer.visit_string(self.name);
        if let Some(superclass) = self.superclass {
            tracer.visit_class(superclass);
        }
        for (name, method) in &self.methods {
            tracer.visit_string(*name);
            tracer.visit_value(*method);
        }
    }
}

/// An instance: a class reference plus an open (dynamic) field table.
/// Methods resolve through the class chain, not here.
#[derive(Debug)]
pub struct ObjInstance {
    class: GcRef<ObjClass>,
    fields: HashMap<GcRef<ObjString>, Value>,
}

impl ObjInstance {
    pub fn new(class: GcRef<ObjClass>) -> Self {
        Self {
            class,
            fields: HashMap::new(),
        }
    }

    pub fn class(&self) -> GcRef<ObjClass> {
        self.class
    }

    pub fn field(&self, name: GcRef<ObjString>) -> Option<Value> {
        self.fields.get(&name).copied()
    }

    pub fn set_field(&mut self, name: GcRef<ObjString>, value: Value) {
        self.fields.insert(name, value);
    }

    pub fn has_field(&self, name: GcRef<ObjString>) -> bool {
        self.fields.contains_key(&name)
    }
}

impl Trace for ObjInstance {
    fn trace(&self, tracer: &mut Tracer) {
        tracer.visit_class(self.class);
        for (name, value) in &self.fields {
            tracer.visit_string(*name);
            tracer.visit_value(*value);
        }
    }
}

/// An instance paired with a method closure; calling it inserts the
/// instance as the implicit first argument.
#[derive(Debug)]
pub struct ObjBoundMethod {
    receiver: GcRef<ObjInstance>,
    method: GcRef<ObjClosure>,
}

impl ObjBoundMethod {
    pub fn new(receiver: GcRef<ObjInstance>, method: GcRef<ObjClosure>) -> Self {
        Self { receiver, method }
    }

    pub fn receiver(&self) -> GcRef<ObjInstance> {
        self.receiver
    }

    pub fn method(&self) -> GcRef<ObjClosure> {
        self.method
    }
}

impl Trace for ObjBoundMethod {
    fn trace(&self, tracer: &mut Tracer) {
        tracer.visit_instance(self.receiver);
        tracer.visit_closure(self.method);
    }
}
