//! Modules: top-level compilation units with globals and exports.

use hashbrown::HashMap;

use crate::memory::{GcRef, Trace, Tracer};
use crate::object::{ObjFunctionProto, ObjString};
use crate::value::Value;

/// Lifecycle of a module. A module in `Executing` that gets imported again
/// (an import cycle) is returned as-is; the importer sees whatever has been
/// exported so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Created, main proto not yet entered.
    Pending,
    /// Main proto's frame is live.
    Executing,
    /// Main proto returned.
    Executed,
}

/// A loaded module.
#[derive(Debug)]
pub struct ObjModule {
    file_name: GcRef<ObjString>,
    file_path: GcRef<ObjString>,
    main_proto: Option<GcRef<ObjFunctionProto>>,
    globals: HashMap<GcRef<ObjString>, Value>,
    exports: HashMap<GcRef<ObjString>, Value>,
    state: ModuleState,
}

impl ObjModule {
    pub fn new(
        file_name: GcRef<ObjString>,
        file_path: GcRef<ObjString>,
        main_proto: Option<GcRef<ObjFunctionProto>>,
    ) -> Self {
        Self {
            file_name,
            file_path,
            main_proto,
            globals: HashMap::new(),
            exports: HashMap::new(),
            state: ModuleState::Pending,
        }
    }

    pub fn file_name(&self) -> GcRef<ObjString> {
        self.file_name
    }

    pub fn file_path(&self) -> GcRef<ObjString> {
        self.file_path
    }

    pub fn main_proto(&self) -> Option<GcRef<ObjFunctionProto>> {
        self.main_proto
    }

    pub fn global(&self, name: GcRef<ObjString>) -> Option<Value> {
        self.globals.get(&name).copied()
    }

    pub fn set_global(&mut self, name: GcRef<ObjString>, value: Value) {
        self.globals.insert(name, value);
    }

    pub fn export(&self, name: GcRef<ObjString>) -> Option<Value> {
        self.exports.get(&name).copied()
    }

    pub fn set_export(&mut self, name: GcRef<ObjString>, value: Value) {
        self.exports.insert(name, value);
    }

    pub fn exports(&self) -> impl Iterator<Item = (GcRef<ObjString>, Value)> + '_ {
        self.exports.iter().map(|(k, v)| (*k, *v))
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    pub fn set_state(&mut self, state: ModuleState) {
        self.state = state;
    }
}

impl Trace for ObjModule {
    fn trace(&self, tracer: &mut Tracer) {
        tracer.visit_string(self.file_name);
        tracer.visit_string(self.file_path);
        if let Some(proto) = self.main_proto {
            tracer.visit_proto(proto);
        }
        for (name, value) in &self.globals {
            tracer.visit_string(*name);
            tracer.visit_value(*value);
        }
        for (name, value) in &self.exports {
            tracer.visit_string(*name);
            tracer.visit_value(*value);
        }
    }
}
