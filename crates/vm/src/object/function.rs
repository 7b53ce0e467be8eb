//! Function prototypes, closures, and upvalue cells.

use crate::chunk::Chunk;
use crate::memory::{GcRef, Trace, Tracer};
use crate::object::{ObjModule, ObjString};
use crate::value::Value;

/// Describes how one upvalue of a prototype is captured: from the caller
/// frame's registers (`is_local`) or inherited from the enclosing closure's
/// upvalue list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueDesc {
    pub is_local: bool,
    pub index: usize,
}

/// An immutable, linked function body: register count, upvalue count, source
/// name, bytecode chunk, and one descriptor per upvalue. Every descriptor is
/// filled before linking completes.
#[derive(Debug)]
pub struct ObjFunctionProto {
    num_registers: usize,
    num_upvalues: usize,
    name: GcRef<ObjString>,
    chunk: Chunk,
    upvalue_descs: Vec<UpvalueDesc>,
}

impl ObjFunctionProto {
    pub fn new(
        num_registers: usize,
        num_upvalues: usize,
        name: GcRef<ObjString>,
        chunk: Chunk,
        upvalue_descs: Vec<UpvalueDesc>,
    ) -> Self {
        debug_assert_eq!(num_upvalues, upvalue_descs.len());
        Self {
            num_registers,
            num_upvalues,
            name,
            chunk,
            upvalue_descs,
        }
    }

    pub fn num_registers(&self) -> usize {
        self.num_registers
    }

    pub fn num_upvalues(&self) -> usize {
        self.num_upvalues
    }

    pub fn name(&self) -> GcRef<ObjString> {
        self.name
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    /// The linker patches proto placeholders in the constant pool after all
    /// prototypes exist.
    pub fn chunk_mut(&mut self) -> &mut Chunk {
        &mut self.chunk
    }

    pub fn upvalue_desc(&self, index: usize) -> Option<UpvalueDesc> {
        self.upvalue_descs.get(index).copied()
    }

    pub fn upvalue_descs(&self) -> &[UpvalueDesc] {
        &self.upvalue_descs
    }
}

impl Trace for ObjFunctionProto {
    fn trace(&self, tracer: &mut Tracer) {
        tracer.visit_string(self.name);
        for constant in self.chunk.constants() {
            tracer.visit_value(*constant);
        }
    }
}

/// The two states of an upvalue cell. The OPEN → CLOSED transition is
/// one-way.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpvalueState {
    /// Points at an absolute slot of the VM's register vector; the slot
    /// belongs to a live frame for as long as the upvalue stays open.
    Open(usize),
    /// Holds a copy of the captured value after its frame left scope.
    Closed(Value),
}

/// The indirection cell behind closure capture.
#[derive(Debug)]
pub struct ObjUpvalue {
    state: UpvalueState,
}

impl ObjUpvalue {
    pub fn open(slot: usize) -> Self {
        Self {
            state: UpvalueState::Open(slot),
        }
    }

    pub fn state(&self) -> UpvalueState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, UpvalueState::Closed(_))
    }

    /// The register slot while open.
    pub fn open_slot(&self) -> Option<usize> {
        match self.state {
            UpvalueState::Open(slot) => Some(slot),
            UpvalueState::Closed(_) => None,
        }
    }

    /// Copies `value` into the cell and seals it.
    pub fn close(&mut self, value: Value) {
        debug_assert!(!self.is_closed(), "upvalue closed twice");
        self.state = UpvalueState::Closed(value);
    }

    /// Replaces the captured value of a closed cell (SET_UPVALUE after the
    /// captured frame returned).
    pub fn set_closed_value(&mut self, value: Value) {
        debug_assert!(self.is_closed(), "store into an open upvalue goes to its register");
        self.state = UpvalueState::Closed(value);
    }

    /// The captured value once closed.
    pub fn closed_value(&self) -> Option<Value> {
        match self.state {
            UpvalueState::Open(_) => None,
            UpvalueState::Closed(value) => Some(value),
        }
    }
}

impl Trace for ObjUpvalue {
    fn trace(&self, tracer: &mut Tracer) {
        // An open upvalue's target lives in the register vector and is
        // traced as part of the execution context roots.
        if let UpvalueState::Closed(value) = self.state {
            tracer.visit_value(value);
        }
    }
}

/// A prototype paired with its captured upvalues and the module it was
/// created in (`GET_GLOBAL`/`SET_GLOBAL` resolve against that module).
#[derive(Debug)]
pub struct ObjClosure {
    proto: GcRef<ObjFunctionProto>,
    upvalues: Vec<GcRef<ObjUpvalue>>,
    module: GcRef<ObjModule>,
}

impl ObjClosure {
    pub fn new(
        proto: GcRef<ObjFunctionProto>,
        upvalues: Vec<GcRef<ObjUpvalue>>,
        module: GcRef<ObjModule>,
    ) -> Self {
        Self {
            proto,
            upvalues,
            module,
        }
    }

    pub fn proto(&self) -> GcRef<ObjFunctionProto> {
        self.proto
    }

    pub fn module(&self) -> GcRef<ObjModule> {
        self.module
    }

    pub fn upvalue(&self, index: usize) -> Option<GcRef<ObjUpvalue>> {
        self.upvalues.get(index).copied()
    }

    pub fn upvalues(&self) -> &[GcRef<ObjUpvalue>] {
        &self.upvalues
    }
}

impl Trace for ObjClosure {
    fn trace(&self, tracer: &mut Tracer) {
        tracer.visit_proto(self.proto);
        tracer.visit_module(self.module);
        for upvalue in &self.upvalues {
            tracer.visit_upvalue(*upvalue);
        }
    }
}
