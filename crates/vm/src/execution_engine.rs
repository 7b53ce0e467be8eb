//! The execution engine: frame stack management, instruction dispatch,
//! calls, throws, and collection driving.
//!
//! One engine owns one VM instance's entire state (heap, module cache,
//! dispatcher, builtin registry, execution context), so multiple VMs can
//! coexist in a process. Execution is strictly single-threaded; the only
//! re-entrancy is a nested [`ExecutionEngine::run_until`] while an imported
//! module's main proto runs to completion.

use std::path::PathBuf;

use log::debug;

use crate::builtin_registry::BuiltinRegistry;
use crate::chunk::NO_REGISTER;
use crate::error::{VmError, VmResult};
use crate::execution_context::{CallFrame, ExecutionContext, TryHandler};
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::memory::{GcRef, MemoryManager};
use crate::module_manager::{LoadedModule, ModuleManager};
use crate::object::{
    ModuleState, NativeHandler, ObjClass, ObjClosure, ObjModule, ObjString, ObjUpvalue,
};
use crate::operator_dispatcher::{is_truthy, OperatorDispatcher};
use crate::value::Value;
use crate::vm_state::VmState;

/// Arguments handed to the VM by its embedder (the CLI wrapper).
#[derive(Debug, Clone)]
pub struct VmArgs {
    /// The entry bytecode file.
    pub entry_path: PathBuf,
    /// Directory of the entry file; a module resolution root.
    pub entry_dir: PathBuf,
    /// Pass-through command-line arguments, visible to native functions.
    pub argv: Vec<String>,
    /// Optional extra module resolution root.
    pub library_root: Option<PathBuf>,
}

impl VmArgs {
    /// Builds the args struct from an entry path, deriving `entry_dir`.
    pub fn new(entry_path: PathBuf, argv: Vec<String>) -> Self {
        let entry_dir = entry_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            entry_path,
            entry_dir,
            argv,
            library_root: None,
        }
    }
}

/// Restrictions on the engine's resource usage. Exceeding one is a fatal
/// (uncatchable) fault.
#[derive(Debug, Clone, Copy)]
pub struct EngineLimits {
    pub max_call_depth: usize,
    pub max_register_slots: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_call_depth: 1024,
            max_register_slots: 1 << 20,
        }
    }
}

/// The virtual machine.
pub struct ExecutionEngine {
    state: VmState,
    /// Set by handlers that placed the instruction pointer themselves.
    is_jumping: bool,
    jump_table: JumpTable,
    limits: EngineLimits,
    heap: MemoryManager,
    dispatcher: OperatorDispatcher,
    builtins: BuiltinRegistry,
    modules: ModuleManager,
    context: ExecutionContext,
    args: VmArgs,
    /// The class thrown error instances are made from; a GC root.
    error_class: GcRef<ObjClass>,
}

impl ExecutionEngine {
    pub fn new(args: VmArgs) -> Self {
        Self::with_limits(args, EngineLimits::default())
    }

    pub fn with_limits(args: VmArgs, limits: EngineLimits) -> Self {
        let mut heap = MemoryManager::new();
        let error_name = heap.new_string("Error");
        let error_class = heap.new_class(error_name);
        Self {
            state: VmState::NONE,
            is_jumping: false,
            jump_table: JumpTable::new(),
            limits,
            heap,
            dispatcher: OperatorDispatcher::new(),
            builtins: BuiltinRegistry::new(),
            modules: ModuleManager::new(),
            context: ExecutionContext::new(),
            args,
            error_class,
        }
    }

    // --- Public surface ---

    /// Loads the entry module and runs it until HALT, return of `main`, or
    /// an uncaught throw.
    pub fn interpret(&mut self) -> VmResult<()> {
        let requested = self.args.entry_path.to_string_lossy().into_owned();
        let entry_dir = self.args.entry_dir.clone();
        let loaded = self
            .modules
            .load(&mut self.heap, &requested, &entry_dir, &self.args)?;

        let result = match loaded {
            // A fresh engine cannot have the entry cached, but reuse is
            // harmless: an executed module just has nothing left to run.
            LoadedModule::Cached(_) => Ok(()),
            LoadedModule::Fresh { module, main_proto } => {
                let closure = self.heap.new_closure(main_proto, Vec::new(), module);
                self.heap
                    .module_mut(module)
                    .set_state(ModuleState::Executing);
                self.push_closure_frame(closure, Vec::new(), NO_REGISTER)?;
                let outcome = self.run_until(0);
                if outcome.is_ok() {
                    self.heap.module_mut(module).set_state(ModuleState::Executed);
                }
                outcome
            }
        };

        match &result {
            Ok(()) => {
                if self.state == VmState::NONE {
                    self.state = VmState::HALT;
                }
            }
            Err(err) => {
                debug!("engine fault: {err}");
                self.state = VmState::FAULT;
            }
        }
        result
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn heap(&self) -> &MemoryManager {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut MemoryManager {
        &mut self.heap
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub(crate) fn context_mut(&mut self) -> &mut ExecutionContext {
        &mut self.context
    }

    pub fn args(&self) -> &VmArgs {
        &self.args
    }

    pub fn modules(&self) -> &ModuleManager {
        &self.modules
    }

    pub fn dispatcher(&self) -> &OperatorDispatcher {
        &self.dispatcher
    }

    pub fn builtins(&self) -> &BuiltinRegistry {
        &self.builtins
    }

    /// Truthiness of a value under the VM's rules.
    pub fn truthy(&self, value: Value) -> bool {
        is_truthy(&self.heap, value)
    }

    // --- Execution loop ---

    /// Runs until the frame stack shrinks to `depth`, HALT, or a
    /// non-catchable error. Catchable errors become thrown error instances
    /// before they can surface.
    pub(crate) fn run_until(&mut self, depth: usize) -> VmResult<()> {
        while self.state == VmState::NONE && self.context.frame_depth() > depth {
            match self.execute_next() {
                Ok(()) => {}
                Err(err) if err.is_catchable() => {
                    let value = self.make_error_value(err.kind(), &err.to_string());
                    self.throw_value(value)?;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Decodes and executes one instruction. Collection may run here,
    /// between instructions, and nowhere else.
    fn execute_next(&mut self) -> VmResult<()> {
        if self.heap.should_collect() {
            self.collect_garbage();
        }

        let decoded = {
            let frame = self
                .context
                .current_frame()
                .expect("execute_next without a frame");
            let closure = self.heap.closure(frame.closure());
            let proto = self.heap.proto(closure.proto());
            let ip = frame.ip();
            if ip >= proto.chunk().len() {
                None
            } else {
                Some(Instruction::decode(proto.chunk(), ip)?)
            }
        };

        let instruction = match decoded {
            // Falling off the end of a chunk behaves like a bare RETURN.
            None => return self.return_from_frame(NO_REGISTER),
            Some(instruction) => instruction,
        };

        self.is_jumping = false;
        let handler = self
            .jump_table
            .get_handler(instruction.opcode())
            .ok_or_else(|| {
                VmError::type_error(format!(
                    "no handler for opcode {}",
                    instruction.opcode().name()
                ))
            })?;
        handler(self, &instruction)?;

        if !self.is_jumping {
            if let Some(frame) = self.context.current_frame_mut() {
                frame.set_ip(instruction.next());
            }
        }
        Ok(())
    }

    // --- Handler API: registers, constants, control flow ---

    /// Reads a register of the current frame.
    pub(crate) fn reg(&self, index: u16) -> Value {
        self.context.register(self.frame_base() + index as usize)
    }

    /// Writes a register of the current frame.
    pub(crate) fn set_reg(&mut self, index: u16, value: Value) {
        let slot = self.frame_base() + index as usize;
        self.context.set_register(slot, value);
    }

    pub(crate) fn frame_base(&self) -> usize {
        self.context
            .current_frame()
            .expect("no active frame")
            .base()
    }

    pub(crate) fn current_closure(&self) -> GcRef<ObjClosure> {
        self.context
            .current_frame()
            .expect("no active frame")
            .closure()
    }

    pub(crate) fn current_module(&self) -> GcRef<ObjModule> {
        self.heap.closure(self.current_closure()).module()
    }

    /// A constant of the current proto's pool.
    pub(crate) fn constant(&self, index: u16) -> VmResult<Value> {
        let proto = self.heap.closure(self.current_closure()).proto();
        self.heap
            .proto(proto)
            .chunk()
            .constant(index as usize)
            .ok_or_else(|| {
                VmError::type_error(format!("constant index {index} out of range"))
            })
    }

    /// A constant that must be a string (a name operand).
    pub(crate) fn constant_string(&self, index: u16) -> VmResult<GcRef<ObjString>> {
        self.constant(index)?.as_string().ok_or_else(|| {
            VmError::type_error(format!("constant {index} is not a string"))
        })
    }

    /// Reads a raw u16 from the current chunk; `CLOSURE` consumes its
    /// capture pairs through this.
    pub(crate) fn read_code_u16(&self, pos: usize) -> VmResult<(u16, usize)> {
        let proto = self.heap.closure(self.current_closure()).proto();
        self.heap.proto(proto).chunk().read_u16(pos).ok_or_else(|| {
            VmError::type_error(format!("truncated operand at offset {pos}"))
        })
    }

    /// Moves the current frame's ip and suppresses the automatic advance.
    pub(crate) fn jump_to(&mut self, target: usize) {
        if let Some(frame) = self.context.current_frame_mut() {
            frame.set_ip(target);
        }
        self.is_jumping = true;
    }

    /// Stops the machine in the HALT state.
    pub(crate) fn halt(&mut self) {
        self.state = VmState::HALT;
        self.is_jumping = true;
    }

    // --- Calls and returns ---

    /// Calls `callee` with `args`; the result lands in caller register
    /// `dst` ([`NO_REGISTER`] discards it). The caller's ip must already
    /// point past the CALL instruction.
    pub(crate) fn call_value(&mut self, dst: u16, callee: Value, args: Vec<Value>) -> VmResult<()> {
        match callee {
            Value::Closure(closure) => self.push_closure_frame(closure, args, dst),
            Value::BoundMethod(bound) => {
                let receiver = self.heap.bound_method(bound).receiver();
                let method = self.heap.bound_method(bound).method();
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(Value::Instance(receiver));
                full.extend(args);
                self.push_closure_frame(method, full, dst)
            }
            Value::NativeFn(native) => {
                let handler = self.heap.native(native).handler();
                let receiver = self.heap.native(native).receiver();
                let mut full = Vec::with_capacity(args.len() + 1);
                if let Some(receiver) = receiver {
                    full.push(receiver);
                }
                full.extend(args);
                let result = match handler {
                    NativeHandler::Simple(f) => f(&full)?,
                    NativeHandler::WithEngine(f) => f(self, &full)?,
                };
                if dst != NO_REGISTER {
                    self.set_reg(dst, result);
                }
                Ok(())
            }
            Value::Class(class) => {
                let instance = self.heap.new_instance(class);
                if dst != NO_REGISTER {
                    self.set_reg(dst, Value::Instance(instance));
                }
                let init_name = self.heap.new_string("init");
                match self.lookup_method(class, init_name) {
                    Some(Value::Closure(init)) => {
                        let mut full = Vec::with_capacity(args.len() + 1);
                        full.push(Value::Instance(instance));
                        full.extend(args);
                        self.push_closure_frame(init, full, NO_REGISTER)
                    }
                    Some(other) => Err(VmError::type_error(format!(
                        "init of {} is not callable ({})",
                        self.render_value(Value::Class(class)),
                        other.type_name()
                    ))),
                    None if args.is_empty() => Ok(()),
                    None => Err(VmError::type_error(format!(
                        "{} has no init but was called with {} arguments",
                        self.render_value(Value::Class(class)),
                        args.len()
                    ))),
                }
            }
            other => Err(VmError::type_error(format!(
                "value of type {} is not callable",
                other.type_name()
            ))),
        }
    }

    /// Pushes a frame for `closure`, seeding its first registers with
    /// `args`.
    pub(crate) fn push_closure_frame(
        &mut self,
        closure: GcRef<ObjClosure>,
        args: Vec<Value>,
        return_register: u16,
    ) -> VmResult<()> {
        if self.context.frame_depth() >= self.limits.max_call_depth {
            return Err(VmError::fatal_allocation(format!(
                "call depth limit {} exceeded",
                self.limits.max_call_depth
            )));
        }
        let proto = self.heap.closure(closure).proto();
        let num_registers = self.heap.proto(proto).num_registers();
        if args.len() > num_registers {
            return Err(VmError::type_error(format!(
                "{} arguments do not fit in {} registers",
                args.len(),
                num_registers
            )));
        }
        if self.context.register_count() + num_registers > self.limits.max_register_slots {
            return Err(VmError::fatal_allocation(format!(
                "register file limit {} exceeded",
                self.limits.max_register_slots
            )));
        }

        let base = self.context.push_window(num_registers);
        for (offset, arg) in args.into_iter().enumerate() {
            self.context.set_register(base + offset, arg);
        }
        self.context
            .push_frame(CallFrame::new(closure, base, return_register));
        self.is_jumping = true;
        Ok(())
    }

    /// Pops the current frame: closes its upvalues, hands the value in
    /// `return_register` (or null for the sentinel) to the caller, and
    /// shrinks the register vector back to the frame's base.
    pub(crate) fn return_from_frame(&mut self, return_register: u16) -> VmResult<()> {
        let frame = *self
            .context
            .current_frame()
            .expect("return without a frame");
        let value = if return_register == NO_REGISTER {
            Value::Null
        } else {
            self.context
                .register(frame.base() + return_register as usize)
        };

        self.close_upvalues_from(frame.base());
        self.context.pop_frame();
        self.context.prune_handlers();
        self.context.truncate_registers(frame.base());

        if let Some(caller) = self.context.current_frame() {
            if frame.wants_return_value() {
                let slot = caller.base() + frame.return_register() as usize;
                self.context.set_register(slot, value);
            }
        }
        self.is_jumping = true;
        Ok(())
    }

    // --- Upvalues ---

    /// The open upvalue over absolute `slot`, reusing an existing one.
    pub(crate) fn capture_upvalue(&mut self, slot: usize) -> GcRef<ObjUpvalue> {
        if let Some(existing) = self.context.find_open_upvalue(slot) {
            return existing;
        }
        let upvalue = self.heap.new_upvalue(slot);
        self.context.insert_open_upvalue(slot, upvalue);
        upvalue
    }

    /// Closes every open upvalue over a slot `>= threshold`, copying the
    /// register contents into the cells.
    pub(crate) fn close_upvalues_from(&mut self, threshold: usize) {
        for (slot, upvalue) in self.context.take_open_upvalues_from(threshold) {
            let value = self.context.register(slot);
            self.heap.upvalue_mut(upvalue).close(value);
        }
    }

    // --- Try / throw ---

    pub(crate) fn push_try_handler(&mut self, handler_ip: usize) {
        self.context.push_handler(TryHandler {
            frame_depth: self.context.frame_depth(),
            register_depth: self.context.register_count(),
            handler_ip,
        });
    }

    pub(crate) fn pop_try_handler(&mut self) {
        self.context.pop_handler();
    }

    /// Unwinds to the innermost handler, or reports an uncaught throw. The
    /// thrown value lands in the handler frame's first register.
    pub(crate) fn throw_value(&mut self, value: Value) -> VmResult<()> {
        match self.context.pop_handler() {
            Some(handler) => {
                while self.context.frame_depth() > handler.frame_depth {
                    let base = self
                        .context
                        .current_frame()
                        .expect("unwinding past empty stack")
                        .base();
                    self.close_upvalues_from(base);
                    self.context.pop_frame();
                }
                self.context.truncate_registers(handler.register_depth);
                let base = {
                    let frame = self
                        .context
                        .current_frame_mut()
                        .expect("handler without a frame");
                    frame.set_ip(handler.handler_ip);
                    frame.base()
                };
                self.context.set_register(base, value);
                self.is_jumping = true;
                Ok(())
            }
            None => Err(VmError::UncaughtThrow {
                value: self.render_value(value),
                backtrace: self.backtrace(),
            }),
        }
    }

    /// Materialises a recoverable [`VmError`] as a throwable error
    /// instance with `kind` and `message` fields.
    pub(crate) fn make_error_value(&mut self, kind: &str, message: &str) -> Value {
        let instance = self.heap.new_instance(self.error_class);
        let kind_key = self.heap.new_string("kind");
        let kind_value = self.heap.new_string(kind);
        let message_key = self.heap.new_string("message");
        let message_value = self.heap.new_string(message);
        let fields = self.heap.instance_mut(instance);
        fields.set_field(kind_key, Value::String(kind_value));
        fields.set_field(message_key, Value::String(message_value));
        Value::Instance(instance)
    }

    // --- Classes ---

    /// Resolves a method through the class chain.
    pub(crate) fn lookup_method(
        &self,
        class: GcRef<ObjClass>,
        name: GcRef<ObjString>,
    ) -> Option<Value> {
        let mut current = Some(class);
        while let Some(c) = current {
            if let Some(method) = self.heap.class(c).method(name) {
                return Some(method);
            }
            current = self.heap.class(c).superclass();
        }
        None
    }

    // --- Modules ---

    /// Resolves and, when freshly loaded, executes a module to completion
    /// before returning it. Cycles hand back the partially-initialised
    /// module.
    pub(crate) fn import_module(&mut self, requested: &str) -> VmResult<Value> {
        let importer_dir = {
            let module = self.current_module();
            let path = self.heap.module(module).file_path();
            let path = PathBuf::from(self.heap.string(path).as_str());
            path.parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| self.args.entry_dir.clone())
        };

        let loaded = self
            .modules
            .load(&mut self.heap, requested, &importer_dir, &self.args)?;
        match loaded {
            LoadedModule::Cached(module) => Ok(Value::Module(module)),
            LoadedModule::Fresh { module, main_proto } => {
                let closure = self.heap.new_closure(main_proto, Vec::new(), module);
                self.heap
                    .module_mut(module)
                    .set_state(ModuleState::Executing);
                let depth = self.context.frame_depth();
                self.push_closure_frame(closure, Vec::new(), NO_REGISTER)?;
                self.run_until(depth)?;
                self.heap.module_mut(module).set_state(ModuleState::Executed);
                Ok(Value::Module(module))
            }
        }
    }

    // --- Collection ---

    /// Gathers the roots (register vector, frames, open upvalues, module
    /// cache, error class) and collects. The builtin registry holds only
    /// function pointers and static names, so it contributes no roots.
    fn collect_garbage(&mut self) {
        let mut roots: Vec<Value> =
            Vec::with_capacity(self.context.register_count() + self.context.frame_depth() + 8);
        roots.extend_from_slice(self.context.registers());
        for frame in self.context.frames() {
            roots.push(Value::Closure(frame.closure()));
        }
        for (_, upvalue) in self.context.open_upvalues() {
            roots.push(Value::Upvalue(*upvalue));
        }
        self.modules.collect_roots(&mut roots);
        roots.push(Value::Class(self.error_class));
        self.heap.collect(&roots);
    }

    /// Forces a collection with the current roots; tests and natives use
    /// this.
    pub fn force_collect(&mut self) {
        self.collect_garbage();
    }

    // --- Rendering ---

    /// The printable form of a value.
    pub fn render_value(&self, value: Value) -> String {
        self.render_depth(value, 0)
    }

    fn render_depth(&self, value: Value, depth: usize) -> String {
        match value {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(r) => self.heap.string(r).as_str().to_string(),
            Value::Array(r) => {
                if depth > 3 {
                    return "[...]".to_string();
                }
                let rendered: Vec<String> = self
                    .heap
                    .array(r)
                    .iter()
                    .map(|element| self.render_depth(element, depth + 1))
                    .collect();
                format!("[{}]", rendered.join(", "))
            }
            Value::HashTable(r) => {
                if depth > 3 {
                    return "{...}".to_string();
                }
                let rendered: Vec<String> = self
                    .heap
                    .hash_table(r)
                    .iter()
                    .map(|(key, val)| {
                        format!(
                            "{}: {}",
                            self.heap.string(key).as_str(),
                            self.render_depth(val, depth + 1)
                        )
                    })
                    .collect();
                format!("{{{}}}", rendered.join(", "))
            }
            Value::Class(r) => {
                format!("<class {}>", self.heap.string(self.heap.class(r).name()).as_str())
            }
            Value::Instance(r) => {
                // Error instances print as "Kind: message".
                if let (Some(kind_key), Some(message_key)) = (
                    self.heap.find_interned("kind"),
                    self.heap.find_interned("message"),
                ) {
                    let instance = self.heap.instance(r);
                    if let (Some(Value::String(kind)), Some(Value::String(message))) =
                        (instance.field(kind_key), instance.field(message_key))
                    {
                        return format!(
                            "{}: {}",
                            self.heap.string(kind).as_str(),
                            self.heap.string(message).as_str()
                        );
                    }
                }
                let class = self.heap.instance(r).class();
                format!(
                    "<{} instance>",
                    self.heap.string(self.heap.class(class).name()).as_str()
                )
            }
            Value::BoundMethod(_) => "<bound method>".to_string(),
            Value::Upvalue(_) => "<upvalue>".to_string(),
            Value::Proto(r) => {
                format!("<proto {}>", self.heap.string(self.heap.proto(r).name()).as_str())
            }
            Value::Closure(r) => {
                let proto = self.heap.closure(r).proto();
                format!("<fn {}>", self.heap.string(self.heap.proto(proto).name()).as_str())
            }
            Value::NativeFn(r) => format!("<native fn {}>", self.heap.native(r).name()),
            Value::Module(r) => {
                let name = self.heap.module(r).file_name();
                format!("<module {}>", self.heap.string(name).as_str())
            }
        }
    }

    /// One line per live frame, innermost first.
    pub(crate) fn backtrace(&self) -> Vec<String> {
        self.context
            .frames()
            .iter()
            .rev()
            .map(|frame| {
                let proto = self.heap.closure(frame.closure()).proto();
                let name = self.heap.string(self.heap.proto(proto).name()).as_str();
                format!("at {} (ip {})", name, frame.ip())
            })
            .collect()
    }
}
