//! # Meow Virtual Machine
//!
//! A register-based virtual machine for the Meow bytecode language. The VM
//! consumes textual bytecode assembly, links it into function prototypes,
//! and interprets a register-addressed instruction stream with first-class
//! closures, classes with single inheritance, hash and array objects,
//! modules with explicit export/import, tracing garbage collection, and
//! try/throw exception handling.
//!
//! ## Architecture
//!
//! - **ExecutionEngine**: frame stack, instruction dispatch, calls, throws
//! - **ExecutionContext**: register file, call frames, open upvalues,
//!   try handlers
//! - **MemoryManager**: typed arenas, string interning, mark-sweep GC
//! - **JumpTable**: per-opcode instruction handlers
//! - **OperatorDispatcher**: opcode × operand-type tables for arithmetic
//! - **BuiltinRegistry**: method/getter tables for primitive receivers
//! - **ModuleManager**: path resolution, module cache, lifecycle states
//! - **loader**: lexer, parser, and linker for the textual bytecode format
//!
//! ## Example
//!
//! ```rust,no_run
//! use meow_vm::{ExecutionEngine, VmArgs};
//!
//! # fn example() -> Result<(), meow_vm::VmError> {
//! let args = VmArgs::new("program.meow".into(), Vec::new());
//! let mut engine = ExecutionEngine::new(args);
//! engine.interpret()?;
//! # Ok(())
//! # }
//! ```

/// Builtin method and getter tables for primitive receivers
pub mod builtin_registry;
/// Bytecode chunks and the variable-length operand encoding
pub mod chunk;
/// Chunk disassembler
pub mod debug;
/// VM error types and result handling
pub mod error;
/// Register file, call frames, and try handlers
pub mod execution_context;
/// The interpreter core
pub mod execution_engine;
/// Instruction decoding
pub mod instruction;
/// Per-opcode instruction handlers
pub mod jump_table;
/// Lexer, parser, and linker for textual bytecode
pub mod loader;
/// Arenas, handles, interning, and the collector
pub mod memory;
/// Module loading and the module cache
pub mod module_manager;
/// Heap object kinds
pub mod object;
/// Opcode definitions and operand shapes
pub mod op_code;
/// Operator dispatch tables
pub mod operator_dispatcher;
/// Tagged runtime values
pub mod value;
/// VM execution state flags
pub mod vm_state;

pub use builtin_registry::BuiltinRegistry;
pub use chunk::{Chunk, MAX_OPERAND, NO_REGISTER};
pub use error::{VmError, VmResult};
pub use execution_context::{CallFrame, ExecutionContext, TryHandler};
pub use execution_engine::{EngineLimits, ExecutionEngine, VmArgs};
pub use instruction::Instruction;
pub use jump_table::{InstructionHandler, JumpTable};
pub use memory::{GcRef, MemoryManager, Trace, Tracer};
pub use module_manager::{LoadedModule, ModuleManager};
pub use object::{
    ModuleState, NativeHandler, ObjArray, ObjBoundMethod, ObjClass, ObjClosure, ObjFunctionProto,
    ObjHashTable, ObjInstance, ObjModule, ObjNativeFunction, ObjString, ObjUpvalue, UpvalueDesc,
    UpvalueState,
};
pub use op_code::{OpCode, Operand, OP_CODE_COUNT};
pub use operator_dispatcher::OperatorDispatcher;
pub use value::{Value, ValueType, VALUE_TYPE_COUNT};
pub use vm_state::VmState;
