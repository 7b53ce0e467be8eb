//! Instruction dispatch: one handler function per opcode, registered into a
//! 256-entry table indexed by the opcode byte.

pub mod arithmetic;
pub mod class_ops;
pub mod compound;
pub mod control;
pub mod exception_ops;
pub mod load;
pub mod module_ops;
pub mod upvalue_ops;

use crate::error::VmResult;
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::op_code::OpCode;

/// A handler for a VM instruction.
pub type InstructionHandler = fn(&mut ExecutionEngine, &Instruction) -> VmResult<()>;

/// The dispatch table.
#[derive(Clone)]
pub struct JumpTable {
    handlers: [Option<InstructionHandler>; 256],
}

impl Default for JumpTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JumpTable {
    /// A table with every opcode's default handler registered.
    pub fn new() -> Self {
        let mut jump_table = Self {
            handlers: [None; 256],
        };
        jump_table.register_default_handlers();
        jump_table
    }

    /// Registers (or overrides) the handler for an opcode.
    pub fn register(&mut self, opcode: OpCode, handler: InstructionHandler) {
        self.handlers[opcode as usize] = Some(handler);
    }

    /// The handler for an opcode, if registered.
    pub fn get_handler(&self, opcode: OpCode) -> Option<InstructionHandler> {
        self.handlers[opcode as usize]
    }

    fn register_default_handlers(&mut self) {
        load::register_handlers(self);
        arithmetic::register_handlers(self);
        upvalue_ops::register_handlers(self);
        control::register_handlers(self);
        compound::register_handlers(self);
        class_ops::register_handlers(self);
        exception_ops::register_handlers(self);
        module_ops::register_handlers(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_opcode_has_a_handler() {
        let jump_table = JumpTable::new();
        for &opcode in OpCode::ALL {
            assert!(
                jump_table.get_handler(opcode).is_some(),
                "no handler for {:?}",
                opcode
            );
        }
    }
}
