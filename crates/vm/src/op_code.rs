//! Opcode definitions for the Meow virtual machine.
//!
//! The numbering is contiguous from 0 and is part of the wire format: it
//! must not change between releases. `define_op_codes!` is the single table
//! both the assembler (encoder) and the interpreter (decoder) consult, so
//! the two can never disagree about numbering or operand shapes.

use hashbrown::HashMap;
use once_cell::sync::Lazy;

/// The shape of one encoded operand, in instruction-stream order.
///
/// All `u16`-shaped operands use the variable-length encoding from
/// [`crate::chunk`]; the immediates are fixed 8-byte little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Register index
    Reg,
    /// Register index or the `0xFFFF` "no register" sentinel
    RegOrNone,
    /// Raw small integer (upvalue index, element count)
    U16,
    /// Constant-pool index; the assembler accepts an inline literal here
    Const,
    /// Constant-pool index of a name; the assembler accepts a string
    /// literal (or `@proto` reference) here
    Name,
    /// Jump target; the assembler accepts a label or a numeric address,
    /// always emitted in the two-byte form so labels can be patched
    Target,
    /// 64-bit signed immediate
    ImmInt,
    /// 64-bit float immediate
    ImmFloat,
    /// `CLOSURE` capture list: one `(is_local, index)` u16 pair per proto
    /// upvalue, decoded by the handler because the count lives in the proto
    UpvalPairs,
}

macro_rules! define_op_codes {
    ( $( $name:ident = $byte:literal, [ $( $arg:ident ),* ] ; )+ ) => {
        /// One opcode of the Meow instruction set.
        ///
        /// Variant names double as the assembler mnemonics.
        #[allow(non_camel_case_types)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum OpCode {
            $( $name = $byte, )+
        }

        impl OpCode {
            /// Every opcode, in numbering order.
            pub const ALL: &'static [OpCode] = &[ $( OpCode::$name, )+ ];

            /// Decodes an opcode byte.
            pub fn from_byte(byte: u8) -> Option<OpCode> {
                match byte {
                    $( $byte => Some(OpCode::$name), )+
                    _ => None,
                }
            }

            /// The mnemonic used by the textual bytecode format.
            pub fn name(self) -> &'static str {
                match self {
                    $( OpCode::$name => stringify!($name), )+
                }
            }

            /// Encoded operand shapes, in stream order.
            pub fn operands(self) -> &'static [Operand] {
                match self {
                    $( OpCode::$name => &[ $( Operand::$arg ),* ], )+
                }
            }
        }
    };
}

define_op_codes! {
    LOAD_CONST        = 0,  [Reg, Const];
    LOAD_NULL         = 1,  [Reg];
    LOAD_TRUE         = 2,  [Reg];
    LOAD_FALSE        = 3,  [Reg];
    LOAD_INT          = 4,  [Reg, ImmInt];
    LOAD_FLOAT        = 5,  [Reg, ImmFloat];
    MOVE              = 6,  [Reg, Reg];
    ADD               = 7,  [Reg, Reg, Reg];
    SUB               = 8,  [Reg, Reg, Reg];
    MUL               = 9,  [Reg, Reg, Reg];
    DIV               = 10, [Reg, Reg, Reg];
    MOD               = 11, [Reg, Reg, Reg];
    POW               = 12, [Reg, Reg, Reg];
    EQ                = 13, [Reg, Reg, Reg];
    NEQ               = 14, [Reg, Reg, Reg];
    GT                = 15, [Reg, Reg, Reg];
    GE                = 16, [Reg, Reg, Reg];
    LT                = 17, [Reg, Reg, Reg];
    LE                = 18, [Reg, Reg, Reg];
    NEG               = 19, [Reg, Reg];
    NOT               = 20, [Reg, Reg];
    GET_GLOBAL        = 21, [Reg, Name];
    SET_GLOBAL        = 22, [Reg, Name];
    GET_UPVALUE       = 23, [Reg, U16];
    SET_UPVALUE       = 24, [Reg, U16];
    CLOSURE           = 25, [Reg, Name, UpvalPairs];
    CLOSE_UPVALUES    = 26, [U16];
    JUMP              = 27, [Target];
    JUMP_IF_FALSE     = 28, [Reg, Target];
    JUMP_IF_TRUE      = 29, [Reg, Target];
    CALL              = 30, [RegOrNone, Reg, Reg, U16];
    RETURN            = 31, [RegOrNone];
    HALT              = 32, [];
    NEW_ARRAY         = 33, [Reg, Reg, U16];
    NEW_HASH          = 34, [Reg, Reg, U16];
    GET_INDEX         = 35, [Reg, Reg, Reg];
    SET_INDEX         = 36, [Reg, Reg, Reg];
    GET_KEYS          = 37, [Reg, Reg];
    GET_VALUES        = 38, [Reg, Reg];
    NEW_CLASS         = 39, [Reg, Name];
    NEW_INSTANCE      = 40, [Reg, Reg];
    GET_PROP          = 41, [Reg, Reg, Name];
    SET_PROP          = 42, [Reg, Name, Reg];
    SET_METHOD        = 43, [Reg, Name, Reg];
    INHERIT           = 44, [Reg, Reg];
    GET_SUPER         = 45, [Reg, Name];
    BIT_AND           = 46, [Reg, Reg, Reg];
    BIT_OR            = 47, [Reg, Reg, Reg];
    BIT_XOR           = 48, [Reg, Reg, Reg];
    BIT_NOT           = 49, [Reg, Reg];
    LSHIFT            = 50, [Reg, Reg, Reg];
    RSHIFT            = 51, [Reg, Reg, Reg];
    THROW             = 52, [Reg];
    SETUP_TRY         = 53, [Target];
    POP_TRY           = 54, [];
    IMPORT_MODULE     = 55, [Reg, Name];
    EXPORT            = 56, [Name, Reg];
    GET_EXPORT        = 57, [Reg, Reg, Name];
    GET_MODULE_EXPORT = 58, [Reg, Reg, Name];
    IMPORT_ALL        = 59, [Reg];
}

/// Total number of opcodes; table sizes in the dispatcher depend on this.
pub const OP_CODE_COUNT: usize = OpCode::ALL.len();

static NAME_TABLE: Lazy<HashMap<&'static str, OpCode>> = Lazy::new(|| {
    OpCode::ALL.iter().map(|&op| (op.name(), op)).collect()
});

impl OpCode {
    /// Looks up an opcode by its assembler mnemonic.
    pub fn from_name(name: &str) -> Option<OpCode> {
        NAME_TABLE.get(name).copied()
    }
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        OpCode::from_byte(byte).ok_or(byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbering_is_contiguous() {
        for (expected, op) in OpCode::ALL.iter().enumerate() {
            assert_eq!(*op as usize, expected, "hole before {:?}", op);
        }
        assert_eq!(OP_CODE_COUNT, 60);
    }

    #[test]
    fn test_byte_round_trip() {
        for &op in OpCode::ALL {
            assert_eq!(OpCode::from_byte(op as u8), Some(op));
        }
        assert_eq!(OpCode::from_byte(OP_CODE_COUNT as u8), None);
        assert_eq!(OpCode::from_byte(0xFF), None);
    }

    #[test]
    fn test_name_round_trip() {
        for &op in OpCode::ALL {
            assert_eq!(OpCode::from_name(op.name()), Some(op));
        }
        assert_eq!(OpCode::from_name("NOT_AN_OPCODE"), None);
    }

    #[test]
    fn test_pinned_numbering() {
        // The wire format depends on these staying put.
        assert_eq!(OpCode::LOAD_CONST as u8, 0);
        assert_eq!(OpCode::MOVE as u8, 6);
        assert_eq!(OpCode::CALL as u8, 30);
        assert_eq!(OpCode::HALT as u8, 32);
        assert_eq!(OpCode::IMPORT_ALL as u8, 59);
    }

    #[test]
    fn test_operand_shapes() {
        assert!(OpCode::HALT.operands().is_empty());
        assert_eq!(OpCode::CALL.operands().len(), 4);
        assert_eq!(
            OpCode::CLOSURE.operands().last(),
            Some(&Operand::UpvalPairs)
        );
        assert_eq!(OpCode::RETURN.operands(), &[Operand::RegOrNone]);
    }
}
