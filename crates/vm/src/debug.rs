//! Chunk disassembler, for diagnostics and tests.

use crate::chunk::{Chunk, NO_REGISTER};
use crate::memory::MemoryManager;
use crate::op_code::{OpCode, Operand};
use crate::value::Value;

/// Renders a whole chunk, one instruction per line.
pub fn disassemble_chunk(heap: &MemoryManager, chunk: &Chunk, name: &str) -> String {
    let mut output = format!("== {name} ==\n");
    let mut offset = 0;
    while offset < chunk.len() {
        match disassemble_instruction(heap, chunk, offset) {
            Some((line, next)) => {
                output.push_str(&line);
                output.push('\n');
                offset = next;
            }
            None => {
                output.push_str(&format!("{offset:04} <bad instruction>\n"));
                break;
            }
        }
    }
    output
}

/// Renders the instruction at `offset`; returns the text and the offset of
/// the following instruction.
pub fn disassemble_instruction(
    heap: &MemoryManager,
    chunk: &Chunk,
    offset: usize,
) -> Option<(String, usize)> {
    let opcode = OpCode::from_byte(*chunk.code().get(offset)?)?;
    let mut line = format!("{offset:04} {:<16}", opcode.name());
    let mut cursor = offset + 1;
    let mut proto_for_pairs = None;

    for (position, operand) in opcode.operands().iter().enumerate() {
        if position > 0 {
            line.push(',');
        }
        match operand {
            Operand::Reg => {
                let (value, next) = chunk.read_u16(cursor)?;
                line.push_str(&format!(" r{value}"));
                cursor = next;
            }
            Operand::RegOrNone => {
                let (value, next) = chunk.read_u16(cursor)?;
                if value == NO_REGISTER {
                    line.push_str(" _");
                } else {
                    line.push_str(&format!(" r{value}"));
                }
                cursor = next;
            }
            Operand::U16 => {
                let (value, next) = chunk.read_u16(cursor)?;
                line.push_str(&format!(" {value}"));
                cursor = next;
            }
            Operand::Const | Operand::Name => {
                let (value, next) = chunk.read_u16(cursor)?;
                let rendered = chunk
                    .constant(value as usize)
                    .map(|constant| render_constant(heap, constant))
                    .unwrap_or_else(|| "<bad index>".to_string());
                line.push_str(&format!(" c{value} ({rendered})"));
                if let Some(Value::Proto(proto)) = chunk.constant(value as usize) {
                    proto_for_pairs = Some(proto);
                }
                cursor = next;
            }
            Operand::Target => {
                let (value, next) = chunk.read_u16(cursor)?;
                line.push_str(&format!(" -> {value}"));
                cursor = next;
            }
            Operand::ImmInt => {
                let (value, next) = chunk.read_i64(cursor)?;
                line.push_str(&format!(" {value}"));
                cursor = next;
            }
            Operand::ImmFloat => {
                let (value, next) = chunk.read_f64(cursor)?;
                line.push_str(&format!(" {value}"));
                cursor = next;
            }
            Operand::UpvalPairs => {
                // Pair count comes from the referenced proto; an unlinked
                // pool renders without its capture list.
                let count = proto_for_pairs
                    .map(|proto| heap.proto(proto).num_upvalues())
                    .unwrap_or(0);
                for _ in 0..count {
                    let (is_local, next) = chunk.read_u16(cursor)?;
                    let (index, next) = chunk.read_u16(next)?;
                    let kind = if is_local != 0 { "local" } else { "parent" };
                    line.push_str(&format!(" [{kind} {index}]"));
                    cursor = next;
                }
            }
        }
    }
    Some((line, cursor))
}

fn render_constant(heap: &MemoryManager, constant: Value) -> String {
    match constant {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::String(r) => format!("{:?}", heap.string(r).as_str()),
        Value::Proto(r) => {
            format!("@{}", heap.string(heap.proto(r).name()).as_str())
        }
        other => format!("<{}>", other.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::parse_source;

    #[test]
    fn test_disassemble_round_trip_offsets() {
        let mut heap = MemoryManager::new();
        let protos = parse_source(
            &mut heap,
            ".func main\n.registers 2\n.upvalues 0\nLOAD_INT 0 7\nLOAD_CONST 1 \"hi\"\nADD 0 0 1\nHALT\n.endfunc",
            "<test>",
        )
        .unwrap();
        let proto = heap.proto(protos["main"]);
        let text = disassemble_chunk(&heap, proto.chunk(), "main");

        assert!(text.contains("LOAD_INT"));
        assert!(text.contains("\"hi\""));
        assert!(text.contains("HALT"));
        // Every instruction decoded; no bad markers.
        assert!(!text.contains("<bad"));
    }
}
