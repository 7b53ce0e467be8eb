//! Parser and linker for textual bytecode.
//!
//! Parsing collects one builder per `.func` block: bytecode with label
//! patch records, a constant pool holding `::proto_ref::NAME` placeholders
//! for `@proto` arguments, and the upvalue descriptor vector. Linking then
//! resolves labels, constructs the prototypes (with collection paused), and
//! replaces the placeholders once every prototype exists.

use hashbrown::HashMap;

use crate::chunk::{Chunk, MAX_OPERAND, NO_REGISTER};
use crate::error::{VmError, VmResult};
use crate::loader::lexer::{Lexer, Token, TokenKind};
use crate::memory::{GcRef, MemoryManager};
use crate::object::{ObjFunctionProto, UpvalueDesc};
use crate::op_code::{OpCode, Operand};
use crate::value::Value;

const PROTO_REF_PREFIX: &str = "::proto_ref::";

/// Parses a whole bytecode source into linked prototypes keyed by function
/// name. `main` is required. Collection stays paused for the duration so a
/// half-linked prototype graph can never be observed.
pub fn parse_source(
    heap: &mut MemoryManager,
    source: &str,
    origin: &str,
) -> VmResult<HashMap<String, GcRef<ObjFunctionProto>>> {
    heap.disable_gc();
    let result = run(heap, source, origin);
    heap.enable_gc();
    result
}

fn run(
    heap: &mut MemoryManager,
    source: &str,
    origin: &str,
) -> VmResult<HashMap<String, GcRef<ObjFunctionProto>>> {
    let tokens = Lexer::new(source, origin).tokenize_all()?;
    let mut parser = Parser {
        heap,
        origin,
        tokens,
        pos: 0,
        builders: Vec::new(),
        current: None,
    };
    parser.parse_program()?;
    parser.link()
}

struct PendingJump {
    patch_offset: usize,
    label: String,
}

struct ProtoBuilder {
    name: String,
    num_registers: usize,
    registers_defined: bool,
    num_upvalues: usize,
    upvalues_defined: bool,
    chunk: Chunk,
    upvalue_descs: Vec<Option<UpvalueDesc>>,
    labels: HashMap<String, usize>,
    pending_jumps: Vec<PendingJump>,
}

impl ProtoBuilder {
    fn new(name: String) -> Self {
        Self {
            name,
            num_registers: 0,
            registers_defined: false,
            num_upvalues: 0,
            upvalues_defined: false,
            chunk: Chunk::new(),
            upvalue_descs: Vec::new(),
            labels: HashMap::new(),
            pending_jumps: Vec::new(),
        }
    }
}

struct Parser<'h, 'src> {
    heap: &'h mut MemoryManager,
    origin: &'src str,
    tokens: Vec<Token<'src>>,
    pos: usize,
    builders: Vec<ProtoBuilder>,
    current: Option<usize>,
}

impl<'h, 'src> Parser<'h, 'src> {
    // --- Token plumbing ---

    fn current_token(&self) -> Token<'src> {
        self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token<'src> {
        let token = self.current_token();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> VmResult<Token<'src>> {
        let token = self.current_token();
        if token.kind != kind {
            return Err(self.error_at(token, message));
        }
        Ok(self.advance())
    }

    fn error_at(&self, token: Token<'src>, message: impl Into<String>) -> VmError {
        let mut message = message.into();
        if token.kind != TokenKind::Eof && !token.lexeme.is_empty() {
            message.push_str(&format!(" (near '{}')", token.lexeme));
        }
        VmError::parse(self.origin.to_string(), token.line, token.col, message)
    }

    // --- Builder access ---

    fn builder(&self) -> &ProtoBuilder {
        &self.builders[self.current.expect("directive outside .func")]
    }

    fn builder_mut(&mut self) -> &mut ProtoBuilder {
        let index = self.current.expect("directive outside .func");
        &mut self.builders[index]
    }

    // --- Program structure ---

    fn parse_program(&mut self) -> VmResult<()> {
        loop {
            let token = self.current_token();
            match token.kind {
                TokenKind::Eof => return Ok(()),
                TokenKind::DirFunc => self.parse_func()?,
                _ => {
                    return Err(
                        self.error_at(token, "expected '.func' at top level")
                    )
                }
            }
        }
    }

    fn parse_func(&mut self) -> VmResult<()> {
        self.expect(TokenKind::DirFunc, "expected '.func'")?;
        let name_token =
            self.expect(TokenKind::Identifier, "expected function name after '.func'")?;
        let name = name_token.lexeme.strip_prefix('@').unwrap_or(name_token.lexeme);
        if name.is_empty() {
            return Err(self.error_at(name_token, "function name must not be empty"));
        }
        if self.builders.iter().any(|builder| builder.name == name) {
            return Err(self.error_at(
                name_token,
                format!("function '{name}' is already defined"),
            ));
        }

        self.builders.push(ProtoBuilder::new(name.to_string()));
        self.current = Some(self.builders.len() - 1);

        loop {
            let token = self.current_token();
            match token.kind {
                TokenKind::DirEndFunc => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => {
                    return Err(self.error_at(
                        token,
                        format!("missing '.endfunc' for function '{name}'"),
                    ));
                }
                TokenKind::DirFunc => {
                    return Err(
                        self.error_at(token, "function definitions cannot nest")
                    );
                }
                TokenKind::DirRegisters => self.parse_registers_directive()?,
                TokenKind::DirUpvalues => self.parse_upvalues_directive()?,
                TokenKind::DirConst => {
                    self.require_header(token)?;
                    self.advance();
                    let value = self.parse_const_value()?;
                    self.add_constant(value, token)?;
                }
                TokenKind::DirUpvalue => {
                    self.require_header(token)?;
                    self.parse_upvalue_directive()?;
                }
                TokenKind::LabelDef => {
                    self.require_header(token)?;
                    self.parse_label_definition()?;
                }
                TokenKind::Opcode => {
                    self.require_header(token)?;
                    self.parse_instruction()?;
                }
                _ => {
                    return Err(self.error_at(
                        token,
                        "expected a directive, label, or instruction",
                    ))
                }
            }
        }

        self.current = None;
        Ok(())
    }

    /// `.registers` and `.upvalues` must precede every body item.
    fn require_header(&self, token: Token<'src>) -> VmResult<()> {
        let builder = self.builder();
        if !builder.registers_defined || !builder.upvalues_defined {
            return Err(self.error_at(
                token,
                "'.registers' and '.upvalues' must come before the function body",
            ));
        }
        Ok(())
    }

    fn parse_registers_directive(&mut self) -> VmResult<()> {
        let directive = self.advance();
        if self.builder().registers_defined {
            return Err(self.error_at(directive, "'.registers' is already defined"));
        }
        let count = self.parse_count("register count after '.registers'")?;
        let builder = self.builder_mut();
        builder.num_registers = count;
        builder.registers_defined = true;
        Ok(())
    }

    fn parse_upvalues_directive(&mut self) -> VmResult<()> {
        let directive = self.advance();
        if self.builder().upvalues_defined {
            return Err(self.error_at(directive, "'.upvalues' is already defined"));
        }
        let count = self.parse_count("upvalue count after '.upvalues'")?;
        let builder = self.builder_mut();
        builder.num_upvalues = count;
        builder.upvalue_descs = vec![None; count];
        builder.upvalues_defined = true;
        Ok(())
    }

    /// `.upvalue IDX (local|parent) SLOT`
    fn parse_upvalue_directive(&mut self) -> VmResult<()> {
        self.advance();
        let index_token = self.expect(TokenKind::Int, "expected upvalue index after '.upvalue'")?;
        let index = self.parse_unsigned(index_token, "upvalue index")?;
        if index as usize >= self.builder().num_upvalues {
            return Err(self.error_at(
                index_token,
                format!(
                    "upvalue index {} exceeds declared count {}",
                    index,
                    self.builder().num_upvalues
                ),
            ));
        }

        let kind_token = self.expect(TokenKind::Identifier, "expected 'local' or 'parent'")?;
        let is_local = match kind_token.lexeme {
            "local" => true,
            "parent" => false,
            _ => return Err(self.error_at(kind_token, "expected 'local' or 'parent'")),
        };

        let slot_token = self.expect(TokenKind::Int, "expected capture slot")?;
        let slot = self.parse_unsigned(slot_token, "capture slot")?;
        if is_local && slot as usize >= self.builder().num_registers {
            return Err(self.error_at(
                slot_token,
                format!(
                    "local capture slot {} exceeds register count {}",
                    slot,
                    self.builder().num_registers
                ),
            ));
        }

        self.builder_mut().upvalue_descs[index as usize] = Some(UpvalueDesc {
            is_local,
            index: slot as usize,
        });
        Ok(())
    }

    fn parse_label_definition(&mut self) -> VmResult<()> {
        let token = self.advance();
        let offset = self.builder().chunk.len();
        if self.builder().labels.contains_key(token.lexeme) {
            return Err(self.error_at(
                token,
                format!("label '{}' is already defined", token.lexeme),
            ));
        }
        self.builder_mut()
            .labels
            .insert(token.lexeme.to_string(), offset);
        Ok(())
    }

    // --- Instructions ---

    fn parse_instruction(&mut self) -> VmResult<()> {
        let opcode_token = self.advance();
        let opcode = OpCode::from_name(opcode_token.lexeme)
            .ok_or_else(|| self.error_at(opcode_token, "unknown opcode"))?;

        self.builder_mut().chunk.write_byte(opcode as u8);

        let mut parsed: Vec<u16> = Vec::with_capacity(4);
        for operand in opcode.operands() {
            match operand {
                Operand::Reg => {
                    let value = self.parse_register()?;
                    parsed.push(value);
                    self.builder_mut().chunk.write_u16(value);
                }
                Operand::RegOrNone => {
                    let value = self.parse_register_or_none()?;
                    parsed.push(value);
                    self.builder_mut().chunk.write_u16(value);
                }
                Operand::U16 => {
                    let token = self.expect(TokenKind::Int, "expected an unsigned integer")?;
                    let value = self.parse_unsigned(token, "operand")?;
                    parsed.push(value);
                    self.builder_mut().chunk.write_u16(value);
                }
                Operand::Const => {
                    let at = self.current_token();
                    let value = self.parse_const_value()?;
                    let index = self.add_constant(value, at)?;
                    parsed.push(index);
                    self.builder_mut().chunk.write_u16(index);
                }
                Operand::Name => {
                    let at = self.current_token();
                    let value = self.parse_name_value()?;
                    let index = self.add_constant(value, at)?;
                    parsed.push(index);
                    self.builder_mut().chunk.write_u16(index);
                }
                Operand::Target => self.parse_target()?,
                Operand::ImmInt => {
                    let token = self.expect(TokenKind::Int, "expected a 64-bit integer")?;
                    let value: i64 = token
                        .lexeme
                        .parse()
                        .map_err(|_| self.error_at(token, "integer literal out of range"))?;
                    self.builder_mut().chunk.write_i64(value);
                }
                Operand::ImmFloat => {
                    let token = self.current_token();
                    if token.kind != TokenKind::Float && token.kind != TokenKind::Int {
                        return Err(self.error_at(token, "expected a float literal"));
                    }
                    self.advance();
                    let value: f64 = token
                        .lexeme
                        .parse()
                        .map_err(|_| self.error_at(token, "invalid float literal"))?;
                    self.builder_mut().chunk.write_f64(value);
                }
                Operand::UpvalPairs => self.parse_capture_pairs()?,
            }
        }

        self.validate_instruction(opcode, &parsed, opcode_token)
    }

    /// Window checks the decoder cannot do: the register file is indexed
    /// unchecked at runtime, so every slot an instruction touches must be
    /// provably inside the frame here.
    fn validate_instruction(
        &self,
        opcode: OpCode,
        parsed: &[u16],
        at: Token<'src>,
    ) -> VmResult<()> {
        let num_registers = self.builder().num_registers;
        let num_upvalues = self.builder().num_upvalues;
        match opcode {
            OpCode::CALL => {
                let arg_start = parsed[2] as usize;
                let argc = parsed[3] as usize;
                if arg_start + argc > num_registers {
                    return Err(self.error_at(
                        at,
                        format!(
                            "CALL arguments {arg_start}..{} exceed register count {num_registers}",
                            arg_start + argc
                        ),
                    ));
                }
            }
            OpCode::NEW_ARRAY => {
                let start = parsed[1] as usize;
                let count = parsed[2] as usize;
                if start + count > num_registers {
                    return Err(self.error_at(
                        at,
                        format!("NEW_ARRAY window exceeds register count {num_registers}"),
                    ));
                }
            }
            OpCode::NEW_HASH => {
                let start = parsed[1] as usize;
                let count = parsed[2] as usize;
                if start + 2 * count > num_registers {
                    return Err(self.error_at(
                        at,
                        format!("NEW_HASH window exceeds register count {num_registers}"),
                    ));
                }
            }
            OpCode::GET_UPVALUE | OpCode::SET_UPVALUE => {
                let index = parsed[1] as usize;
                if index >= num_upvalues {
                    return Err(self.error_at(
                        at,
                        format!("upvalue index {index} exceeds declared count {num_upvalues}"),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn parse_register(&mut self) -> VmResult<u16> {
        let token = self.expect(TokenKind::Int, "expected a register index")?;
        let value = self.parse_unsigned(token, "register index")?;
        if value as usize >= self.builder().num_registers {
            return Err(self.error_at(
                token,
                format!(
                    "register index {} exceeds register count {}",
                    value,
                    self.builder().num_registers
                ),
            ));
        }
        Ok(value)
    }

    /// A register index, `-1`, or `FFFF`; the last two mean "no register".
    fn parse_register_or_none(&mut self) -> VmResult<u16> {
        let token = self.current_token();
        match token.kind {
            TokenKind::Int if token.lexeme == "-1" => {
                self.advance();
                Ok(NO_REGISTER)
            }
            TokenKind::Int => self.parse_register(),
            TokenKind::Identifier if token.lexeme.eq_ignore_ascii_case("FFFF") => {
                self.advance();
                Ok(NO_REGISTER)
            }
            _ => Err(self.error_at(token, "expected a register index, -1, or FFFF")),
        }
    }

    /// A jump target: a numeric address, or a label resolved at link time.
    /// Always encoded in the two-byte form so labels can be patched.
    fn parse_target(&mut self) -> VmResult<()> {
        let token = self.current_token();
        match token.kind {
            TokenKind::Int => {
                let value = self.parse_unsigned(token, "jump target")?;
                self.advance();
                self.builder_mut().chunk.write_u16_wide(value);
                Ok(())
            }
            TokenKind::Identifier => {
                self.advance();
                let builder = self.builder_mut();
                let patch_offset = builder.chunk.len();
                builder.chunk.write_u16_wide(0);
                builder.pending_jumps.push(PendingJump {
                    patch_offset,
                    label: token.lexeme.to_string(),
                });
                Ok(())
            }
            _ => Err(self.error_at(token, "expected a label or address")),
        }
    }

    /// `CLOSURE`'s capture list: `(is_local, index)` integer pairs, greedy
    /// until the next non-integer token.
    fn parse_capture_pairs(&mut self) -> VmResult<()> {
        while self.current_token().kind == TokenKind::Int {
            let local_token = self.advance();
            let is_local = self.parse_unsigned(local_token, "capture kind")?;
            if is_local > 1 {
                return Err(self.error_at(local_token, "capture kind must be 0 or 1"));
            }
            let index_token = self.expect(TokenKind::Int, "capture pairs must be complete")?;
            let index = self.parse_unsigned(index_token, "capture index")?;
            if is_local == 1 && index as usize >= self.builder().num_registers {
                return Err(self.error_at(
                    index_token,
                    format!(
                        "captured register {} exceeds register count {}",
                        index,
                        self.builder().num_registers
                    ),
                ));
            }
            if is_local == 0 && index as usize >= self.builder().num_upvalues {
                return Err(self.error_at(
                    index_token,
                    format!(
                        "inherited upvalue {} exceeds declared count {}",
                        index,
                        self.builder().num_upvalues
                    ),
                ));
            }
            let builder = self.builder_mut();
            builder.chunk.write_u16(is_local);
            builder.chunk.write_u16(index);
        }
        Ok(())
    }

    // --- Literals ---

    fn parse_count(&mut self, what: &str) -> VmResult<usize> {
        let token = self.expect(TokenKind::Int, &format!("expected {what}"))?;
        let value = self.parse_unsigned(token, what)?;
        Ok(value as usize)
    }

    fn parse_unsigned(&self, token: Token<'src>, what: &str) -> VmResult<u16> {
        let value: u64 = token
            .lexeme
            .parse()
            .map_err(|_| self.error_at(token, format!("{what} must be a non-negative integer")))?;
        if value > MAX_OPERAND as u64 {
            return Err(self.error_at(
                token,
                format!("{what} {value} exceeds the operand limit {MAX_OPERAND}"),
            ));
        }
        Ok(value as u16)
    }

    /// A `.const`/`LOAD_CONST` literal: string, int, float, bool, null, or
    /// a `@proto` placeholder.
    fn parse_const_value(&mut self) -> VmResult<Value> {
        let token = self.current_token();
        match token.kind {
            TokenKind::Str => {
                self.advance();
                let inner = &token.lexeme[1..token.lexeme.len() - 1];
                let unescaped = unescape(inner);
                Ok(Value::String(self.heap.new_string(&unescaped)))
            }
            TokenKind::Int => {
                self.advance();
                let value: i64 = token
                    .lexeme
                    .parse()
                    .map_err(|_| self.error_at(token, "integer literal out of range"))?;
                Ok(Value::Int(value))
            }
            TokenKind::Float => {
                self.advance();
                let value: f64 = token
                    .lexeme
                    .parse()
                    .map_err(|_| self.error_at(token, "invalid float literal"))?;
                Ok(Value::Float(value))
            }
            TokenKind::Identifier => {
                self.advance();
                match token.lexeme {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    "null" => Ok(Value::Null),
                    lexeme if lexeme.starts_with('@') => {
                        let target = &lexeme[1..];
                        if target.is_empty() {
                            return Err(
                                self.error_at(token, "proto reference needs a name after '@'")
                            );
                        }
                        let placeholder = format!("{PROTO_REF_PREFIX}{target}");
                        Ok(Value::String(self.heap.new_string(&placeholder)))
                    }
                    _ => Err(self.error_at(token, "invalid constant literal")),
                }
            }
            _ => Err(self.error_at(token, "expected a constant literal")),
        }
    }

    /// A name operand: a string literal or a `@proto` reference.
    fn parse_name_value(&mut self) -> VmResult<Value> {
        let token = self.current_token();
        match token.kind {
            TokenKind::Str | TokenKind::Identifier => self.parse_const_value(),
            _ => Err(self.error_at(token, "expected a name (string or @proto)")),
        }
    }

    fn add_constant(&mut self, value: Value, at: Token<'src>) -> VmResult<u16> {
        let index = self.builder_mut().chunk.add_constant(value);
        if index > MAX_OPERAND as usize {
            return Err(self.error_at(at, "too many constants in one function"));
        }
        Ok(index as u16)
    }

    // --- Linking ---

    fn link(mut self) -> VmResult<HashMap<String, GcRef<ObjFunctionProto>>> {
        let origin = self.origin;

        // Labels first: jump placeholders become addresses.
        for builder in &mut self.builders {
            let jumps = std::mem::take(&mut builder.pending_jumps);
            for jump in jumps {
                let target = *builder.labels.get(&jump.label).ok_or_else(|| {
                    VmError::link(
                        origin.to_string(),
                        format!(
                            "unresolved label '{}' in function '{}'",
                            jump.label, builder.name
                        ),
                    )
                })?;
                if target > MAX_OPERAND as usize {
                    return Err(VmError::link(
                        origin.to_string(),
                        format!(
                            "label '{}' address {} exceeds the operand limit",
                            jump.label, target
                        ),
                    ));
                }
                if !builder.chunk.patch_u16(jump.patch_offset, target as u16) {
                    return Err(VmError::link(
                        origin.to_string(),
                        format!("bad patch offset for label '{}'", jump.label),
                    ));
                }
            }
        }

        // Construct prototypes; every descriptor must have been filled.
        let Parser {
            heap,
            origin,
            builders,
            ..
        } = self;
        let mut protos: HashMap<String, GcRef<ObjFunctionProto>> = HashMap::new();
        for builder in builders {
            let mut descs = Vec::with_capacity(builder.upvalue_descs.len());
            for (index, desc) in builder.upvalue_descs.iter().enumerate() {
                match desc {
                    Some(desc) => descs.push(*desc),
                    None => {
                        return Err(VmError::link(
                            origin.to_string(),
                            format!(
                                "function '{}' is missing a '.upvalue' directive for upvalue {}",
                                builder.name, index
                            ),
                        ))
                    }
                }
            }
            let name = heap.new_string(&builder.name);
            let proto = heap.new_proto(
                builder.num_registers,
                builder.num_upvalues,
                name,
                builder.chunk,
                descs,
            );
            protos.insert(builder.name, proto);
        }

        // Placeholder resolution: now that every prototype exists, swap the
        // `::proto_ref::` strings in the pools for real references.
        let handles: Vec<GcRef<ObjFunctionProto>> = protos.values().copied().collect();
        for proto in handles {
            let count = heap.proto(proto).chunk().constant_count();
            for index in 0..count {
                let target_name = match heap.proto(proto).chunk().constant(index) {
                    Some(Value::String(s)) => heap
                        .string(s)
                        .as_str()
                        .strip_prefix(PROTO_REF_PREFIX)
                        .map(str::to_string),
                    _ => None,
                };
                if let Some(target_name) = target_name {
                    let target = *protos.get(&target_name).ok_or_else(|| {
                        VmError::link(
                            origin.to_string(),
                            format!("unresolved proto reference '@{target_name}'"),
                        )
                    })?;
                    heap.proto_mut(proto)
                        .chunk_mut()
                        .set_constant(index, Value::Proto(target));
                }
            }
        }

        if !protos.contains_key("main") {
            return Err(VmError::link(
                origin.to_string(),
                "no 'main' function defined".to_string(),
            ));
        }
        Ok(protos)
    }
}

fn unescape(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            output.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => output.push('\n'),
            Some('t') => output.push('\t'),
            Some('r') => output.push('\r'),
            Some('\\') => output.push('\\'),
            Some('"') => output.push('"'),
            Some(other) => output.push(other),
            None => {}
        }
    }
    output
}
