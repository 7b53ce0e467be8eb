//! Tokeniser for the textual bytecode format.
//!
//! Whitespace-insensitive; `#` starts a line comment. Directives begin with
//! a dot, labels are identifiers followed by `:`, and everything else is an
//! opcode mnemonic, identifier, number, or string literal.

use crate::error::{VmError, VmResult};
use crate::op_code::OpCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    DirFunc,
    DirEndFunc,
    DirRegisters,
    DirUpvalues,
    DirUpvalue,
    DirConst,
    /// `name:` — the lexeme excludes the colon.
    LabelDef,
    /// Plain identifier, `@proto` reference, or keyword (`true`, `null`, …).
    Identifier,
    /// A known opcode mnemonic.
    Opcode,
    Int,
    Float,
    /// String literal; the lexeme includes the surrounding quotes.
    Str,
    Eof,
}

#[derive(Debug, Clone, Copy)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub lexeme: &'src str,
    pub line: usize,
    pub col: usize,
}

pub struct Lexer<'src> {
    src: &'src str,
    file: &'src str,
    pos: usize,
    line: usize,
    line_start: usize,
}

impl<'src> Lexer<'src> {
    pub fn new(src: &'src str, file: &'src str) -> Self {
        Self {
            src,
            file,
            pos: 0,
            line: 1,
            line_start: 0,
        }
    }

    /// Tokenises the whole input, ending with an EOF token.
    pub fn tokenize_all(mut self) -> VmResult<Vec<Token<'src>>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn error(&self, message: impl Into<String>) -> VmError {
        VmError::parse(
            self.file.to_string(),
            self.line,
            self.col(),
            message.into(),
        )
    }

    fn col(&self) -> usize {
        self.pos - self.line_start + 1
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos + 1).copied()
    }

    fn advance(&mut self) {
        if let Some(byte) = self.peek() {
            self.pos += 1;
            if byte == b'\n' {
                self.line += 1;
                self.line_start = self.pos;
            }
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(byte) = self.peek() {
            match byte {
                b' ' | b'\t' | b'\r' | b'\n' => self.advance(),
                b'#' => {
                    while let Some(byte) = self.peek() {
                        if byte == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn is_ident_start(byte: u8) -> bool {
        byte.is_ascii_alphabetic() || byte == b'_' || byte == b'@'
    }

    fn is_ident_continue(byte: u8) -> bool {
        byte.is_ascii_alphanumeric() || byte == b'_'
    }

    fn next_token(&mut self) -> VmResult<Token<'src>> {
        self.skip_whitespace_and_comments();

        let start = self.pos;
        let line = self.line;
        let col = self.col();
        let make = |kind, lexeme| Token {
            kind,
            lexeme,
            line,
            col,
        };

        let byte = match self.peek() {
            None => return Ok(make(TokenKind::Eof, "")),
            Some(byte) => byte,
        };

        // Directive
        if byte == b'.' {
            self.advance();
            while self.peek().map_or(false, Self::is_ident_continue) {
                self.advance();
            }
            let lexeme = &self.src[start..self.pos];
            let kind = match lexeme {
                ".func" => TokenKind::DirFunc,
                ".endfunc" => TokenKind::DirEndFunc,
                ".registers" => TokenKind::DirRegisters,
                ".upvalues" => TokenKind::DirUpvalues,
                ".upvalue" => TokenKind::DirUpvalue,
                ".const" => TokenKind::DirConst,
                _ => return Err(self.error(format!("unknown directive '{lexeme}'"))),
            };
            return Ok(make(kind, lexeme));
        }

        // Identifier, opcode, or label definition
        if Self::is_ident_start(byte) {
            let at_prefixed = byte == b'@';
            self.advance();
            while self.peek().map_or(false, Self::is_ident_continue) {
                self.advance();
            }
            let lexeme = &self.src[start..self.pos];
            if self.peek() == Some(b':') && !at_prefixed {
                self.advance();
                return Ok(make(TokenKind::LabelDef, lexeme));
            }
            if OpCode::from_name(lexeme).is_some() {
                return Ok(make(TokenKind::Opcode, lexeme));
            }
            return Ok(make(TokenKind::Identifier, lexeme));
        }

        // Number (optionally signed)
        if byte.is_ascii_digit() || (byte == b'-' && self.peek_next().map_or(false, |b| b.is_ascii_digit()))
        {
            self.advance();
            while self.peek().map_or(false, |b| b.is_ascii_digit()) {
                self.advance();
            }
            let mut is_float = false;
            if self.peek() == Some(b'.') && self.peek_next().map_or(false, |b| b.is_ascii_digit()) {
                is_float = true;
                self.advance();
                while self.peek().map_or(false, |b| b.is_ascii_digit()) {
                    self.advance();
                }
            }
            let kind = if is_float { TokenKind::Float } else { TokenKind::Int };
            return Ok(make(kind, &self.src[start..self.pos]));
        }

        // String literal
        if byte == b'"' {
            self.advance();
            loop {
                match self.peek() {
                    None => return Err(self.error("unterminated string literal")),
                    Some(b'\n') => return Err(self.error("newline in string literal")),
                    Some(b'\\') => {
                        self.advance();
                        if self.peek().is_none() {
                            return Err(self.error("unterminated escape sequence"));
                        }
                        self.advance();
                    }
                    Some(b'"') => {
                        self.advance();
                        break;
                    }
                    Some(_) => self.advance(),
                }
            }
            return Ok(make(TokenKind::Str, &self.src[start..self.pos]));
        }

        Err(self.error(format!("unexpected character '{}'", byte as char)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src, "<test>")
            .tokenize_all()
            .unwrap()
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn test_directives_and_opcodes() {
        assert_eq!(
            kinds(".func main\n.registers 2 .upvalues 0\nHALT\n.endfunc"),
            vec![
                TokenKind::DirFunc,
                TokenKind::Identifier,
                TokenKind::DirRegisters,
                TokenKind::Int,
                TokenKind::DirUpvalues,
                TokenKind::Int,
                TokenKind::Opcode,
                TokenKind::DirEndFunc,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_labels_and_references() {
        let tokens = Lexer::new("loop: JUMP loop", "<test>")
            .tokenize_all()
            .unwrap();
        assert_eq!(tokens[0].kind, TokenKind::LabelDef);
        assert_eq!(tokens[0].lexeme, "loop");
        assert_eq!(tokens[1].kind, TokenKind::Opcode);
        assert_eq!(tokens[2].kind, TokenKind::Identifier);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("42 -17 3.25 -0.5"), vec![
            TokenKind::Int,
            TokenKind::Int,
            TokenKind::Float,
            TokenKind::Float,
            TokenKind::Eof,
        ]);
    }

    #[test]
    fn test_proto_reference() {
        let tokens = Lexer::new("@makeAdder", "<test>").tokenize_all().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Identifier);
        assert_eq!(tokens[0].lexeme, "@makeAdder");
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            kinds("# a comment\nHALT # trailing\n"),
            vec![TokenKind::Opcode, TokenKind::Eof]
        );
    }

    #[test]
    fn test_string_escapes() {
        let tokens = Lexer::new(r#""a\"b\n""#, "<test>").tokenize_all().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Str);
        assert_eq!(tokens[0].lexeme, r#""a\"b\n""#);
    }

    #[test]
    fn test_lex_errors() {
        assert!(Lexer::new("\"open", "<test>").tokenize_all().is_err());
        assert!(Lexer::new(".bogus", "<test>").tokenize_all().is_err());
        assert!(Lexer::new("$", "<test>").tokenize_all().is_err());
    }

    #[test]
    fn test_error_location() {
        let err = Lexer::new("HALT\n  $", "<test>").tokenize_all().unwrap_err();
        match err {
            VmError::Parse { line, col, .. } => {
                assert_eq!(line, 2);
                assert_eq!(col, 3);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
