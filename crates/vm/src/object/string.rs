//! Immutable interned strings.

use crate::memory::{Trace, Tracer};

/// An immutable UTF-8 string.
///
/// Strings are interned by the memory manager: one canonical object exists
/// per distinct byte sequence, so identity comparison of handles doubles as
/// byte comparison. The content never changes after allocation.
#[derive(Debug)]
pub struct ObjString {
    content: Box<str>,
}

impl ObjString {
    pub fn new(content: &str) -> Self {
        Self {
            content: content.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.content
    }

    /// Byte length (cached by the underlying allocation).
    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

impl Trace for ObjString {
    fn trace(&self, _tracer: &mut Tracer) {
        // Strings have no outgoing references.
    }
}
