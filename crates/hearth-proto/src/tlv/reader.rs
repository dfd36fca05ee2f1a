//! TLV decoder yielding borrowed element views.

use crate::errors::TlvError;

use super::{
    Element, MAX_NESTING_DEPTH, TAG_CONTROL_ANONYMOUS, TAG_CONTROL_CONTEXT, TAG_CONTROL_MASK,
    TYPE_ARRAY, TYPE_BOOL_FALSE, TYPE_BOOL_TRUE, TYPE_BYTES_BASE, TYPE_END_OF_CONTAINER,
    TYPE_INT_BASE, TYPE_LIST, TYPE_MASK, TYPE_NULL, TYPE_STRUCTURE, TYPE_UINT_BASE,
    TYPE_UTF8_BASE, Tag, Value,
};

/// TLV decoder over a borrowed input buffer.
///
/// Elements come back as [`Element`] views; string and byte-string
/// values borrow from the input, so they must be consumed (or copied)
/// before the buffer goes away. The reader tracks container depth to
/// bound nesting and to make [`TlvReader::skip`] container-aware.
#[derive(Debug, Clone)]
pub struct TlvReader<'a> {
    buf: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> TlvReader<'a> {
    /// Create a reader over a TLV document.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0, depth: 0 }
    }

    /// True once the input is exhausted.
    #[must_use]
    pub fn is_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Decode the next element, advancing past it.
    ///
    /// Returns `Ok(None)` at end of input.
    #[allow(
        clippy::should_implement_trait,
        reason = "decode errors must surface per element, not end iteration"
    )]
    pub fn next(&mut self) -> Result<Option<Element<'a>>, TlvError> {
        if self.is_end() {
            return Ok(None);
        }

        let control = self.take(1)?[0];
        let tag = match control & TAG_CONTROL_MASK {
            TAG_CONTROL_ANONYMOUS => Tag::Anonymous,
            TAG_CONTROL_CONTEXT => Tag::Context(self.take(1)?[0]),
            other => return Err(TlvError::UnsupportedTagControl(other)),
        };

        let type_code = control & TYPE_MASK;
        let value = match type_code {
            TYPE_BOOL_FALSE => Value::Bool(false),
            TYPE_BOOL_TRUE => Value::Bool(true),
            TYPE_NULL => Value::Null,
            TYPE_STRUCTURE => self.enter(Value::StructureStart)?,
            TYPE_ARRAY => self.enter(Value::ArrayStart)?,
            TYPE_LIST => self.enter(Value::ListStart)?,
            TYPE_END_OF_CONTAINER => {
                if self.depth == 0 {
                    return Err(TlvError::UnbalancedContainer);
                }
                self.depth -= 1;
                Value::ContainerEnd
            },
            t if (TYPE_INT_BASE..TYPE_INT_BASE + 4).contains(&t) => {
                let width = 1usize << (t - TYPE_INT_BASE);
                Value::Int(self.read_int(width)?)
            },
            t if (TYPE_UINT_BASE..TYPE_UINT_BASE + 4).contains(&t) => {
                let width = 1usize << (t - TYPE_UINT_BASE);
                Value::Uint(self.read_uint(width)?)
            },
            t if (TYPE_UTF8_BASE..TYPE_UTF8_BASE + 3).contains(&t) => {
                let bytes = self.read_string(1usize << (t - TYPE_UTF8_BASE))?;
                Value::Utf8(core::str::from_utf8(bytes).map_err(|_| TlvError::InvalidUtf8)?)
            },
            t if (TYPE_BYTES_BASE..TYPE_BYTES_BASE + 3).contains(&t) => {
                Value::Bytes(self.read_string(1usize << (t - TYPE_BYTES_BASE))?)
            },
            other => return Err(TlvError::UnsupportedType(other)),
        };

        Ok(Some(Element { tag, value }))
    }

    /// Decode the next element without advancing.
    pub fn peek(&self) -> Result<Option<Element<'a>>, TlvError> {
        self.clone().next()
    }

    /// Skip the next element; container starts are skipped through
    /// their matching end.
    pub fn skip(&mut self) -> Result<(), TlvError> {
        let start_depth = self.depth;
        match self.next()? {
            None => Ok(()),
            Some(element) if element.value.is_container_start() => {
                while self.depth > start_depth {
                    if self.next()?.is_none() {
                        return Err(TlvError::Truncated { needed: 1, remaining: 0 });
                    }
                }
                Ok(())
            },
            Some(_) => Ok(()),
        }
    }

    fn enter(&mut self, value: Value<'a>) -> Result<Value<'a>, TlvError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(TlvError::NestingTooDeep { limit: MAX_NESTING_DEPTH });
        }
        self.depth += 1;
        Ok(value)
    }

    fn read_uint(&mut self, width: usize) -> Result<u64, TlvError> {
        let bytes = self.take(width)?;
        let mut le = [0u8; 8];
        le[..width].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(le))
    }

    fn read_int(&mut self, width: usize) -> Result<i64, TlvError> {
        let bytes = self.take(width)?;
        let mut le = [0u8; 8];
        le[..width].copy_from_slice(bytes);
        // Sign-extend from the encoded width.
        if bytes[width - 1] & 0x80 != 0 {
            for b in le.iter_mut().skip(width) {
                *b = 0xFF;
            }
        }
        Ok(i64::from_le_bytes(le))
    }

    fn read_string(&mut self, prefix_width: usize) -> Result<&'a [u8], TlvError> {
        let len = self.read_uint(prefix_width)?;
        let len = usize::try_from(len).map_err(|_| TlvError::Truncated {
            needed: usize::MAX,
            remaining: self.buf.len() - self.pos,
        })?;
        self.take(len)
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], TlvError> {
        let remaining = self.buf.len() - self.pos;
        if count > remaining {
            return Err(TlvError::Truncated { needed: count, remaining });
        }
        let slice = &self.buf[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }
}
