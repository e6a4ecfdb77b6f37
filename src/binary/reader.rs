use nom::{
    bytes::complete::take,
    error::ErrorKind,
    number::complete::{le_f32, le_f64, le_u8},
    IResult,
};
use nom_leb128::{leb128_i32, leb128_i64, leb128_u32};

use crate::error::{CompileError, Result};

/// Forward-only cursor over an in-memory buffer.
///
/// Offsets reported in errors are absolute: a sub reader remembers where its
/// window starts inside the original module bytes.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    input: &'a [u8],
    base: usize,
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self::with_offset(input, 0)
    }

    pub fn with_offset(input: &'a [u8], base: usize) -> Self {
        Self {
            input,
            base,
            pos: 0,
        }
    }

    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.input.len()
    }

    pub fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }

    pub fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::decode(self.offset(), message)
    }

    fn parse<T>(
        &mut self,
        what: &str,
        parser: impl FnOnce(&'a [u8]) -> IResult<&'a [u8], T>,
    ) -> Result<T> {
        let rest = &self.input[self.pos..];

        match parser(rest) {
            Ok((next, value)) => {
                self.pos += rest.len() - next.len();
                Ok(value)
            }
            Err(nom::Err::Incomplete(_)) => Err(self.error(format!("unexpected end of input reading {what}"))),
            Err(nom::Err::Error(err) | nom::Err::Failure(err)) => match err.code {
                ErrorKind::Eof => Err(self.error(format!("unexpected end of input reading {what}"))),
                ErrorKind::TooLarge => Err(self.error(format!("integer representation too long reading {what}"))),
                code => Err(self.error(format!("failed to read {what}: {code:?}"))),
            },
        }
    }

    pub fn byte(&mut self) -> Result<u8> {
        self.parse("byte", le_u8)
    }

    pub fn peek_byte(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.parse("u32", leb128_u32)
    }

    pub fn s32(&mut self) -> Result<i32> {
        self.parse("i32", leb128_i32)
    }

    pub fn s64(&mut self) -> Result<i64> {
        self.parse("i64", leb128_i64)
    }

    /// Signed 33-bit varint, used by block types: at most 5 bytes.
    pub fn s33(&mut self) -> Result<i64> {
        let start = self.pos;
        let value = self.parse("s33", leb128_i64)?;

        if self.pos - start > 5 || !(-(1i64 << 32)..(1i64 << 32)).contains(&value) {
            return Err(CompileError::decode(self.base + start, "integer too large reading s33"));
        }
        Ok(value)
    }

    pub fn f32(&mut self) -> Result<f32> {
        self.parse("f32", le_f32)
    }

    pub fn f64(&mut self) -> Result<f64> {
        self.parse("f64", le_f64)
    }

    pub fn slice(&mut self, len: usize) -> Result<&'a [u8]> {
        self.parse("bytes", take(len))
    }

    pub fn utf8(&mut self, len: usize) -> Result<&'a str> {
        let start = self.offset();
        let bytes = self.slice(len)?;
        std::str::from_utf8(bytes).map_err(|err| CompileError::decode(start, format!("malformed UTF-8 encoding: {err}")))
    }

    /// A length-prefixed UTF-8 string.
    pub fn name(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        Ok(self.utf8(len)?.to_string())
    }

    /// Splits off the next `len` bytes as their own reader and skips past them.
    pub fn sub_reader(&mut self, len: usize) -> Result<Reader<'a>> {
        let base = self.offset();
        let bytes = self.slice(len)?;
        Ok(Reader::with_offset(bytes, base))
    }

    /// A length-prefixed vector; `f` decodes one element.
    pub fn vec<T>(&mut self, mut f: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let count = self.u32()? as usize;
        // the count is untrusted, don't let it drive a huge allocation
        let mut items = Vec::with_capacity(count.min(self.remaining()));

        for _ in 0..count {
            items.push(f(self)?);
        }
        Ok(items)
    }

    pub fn expect_end(&self, what: &str) -> Result<()> {
        if !self.is_empty() {
            return Err(self.error(format!("{what} size mismatch: {} trailing bytes", self.remaining())));
        }
        Ok(())
    }
}
