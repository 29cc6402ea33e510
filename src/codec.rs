use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::automaton::{Automaton, PADDING};
use crate::error::Error;

const PROP_SAVE_VALUES: &str = "saveValues";
const PROP_SIZE: &str = "size";
const PROP_IGNORE_CASE: &str = "ignoreCase";

/// Wire type tags, one octet preceding each serialized value. The numbering
/// mirrors the classic runtime type-code table; 0-2, 15, and 17 are
/// reserved by the format and never written by this crate.
pub mod type_code {
    pub const BOOL: u8 = 3;
    pub const CHAR: u8 = 4;
    pub const I8: u8 = 5;
    pub const U8: u8 = 6;
    pub const I16: u8 = 7;
    pub const U16: u8 = 8;
    pub const I32: u8 = 9;
    pub const U32: u8 = 10;
    pub const I64: u8 = 11;
    pub const U64: u8 = 12;
    pub const F32: u8 = 13;
    pub const F64: u8 = 14;
    pub const DATE_TIME: u8 = 16;
    pub const STRING: u8 = 18;
}

/// Cooperative cancellation flag observed by save/load before every
/// property, array element, and value.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn checkpoint(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn corrupt(message: impl Into<String>) -> Error {
    Error::CorruptInput(message.into())
}

// ---------------------------------------------------------------------------
// 7-bit variable-length integers
// ---------------------------------------------------------------------------

pub(crate) fn write_varint_u32<W: Write>(writer: &mut W, mut value: u32) -> io::Result<()> {
    while value >= 0x80 {
        writer.write_all(&[(value as u8) | 0x80])?;
        value >>= 7;
    }
    writer.write_all(&[value as u8])
}

/// Signed values travel as their two's-complement bit pattern, so -1 costs
/// five bytes rather than breaking the varint framing.
pub(crate) fn write_varint_i32<W: Write>(writer: &mut W, value: i32) -> io::Result<()> {
    write_varint_u32(writer, value as u32)
}

pub(crate) fn write_varint_u64<W: Write>(writer: &mut W, mut value: u64) -> io::Result<()> {
    while value >= 0x80 {
        writer.write_all(&[(value as u8) | 0x80])?;
        value >>= 7;
    }
    writer.write_all(&[value as u8])
}

fn read_byte<R: Read>(reader: &mut R) -> Result<u8, Error> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            corrupt("unexpected end of stream")
        } else {
            Error::Io(e)
        }
    })?;
    Ok(buf[0])
}

pub(crate) fn read_varint_u32<R: Read>(reader: &mut R) -> Result<u32, Error> {
    let mut value = 0u32;
    let mut shift = 0u32;
    loop {
        let byte = read_byte(reader)?;
        if shift >= 28 && byte & 0xF0 != 0 {
            return Err(corrupt("varint exceeds 32 bits"));
        }
        value |= u32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

pub(crate) fn read_varint_i32<R: Read>(reader: &mut R) -> Result<i32, Error> {
    Ok(read_varint_u32(reader)? as i32)
}

pub(crate) fn read_varint_u64<R: Read>(reader: &mut R) -> Result<u64, Error> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = read_byte(reader)?;
        if shift >= 63 && byte & 0xFE != 0 {
            return Err(corrupt("varint exceeds 64 bits"));
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// Array and string lengths: non-negative varints. -1 is valid only where a
/// nullable array is expected and is handled at those call sites.
fn read_length<R: Read>(reader: &mut R) -> Result<usize, Error> {
    let value = read_varint_i32(reader)?;
    usize::try_from(value).map_err(|_| corrupt(format!("negative length {}", value)))
}

fn write_bool<W: Write>(writer: &mut W, value: bool) -> io::Result<()> {
    writer.write_all(&[u8::from(value)])
}

fn read_bool<R: Read>(reader: &mut R) -> Result<bool, Error> {
    match read_byte(reader)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(corrupt(format!("invalid boolean byte {}", other))),
    }
}

fn write_string<W: Write>(writer: &mut W, value: &str) -> io::Result<()> {
    write_varint_u32(writer, value.len() as u32)?;
    writer.write_all(value.as_bytes())
}

fn read_string<R: Read>(reader: &mut R) -> Result<String, Error> {
    let length = read_length(reader)?;
    let mut bytes = vec![0u8; length];
    reader.read_exact(&mut bytes).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            corrupt("unexpected end of stream in string")
        } else {
            Error::Io(e)
        }
    })?;
    String::from_utf8(bytes).map_err(|_| corrupt("string is not valid UTF-8"))
}

fn write_i32_array<W: Write>(
    writer: &mut W,
    values: &[i32],
    token: &CancelToken,
) -> Result<(), Error> {
    write_varint_i32(writer, values.len() as i32)?;
    for &value in values {
        token.checkpoint()?;
        write_varint_i32(writer, value)?;
    }
    Ok(())
}

fn read_i32_array<R: Read>(reader: &mut R, token: &CancelToken) -> Result<Vec<i32>, Error> {
    let length = read_length(reader)?;
    let mut values = Vec::with_capacity(length.min(1 << 16));
    for _ in 0..length {
        token.checkpoint()?;
        values.push(read_varint_i32(reader)?);
    }
    Ok(values)
}

fn write_u32_array<W: Write>(
    writer: &mut W,
    values: &[u32],
    token: &CancelToken,
) -> Result<(), Error> {
    write_varint_i32(writer, values.len() as i32)?;
    for &value in values {
        token.checkpoint()?;
        write_varint_u32(writer, value)?;
    }
    Ok(())
}

fn read_u32_array<R: Read>(reader: &mut R, token: &CancelToken) -> Result<Vec<u32>, Error> {
    let length = read_length(reader)?;
    let mut values = Vec::with_capacity(length.min(1 << 16));
    for _ in 0..length {
        token.checkpoint()?;
        values.push(read_varint_u32(reader)?);
    }
    Ok(values)
}

// ---------------------------------------------------------------------------
// value codec
// ---------------------------------------------------------------------------

/// Encoding of one automaton value on the wire: a fixed type tag plus a
/// payload. Implemented for the primitive types the format defines; callers
/// with richer value types implement it themselves (a date-time, for
/// instance, travels as whatever 64-bit form the caller chose).
pub trait WireValue: Sized {
    const TYPE_CODE: u8;

    fn write_value<W: Write>(&self, writer: &mut W) -> io::Result<()>;

    fn read_value<R: Read>(reader: &mut R) -> Result<Self, Error>;
}

impl WireValue for bool {
    const TYPE_CODE: u8 = type_code::BOOL;

    fn write_value<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_bool(writer, *self)
    }

    fn read_value<R: Read>(reader: &mut R) -> Result<Self, Error> {
        read_bool(reader)
    }
}

impl WireValue for char {
    const TYPE_CODE: u8 = type_code::CHAR;

    fn write_value<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_varint_u32(writer, *self as u32)
    }

    fn read_value<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let scalar = read_varint_u32(reader)?;
        char::from_u32(scalar).ok_or_else(|| corrupt(format!("invalid char scalar {}", scalar)))
    }
}

impl WireValue for i8 {
    const TYPE_CODE: u8 = type_code::I8;

    fn write_value<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&[*self as u8])
    }

    fn read_value<R: Read>(reader: &mut R) -> Result<Self, Error> {
        Ok(read_byte(reader)? as i8)
    }
}

impl WireValue for u8 {
    const TYPE_CODE: u8 = type_code::U8;

    fn write_value<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&[*self])
    }

    fn read_value<R: Read>(reader: &mut R) -> Result<Self, Error> {
        read_byte(reader)
    }
}

impl WireValue for i16 {
    const TYPE_CODE: u8 = type_code::I16;

    fn write_value<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_varint_u32(writer, u32::from(*self as u16))
    }

    fn read_value<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let raw = read_varint_u32(reader)?;
        u16::try_from(raw)
            .map(|v| v as i16)
            .map_err(|_| corrupt("16-bit value out of range"))
    }
}

impl WireValue for u16 {
    const TYPE_CODE: u8 = type_code::U16;

    fn write_value<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_varint_u32(writer, u32::from(*self))
    }

    fn read_value<R: Read>(reader: &mut R) -> Result<Self, Error> {
        u16::try_from(read_varint_u32(reader)?).map_err(|_| corrupt("16-bit value out of range"))
    }
}

impl WireValue for i32 {
    const TYPE_CODE: u8 = type_code::I32;

    fn write_value<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_varint_i32(writer, *self)
    }

    fn read_value<R: Read>(reader: &mut R) -> Result<Self, Error> {
        read_varint_i32(reader)
    }
}

impl WireValue for u32 {
    const TYPE_CODE: u8 = type_code::U32;

    fn write_value<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_varint_u32(writer, *self)
    }

    fn read_value<R: Read>(reader: &mut R) -> Result<Self, Error> {
        read_varint_u32(reader)
    }
}

impl WireValue for i64 {
    const TYPE_CODE: u8 = type_code::I64;

    fn write_value<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_varint_u64(writer, *self as u64)
    }

    fn read_value<R: Read>(reader: &mut R) -> Result<Self, Error> {
        Ok(read_varint_u64(reader)? as i64)
    }
}

impl WireValue for u64 {
    const TYPE_CODE: u8 = type_code::U64;

    fn write_value<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_varint_u64(writer, *self)
    }

    fn read_value<R: Read>(reader: &mut R) -> Result<Self, Error> {
        read_varint_u64(reader)
    }
}

impl WireValue for f32 {
    const TYPE_CODE: u8 = type_code::F32;

    fn write_value<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.to_le_bytes())
    }

    fn read_value<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let mut bytes = [0u8; 4];
        reader
            .read_exact(&mut bytes)
            .map_err(|_| corrupt("short read in f32"))?;
        Ok(f32::from_le_bytes(bytes))
    }
}

impl WireValue for f64 {
    const TYPE_CODE: u8 = type_code::F64;

    fn write_value<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.to_le_bytes())
    }

    fn read_value<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let mut bytes = [0u8; 8];
        reader
            .read_exact(&mut bytes)
            .map_err(|_| corrupt("short read in f64"))?;
        Ok(f64::from_le_bytes(bytes))
    }
}

impl WireValue for String {
    const TYPE_CODE: u8 = type_code::STRING;

    fn write_value<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_string(writer, self)
    }

    fn read_value<R: Read>(reader: &mut R) -> Result<Self, Error> {
        read_string(reader)
    }
}

/// A date-time carried as a caller-defined 64-bit binary form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp(pub i64);

impl WireValue for Timestamp {
    const TYPE_CODE: u8 = type_code::DATE_TIME;

    fn write_value<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_varint_u64(writer, self.0 as u64)
    }

    fn read_value<R: Read>(reader: &mut R) -> Result<Self, Error> {
        Ok(Timestamp(read_varint_u64(reader)? as i64))
    }
}

// ---------------------------------------------------------------------------
// automaton save/load
// ---------------------------------------------------------------------------

impl<V: WireValue> Automaton<V> {
    /// Serializes the automaton. With `save_values` false the values array
    /// is omitted and a later [`Automaton::load`] yields hits carrying no
    /// value.
    pub fn save<W: Write>(&self, writer: &mut W, save_values: bool) -> Result<(), Error> {
        self.save_cancellable(writer, save_values, &CancelToken::new())
    }

    /// [`Automaton::save`] observing `token`; a fired token aborts with
    /// [`Error::Cancelled`], leaving a partial stream behind.
    pub fn save_cancellable<W: Write>(
        &self,
        writer: &mut W,
        save_values: bool,
        token: &CancelToken,
    ) -> Result<(), Error> {
        // An automaton loaded without values has nothing to write.
        let save_values = save_values && self.values.is_some();
        let size = self.base.len() - PADDING;

        writer.write_all(&[3])?;
        token.checkpoint()?;
        write_string(writer, PROP_SAVE_VALUES)?;
        write_bool(writer, save_values)?;
        token.checkpoint()?;
        write_string(writer, PROP_SIZE)?;
        write_varint_i32(writer, size as i32)?;
        token.checkpoint()?;
        write_string(writer, PROP_IGNORE_CASE)?;
        write_bool(writer, self.ignore_case)?;

        write_u32_array(writer, &self.key_lengths, token)?;
        write_i32_array(writer, &self.base, token)?;
        write_i32_array(writer, &self.check, token)?;
        write_i32_array(writer, &self.fail, token)?;

        write_varint_i32(writer, self.output.len() as i32)?;
        for entry in &self.output {
            token.checkpoint()?;
            match entry {
                None => write_varint_i32(writer, -1)?,
                Some(patterns) => {
                    write_varint_i32(writer, patterns.len() as i32)?;
                    for &pattern in patterns.iter() {
                        token.checkpoint()?;
                        write_varint_u32(writer, pattern)?;
                    }
                }
            }
        }

        if save_values {
            let values = self.values.as_deref().unwrap_or(&[]);
            write_varint_i32(writer, values.len() as i32)?;
            for value in values {
                token.checkpoint()?;
                writer.write_all(&[V::TYPE_CODE])?;
                value.write_value(writer)?;
            }
        }
        Ok(())
    }

    /// Deserializes an automaton saved by [`Automaton::save`]. Values are
    /// absent when the stream was written with `save_values` false.
    pub fn load<R: Read>(reader: &mut R) -> Result<Self, Error> {
        Self::load_impl(reader, &CancelToken::new(), Option::<fn(usize) -> V>::None)
    }

    /// [`Automaton::load`] observing `token`.
    pub fn load_cancellable<R: Read>(reader: &mut R, token: &CancelToken) -> Result<Self, Error> {
        Self::load_impl(reader, token, Option::<fn(usize) -> V>::None)
    }

    /// Loads a stream written without values, reconstructing each pattern's
    /// value as `restore(pattern_index)`. When the stream does carry
    /// values, they win and `restore` is never called.
    pub fn load_with<R, F>(reader: &mut R, restore: F) -> Result<Self, Error>
    where
        R: Read,
        F: FnMut(usize) -> V,
    {
        Self::load_impl(reader, &CancelToken::new(), Some(restore))
    }

    fn load_impl<R, F>(
        reader: &mut R,
        token: &CancelToken,
        restore: Option<F>,
    ) -> Result<Self, Error>
    where
        R: Read,
        F: FnMut(usize) -> V,
    {
        let mut save_values = false;
        let mut size: Option<usize> = None;
        let mut ignore_case = false;

        let property_count = read_byte(reader)?;
        for _ in 0..property_count {
            token.checkpoint()?;
            let name = read_string(reader)?;
            match name.as_str() {
                PROP_SAVE_VALUES => save_values = read_bool(reader)?,
                PROP_SIZE => size = Some(read_length(reader)?),
                PROP_IGNORE_CASE => ignore_case = read_bool(reader)?,
                // Unknown properties carry a single varint payload.
                _ => {
                    read_varint_u32(reader)?;
                }
            }
        }
        let size = size.ok_or_else(|| corrupt("missing size property"))?;

        let key_lengths = read_u32_array(reader, token)?;
        let base = read_i32_array(reader, token)?;
        let check = read_i32_array(reader, token)?;
        let fail = read_i32_array(reader, token)?;
        if base.len() != size + PADDING {
            return Err(corrupt(format!(
                "base length {} does not match size {}",
                base.len(),
                size
            )));
        }
        if check.len() != base.len() {
            return Err(corrupt("base/check length mismatch"));
        }
        if fail.len() != size + 1 {
            return Err(corrupt("fail length does not match size"));
        }

        let pattern_count = key_lengths.len();
        let output_len = read_length(reader)?;
        if output_len != size + 1 {
            return Err(corrupt("output length does not match size"));
        }
        let mut output = Vec::with_capacity(output_len.min(1 << 16));
        for _ in 0..output_len {
            token.checkpoint()?;
            let marker = read_varint_i32(reader)?;
            if marker == -1 {
                output.push(None);
                continue;
            }
            let length =
                usize::try_from(marker).map_err(|_| corrupt(format!("negative length {}", marker)))?;
            if length > pattern_count {
                return Err(corrupt("output set larger than pattern count"));
            }
            let mut patterns = Vec::with_capacity(length);
            for _ in 0..length {
                token.checkpoint()?;
                let pattern = read_varint_u32(reader)?;
                if pattern as usize >= pattern_count {
                    return Err(corrupt(format!("pattern index {} out of range", pattern)));
                }
                patterns.push(pattern);
            }
            output.push(Some(patterns.into_boxed_slice()));
        }

        let values = if save_values {
            let count = read_length(reader)?;
            if count != pattern_count {
                return Err(corrupt("value count does not match pattern count"));
            }
            let mut values = Vec::with_capacity(count.min(1 << 16));
            for _ in 0..count {
                token.checkpoint()?;
                let code = read_byte(reader)?;
                if code != V::TYPE_CODE {
                    return Err(corrupt(format!("unexpected value type code {}", code)));
                }
                values.push(V::read_value(reader)?);
            }
            Some(values)
        } else if let Some(mut restore) = restore {
            Some((0..pattern_count).map(|index| restore(index)).collect())
        } else {
            None
        };

        Ok(Automaton::from_parts(
            base,
            check,
            fail,
            output,
            key_lengths,
            values,
            ignore_case,
        ))
    }
}
