//! Protobuf wire-format scanning: tag/length pairs and unknown-field skip.
//!
//! [`FieldScanner`] walks one message body and yields [`RawField`]s. Every
//! field's value bytes are fully consumed by the time it's yielded, which is
//! what makes "skip unknown fields" free: a caller that doesn't recognize
//! `field.number` simply drops it and moves on to the next one.

use crate::error::Error;
use crate::varint::{read_uvarint, zigzag_decode};

/// Protobuf wire types. 3 (`StartGroup`) and 4 (`EndGroup`) are legacy and
/// never emitted by modern encoders, but a scanner must still be able to
/// skip over them for forward compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    StartGroup,
    EndGroup,
    Fixed32,
}

impl WireType {
    fn from_tag(tag: u64) -> Result<Self, Error> {
        match tag & 0x7 {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::LengthDelimited),
            3 => Ok(WireType::StartGroup),
            4 => Ok(WireType::EndGroup),
            5 => Ok(WireType::Fixed32),
            other => Err(Error::MalformedField(format!("unknown wire type {other}"))),
        }
    }
}

/// A single decoded field: its number, wire type, and the raw bytes making
/// up its value (not including the key). For `LengthDelimited` fields these
/// are the inner payload bytes; for `Varint` the raw varint bytes; for
/// `Fixed32`/`Fixed64` the 4/8 little-endian bytes; for group types, the
/// full skipped span (rarely meaningful, kept only so skipping is uniform).
#[derive(Debug, Clone, Copy)]
pub struct RawField<'a> {
    pub number: u32,
    pub wire_type: WireType,
    bytes: &'a [u8],
}

impl<'a> RawField<'a> {
    /// Interprets the value as an unsigned varint.
    pub fn as_uvarint(&self) -> Result<u64, Error> {
        if self.wire_type != WireType::Varint {
            return Err(Error::UnexpectedWireType(self.wire_type_code(), self.number));
        }
        read_uvarint(self.bytes).map(|(v, _)| v)
    }

    /// Interprets the value as a zig-zag encoded signed varint.
    pub fn as_svarint(&self) -> Result<i64, Error> {
        self.as_uvarint().map(zigzag_decode)
    }

    /// Interprets the value as a plain (non-zigzag) signed varint, i.e. a
    /// protobuf `int32`/`int64`, where negative values are encoded as the
    /// full ten-byte two's-complement varint.
    pub fn as_int64(&self) -> Result<i64, Error> {
        self.as_uvarint().map(|v| v as i64)
    }

    /// Returns the raw bytes of a `LengthDelimited` field.
    pub fn bytes(&self) -> Result<&'a [u8], Error> {
        if self.wire_type != WireType::LengthDelimited {
            return Err(Error::UnexpectedWireType(self.wire_type_code(), self.number));
        }
        Ok(self.bytes)
    }

    /// Returns the raw bytes of a `LengthDelimited` field interpreted as a
    /// UTF-8 string.
    pub fn as_str(&self) -> Result<&'a str, Error> {
        std::str::from_utf8(self.bytes()?)
            .map_err(|_| Error::MalformedField(format!("field {} is not valid UTF-8", self.number)))
    }

    fn wire_type_code(&self) -> u8 {
        match self.wire_type {
            WireType::Varint => 0,
            WireType::Fixed64 => 1,
            WireType::LengthDelimited => 2,
            WireType::StartGroup => 3,
            WireType::EndGroup => 4,
            WireType::Fixed32 => 5,
        }
    }
}

/// Iterates the top-level fields of a single protobuf message body.
pub struct FieldScanner<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldScanner<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
}

impl<'a> Iterator for FieldScanner<'a> {
    type Item = Result<RawField<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }

        let (key, key_len) = match read_uvarint(&self.buf[self.pos..]) {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        };
        self.pos += key_len;

        let number = (key >> 3) as u32;
        let wire_type = match WireType::from_tag(key) {
            Ok(w) => w,
            Err(e) => return Some(Err(e)),
        };

        match self.take_value(wire_type) {
            Ok(bytes) => Some(Ok(RawField { number, wire_type, bytes })),
            Err(e) => Some(Err(e)),
        }
    }
}

impl<'a> FieldScanner<'a> {
    /// Consumes the value bytes for `wire_type` starting at `self.pos`,
    /// advances the cursor past them, and returns the span.
    fn take_value(&mut self, wire_type: WireType) -> Result<&'a [u8], Error> {
        match wire_type {
            WireType::Varint => {
                let (_, n) = read_uvarint(&self.buf[self.pos..])?;
                let start = self.pos;
                self.pos += n;
                Ok(&self.buf[start..self.pos])
            }
            WireType::Fixed64 => self.take_fixed(8),
            WireType::Fixed32 => self.take_fixed(4),
            WireType::LengthDelimited => {
                let (len, n) = read_uvarint(&self.buf[self.pos..])?;
                self.pos += n;
                let len = len as usize;
                if self.pos + len > self.buf.len() {
                    return Err(Error::MalformedField("length-delimited field runs past end of message".into()));
                }
                let start = self.pos;
                self.pos += len;
                Ok(&self.buf[start..self.pos])
            }
            WireType::StartGroup => {
                let start = self.pos;
                self.skip_group()?;
                Ok(&self.buf[start..self.pos])
            }
            WireType::EndGroup => Err(Error::MalformedField("unmatched end-group tag".into())),
        }
    }

    fn take_fixed(&mut self, width: usize) -> Result<&'a [u8], Error> {
        if self.pos + width > self.buf.len() {
            return Err(Error::MalformedField("truncated fixed-width field".into()));
        }
        let start = self.pos;
        self.pos += width;
        Ok(&self.buf[start..self.pos])
    }

    /// Skips a legacy group: consumes fields until the matching end-group
    /// tag, discarding their contents.
    fn skip_group(&mut self) -> Result<(), Error> {
        loop {
            if self.pos >= self.buf.len() {
                return Err(Error::MalformedField("unterminated group".into()));
            }
            let (key, key_len) = read_uvarint(&self.buf[self.pos..])?;
            self.pos += key_len;
            let wire_type = WireType::from_tag(key)?;
            if wire_type == WireType::EndGroup {
                return Ok(());
            }
            self.take_value(wire_type)?;
        }
    }
}

/// Iterates a packed field's value as a stream of unsigned varints
/// (e.g. `keys`, `vals`, `roles_sid`, `types`).
pub struct PackedUvarints<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PackedUvarints<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Splits off the next zero-terminated run of varints: the dense node
    /// tag stream convention, where each entity's key/value indices end
    /// with a literal `0`. Returns the bytes before the terminator (not
    /// including it) and advances past it. Returns `None` once the
    /// underlying buffer is exhausted with no further run to read.
    pub fn next_zero_terminated_run(&mut self) -> Result<Option<&'a [u8]>, Error> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let start = self.pos;
        loop {
            if self.pos >= self.buf.len() {
                return Err(Error::MalformedTagStream("tag stream ended without a terminator".into()));
            }
            let (v, n) = read_uvarint(&self.buf[self.pos..])?;
            let value_start = self.pos;
            self.pos += n;
            if v == 0 {
                return Ok(Some(&self.buf[start..value_start]));
            }
        }
    }
}

impl<'a> Iterator for PackedUvarints<'a> {
    type Item = Result<u64, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        match read_uvarint(&self.buf[self.pos..]) {
            Ok((v, n)) => {
                self.pos += n;
                Some(Ok(v))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// Iterates a packed field's value as a stream of zig-zag signed varints,
/// delta-accumulating them as it goes (used for dense ids/lat/lon and
/// way/relation ref/memid arrays).
pub struct DeltaPackedSvarints<'a> {
    inner: PackedUvarints<'a>,
    acc: i64,
}

impl<'a> DeltaPackedSvarints<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { inner: PackedUvarints::new(buf), acc: 0 }
    }

    pub fn is_exhausted(&self) -> bool {
        self.inner.is_exhausted()
    }
}

impl<'a> Iterator for DeltaPackedSvarints<'a> {
    type Item = Result<i64, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok(u) => {
                self.acc = self.acc.wrapping_add(zigzag_decode(u));
                Some(Ok(self.acc))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(number: u32, wire_type: u8) -> Vec<u8> {
        let mut out = Vec::new();
        let mut v = ((number as u64) << 3) | wire_type as u64;
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            } else {
                out.push(byte | 0x80);
            }
        }
        out
    }

    #[test]
    fn scans_varint_field() {
        let mut buf = key(1, 0);
        buf.push(42);
        let mut scanner = FieldScanner::new(&buf);
        let field = scanner.next().unwrap().unwrap();
        assert_eq!(field.number, 1);
        assert_eq!(field.as_uvarint().unwrap(), 42);
        assert!(scanner.next().is_none());
    }

    #[test]
    fn scans_length_delimited_field() {
        let mut buf = key(2, 2);
        buf.push(5);
        buf.extend_from_slice(b"hello");
        let mut scanner = FieldScanner::new(&buf);
        let field = scanner.next().unwrap().unwrap();
        assert_eq!(field.as_str().unwrap(), "hello");
    }

    #[test]
    fn unknown_field_is_silently_skippable() {
        // field 99 length-delimited, followed by a recognized varint field 1.
        let mut buf = key(99, 2);
        buf.push(3);
        buf.extend_from_slice(b"abc");
        buf.extend(key(1, 0));
        buf.push(7);

        let fields: Vec<_> = FieldScanner::new(&buf).collect::<Result<_, _>>().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1].number, 1);
        assert_eq!(fields[1].as_uvarint().unwrap(), 7);
    }

    #[test]
    fn skips_legacy_group() {
        let mut buf = key(10, 3); // start group field 10
        buf.extend(key(1, 0));
        buf.push(5);
        buf.extend(key(10, 4)); // end group field 10
        buf.extend(key(2, 0));
        buf.push(9);

        let fields: Vec<_> = FieldScanner::new(&buf).collect::<Result<_, _>>().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].wire_type, WireType::StartGroup);
        assert_eq!(fields[1].number, 2);
    }

    #[test]
    fn delta_packed_svarints_reconstructs_sequence() {
        // zig-zag varints for [+1, -1, 0] => [0x02, 0x01, 0x00]
        let buf = [0x02, 0x01, 0x00];
        let values: Vec<i64> = DeltaPackedSvarints::new(&buf).collect::<Result<_, _>>().unwrap();
        assert_eq!(values, vec![1, 0, 0]);
    }
}
