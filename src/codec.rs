//! Blob decompression: a small dispatch table from codec identifier to a
//! pure `(compressed bytes, declared raw size?) -> bytes` function.
//!
//! `Raw` and `Zlib` are always available (`flate2` is the one non-optional
//! codec). `Lz4` and `Zstd` are compiled in behind the `lz4`/`zstd` Cargo
//! features — pluggable but optional. `lzma_data` is recognized at the wire
//! level (so a Blob carrying it is parsed, not rejected as malformed) but
//! deliberately has no decoder; see DESIGN.md Open Question #2.

use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::error::Error;
use crate::wire::FieldScanner;

/// Which codec a `Blob` payload was compressed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecId {
    Raw,
    Zlib,
    Lzma,
    Lz4,
    Zstd,
}

/// A single codec's decompression function.
pub trait Codec: Send + Sync {
    fn id(&self) -> CodecId;

    /// Decompresses `input`. `raw_size`, when known, is a hint some codecs
    /// use to preallocate; it is not trusted for correctness (the caller
    /// checks the actual output length against it).
    fn decompress(&self, input: &[u8], raw_size: Option<usize>) -> Result<Vec<u8>, Error>;
}

struct RawCodec;

impl Codec for RawCodec {
    fn id(&self) -> CodecId {
        CodecId::Raw
    }

    fn decompress(&self, input: &[u8], _raw_size: Option<usize>) -> Result<Vec<u8>, Error> {
        Ok(input.to_vec())
    }
}

struct ZlibCodec;

impl Codec for ZlibCodec {
    fn id(&self) -> CodecId {
        CodecId::Zlib
    }

    fn decompress(&self, input: &[u8], raw_size: Option<usize>) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(raw_size.unwrap_or(input.len() * 4));
        let mut decoder = ZlibDecoder::new(input);
        decoder.read_to_end(&mut out).map_err(|e| Error::CodecError {
            codec: CodecId::Zlib,
            reason: e.to_string(),
        })?;
        Ok(out)
    }
}

#[cfg(feature = "lz4")]
struct Lz4Codec;

#[cfg(feature = "lz4")]
impl Codec for Lz4Codec {
    fn id(&self) -> CodecId {
        CodecId::Lz4
    }

    fn decompress(&self, input: &[u8], raw_size: Option<usize>) -> Result<Vec<u8>, Error> {
        let raw_size = raw_size.ok_or_else(|| Error::CodecError {
            codec: CodecId::Lz4,
            reason: "lz4 payloads require a declared raw_size".into(),
        })?;
        lz4_flex::decompress(input, raw_size).map_err(|e| Error::CodecError {
            codec: CodecId::Lz4,
            reason: e.to_string(),
        })
    }
}

#[cfg(feature = "zstd")]
struct ZstdCodec;

#[cfg(feature = "zstd")]
impl Codec for ZstdCodec {
    fn id(&self) -> CodecId {
        CodecId::Zstd
    }

    fn decompress(&self, input: &[u8], raw_size: Option<usize>) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(raw_size.unwrap_or(input.len() * 4));
        zstd::stream::copy_decode(input, &mut out).map_err(|e| Error::CodecError {
            codec: CodecId::Zstd,
            reason: e.to_string(),
        })?;
        Ok(out)
    }
}

/// A registry of available codecs, constructed once and passed into the
/// pipeline at construction (no process-wide singleton).
pub struct CodecRegistry {
    raw: RawCodec,
    zlib: ZlibCodec,
    #[cfg(feature = "lz4")]
    lz4: Lz4Codec,
    #[cfg(feature = "zstd")]
    zstd: ZstdCodec,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self {
            raw: RawCodec,
            zlib: ZlibCodec,
            #[cfg(feature = "lz4")]
            lz4: Lz4Codec,
            #[cfg(feature = "zstd")]
            zstd: ZstdCodec,
        }
    }
}

impl CodecRegistry {
    fn codec_for(&self, id: CodecId) -> Result<&dyn Codec, Error> {
        match id {
            CodecId::Raw => Ok(&self.raw),
            CodecId::Zlib => Ok(&self.zlib),
            #[cfg(feature = "lz4")]
            CodecId::Lz4 => Ok(&self.lz4),
            #[cfg(not(feature = "lz4"))]
            CodecId::Lz4 => Err(Error::UnsupportedCodec(id)),
            #[cfg(feature = "zstd")]
            CodecId::Zstd => Ok(&self.zstd),
            #[cfg(not(feature = "zstd"))]
            CodecId::Zstd => Err(Error::UnsupportedCodec(id)),
            CodecId::Lzma => Err(Error::UnsupportedCodec(id)),
        }
    }

    /// Decodes a `Blob` message into a plain byte buffer, applying the
    /// safety ceiling and any declared `raw_size` check along the way.
    pub fn decode_blob(&self, buf: &[u8], max_blob_size: usize) -> Result<Vec<u8>, Error> {
        let mut raw_size: Option<usize> = None;
        let mut payload: Option<(CodecId, &[u8])> = None;

        for field in FieldScanner::new(buf) {
            let field = field?;
            match field.number {
                1 => set_payload(&mut payload, CodecId::Raw, field.bytes()?)?,
                2 => raw_size = Some(field.as_int64()? as usize),
                3 => set_payload(&mut payload, CodecId::Zlib, field.bytes()?)?,
                4 => set_payload(&mut payload, CodecId::Lzma, field.bytes()?)?,
                6 => set_payload(&mut payload, CodecId::Lz4, field.bytes()?)?,
                7 => set_payload(&mut payload, CodecId::Zstd, field.bytes()?)?,
                _ => {}
            }
        }

        let (codec_id, compressed) = payload.ok_or_else(|| Error::CodecError {
            codec: CodecId::Raw,
            reason: "blob has no data field".into(),
        })?;

        let codec = self.codec_for(codec_id)?;
        let decoded = codec.decompress(compressed, raw_size)?;

        if codec_id != CodecId::Raw {
            if let Some(expected) = raw_size {
                if decoded.len() != expected {
                    return Err(Error::SizeMismatch { expected, actual: decoded.len() });
                }
            }
        }

        if decoded.len() > max_blob_size {
            return Err(Error::CodecError {
                codec: codec_id,
                reason: format!("decompressed size {} exceeds safety ceiling of {} bytes", decoded.len(), max_blob_size),
            });
        }

        Ok(decoded)
    }
}

fn set_payload<'a>(slot: &mut Option<(CodecId, &'a [u8])>, id: CodecId, bytes: &'a [u8]) -> Result<(), Error> {
    if slot.is_some() {
        return Err(Error::CodecError {
            codec: id,
            reason: "blob has more than one data field".into(),
        });
    }
    *slot = Some((id, bytes));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn field_key(number: u32, wire_type: u8) -> Vec<u8> {
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

    fn length_delimited(number: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = field_key(number, 2);
        let mut len = payload.len() as u64;
        loop {
            let byte = (len & 0x7f) as u8;
            len >>= 7;
            if len == 0 {
                out.push(byte);
                break;
            } else {
                out.push(byte | 0x80);
            }
        }
        out.extend_from_slice(payload);
        out
    }

    fn varint_field(number: u32, value: u64) -> Vec<u8> {
        let mut out = field_key(number, 0);
        let mut v = value;
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
    fn decodes_raw_blob() {
        let registry = CodecRegistry::default();
        let mut buf = length_delimited(1, b"hello world");
        buf.extend(varint_field(2, 11));
        let decoded = registry.decode_blob(&buf, 1 << 20).unwrap();
        assert_eq!(decoded, b"hello world");
    }

    #[test]
    fn decodes_zlib_blob_identically_to_raw() {
        let registry = CodecRegistry::default();
        let raw_payload = b"the quick brown fox jumps over the lazy dog";

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(raw_payload).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut buf = length_delimited(3, &compressed);
        buf.extend(varint_field(2, raw_payload.len() as u64));

        let decoded = registry.decode_blob(&buf, 1 << 20).unwrap();
        assert_eq!(decoded, raw_payload);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let registry = CodecRegistry::default();
        let raw_payload = b"twelve bytes";
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(raw_payload).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut buf = length_delimited(3, &compressed);
        buf.extend(varint_field(2, 999));

        let err = registry.decode_blob(&buf, 1 << 20).unwrap_err();
        assert!(matches!(err, Error::SizeMismatch { expected: 999, .. }));
    }

    #[test]
    fn safety_ceiling_is_enforced() {
        let registry = CodecRegistry::default();
        let buf = length_delimited(1, &[0u8; 64]);
        let err = registry.decode_blob(&buf, 32).unwrap_err();
        assert!(matches!(err, Error::CodecError { .. }));
    }
}
