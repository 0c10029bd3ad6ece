//! Minimal protobuf wire-format encoders, the write-side counterpart to
//! `src/varint.rs` and `src/wire.rs`, for building synthetic PBF byte
//! buffers in integration tests.

pub fn key(number: u32, wire_type: u8) -> Vec<u8> {
    write_uvarint(((number as u64) << 3) | wire_type as u64)
}

pub fn write_uvarint(mut v: u64) -> Vec<u8> {
    let mut out = Vec::new();
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

pub fn zigzag_encode(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

pub fn length_delimited(number: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = key(number, 2);
    out.extend(write_uvarint(payload.len() as u64));
    out.extend_from_slice(payload);
    out
}

pub fn string_field(number: u32, s: &str) -> Vec<u8> {
    length_delimited(number, s.as_bytes())
}

pub fn varint_field(number: u32, value: u64) -> Vec<u8> {
    let mut out = key(number, 0);
    out.extend(write_uvarint(value));
    out
}

pub fn packed_svarints(number: u32, values: &[i64]) -> Vec<u8> {
    let mut payload = Vec::new();
    let mut acc = 0i64;
    for &v in values {
        payload.extend(write_uvarint(zigzag_encode(v - acc)));
        acc = v;
    }
    length_delimited(number, &payload)
}

pub fn packed_uvarints(number: u32, values: &[u64]) -> Vec<u8> {
    let mut payload = Vec::new();
    for &v in values {
        payload.extend(write_uvarint(v));
    }
    length_delimited(number, &payload)
}

/// Wraps a `PrimitiveGroup` payload (already-concatenated sub-fields) in
/// the group's own length-delimited field-2 wrapper at the block level.
pub fn primitive_group(field_number: u32, body: &[u8]) -> Vec<u8> {
    length_delimited(field_number, body)
}

/// Wraps a `Blob` message around a raw (uncompressed) payload.
pub fn blob_raw(payload: &[u8]) -> Vec<u8> {
    let mut out = length_delimited(1, payload);
    out.extend(varint_field(2, payload.len() as u64));
    out
}

/// Wraps a `Blob` message around a zlib-compressed payload, with the
/// correct declared `raw_size`.
pub fn blob_zlib(payload: &[u8]) -> Vec<u8> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut out = length_delimited(3, &compressed);
    out.extend(varint_field(2, payload.len() as u64));
    out
}

/// Encodes one complete container frame: 4-byte BE BlobHeader length,
/// BlobHeader, then the Blob bytes.
pub fn frame(type_str: &str, blob: &[u8]) -> Vec<u8> {
    let mut header = string_field(1, type_str);
    header.extend(varint_field(3, blob.len() as u64));

    let mut out = Vec::new();
    out.extend((header.len() as u32).to_be_bytes());
    out.extend(header);
    out.extend(blob);
    out
}
