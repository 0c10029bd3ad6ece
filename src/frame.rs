//! The outermost framing: a stream of `BlobHeader`-length-prefixed,
//! `Blob`-length-prefixed frames, per the OSM PBF file format.
//!
//! Layout of one frame on the wire:
//! ```text
//! u32 big-endian length of BlobHeader
//! BlobHeader message (type, optional indexdata, datasize)
//! Blob message, datasize bytes long
//! ```

use std::io::Read;

use crate::error::Error;
use crate::wire::FieldScanner;

/// Which kind of primitive block a frame carries, per `BlobHeader.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Header,
    Data,
    Unknown,
}

impl BlockKind {
    fn from_type_str(s: &str) -> Self {
        match s {
            "OSMHeader" => BlockKind::Header,
            "OSMData" => BlockKind::Data,
            _ => BlockKind::Unknown,
        }
    }
}

/// One frame's header plus its still-compressed `Blob` body.
pub struct BlobFrame<'a> {
    pub index: u64,
    pub kind: BlockKind,
    pub blob: &'a [u8],
}

/// Reads successive frames from an underlying [`Read`], reusing an internal
/// buffer across calls so steady-state reading does no heap churn.
pub struct FrameReader<R> {
    inner: R,
    header_buf: Vec<u8>,
    blob_buf: Vec<u8>,
    max_header_size: usize,
    next_index: u64,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R, max_header_size: usize) -> Self {
        Self {
            inner,
            header_buf: Vec::new(),
            blob_buf: Vec::new(),
            max_header_size,
            next_index: 0,
        }
    }

    /// Reads the next frame, if any. Returns `Ok(None)` only on a clean EOF
    /// that falls exactly on a frame boundary; any other truncation is a
    /// [`Error::TruncatedStream`].
    pub fn next_frame(&mut self) -> Result<Option<BlobFrame<'_>>, Error> {
        let mut len_buf = [0u8; 4];
        match read_exact_or_eof(&mut self.inner, &mut len_buf)? {
            false => return Ok(None),
            true => {}
        }
        let header_len = u32::from_be_bytes(len_buf) as usize;
        if header_len > self.max_header_size {
            return Err(Error::FrameHeaderTooLarge(header_len, self.max_header_size));
        }

        self.header_buf.resize(header_len, 0);
        self.inner
            .read_exact(&mut self.header_buf)
            .map_err(|_| Error::TruncatedStream)?;

        let (kind, data_size) = parse_blob_header(&self.header_buf)?;

        self.blob_buf.resize(data_size, 0);
        self.inner
            .read_exact(&mut self.blob_buf)
            .map_err(|_| Error::TruncatedStream)?;

        let index = self.next_index;
        self.next_index += 1;

        Ok(Some(BlobFrame { index, kind, blob: &self.blob_buf }))
    }
}

/// Reads exactly `buf.len()` bytes, returning `Ok(false)` if the stream was
/// at a clean EOF before any byte was read, and `Err(TruncatedStream)` if it
/// ran out partway through.
fn read_exact_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<bool, Error> {
    let mut read = 0;
    while read < buf.len() {
        match r.read(&mut buf[read..]) {
            Ok(0) => {
                return if read == 0 {
                    Ok(false)
                } else {
                    Err(Error::TruncatedStream)
                };
            }
            Ok(n) => read += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(true)
}

/// Parses a `BlobHeader` message: field 1 = type (string), field 3 = datasize
/// (int32). Field 2 (`indexdata`) is recognized but unused.
fn parse_blob_header(buf: &[u8]) -> Result<(BlockKind, usize), Error> {
    let mut kind: Option<BlockKind> = None;
    let mut data_size: Option<usize> = None;

    for field in FieldScanner::new(buf) {
        let field = field?;
        match field.number {
            1 => kind = Some(BlockKind::from_type_str(field.as_str()?)),
            3 => data_size = Some(field.as_int64()? as usize),
            _ => {}
        }
    }

    let kind = kind.ok_or_else(|| Error::MalformedField("BlobHeader missing type field".into()))?;
    let data_size = data_size.ok_or_else(|| Error::MalformedField("BlobHeader missing datasize field".into()))?;
    Ok((kind, data_size))
}
