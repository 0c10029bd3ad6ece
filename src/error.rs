//! Error and warning taxonomy.

use crate::codec::CodecId;

/// All failures the pipeline can surface. Every error is terminal: the
/// orchestrator stops submitting new work and reports the first one seen.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --- Stream-level ---
    #[error("stream ended in the middle of a frame")]
    TruncatedStream,

    #[error("blob header length {0} exceeds the {1}-byte cap")]
    FrameHeaderTooLarge(usize, usize),

    #[error("unrecognized block type {0:?}")]
    InvalidBlockType(String),

    // --- Codec-level ---
    #[error("codec error ({codec:?}): {reason}")]
    CodecError { codec: CodecId, reason: String },

    #[error("declared raw_size {expected} does not match decompressed size {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("unsupported codec: {0:?}")]
    UnsupportedCodec(CodecId),

    // --- Wire-format-level ---
    #[error("malformed varint")]
    MalformedVarint,

    #[error("malformed field: {0}")]
    MalformedField(String),

    #[error("unexpected wire type {0} for field {1}")]
    UnexpectedWireType(u8, u32),

    // --- Semantic-level ---
    #[error("malformed string table: {0}")]
    MalformedStringTable(String),

    #[error("string table index {index} out of range (table has {len} entries)")]
    StringIndexOutOfRange { index: u32, len: usize },

    #[error("malformed tag stream: {0}")]
    MalformedTagStream(String),

    #[error("parallel array length mismatch: {0}")]
    ParallelArrayLengthMismatch(String),

    #[error("malformed relation member type: {0}")]
    MalformedMemberType(i64),

    #[error("unsupported required feature: {0}")]
    UnsupportedFeature(String),

    // --- Lifecycle ---
    #[error("worker pool has shut down")]
    PoolShutdown,

    #[error("pipeline was cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Non-fatal conditions, delivered through [`crate::Consumer::on_warning`]
/// rather than aborting the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// An `OSMData` frame arrived before any `OSMHeader` was seen.
    MissingHeader,
    /// An `optional_features` entry outside the recognized set; unlike
    /// `required_features`, unknown optional features never fail the
    /// pipeline.
    UnrecognizedOptionalFeature(String),
    /// A `ChangeSet` primitive group was present and skipped; changeset
    /// entities are out of scope for this reader.
    SkippedChangeSetGroup,
}
