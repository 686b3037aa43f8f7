//! Error types for metadata codecs

use thiserror::Error;

/// Failure to decode, rewrite, or encode a table metadata payload.
///
/// Codec errors are always fatal for the calling backup or restore: a
/// payload that cannot be rewritten faithfully would leave the restored
/// table unreadable.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Payload truncated at byte {offset}")]
    Truncated { offset: usize },

    #[error("Malformed variable-length integer at byte {offset}")]
    InvalidVarint { offset: usize },

    #[error("Not an Avro object container file (bad magic)")]
    BadMagic,

    #[error("Avro container has no 'avro.schema' header entry")]
    MissingSchema,

    #[error("Invalid Avro schema: {0}")]
    InvalidSchema(String),

    #[error("Unsupported Avro block codec '{0}'")]
    UnsupportedCodec(String),

    #[error("Sync marker mismatch after data block {block}")]
    SyncMismatch { block: usize },

    #[error("Data block {block} claims {count} records but can hold at most {limit}")]
    BlockCount {
        block: usize,
        count: usize,
        limit: usize,
    },

    #[error("Value does not match schema: expected {expected}, found {found}")]
    SchemaMismatch { expected: String, found: String },

    #[error("Union branch {index} out of range ({branches} branches)")]
    UnionBranch { index: i64, branches: usize },

    #[error("Enum index {index} out of range for {name}")]
    EnumIndex { name: String, index: i64 },

    #[error("Negative length {0}")]
    NegativeLength(i64),

    #[error("{0} undecoded bytes left in data block")]
    TrailingBytes(usize),

    #[error("Invalid UTF-8 in string value: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Missing field '{field}' in {context}")]
    MissingField {
        field: String,
        context: &'static str,
    },

    #[error("Path '{path}' is not under table location '{location}'")]
    PathOutsideLocation { path: String, location: String },

    #[error("Invalid table location '{0}'")]
    InvalidLocation(String),

    #[error("Root descriptor error: {0}")]
    Descriptor(String),

    #[error("Block compression error: {0}")]
    Compression(#[source] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
}
