//! Avro object container files as written by Iceberg writers
//!
//! A container is kept as header metadata, sync marker, per-block record
//! counts and decoded records. Compressed blocks also keep their original
//! bytes, written back whenever the block's records encode unchanged, so an
//! unmodified container re-encodes to the input bytes under every codec.
//! Blocks whose records changed are recompressed at the codec's default
//! level.

use std::borrow::Cow;
use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use sha2::{Digest, Sha256};

use super::binary::{Decoder, write_bytes, write_len, write_long};
use super::datum::{read_datum, write_datum};
use super::schema::AvroSchema;
use super::value::Value;
use crate::{CodecError, Result};

pub const MAGIC: [u8; 4] = *b"Obj\x01";
pub const SCHEMA_KEY: &str = "avro.schema";
pub const CODEC_KEY: &str = "avro.codec";
const SYNC_SIZE: usize = 16;
/// Record count cap for blocks of a schema whose datums encode to nothing
const MAX_EMPTY_DATUMS: usize = 1 << 20;

/// Block compression named by the `avro.codec` header entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCodec {
    Null,
    Deflate,
    Zstandard,
}

impl BlockCodec {
    pub fn from_header(value: Option<&[u8]>) -> Result<Self> {
        match value {
            None | Some(b"null") | Some(b"") => Ok(Self::Null),
            Some(b"deflate") => Ok(Self::Deflate),
            Some(b"zstandard") => Ok(Self::Zstandard),
            Some(other) => Err(CodecError::UnsupportedCodec(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Deflate => "deflate",
            Self::Zstandard => "zstandard",
        }
    }

    fn decompress(self, block: &[u8]) -> Result<Cow<'_, [u8]>> {
        match self {
            Self::Null => Ok(Cow::Borrowed(block)),
            Self::Deflate => {
                let mut raw = Vec::new();
                _ = DeflateDecoder::new(block)
                    .read_to_end(&mut raw)
                    .map_err(CodecError::Compression)?;
                Ok(Cow::Owned(raw))
            }
            Self::Zstandard => zstd::stream::decode_all(block)
                .map(Cow::Owned)
                .map_err(CodecError::Compression),
        }
    }

    fn compress(self, block: Vec<u8>) -> Result<Vec<u8>> {
        match self {
            Self::Null => Ok(block),
            Self::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&block).map_err(CodecError::Compression)?;
                encoder.finish().map_err(CodecError::Compression)
            }
            Self::Zstandard => {
                zstd::stream::encode_all(block.as_slice(), zstd::DEFAULT_COMPRESSION_LEVEL)
                    .map_err(CodecError::Compression)
            }
        }
    }
}

/// A compressed block as read
#[derive(Debug, Clone)]
struct PackedBlock {
    codec: BlockCodec,
    /// SHA-256 of the uncompressed block
    digest: Vec<u8>,
    bytes: Vec<u8>,
}

impl PackedBlock {
    fn holds(&self, codec: BlockCodec, raw: &[u8]) -> bool {
        self.codec == codec && Sha256::digest(raw).as_slice() == self.digest.as_slice()
    }
}

/// A decoded Avro object container
#[derive(Debug, Clone)]
pub struct ManifestContainer {
    schema: AvroSchema,
    metadata: Vec<(String, Vec<u8>)>,
    sync: [u8; SYNC_SIZE],
    block_counts: Vec<usize>,
    packed: Vec<PackedBlock>,
    records: Vec<Value>,
}

impl ManifestContainer {
    /// Build a container for freshly produced records.
    ///
    /// The sync marker is derived from the schema text so that building the
    /// same records twice yields the same bytes.
    pub fn new(schema_json: &str, records: Vec<Value>) -> Result<Self> {
        let schema = AvroSchema::parse(schema_json.as_bytes())?;
        let digest = Sha256::digest(schema_json.as_bytes());
        let mut sync = [0u8; SYNC_SIZE];
        sync.copy_from_slice(&digest[..SYNC_SIZE]);
        let block_counts = if records.is_empty() {
            Vec::new()
        } else {
            vec![records.len()]
        };
        Ok(Self {
            schema,
            metadata: vec![(SCHEMA_KEY.to_string(), schema_json.as_bytes().to_vec())],
            sync,
            block_counts,
            packed: Vec::new(),
            records,
        })
    }

    /// Set a header entry, replacing any existing value in place
    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<Vec<u8>>) -> Self {
        let value = value.into();
        match self.metadata.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value,
            None => self.metadata.push((key.to_string(), value)),
        }
        self
    }

    #[must_use]
    pub fn with_codec(self, codec: BlockCodec) -> Self {
        self.with_metadata(CODEC_KEY, codec.name())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MAGIC.len() || bytes[..MAGIC.len()] != MAGIC {
            return Err(CodecError::BadMagic);
        }
        let mut d = Decoder::new(&bytes[MAGIC.len()..]);

        let mut metadata = Vec::new();
        loop {
            let count = d.read_long()?;
            if count == 0 {
                break;
            }
            if count < 0 {
                _ = d.read_long()?;
            }
            for _ in 0..count.unsigned_abs() {
                let key = String::from_utf8(d.read_bytes()?.to_vec())?;
                let value = d.read_bytes()?.to_vec();
                metadata.push((key, value));
            }
        }

        let mut sync = [0u8; SYNC_SIZE];
        sync.copy_from_slice(d.read_slice(SYNC_SIZE)?);

        let schema_text = metadata
            .iter()
            .find(|(k, _)| k == SCHEMA_KEY)
            .map(|(_, v)| v.as_slice())
            .ok_or(CodecError::MissingSchema)?;
        let schema = AvroSchema::parse(schema_text)?;
        let codec = BlockCodec::from_header(
            metadata
                .iter()
                .find(|(k, _)| k == CODEC_KEY)
                .map(|(_, v)| v.as_slice()),
        )?;

        let min_datum = schema.min_encoded_size(schema.root());
        let mut records = Vec::new();
        let mut block_counts = Vec::new();
        let mut packed = Vec::new();
        while !d.is_empty() {
            let count = d.read_len()?;
            let size = d.read_len()?;
            let block = d.read_slice(size)?;
            if d.read_slice(SYNC_SIZE)? != sync {
                return Err(CodecError::SyncMismatch {
                    block: block_counts.len(),
                });
            }

            let raw = codec.decompress(block)?;
            let limit = raw.len().checked_div(min_datum).unwrap_or(MAX_EMPTY_DATUMS);
            if count > limit {
                return Err(CodecError::BlockCount {
                    block: block_counts.len(),
                    count,
                    limit,
                });
            }
            if codec != BlockCodec::Null {
                packed.push(PackedBlock {
                    codec,
                    digest: Sha256::digest(&raw).to_vec(),
                    bytes: block.to_vec(),
                });
            }
            let mut bd = Decoder::new(&raw);
            for _ in 0..count {
                records.push(read_datum(&schema, schema.root(), &mut bd)?);
            }
            if !bd.is_empty() {
                return Err(CodecError::TrailingBytes(bd.remaining()));
            }
            block_counts.push(count);
        }

        Ok(Self {
            schema,
            metadata,
            sync,
            block_counts,
            packed,
            records,
        })
    }

    /// Encode the container. Blocks whose records encode exactly as they
    /// were read keep their original compressed bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let codec = self.codec()?;
        let mut out = Vec::with_capacity(self.approximate_size());
        out.extend_from_slice(&MAGIC);

        if !self.metadata.is_empty() {
            write_len(&mut out, self.metadata.len());
            for (key, value) in &self.metadata {
                write_bytes(&mut out, key.as_bytes());
                write_bytes(&mut out, value);
            }
        }
        write_long(&mut out, 0);
        out.extend_from_slice(&self.sync);

        // Original block boundaries survive unless records were added or removed
        let (counts, original) = if self.block_counts.iter().sum::<usize>() == self.records.len() {
            (self.block_counts.clone(), self.packed.as_slice())
        } else if self.records.is_empty() {
            (Vec::new(), &[][..])
        } else {
            (vec![self.records.len()], &[][..])
        };

        let mut records = self.records.iter();
        for (index, count) in counts.into_iter().enumerate() {
            let mut block = Vec::new();
            for record in records.by_ref().take(count) {
                write_datum(&self.schema, self.schema.root(), record, &mut block)?;
            }
            let block = match original.get(index) {
                Some(packed) if packed.holds(codec, &block) => packed.bytes.clone(),
                _ => codec.compress(block)?,
            };
            write_len(&mut out, count);
            write_len(&mut out, block.len());
            out.extend_from_slice(&block);
            out.extend_from_slice(&self.sync);
        }
        Ok(out)
    }

    fn approximate_size(&self) -> usize {
        let header: usize = self.metadata.iter().map(|(k, v)| k.len() + v.len() + 4).sum();
        header + 64 + self.records.len() * 256
    }

    #[must_use]
    pub fn schema(&self) -> &AvroSchema {
        &self.schema
    }

    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&[u8]> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    #[must_use]
    pub fn metadata_entries(&self) -> &[(String, Vec<u8>)] {
        &self.metadata
    }

    pub fn codec(&self) -> Result<BlockCodec> {
        BlockCodec::from_header(self.metadata(CODEC_KEY))
    }

    #[must_use]
    pub fn sync_marker(&self) -> &[u8; SYNC_SIZE] {
        &self.sync
    }

    #[must_use]
    pub fn block_counts(&self) -> &[usize] {
        &self.block_counts
    }

    #[must_use]
    pub fn records(&self) -> &[Value] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut Vec<Value> {
        &mut self.records
    }

    #[must_use]
    pub fn into_records(self) -> Vec<Value> {
        self.records
    }
}

/// Decode a container into its writer schema and records
pub fn decode(bytes: &[u8]) -> Result<(AvroSchema, Vec<Value>)> {
    let container = ManifestContainer::decode(bytes)?;
    Ok((container.schema.clone(), container.records))
}
