//! Avro object containers, the encoding of Iceberg manifest lists and manifests

mod binary;
mod container;
mod datum;
mod schema;
mod value;

pub use container::{BlockCodec, CODEC_KEY, MAGIC, ManifestContainer, SCHEMA_KEY, decode};
pub use schema::{AvroSchema, EnumSchema, Field, FixedSchema, RecordSchema, Schema};
pub use value::Value;
