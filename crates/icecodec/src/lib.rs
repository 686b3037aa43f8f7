// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Iceberg table metadata codecs
//!
//! - [`avro`]: object container files (manifest lists and manifests)
//! - [`descriptor`]: root `metadata.json` documents
//! - [`path_codec`]: rewriting every embedded path between absolute and
//!   location-relative form, which is what makes a backup relocatable

pub mod avro;
mod deletes;
pub mod descriptor;
mod error;
pub mod location;
pub mod manifest;
pub mod path_codec;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use deletes::FILE_PATH_COLUMN;
pub use descriptor::{DescriptorRefs, read_descriptor};
pub use error::CodecError;
pub use location::{SchemePolicy, TableLocation, canonicalize};
pub use manifest::{
    DataContent, EntryStatus, ManifestContent, ManifestEntry, ManifestListEntry, read_manifest,
    read_manifest_list,
};
pub use path_codec::{PathCodec, PayloadKind, RestoredSizes};

pub type Result<T> = std::result::Result<T, CodecError>;
