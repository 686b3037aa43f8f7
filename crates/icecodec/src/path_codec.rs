// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Location-independent table metadata
//!
//! Backups store every metadata payload with paths relative to the table
//! location; restore re-anchors them at the target location. For any
//! payload `p` whose paths all lie under `L`:
//! `restore_payload(abstract_payload(p, L), L)` reproduces `p`.
//!
//! Re-encoding a position delete file or a manifest changes its length, and
//! the parent manifest or manifest list records that length. Restores write
//! children first and hand their lengths to [`PathCodec::restore_payload_sized`]
//! so the parent records what was actually written.

use std::collections::HashMap;

use crate::avro::ManifestContainer;
use crate::location::{SchemePolicy, TableLocation, is_absolute};
use crate::{CodecError, Result, deletes, descriptor, manifest};

/// What a payload is, which decides how its paths are found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// JSON table metadata file
    RootDescriptor,
    /// Avro manifest list (`snap-*.avro`)
    ManifestList,
    /// Avro manifest
    ManifestFile,
    /// Parquet position delete file, whose rows name data files
    PositionDeletes,
    /// Anything else, copied unchanged
    Opaque,
}

impl PayloadKind {
    #[must_use]
    pub fn is_metadata(self) -> bool {
        !matches!(self, Self::Opaque)
    }
}

/// Byte lengths of restored files, keyed by their restored path
pub type RestoredSizes = HashMap<String, u64>;

/// Direction-specific rewriting applied while walking a payload
pub(crate) trait PathRewrite {
    fn path(&self, path: &str) -> Result<String>;

    /// Length to record for the file at rewritten `path`; `None` keeps the
    /// recorded length
    fn size_of(&self, _path: &str) -> Option<u64> {
        None
    }

    /// Rewrite a column bound that may hold a path; `None` keeps the bound
    fn bound(&self, value: &str) -> Option<String>;

    /// Replacement for the descriptor's `location` field
    fn location_value(&self) -> String;
}

struct Abstraction {
    location: TableLocation,
}

impl PathRewrite for Abstraction {
    fn path(&self, path: &str) -> Result<String> {
        if !is_absolute(path) {
            return Ok(path.to_string());
        }
        self.location
            .relativize(path)
            .ok_or_else(|| CodecError::PathOutsideLocation {
                path: path.to_string(),
                location: self.location.to_string(),
            })
    }

    fn bound(&self, value: &str) -> Option<String> {
        self.location.relativize(value)
    }

    fn location_value(&self) -> String {
        String::new()
    }
}

struct Restoration<'a> {
    location: TableLocation,
    policy: SchemePolicy,
    sizes: Option<&'a RestoredSizes>,
}

impl PathRewrite for Restoration<'_> {
    fn path(&self, path: &str) -> Result<String> {
        if is_absolute(path) {
            return Ok(path.to_string());
        }
        Ok(self.location.join(path, self.policy))
    }

    fn bound(&self, value: &str) -> Option<String> {
        (!is_absolute(value)).then(|| self.location.join(value, self.policy))
    }

    fn size_of(&self, path: &str) -> Option<u64> {
        self.sizes.and_then(|sizes| sizes.get(path).copied())
    }

    fn location_value(&self) -> String {
        self.location.spelled(self.policy).into_owned()
    }
}

/// Rewrites table metadata between absolute and location-relative form
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathCodec {
    policy: SchemePolicy,
}

impl PathCodec {
    #[must_use]
    pub fn new(policy: SchemePolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> SchemePolicy {
        self.policy
    }

    /// Express `path` relative to `location`.
    ///
    /// Paths without a scheme or leading slash are taken as already
    /// relative. Absolute paths outside the location are an error.
    pub fn abstract_path(&self, path: &str, location: &str) -> Result<String> {
        let rw = Abstraction {
            location: TableLocation::parse(location)?,
        };
        rw.path(path)
    }

    /// Anchor a relative path at `location`; absolute paths are unchanged
    pub fn restore_path(&self, path: &str, location: &str) -> Result<String> {
        let rw = Restoration {
            location: TableLocation::parse(location)?,
            policy: self.policy,
            sizes: None,
        };
        rw.path(path)
    }

    pub fn abstract_payload(&self, kind: PayloadKind, payload: &[u8], location: &str) -> Result<Vec<u8>> {
        let rw = Abstraction {
            location: TableLocation::parse(location)?,
        };
        rewrite(kind, payload, &rw)
    }

    pub fn restore_payload(&self, kind: PayloadKind, payload: &[u8], location: &str) -> Result<Vec<u8>> {
        let rw = Restoration {
            location: TableLocation::parse(location)?,
            policy: self.policy,
            sizes: None,
        };
        rewrite(kind, payload, &rw)
    }

    /// [`Self::restore_payload`], also recording the lengths in `sizes` for
    /// the manifests and data or delete files the payload names
    pub fn restore_payload_sized(
        &self,
        kind: PayloadKind,
        payload: &[u8],
        location: &str,
        sizes: &RestoredSizes,
    ) -> Result<Vec<u8>> {
        let rw = Restoration {
            location: TableLocation::parse(location)?,
            policy: self.policy,
            sizes: Some(sizes),
        };
        rewrite(kind, payload, &rw)
    }
}

fn rewrite(kind: PayloadKind, payload: &[u8], rw: &dyn PathRewrite) -> Result<Vec<u8>> {
    match kind {
        PayloadKind::RootDescriptor => descriptor::rewrite_descriptor(payload, rw),
        PayloadKind::ManifestList => {
            let mut container = ManifestContainer::decode(payload)?;
            manifest::rewrite_manifest_list(&mut container, rw)?;
            container.encode()
        }
        PayloadKind::ManifestFile => {
            let mut container = ManifestContainer::decode(payload)?;
            manifest::rewrite_manifest(&mut container, rw)?;
            container.encode()
        }
        PayloadKind::PositionDeletes => deletes::rewrite_position_deletes(payload, rw),
        PayloadKind::Opaque => Ok(payload.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avro::{ManifestContainer, Value};
    use crate::fixtures;
    use crate::manifest::{read_manifest, read_manifest_list};

    const LOC: &str = "s3://warehouse/db/orders";

    #[test]
    fn test_path_round_trip() -> Result<()> {
        let codec = PathCodec::default();
        let abs = "s3://warehouse/db/orders/data/part-0.parquet";
        let rel = codec.abstract_path(abs, LOC)?;
        assert_eq!(rel, "data/part-0.parquet");
        assert_eq!(codec.restore_path(&rel, LOC)?, abs);
        assert_eq!(
            codec.restore_path(&rel, "s3://restore/orders")?,
            "s3://restore/orders/data/part-0.parquet"
        );
        Ok(())
    }

    #[test]
    fn test_relative_and_absolute_passthrough() -> Result<()> {
        let codec = PathCodec::default();
        assert_eq!(codec.abstract_path("data/a.parquet", LOC)?, "data/a.parquet");
        assert_eq!(
            codec.restore_path("s3://elsewhere/a.parquet", LOC)?,
            "s3://elsewhere/a.parquet"
        );
        Ok(())
    }

    #[test]
    fn test_path_outside_location_rejected() {
        let codec = PathCodec::default();
        let result = codec.abstract_path("s3://other-bucket/data/a.parquet", LOC);
        assert!(matches!(result, Err(CodecError::PathOutsideLocation { .. })));
    }

    #[test]
    fn test_canonical_policy_rewrites_alias() -> Result<()> {
        let codec = PathCodec::new(SchemePolicy::Canonical);
        assert_eq!(
            codec.restore_path("data/a.parquet", "s3a://restore/orders")?,
            "s3://restore/orders/data/a.parquet"
        );
        Ok(())
    }

    #[test]
    fn test_manifest_list_round_trip_is_byte_identical() -> Result<()> {
        let codec = PathCodec::default();
        let original = fixtures::manifest_list(&[
            fixtures::manifest_list_record(&format!("{LOC}/metadata/m-1.avro"), 5120, 11, false),
            fixtures::manifest_list_record(&format!("{LOC}/metadata/m-2.avro"), 2048, 12, true),
        ])?;

        let abstracted = codec.abstract_payload(PayloadKind::ManifestList, &original, LOC)?;
        let entries = read_manifest_list(&ManifestContainer::decode(&abstracted)?)?;
        assert_eq!(entries[0].manifest_path, "metadata/m-1.avro");

        let restored = codec.restore_payload(PayloadKind::ManifestList, &abstracted, LOC)?;
        assert_eq!(restored, original);
        Ok(())
    }

    #[test]
    fn test_manifest_round_trip_rewrites_bounds() -> Result<()> {
        let codec = PathCodec::default();
        let data = format!("{LOC}/data/a.parquet");
        let original = fixtures::manifest(&[
            fixtures::data_entry(1, &data, 100, 10),
            fixtures::position_delete_entry(&format!("{LOC}/data/del-1.parquet"), 40, &data),
        ])?;

        let abstracted = codec.abstract_payload(PayloadKind::ManifestFile, &original, LOC)?;
        let container = ManifestContainer::decode(&abstracted)?;
        let entries = read_manifest(&container)?;
        assert_eq!(entries[0].file_path, "data/a.parquet");
        assert_eq!(entries[1].referenced_data_file.as_deref(), Some("data/a.parquet"));

        let lower = container.records()[1]
            .field("data_file")
            .and_then(|f| f.field("lower_bounds"))
            .and_then(Value::non_null)
            .cloned();
        let Some(Value::Array(pairs)) = lower else {
            panic!("expected lower bounds");
        };
        assert_eq!(
            pairs[0].field("value").and_then(Value::as_bytes),
            Some(&b"data/a.parquet"[..])
        );

        let moved = codec.restore_payload(PayloadKind::ManifestFile, &abstracted, "s3://dr/orders")?;
        let entries = read_manifest(&ManifestContainer::decode(&moved)?)?;
        assert_eq!(entries[0].file_path, "s3://dr/orders/data/a.parquet");

        let restored = codec.restore_payload(PayloadKind::ManifestFile, &abstracted, LOC)?;
        assert_eq!(restored, original);
        Ok(())
    }

    #[test]
    fn test_restore_records_rewritten_lengths() -> Result<()> {
        let codec = PathCodec::default();
        let data = format!("{LOC}/data/a.parquet");
        let manifest = fixtures::manifest(&[
            fixtures::data_entry(1, &data, 100, 10),
            fixtures::position_delete_entry(&format!("{LOC}/data/del-1.parquet"), 40, &data),
        ])?;
        let list = fixtures::manifest_list(&[fixtures::manifest_list_record(
            &format!("{LOC}/metadata/m-1.avro"),
            manifest.len() as i64,
            1,
            false,
        )])?;
        let manifest = codec.abstract_payload(PayloadKind::ManifestFile, &manifest, LOC)?;
        let list = codec.abstract_payload(PayloadKind::ManifestList, &list, LOC)?;

        let target = "s3://dr-bucket/restored/orders";
        let sizes = RestoredSizes::from([
            (format!("{target}/data/del-1.parquet"), 57),
            (format!("{target}/metadata/m-1.avro"), 4321),
        ]);

        let restored = codec.restore_payload_sized(PayloadKind::ManifestFile, &manifest, target, &sizes)?;
        let entries = read_manifest(&ManifestContainer::decode(&restored)?)?;
        assert_eq!(entries[0].file_size_in_bytes, 100);
        assert_eq!(entries[1].file_path, format!("{target}/data/del-1.parquet"));
        assert_eq!(entries[1].file_size_in_bytes, 57);

        let restored = codec.restore_payload_sized(PayloadKind::ManifestList, &list, target, &sizes)?;
        let entries = read_manifest_list(&ManifestContainer::decode(&restored)?)?;
        assert_eq!(entries[0].manifest_length, 4321);
        Ok(())
    }

    #[test]
    fn test_opaque_unchanged() -> Result<()> {
        let codec = PathCodec::default();
        let payload = b"puffin bytes".to_vec();
        assert_eq!(codec.abstract_payload(PayloadKind::Opaque, &payload, LOC)?, payload);
        Ok(())
    }
}
