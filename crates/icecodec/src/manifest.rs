// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Iceberg manifest lists and manifests on top of Avro containers

use crate::avro::{ManifestContainer, Value};
use crate::path_codec::PathRewrite;
use crate::{CodecError, Result};

/// Reserved field id of the `file_path` column in position delete files.
/// Manifest column bounds under this id hold data file paths.
pub const DELETE_FILE_PATH_FIELD_ID: i64 = 2_147_483_546;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestContent {
    Data,
    Deletes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Existing,
    Added,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataContent {
    Data,
    PositionDeletes,
    EqualityDeletes,
}

/// One row of a manifest list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestListEntry {
    pub manifest_path: String,
    pub manifest_length: i64,
    pub content: ManifestContent,
    pub added_snapshot_id: Option<i64>,
}

/// One row of a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub status: EntryStatus,
    pub content: DataContent,
    pub file_path: String,
    pub file_format: Option<String>,
    pub record_count: i64,
    pub file_size_in_bytes: i64,
    pub referenced_data_file: Option<String>,
}

impl ManifestEntry {
    /// Deleted entries record history only; their files may already be gone
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.status != EntryStatus::Deleted
    }
}

fn missing(field: &str, context: &'static str) -> CodecError {
    CodecError::MissingField {
        field: field.to_string(),
        context,
    }
}

pub fn read_manifest_list(container: &ManifestContainer) -> Result<Vec<ManifestListEntry>> {
    container
        .records()
        .iter()
        .map(|record| {
            let manifest_path = record
                .field("manifest_path")
                .and_then(Value::as_str)
                .ok_or_else(|| missing("manifest_path", "manifest list entry"))?;
            let manifest_length = record
                .field("manifest_length")
                .and_then(Value::as_long)
                .ok_or_else(|| missing("manifest_length", "manifest list entry"))?;
            // v1 manifest lists have no content column
            let content = match record.field("content").and_then(Value::as_long) {
                Some(1) => ManifestContent::Deletes,
                _ => ManifestContent::Data,
            };
            Ok(ManifestListEntry {
                manifest_path: manifest_path.to_string(),
                manifest_length,
                content,
                added_snapshot_id: record.field("added_snapshot_id").and_then(Value::as_long),
            })
        })
        .collect()
}

pub fn read_manifest(container: &ManifestContainer) -> Result<Vec<ManifestEntry>> {
    container
        .records()
        .iter()
        .map(|record| {
            let status = match record.field("status").and_then(Value::as_long) {
                Some(0) => EntryStatus::Existing,
                Some(1) => EntryStatus::Added,
                Some(2) => EntryStatus::Deleted,
                _ => return Err(missing("status", "manifest entry")),
            };
            let data_file = record
                .field("data_file")
                .ok_or_else(|| missing("data_file", "manifest entry"))?;
            let content = match data_file.field("content").and_then(Value::as_long) {
                Some(1) => DataContent::PositionDeletes,
                Some(2) => DataContent::EqualityDeletes,
                _ => DataContent::Data,
            };
            let file_path = data_file
                .field("file_path")
                .and_then(Value::as_str)
                .ok_or_else(|| missing("file_path", "data file"))?;
            Ok(ManifestEntry {
                status,
                content,
                file_path: file_path.to_string(),
                file_format: data_file
                    .field("file_format")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                record_count: data_file
                    .field("record_count")
                    .and_then(Value::as_long)
                    .unwrap_or_default(),
                file_size_in_bytes: data_file
                    .field("file_size_in_bytes")
                    .and_then(Value::as_long)
                    .ok_or_else(|| missing("file_size_in_bytes", "data file"))?,
                referenced_data_file: data_file
                    .field("referenced_data_file")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
        })
        .collect()
}

fn rewrite_string(value: &mut Value, rw: &dyn PathRewrite) -> Result<()> {
    if let Value::String(path) = value.unwrap_union_mut() {
        *path = rw.path(path)?;
    }
    Ok(())
}

/// Replace the long at `field` of `record` with `size`
fn set_size(record: &mut Value, field: &str, size: u64, context: &'static str) -> Result<()> {
    let value = record.field_mut(field).ok_or_else(|| missing(field, context))?;
    let size = i64::try_from(size).map_err(|_| CodecError::SchemaMismatch {
        expected: "file length within long range".to_string(),
        found: size.to_string(),
    })?;
    match value.unwrap_union_mut() {
        Value::Long(recorded) => {
            *recorded = size;
            Ok(())
        }
        other => Err(CodecError::SchemaMismatch {
            expected: format!("long {field}"),
            found: other.kind_name().to_string(),
        }),
    }
}

/// Recorded length for a rewritten path, if the rewrite knows a new one
fn resized(record: &Value, field: &str, rw: &dyn PathRewrite) -> Option<u64> {
    record.field(field).and_then(Value::as_str).and_then(|path| rw.size_of(path))
}

pub(crate) fn rewrite_manifest_list(
    container: &mut ManifestContainer,
    rw: &dyn PathRewrite,
) -> Result<()> {
    for record in container.records_mut() {
        let path = record
            .field_mut("manifest_path")
            .ok_or_else(|| missing("manifest_path", "manifest list entry"))?;
        rewrite_string(path, rw)?;
        if let Some(size) = resized(record, "manifest_path", rw) {
            set_size(record, "manifest_length", size, "manifest list entry")?;
        }
    }
    Ok(())
}

pub(crate) fn rewrite_manifest(container: &mut ManifestContainer, rw: &dyn PathRewrite) -> Result<()> {
    for record in container.records_mut() {
        let data_file = record
            .field_mut("data_file")
            .ok_or_else(|| missing("data_file", "manifest entry"))?;

        let path = data_file
            .field_mut("file_path")
            .ok_or_else(|| missing("file_path", "data file"))?;
        rewrite_string(path, rw)?;
        if let Some(size) = resized(data_file, "file_path", rw) {
            set_size(data_file, "file_size_in_bytes", size, "data file")?;
        }

        if let Some(referenced) = data_file.field_mut("referenced_data_file") {
            rewrite_string(referenced, rw)?;
        }
        for bounds in ["lower_bounds", "upper_bounds"] {
            if let Some(bounds) = data_file.field_mut(bounds) {
                rewrite_path_bounds(bounds, rw);
            }
        }
    }
    Ok(())
}

/// Bounds are an array of `{key, value}` records; only path bounds change.
/// A bound that is not a path under the location is left alone.
fn rewrite_path_bounds(bounds: &mut Value, rw: &dyn PathRewrite) {
    let Value::Array(pairs) = bounds.unwrap_union_mut() else {
        return;
    };
    for pair in pairs {
        if pair.field("key").and_then(Value::as_long) != Some(DELETE_FILE_PATH_FIELD_ID) {
            continue;
        }
        let Some(value) = pair.field_mut("value") else {
            continue;
        };
        if let Value::Bytes(raw) = value.unwrap_union_mut() {
            let rewritten = std::str::from_utf8(raw).ok().and_then(|p| rw.bound(p));
            if let Some(rewritten) = rewritten {
                *raw = rewritten.into_bytes();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_read_manifest_list() -> Result<()> {
        let bytes = fixtures::manifest_list(&[
            fixtures::manifest_list_record("s3://w/t/metadata/m1.avro", 4200, 7, false),
            fixtures::manifest_list_record("s3://w/t/metadata/m2.avro", 800, 7, true),
        ])?;
        let entries = read_manifest_list(&ManifestContainer::decode(&bytes)?)?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].manifest_path, "s3://w/t/metadata/m1.avro");
        assert_eq!(entries[0].manifest_length, 4200);
        assert_eq!(entries[0].content, ManifestContent::Data);
        assert_eq!(entries[1].content, ManifestContent::Deletes);
        assert_eq!(entries[1].added_snapshot_id, Some(7));
        Ok(())
    }

    #[test]
    fn test_read_manifest_statuses() -> Result<()> {
        let bytes = fixtures::manifest(&[
            fixtures::data_entry(1, "s3://w/t/data/a.parquet", 100, 10),
            fixtures::data_entry(2, "s3://w/t/data/gone.parquet", 50, 5),
            fixtures::position_delete_entry(
                "s3://w/t/data/d.parquet",
                30,
                "s3://w/t/data/a.parquet",
            ),
        ])?;
        let entries = read_manifest(&ManifestContainer::decode(&bytes)?)?;
        assert_eq!(entries[0].status, EntryStatus::Added);
        assert!(!entries[1].is_live());
        assert_eq!(entries[2].content, DataContent::PositionDeletes);
        assert_eq!(
            entries[2].referenced_data_file.as_deref(),
            Some("s3://w/t/data/a.parquet")
        );
        assert_eq!(entries[2].file_format.as_deref(), Some("PARQUET"));
        Ok(())
    }
}
