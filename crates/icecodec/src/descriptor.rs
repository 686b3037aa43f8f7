// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Root table descriptors (Iceberg `*.metadata.json`)
//!
//! Documents are rewritten through an order-preserving JSON tree with
//! arbitrary-precision numbers, so untouched members keep their order and
//! numeric spelling. Output is compact, which is how Iceberg writes it.

use serde_json::Value;

use crate::path_codec::PathRewrite;
use crate::{CodecError, Result};

/// Paths a descriptor refers to, as written
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorRefs {
    pub location: String,
    pub format_version: Option<i64>,
    pub current_snapshot_id: Option<i64>,
    /// `manifest-list` of every retained snapshot
    pub manifest_lists: Vec<String>,
    /// Manifests embedded in v1 snapshots that predate manifest lists
    pub snapshot_manifests: Vec<String>,
    /// Previous descriptors from `metadata-log`
    pub metadata_log: Vec<String>,
    /// Table and partition statistics files
    pub statistics_files: Vec<String>,
}

fn invalid(message: impl Into<String>) -> CodecError {
    CodecError::Descriptor(message.into())
}

fn members<'a>(doc: &'a Value, key: &str) -> Result<&'a [Value]> {
    match doc.get(key) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(invalid(format!("'{key}' is not an array"))),
    }
}

fn strings(doc: &Value, array: &str, field: &str) -> Result<Vec<String>> {
    members(doc, array)?
        .iter()
        .filter_map(|item| item.get(field))
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid(format!("'{array}[].{field}' is not a string")))
        })
        .collect()
}

pub fn read_descriptor(bytes: &[u8]) -> Result<DescriptorRefs> {
    let doc: Value = serde_json::from_slice(bytes)?;
    if !doc.is_object() {
        return Err(invalid("root descriptor is not a JSON object"));
    }
    let location = doc
        .get("location")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing 'location'"))?
        .to_string();

    let mut snapshot_manifests = Vec::new();
    for snapshot in members(&doc, "snapshots")? {
        for manifest in members(snapshot, "manifests")? {
            let path = manifest
                .as_str()
                .ok_or_else(|| invalid("'snapshots[].manifests[]' is not a string"))?;
            snapshot_manifests.push(path.to_string());
        }
    }

    let mut statistics_files = strings(&doc, "statistics", "statistics-path")?;
    statistics_files.extend(strings(&doc, "partition-statistics", "statistics-path")?);

    Ok(DescriptorRefs {
        location,
        format_version: doc.get("format-version").and_then(Value::as_i64),
        current_snapshot_id: doc
            .get("current-snapshot-id")
            .and_then(Value::as_i64)
            .filter(|id| *id >= 0),
        manifest_lists: strings(&doc, "snapshots", "manifest-list")?,
        snapshot_manifests,
        metadata_log: strings(&doc, "metadata-log", "metadata-file")?,
        statistics_files,
    })
}

fn rewrite_member(node: &mut Value, key: &str, rw: &dyn PathRewrite) -> Result<()> {
    if let Some(value) = node.get_mut(key) {
        let rewritten = match value {
            Value::String(path) => rw.path(path)?,
            _ => return Err(invalid(format!("'{key}' is not a string"))),
        };
        *value = Value::String(rewritten);
    }
    Ok(())
}

fn rewrite_array(doc: &mut Value, array: &str, field: &str, rw: &dyn PathRewrite) -> Result<()> {
    match doc.get_mut(array) {
        None | Some(Value::Null) => Ok(()),
        Some(Value::Array(items)) => {
            for item in items {
                rewrite_member(item, field, rw)?;
            }
            Ok(())
        }
        Some(_) => Err(invalid(format!("'{array}' is not an array"))),
    }
}

pub(crate) fn rewrite_descriptor(bytes: &[u8], rw: &dyn PathRewrite) -> Result<Vec<u8>> {
    let mut doc: Value = serde_json::from_slice(bytes)?;
    let root = doc
        .as_object_mut()
        .ok_or_else(|| invalid("root descriptor is not a JSON object"))?;

    match root.get_mut("location") {
        Some(Value::String(location)) => *location = rw.location_value(),
        Some(_) => return Err(invalid("'location' is not a string")),
        None => return Err(invalid("missing 'location'")),
    }

    rewrite_array(&mut doc, "snapshots", "manifest-list", rw)?;
    if let Some(Value::Array(snapshots)) = doc.get_mut("snapshots") {
        for snapshot in snapshots {
            if let Some(Value::Array(manifests)) = snapshot.get_mut("manifests") {
                for manifest in manifests {
                    if let Value::String(path) = manifest {
                        *path = rw.path(path)?;
                    }
                }
            }
        }
    }
    rewrite_array(&mut doc, "metadata-log", "metadata-file", rw)?;
    rewrite_array(&mut doc, "statistics", "statistics-path", rw)?;
    rewrite_array(&mut doc, "partition-statistics", "statistics-path", rw)?;

    Ok(serde_json::to_vec(&doc)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::path_codec::{PathCodec, PayloadKind};

    const LOC: &str = "s3://warehouse/db/orders";

    #[test]
    fn test_read_descriptor_refs() -> Result<()> {
        let json = fixtures::descriptor(
            LOC,
            &[
                (1, format!("{LOC}/metadata/snap-1.avro")),
                (2, format!("{LOC}/metadata/snap-2.avro")),
            ],
            &[format!("{LOC}/metadata/00000-a.metadata.json")],
        );
        let refs = read_descriptor(json.as_bytes())?;
        assert_eq!(refs.location, LOC);
        assert_eq!(refs.format_version, Some(2));
        assert_eq!(refs.current_snapshot_id, Some(2));
        assert_eq!(refs.manifest_lists.len(), 2);
        assert_eq!(refs.metadata_log.len(), 1);
        Ok(())
    }

    #[test]
    fn test_descriptor_round_trip_is_byte_identical() -> Result<()> {
        let codec = PathCodec::default();
        let json = fixtures::descriptor(
            LOC,
            &[(42, format!("{LOC}/metadata/snap-42.avro"))],
            &[format!("{LOC}/metadata/00000-a.metadata.json")],
        );

        let abstracted = codec.abstract_payload(PayloadKind::RootDescriptor, json.as_bytes(), LOC)?;
        let refs = read_descriptor(&abstracted)?;
        assert_eq!(refs.location, "");
        assert_eq!(refs.manifest_lists, vec!["metadata/snap-42.avro".to_string()]);

        let restored = codec.restore_payload(PayloadKind::RootDescriptor, &abstracted, LOC)?;
        assert_eq!(restored, json.into_bytes());
        Ok(())
    }

    #[test]
    fn test_large_numbers_and_member_order_survive() -> Result<()> {
        let codec = PathCodec::default();
        let json = format!(
            r#"{{"format-version":2,"table-uuid":"u","location":"{LOC}","last-updated-ms":1718000000000,"z-first":1,"a-second":12345678901234567890123,"snapshots":[]}}"#
        );
        let abstracted = codec.abstract_payload(PayloadKind::RootDescriptor, json.as_bytes(), LOC)?;
        let restored = codec.restore_payload(PayloadKind::RootDescriptor, &abstracted, LOC)?;
        assert_eq!(String::from_utf8_lossy(&restored), json);
        Ok(())
    }

    #[test]
    fn test_v1_embedded_manifests() -> Result<()> {
        let json = format!(
            r#"{{"format-version":1,"location":"{LOC}","snapshots":[{{"snapshot-id":1,"manifests":["{LOC}/metadata/m1.avro"]}}]}}"#
        );
        let refs = read_descriptor(json.as_bytes())?;
        assert_eq!(refs.snapshot_manifests, vec![format!("{LOC}/metadata/m1.avro")]);

        let abstracted =
            PathCodec::default().abstract_payload(PayloadKind::RootDescriptor, json.as_bytes(), LOC)?;
        let refs = read_descriptor(&abstracted)?;
        assert_eq!(refs.snapshot_manifests, vec!["metadata/m1.avro".to_string()]);
        Ok(())
    }

    #[test]
    fn test_missing_location_is_error() {
        let result = PathCodec::default().abstract_payload(
            PayloadKind::RootDescriptor,
            br#"{"format-version":2}"#,
            LOC,
        );
        assert!(matches!(result, Err(CodecError::Descriptor(_))));
    }
}
