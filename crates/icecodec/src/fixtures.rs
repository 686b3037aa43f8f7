// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Iceberg v2 shaped payloads for tests
//!
//! Builders here produce metadata the way Iceberg writers lay it out, with
//! paths supplied by the caller, so tests can assemble whole tables.

use std::sync::Arc;

use arrow_array::{ArrayRef, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use parquet::arrow::ArrowWriter;
use serde_json::json;

use crate::Result;
use crate::avro::{ManifestContainer, Value};
use crate::manifest::DELETE_FILE_PATH_FIELD_ID;

pub const MANIFEST_LIST_SCHEMA: &str = r#"{"type":"record","name":"manifest_file","fields":[{"name":"manifest_path","type":"string","field-id":500},{"name":"manifest_length","type":"long","field-id":501},{"name":"partition_spec_id","type":"int","field-id":502},{"name":"content","type":"int","field-id":517},{"name":"sequence_number","type":"long","field-id":515},{"name":"min_sequence_number","type":"long","field-id":516},{"name":"added_snapshot_id","type":"long","field-id":503},{"name":"added_files_count","type":"int","field-id":504},{"name":"existing_files_count","type":"int","field-id":505},{"name":"deleted_files_count","type":"int","field-id":506},{"name":"added_rows_count","type":"long","field-id":512},{"name":"existing_rows_count","type":"long","field-id":513},{"name":"deleted_rows_count","type":"long","field-id":514},{"name":"partitions","type":["null",{"type":"array","items":{"type":"record","name":"r508","fields":[{"name":"contains_null","type":"boolean","field-id":509},{"name":"contains_nan","type":["null","boolean"],"field-id":518,"default":null},{"name":"lower_bound","type":["null","bytes"],"field-id":510,"default":null},{"name":"upper_bound","type":["null","bytes"],"field-id":511,"default":null}]},"element-id":508}],"default":null,"field-id":507},{"name":"key_metadata","type":["null","bytes"],"default":null,"field-id":519}]}"#;

pub const MANIFEST_ENTRY_SCHEMA: &str = r#"{"type":"record","name":"manifest_entry","fields":[{"name":"status","type":"int","field-id":0},{"name":"snapshot_id","type":["null","long"],"default":null,"field-id":1},{"name":"sequence_number","type":["null","long"],"default":null,"field-id":3},{"name":"file_sequence_number","type":["null","long"],"default":null,"field-id":4},{"name":"data_file","type":{"type":"record","name":"r2","fields":[{"name":"content","type":"int","field-id":134},{"name":"file_path","type":"string","field-id":100},{"name":"file_format","type":"string","field-id":101},{"name":"partition","type":{"type":"record","name":"r102","fields":[]},"field-id":102},{"name":"record_count","type":"long","field-id":103},{"name":"file_size_in_bytes","type":"long","field-id":104},{"name":"column_sizes","type":["null",{"type":"array","items":{"type":"record","name":"k117_v118","fields":[{"name":"key","type":"int","field-id":117},{"name":"value","type":"long","field-id":118}]},"logicalType":"map"}],"default":null,"field-id":108},{"name":"lower_bounds","type":["null",{"type":"array","items":{"type":"record","name":"k126_v127","fields":[{"name":"key","type":"int","field-id":126},{"name":"value","type":"bytes","field-id":127}]},"logicalType":"map"}],"default":null,"field-id":125},{"name":"upper_bounds","type":["null",{"type":"array","items":{"type":"record","name":"k129_v130","fields":[{"name":"key","type":"int","field-id":129},{"name":"value","type":"bytes","field-id":130}]},"logicalType":"map"}],"default":null,"field-id":128},{"name":"key_metadata","type":["null","bytes"],"default":null,"field-id":131},{"name":"split_offsets","type":["null",{"type":"array","items":"long","element-id":133}],"default":null,"field-id":132},{"name":"sort_order_id","type":["null","int"],"default":null,"field-id":140},{"name":"referenced_data_file","type":["null","string"],"default":null,"field-id":143}]},"field-id":2}]}"#;

fn null() -> Value {
    Value::Union(0, Box::new(Value::Null))
}

fn some(value: Value) -> Value {
    Value::Union(1, Box::new(value))
}

fn field(name: &str, value: Value) -> (String, Value) {
    (name.to_string(), value)
}

/// One manifest list row
#[must_use]
pub fn manifest_list_record(path: &str, length: i64, snapshot_id: i64, deletes: bool) -> Value {
    Value::Record(vec![
        field("manifest_path", Value::String(path.to_string())),
        field("manifest_length", Value::Long(length)),
        field("partition_spec_id", Value::Int(0)),
        field("content", Value::Int(i32::from(deletes))),
        field("sequence_number", Value::Long(snapshot_id)),
        field("min_sequence_number", Value::Long(snapshot_id)),
        field("added_snapshot_id", Value::Long(snapshot_id)),
        field("added_files_count", Value::Int(1)),
        field("existing_files_count", Value::Int(0)),
        field("deleted_files_count", Value::Int(0)),
        field("added_rows_count", Value::Long(10)),
        field("existing_rows_count", Value::Long(0)),
        field("deleted_rows_count", Value::Long(0)),
        field("partitions", some(Value::Array(vec![]))),
        field("key_metadata", null()),
    ])
}

fn path_bounds(referenced: &str) -> Value {
    some(Value::Array(vec![Value::Record(vec![
        field(
            "key",
            Value::Int(i32::try_from(DELETE_FILE_PATH_FIELD_ID).unwrap_or(i32::MAX)),
        ),
        field("value", Value::Bytes(referenced.as_bytes().to_vec())),
    ])]))
}

fn entry(
    status: i32,
    content: i32,
    path: &str,
    size: i64,
    records: i64,
    referenced: Option<&str>,
) -> Value {
    let (bounds, referenced) = match referenced {
        Some(r) => (
            (path_bounds(r), path_bounds(r)),
            some(Value::String(r.to_string())),
        ),
        None => ((null(), null()), null()),
    };
    Value::Record(vec![
        field("status", Value::Int(status)),
        field("snapshot_id", some(Value::Long(1))),
        field("sequence_number", some(Value::Long(1))),
        field("file_sequence_number", some(Value::Long(1))),
        field(
            "data_file",
            Value::Record(vec![
                field("content", Value::Int(content)),
                field("file_path", Value::String(path.to_string())),
                field("file_format", Value::String("PARQUET".to_string())),
                field("partition", Value::Record(vec![])),
                field("record_count", Value::Long(records)),
                field("file_size_in_bytes", Value::Long(size)),
                field(
                    "column_sizes",
                    some(Value::Array(vec![Value::Record(vec![
                        field("key", Value::Int(1)),
                        field("value", Value::Long(size / 2)),
                    ])])),
                ),
                field("lower_bounds", bounds.0),
                field("upper_bounds", bounds.1),
                field("key_metadata", null()),
                field("split_offsets", some(Value::Array(vec![Value::Long(4)]))),
                field("sort_order_id", some(Value::Int(0))),
                field("referenced_data_file", referenced),
            ]),
        ),
    ])
}

/// Manifest row for a data file; status 0 existing, 1 added, 2 deleted
#[must_use]
pub fn data_entry(status: i32, path: &str, size: i64, records: i64) -> Value {
    entry(status, 0, path, size, records, None)
}

/// Added position delete file targeting one data file
#[must_use]
pub fn position_delete_entry(path: &str, size: i64, referenced: &str) -> Value {
    entry(1, 1, path, size, 1, Some(referenced))
}

pub fn manifest_list(records: &[Value]) -> Result<Vec<u8>> {
    ManifestContainer::new(MANIFEST_LIST_SCHEMA, records.to_vec())?
        .with_metadata("format-version", "2")
        .encode()
}

pub fn manifest(entries: &[Value]) -> Result<Vec<u8>> {
    ManifestContainer::new(MANIFEST_ENTRY_SCHEMA, entries.to_vec())?
        .with_metadata("format-version", "2")
        .with_metadata("partition-spec-id", "0")
        .with_metadata("content", "data")
        .encode()
}

/// Parquet position delete file with the given `(file_path, pos)` rows
pub fn position_deletes(rows: &[(String, i64)]) -> Result<Vec<u8>> {
    let field_id = |id: i64| {
        [("PARQUET:field_id".to_string(), id.to_string())]
            .into_iter()
            .collect()
    };
    let schema = Arc::new(Schema::new(vec![
        Field::new("file_path", DataType::Utf8, false)
            .with_metadata(field_id(DELETE_FILE_PATH_FIELD_ID)),
        Field::new("pos", DataType::Int64, false)
            .with_metadata(field_id(DELETE_FILE_PATH_FIELD_ID - 1)),
    ]));
    let paths: ArrayRef = Arc::new(StringArray::from(
        rows.iter().map(|(p, _)| p.as_str()).collect::<Vec<_>>(),
    ));
    let positions: ArrayRef = Arc::new(Int64Array::from(
        rows.iter().map(|(_, pos)| *pos).collect::<Vec<_>>(),
    ));
    let batch = RecordBatch::try_new(schema.clone(), vec![paths, positions])?;

    let mut out = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut out, schema, None)?;
    writer.write(&batch)?;
    _ = writer.close()?;
    Ok(out)
}

/// Compact v2 table metadata with one snapshot per `(id, manifest list)`
#[must_use]
pub fn descriptor(location: &str, snapshots: &[(i64, String)], metadata_log: &[String]) -> String {
    let snapshot_docs: Vec<_> = snapshots
        .iter()
        .enumerate()
        .map(|(i, (id, list))| {
            json!({
                "snapshot-id": id,
                "sequence-number": i + 1,
                "timestamp-ms": 1_718_000_000_000_i64 + *id,
                "summary": {"operation": "append"},
                "manifest-list": list,
                "schema-id": 0
            })
        })
        .collect();
    let log_docs: Vec<_> = metadata_log
        .iter()
        .enumerate()
        .map(|(i, file)| json!({"timestamp-ms": 1_717_000_000_000_i64 + i as i64, "metadata-file": file}))
        .collect();
    let current = snapshots.last().map_or(-1, |(id, _)| *id);

    json!({
        "format-version": 2,
        "table-uuid": "9c12d441-03fe-4693-9a96-a0705ddf69c1",
        "location": location,
        "last-sequence-number": snapshots.len(),
        "last-updated-ms": 1_718_000_000_000_i64,
        "last-column-id": 2,
        "current-schema-id": 0,
        "schemas": [{"type": "struct", "schema-id": 0, "fields": [
            {"id": 1, "name": "id", "required": true, "type": "long"},
            {"id": 2, "name": "note", "required": false, "type": "string"}
        ]}],
        "default-spec-id": 0,
        "partition-specs": [{"spec-id": 0, "fields": []}],
        "last-partition-id": 999,
        "default-sort-order-id": 0,
        "sort-orders": [{"order-id": 0, "fields": []}],
        "properties": {},
        "current-snapshot-id": current,
        "snapshots": snapshot_docs,
        "metadata-log": log_docs
    })
    .to_string()
}
