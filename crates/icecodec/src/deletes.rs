// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Position delete files name the data files they apply to, so their
//! `file_path` column moves with the table.

use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::{ArrayRef, GenericStringArray, OffsetSizeTrait, RecordBatch};
use arrow_schema::DataType;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;

use crate::path_codec::PathRewrite;
use crate::{CodecError, Result};

pub const FILE_PATH_COLUMN: &str = "file_path";

/// Rewrite the `file_path` column of a position delete file.
///
/// Rows, their order and every other column are kept; the output is
/// re-encoded with ZSTD, so equality holds per row rather than per byte.
pub(crate) fn rewrite_position_deletes(bytes: &[u8], rw: &dyn PathRewrite) -> Result<Vec<u8>> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::copy_from_slice(bytes))?;
    let schema = builder.schema().clone();
    let column = schema
        .index_of(FILE_PATH_COLUMN)
        .map_err(|_| CodecError::MissingField {
            field: FILE_PATH_COLUMN.to_string(),
            context: "position delete file",
        })?;

    let mut batches = Vec::new();
    for batch in builder.build()? {
        batches.push(rewrite_batch(batch?, column, rw)?);
    }

    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::default()))
        .build();
    let mut out = Vec::with_capacity(bytes.len());
    let mut writer = ArrowWriter::try_new(&mut out, schema, Some(props))?;
    for batch in &batches {
        writer.write(batch)?;
    }
    _ = writer.close()?;
    Ok(out)
}

fn rewrite_batch(batch: RecordBatch, column: usize, rw: &dyn PathRewrite) -> Result<RecordBatch> {
    let array = batch.column(column);
    let rewritten: ArrayRef = match array.data_type() {
        DataType::Utf8 => Arc::new(rewrite_strings(array.as_string::<i32>(), rw)?),
        DataType::LargeUtf8 => Arc::new(rewrite_strings(array.as_string::<i64>(), rw)?),
        other => {
            return Err(CodecError::SchemaMismatch {
                expected: "string file_path column".to_string(),
                found: other.to_string(),
            });
        }
    };
    let mut columns = batch.columns().to_vec();
    columns[column] = rewritten;
    Ok(RecordBatch::try_new(batch.schema(), columns)?)
}

fn rewrite_strings<O: OffsetSizeTrait>(
    array: &GenericStringArray<O>,
    rw: &dyn PathRewrite,
) -> Result<GenericStringArray<O>> {
    let paths = array
        .iter()
        .map(|path| path.map(|p| rw.path(p)).transpose())
        .collect::<Result<Vec<Option<String>>>>()?;
    Ok(GenericStringArray::<O>::from(paths))
}
