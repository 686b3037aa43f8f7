//! Schema-directed reading and writing of single datums

use super::binary::{Decoder, write_bytes, write_len, write_long};
use super::schema::{AvroSchema, Schema};
use super::value::Value;
use crate::{CodecError, Result};

pub(crate) fn read_datum(schema: &AvroSchema, node: &Schema, d: &mut Decoder<'_>) -> Result<Value> {
    let node = schema.resolve(node)?;
    Ok(match node {
        Schema::Null => Value::Null,
        Schema::Boolean => Value::Boolean(d.read_bool()?),
        Schema::Int => Value::Int(d.read_int()?),
        Schema::Long => Value::Long(d.read_long()?),
        Schema::Float => Value::Float(d.read_f32()?),
        Schema::Double => Value::Double(d.read_f64()?),
        Schema::Bytes => Value::Bytes(d.read_bytes()?.to_vec()),
        Schema::String => Value::String(String::from_utf8(d.read_bytes()?.to_vec())?),
        Schema::Fixed(fixed) => Value::Fixed(d.read_slice(fixed.size)?.to_vec()),
        Schema::Enum(e) => {
            let index = d.read_long()?;
            let symbol = usize::try_from(index)
                .ok()
                .and_then(|i| e.symbols.get(i))
                .ok_or_else(|| CodecError::EnumIndex {
                    name: e.name.clone(),
                    index,
                })?;
            Value::Enum(u32::try_from(index).unwrap_or(u32::MAX), symbol.clone())
        }
        Schema::Union(branches) => {
            let index = d.read_long()?;
            let branch = usize::try_from(index)
                .ok()
                .and_then(|i| branches.get(i))
                .ok_or(CodecError::UnionBranch {
                    index,
                    branches: branches.len(),
                })?;
            Value::Union(
                u32::try_from(index).unwrap_or(u32::MAX),
                Box::new(read_datum(schema, branch, d)?),
            )
        }
        Schema::Array(items) => {
            let mut values = Vec::new();
            read_blocks(d, |d| {
                values.push(read_datum(schema, items, d)?);
                Ok(())
            })?;
            Value::Array(values)
        }
        Schema::Map(item) => {
            let mut entries = Vec::new();
            read_blocks(d, |d| {
                let key = String::from_utf8(d.read_bytes()?.to_vec())?;
                entries.push((key, read_datum(schema, item, d)?));
                Ok(())
            })?;
            Value::Map(entries)
        }
        Schema::Record(record) => {
            let mut fields = Vec::with_capacity(record.fields.len());
            for field in &record.fields {
                fields.push((field.name.clone(), read_datum(schema, &field.schema, d)?));
            }
            Value::Record(fields)
        }
        Schema::Named(name) => {
            return Err(CodecError::InvalidSchema(format!(
                "unresolved type reference '{name}'"
            )));
        }
    })
}

/// Array and map items arrive in counted blocks terminated by a zero count
fn read_blocks<'a>(
    d: &mut Decoder<'a>,
    mut item: impl FnMut(&mut Decoder<'a>) -> Result<()>,
) -> Result<()> {
    loop {
        let count = d.read_long()?;
        if count == 0 {
            return Ok(());
        }
        let count = if count < 0 {
            // Negative count is followed by the block's byte size
            _ = d.read_long()?;
            count.unsigned_abs()
        } else {
            count.unsigned_abs()
        };
        for _ in 0..count {
            item(d)?;
        }
    }
}

fn mismatch(node: &Schema, value: &Value) -> CodecError {
    CodecError::SchemaMismatch {
        expected: node.kind_name(),
        found: value.kind_name().to_string(),
    }
}

pub(crate) fn write_datum(
    schema: &AvroSchema,
    node: &Schema,
    value: &Value,
    out: &mut Vec<u8>,
) -> Result<()> {
    let node = schema.resolve(node)?;
    match (node, value) {
        (Schema::Null, Value::Null) => {}
        (Schema::Boolean, Value::Boolean(b)) => out.push(u8::from(*b)),
        (Schema::Int, Value::Int(v)) => write_long(out, i64::from(*v)),
        (Schema::Long, Value::Long(v)) => write_long(out, *v),
        (Schema::Float, Value::Float(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (Schema::Double, Value::Double(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (Schema::Bytes, Value::Bytes(b)) => write_bytes(out, b),
        (Schema::String, Value::String(s)) => write_bytes(out, s.as_bytes()),
        (Schema::Fixed(fixed), Value::Fixed(b)) => {
            if b.len() != fixed.size {
                return Err(CodecError::SchemaMismatch {
                    expected: format!("{} bytes for {}", fixed.size, fixed.name),
                    found: format!("{} bytes", b.len()),
                });
            }
            out.extend_from_slice(b);
        }
        (Schema::Enum(e), Value::Enum(index, _)) => {
            if *index as usize >= e.symbols.len() {
                return Err(CodecError::EnumIndex {
                    name: e.name.clone(),
                    index: i64::from(*index),
                });
            }
            write_long(out, i64::from(*index));
        }
        (Schema::Union(branches), Value::Union(index, inner)) => {
            let branch = branches
                .get(*index as usize)
                .ok_or(CodecError::UnionBranch {
                    index: i64::from(*index),
                    branches: branches.len(),
                })?;
            write_long(out, i64::from(*index));
            write_datum(schema, branch, inner, out)?;
        }
        (Schema::Array(items), Value::Array(values)) => {
            if !values.is_empty() {
                write_len(out, values.len());
                for v in values {
                    write_datum(schema, items, v, out)?;
                }
            }
            write_long(out, 0);
        }
        (Schema::Map(item), Value::Map(entries)) => {
            if !entries.is_empty() {
                write_len(out, entries.len());
                for (key, v) in entries {
                    write_bytes(out, key.as_bytes());
                    write_datum(schema, item, v, out)?;
                }
            }
            write_long(out, 0);
        }
        (Schema::Record(record), Value::Record(fields)) => {
            if record.fields.len() != fields.len() {
                return Err(CodecError::SchemaMismatch {
                    expected: format!("{} fields in {}", record.fields.len(), record.name),
                    found: format!("{} fields", fields.len()),
                });
            }
            for (field, (name, v)) in record.fields.iter().zip(fields) {
                if &field.name != name {
                    return Err(CodecError::SchemaMismatch {
                        expected: format!("field {} of {}", field.name, record.name),
                        found: format!("field {name}"),
                    });
                }
                write_datum(schema, &field.schema, v, out)?;
            }
        }
        (node, value) => return Err(mismatch(node, value)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(text: &str) -> AvroSchema {
        AvroSchema::parse(text.as_bytes()).expect("valid schema")
    }

    #[test]
    fn test_record_reencodes_identically() -> Result<()> {
        let schema = schema(
            r#"{"type": "record", "name": "r", "fields": [
                {"name": "path", "type": "string"},
                {"name": "id", "type": ["null", "long"]},
                {"name": "tags", "type": {"type": "map", "values": "bytes"}},
                {"name": "sizes", "type": {"type": "array", "items": "int"}},
                {"name": "status", "type": {"type": "enum", "name": "s", "symbols": ["A", "B"]}}
            ]}"#,
        );
        let value = Value::Record(vec![
            ("path".to_string(), Value::String("data/a.parquet".to_string())),
            ("id".to_string(), Value::Union(1, Box::new(Value::Long(-42)))),
            (
                "tags".to_string(),
                Value::Map(vec![("k".to_string(), Value::Bytes(vec![1, 2]))]),
            ),
            ("sizes".to_string(), Value::Array(vec![])),
            ("status".to_string(), Value::Enum(1, "B".to_string())),
        ]);

        let mut bytes = Vec::new();
        write_datum(&schema, schema.root(), &value, &mut bytes)?;
        let mut decoder = Decoder::new(&bytes);
        let decoded = read_datum(&schema, schema.root(), &mut decoder)?;
        assert!(decoder.is_empty());
        assert_eq!(decoded, value);
        Ok(())
    }

    #[test]
    fn test_blocked_array_with_byte_size() -> Result<()> {
        let schema = schema(r#"{"type": "array", "items": "long"}"#);
        // count -2 with a byte size, then count 1, then terminator
        let mut bytes = Vec::new();
        write_long(&mut bytes, -2);
        write_long(&mut bytes, 2);
        write_long(&mut bytes, 5);
        write_long(&mut bytes, 6);
        write_long(&mut bytes, 1);
        write_long(&mut bytes, 7);
        write_long(&mut bytes, 0);

        let mut decoder = Decoder::new(&bytes);
        let decoded = read_datum(&schema, schema.root(), &mut decoder)?;
        assert_eq!(
            decoded,
            Value::Array(vec![Value::Long(5), Value::Long(6), Value::Long(7)])
        );
        Ok(())
    }

    #[test]
    fn test_mismatched_value_rejected() {
        let schema = schema(r#""string""#);
        let mut out = Vec::new();
        let result = write_datum(&schema, schema.root(), &Value::Long(1), &mut out);
        assert!(matches!(result, Err(CodecError::SchemaMismatch { .. })));
    }

    #[test]
    fn test_bad_union_branch() {
        let schema = schema(r#"["null", "long"]"#);
        let mut bytes = Vec::new();
        write_long(&mut bytes, 4);
        let mut decoder = Decoder::new(&bytes);
        assert!(matches!(
            read_datum(&schema, schema.root(), &mut decoder),
            Err(CodecError::UnionBranch { index: 4, branches: 2 })
        ));
    }
}
