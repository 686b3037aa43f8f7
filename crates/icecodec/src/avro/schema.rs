//! Avro writer-schema model
//!
//! Only what is needed to walk encoded data is kept: logical types and
//! documentation are dropped, because container re-encoding copies the
//! header's schema text verbatim instead of re-serializing this model.

use std::collections::HashMap;

use serde_json::{Map, Value as Json};

use crate::{CodecError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
    Record(RecordSchema),
    Enum(EnumSchema),
    Array(Box<Schema>),
    Map(Box<Schema>),
    Union(Vec<Schema>),
    Fixed(FixedSchema),
    /// Reference to a named type defined elsewhere in the schema
    Named(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordSchema {
    pub name: String,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub schema: Schema,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumSchema {
    pub name: String,
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FixedSchema {
    pub name: String,
    pub size: usize,
}

impl Schema {
    /// Short type name used in mismatch errors
    #[must_use]
    pub fn kind_name(&self) -> String {
        match self {
            Schema::Null => "null".to_string(),
            Schema::Boolean => "boolean".to_string(),
            Schema::Int => "int".to_string(),
            Schema::Long => "long".to_string(),
            Schema::Float => "float".to_string(),
            Schema::Double => "double".to_string(),
            Schema::Bytes => "bytes".to_string(),
            Schema::String => "string".to_string(),
            Schema::Record(r) => format!("record {}", r.name),
            Schema::Enum(e) => format!("enum {}", e.name),
            Schema::Array(_) => "array".to_string(),
            Schema::Map(_) => "map".to_string(),
            Schema::Union(_) => "union".to_string(),
            Schema::Fixed(f) => format!("fixed {}", f.name),
            Schema::Named(name) => name.clone(),
        }
    }
}

const MAX_SIZE_DEPTH: usize = 32;

/// A parsed writer schema together with its named-type table
#[derive(Debug, Clone)]
pub struct AvroSchema {
    root: Schema,
    names: HashMap<String, Schema>,
}

impl AvroSchema {
    pub fn parse(text: &[u8]) -> Result<Self> {
        let json: Json = serde_json::from_slice(text)
            .map_err(|e| CodecError::InvalidSchema(format!("schema is not JSON: {e}")))?;
        let mut parser = Parser::default();
        let root = parser.parse(&json, None)?;
        Ok(Self {
            root,
            names: parser.names,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Schema {
        &self.root
    }

    /// Fewest bytes one datum of `schema` encodes to. Never overstates, so
    /// deeply nested or recursive types count as zero past a fixed depth.
    #[must_use]
    pub fn min_encoded_size(&self, schema: &Schema) -> usize {
        self.min_size(schema, 0)
    }

    fn min_size(&self, schema: &Schema, depth: usize) -> usize {
        if depth > MAX_SIZE_DEPTH {
            return 0;
        }
        match schema {
            Schema::Null => 0,
            Schema::Float => 4,
            Schema::Double => 8,
            Schema::Fixed(fixed) => fixed.size,
            Schema::Record(record) => record
                .fields
                .iter()
                .map(|field| self.min_size(&field.schema, depth + 1))
                .fold(0, usize::saturating_add),
            Schema::Named(_) => self
                .resolve(schema)
                .map_or(0, |defined| self.min_size(defined, depth + 1)),
            // A varint, a length prefix, a union branch or a block terminator
            Schema::Boolean
            | Schema::Int
            | Schema::Long
            | Schema::Bytes
            | Schema::String
            | Schema::Enum(_)
            | Schema::Array(_)
            | Schema::Map(_)
            | Schema::Union(_) => 1,
        }
    }

    /// Follow a named reference to its definition
    pub(crate) fn resolve<'s>(&'s self, schema: &'s Schema) -> Result<&'s Schema> {
        match schema {
            Schema::Named(name) => match self.names.get(name) {
                Some(Schema::Named(_)) | None => Err(CodecError::InvalidSchema(format!(
                    "unresolved type reference '{name}'"
                ))),
                Some(defined) => Ok(defined),
            },
            other => Ok(other),
        }
    }
}

#[derive(Default)]
struct Parser {
    names: HashMap<String, Schema>,
}

impl Parser {
    fn parse(&mut self, json: &Json, namespace: Option<&str>) -> Result<Schema> {
        match json {
            Json::String(name) => self.reference(name, namespace),
            Json::Array(branches) => Ok(Schema::Union(
                branches
                    .iter()
                    .map(|branch| self.parse(branch, namespace))
                    .collect::<Result<_>>()?,
            )),
            Json::Object(obj) => self.parse_object(obj, namespace),
            other => Err(CodecError::InvalidSchema(format!(
                "unexpected schema node {other}"
            ))),
        }
    }

    fn parse_object(&mut self, obj: &Map<String, Json>, namespace: Option<&str>) -> Result<Schema> {
        let ty = match obj.get("type") {
            Some(Json::String(ty)) => ty.as_str(),
            Some(nested) => return self.parse(nested, namespace),
            None => {
                return Err(CodecError::InvalidSchema(
                    "schema object without 'type'".to_string(),
                ));
            }
        };

        match ty {
            "record" | "error" => {
                let (fullname, inner) = full_name(obj, namespace)?;
                // Placeholder so recursive references resolve during parsing
                _ = self
                    .names
                    .insert(fullname.clone(), Schema::Named(fullname.clone()));

                let fields_json = obj.get("fields").and_then(Json::as_array).ok_or_else(|| {
                    CodecError::InvalidSchema(format!("record {fullname} has no 'fields' array"))
                })?;
                let mut fields = Vec::with_capacity(fields_json.len());
                for field in fields_json {
                    let name = field.get("name").and_then(Json::as_str).ok_or_else(|| {
                        CodecError::InvalidSchema(format!("field without name in {fullname}"))
                    })?;
                    let field_type = field.get("type").ok_or_else(|| {
                        CodecError::InvalidSchema(format!("field {name} in {fullname} has no type"))
                    })?;
                    fields.push(Field {
                        name: name.to_string(),
                        schema: self.parse(field_type, inner.as_deref())?,
                    });
                }

                let schema = Schema::Record(RecordSchema {
                    name: fullname.clone(),
                    fields,
                });
                _ = self.names.insert(fullname, schema.clone());
                Ok(schema)
            }
            "enum" => {
                let (fullname, _) = full_name(obj, namespace)?;
                let symbols = obj
                    .get("symbols")
                    .and_then(Json::as_array)
                    .ok_or_else(|| {
                        CodecError::InvalidSchema(format!("enum {fullname} has no symbols"))
                    })?
                    .iter()
                    .map(|s| {
                        s.as_str().map(str::to_string).ok_or_else(|| {
                            CodecError::InvalidSchema(format!("non-string symbol in {fullname}"))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let schema = Schema::Enum(EnumSchema {
                    name: fullname.clone(),
                    symbols,
                });
                _ = self.names.insert(fullname, schema.clone());
                Ok(schema)
            }
            "fixed" => {
                let (fullname, _) = full_name(obj, namespace)?;
                let size = obj
                    .get("size")
                    .and_then(Json::as_u64)
                    .and_then(|s| usize::try_from(s).ok())
                    .ok_or_else(|| {
                        CodecError::InvalidSchema(format!("fixed {fullname} has no valid size"))
                    })?;
                let schema = Schema::Fixed(FixedSchema {
                    name: fullname.clone(),
                    size,
                });
                _ = self.names.insert(fullname, schema.clone());
                Ok(schema)
            }
            "array" => {
                let items = obj.get("items").ok_or_else(|| {
                    CodecError::InvalidSchema("array schema without 'items'".to_string())
                })?;
                Ok(Schema::Array(Box::new(self.parse(items, namespace)?)))
            }
            "map" => {
                let values = obj.get("values").ok_or_else(|| {
                    CodecError::InvalidSchema("map schema without 'values'".to_string())
                })?;
                Ok(Schema::Map(Box::new(self.parse(values, namespace)?)))
            }
            // Primitives, including those annotated with a logicalType
            other => self.reference(other, namespace),
        }
    }

    fn reference(&self, name: &str, namespace: Option<&str>) -> Result<Schema> {
        if let Some(primitive) = primitive(name) {
            return Ok(primitive);
        }
        if !name.contains('.') {
            if let Some(ns) = namespace {
                let qualified = format!("{ns}.{name}");
                if self.names.contains_key(&qualified) {
                    return Ok(Schema::Named(qualified));
                }
            }
        }
        if self.names.contains_key(name) {
            return Ok(Schema::Named(name.to_string()));
        }
        Err(CodecError::InvalidSchema(format!("unknown type '{name}'")))
    }
}

fn primitive(name: &str) -> Option<Schema> {
    Some(match name {
        "null" => Schema::Null,
        "boolean" => Schema::Boolean,
        "int" => Schema::Int,
        "long" => Schema::Long,
        "float" => Schema::Float,
        "double" => Schema::Double,
        "bytes" => Schema::Bytes,
        "string" => Schema::String,
        _ => return None,
    })
}

/// Resolve a named type's full name and the namespace its children inherit
fn full_name(obj: &Map<String, Json>, enclosing: Option<&str>) -> Result<(String, Option<String>)> {
    let name = obj
        .get("name")
        .and_then(Json::as_str)
        .ok_or_else(|| CodecError::InvalidSchema("named type without 'name'".to_string()))?;

    if let Some((ns, _)) = name.rsplit_once('.') {
        return Ok((name.to_string(), Some(ns.to_string())));
    }

    let namespace = match obj.get("namespace").and_then(Json::as_str) {
        Some("") => None,
        Some(ns) => Some(ns.to_string()),
        None => enclosing.map(str::to_string),
    };
    let fullname = match &namespace {
        Some(ns) => format!("{ns}.{name}"),
        None => name.to_string(),
    };
    Ok((fullname, namespace))
}
