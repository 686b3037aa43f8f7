/// A decoded Avro datum
///
/// Records and maps keep their entries in encoded order, and unions keep
/// the branch index they were written with, so a value re-encodes to the
/// same bytes it was decoded from.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bytes(Vec<u8>),
    String(String),
    Fixed(Vec<u8>),
    /// Symbol index and symbol
    Enum(u32, String),
    /// Branch index and branch value
    Union(u32, Box<Value>),
    Array(Vec<Value>),
    Map(Vec<(String, Value)>),
    Record(Vec<(String, Value)>),
}

impl Value {
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Bytes(_) => "bytes",
            Value::String(_) => "string",
            Value::Fixed(_) => "fixed",
            Value::Enum(..) => "enum",
            Value::Union(..) => "union",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Record(_) => "record",
        }
    }

    /// Record field by name, looking through a wrapping union
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self.unwrap_union() {
            Value::Record(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Value> {
        match self.unwrap_union_mut() {
            Value::Record(fields) => fields
                .iter_mut()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    #[must_use]
    pub fn unwrap_union(&self) -> &Value {
        match self {
            Value::Union(_, inner) => inner.unwrap_union(),
            other => other,
        }
    }

    pub fn unwrap_union_mut(&mut self) -> &mut Value {
        match self {
            Value::Union(_, inner) => inner.unwrap_union_mut(),
            other => other,
        }
    }

    /// `None` for null (or a union holding null)
    #[must_use]
    pub fn non_null(&self) -> Option<&Value> {
        match self.unwrap_union() {
            Value::Null => None,
            other => Some(other),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self.unwrap_union() {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_long(&self) -> Option<i64> {
        match self.unwrap_union() {
            Value::Int(v) => Some(i64::from(*v)),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self.unwrap_union() {
            Value::Bytes(b) | Value::Fixed(b) => Some(b),
            _ => None,
        }
    }
}
