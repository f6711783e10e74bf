/*!
The dynamically-typed [Value] that every codec decodes into and encodes
from.
*/

use std::ops::Deref;
use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

use edgedb_errors::{DescriptorMismatch, Error, ErrorKind};

use crate::model::{
    BigInt, Datetime, Decimal, Duration, EnumValue, Json, LocalDate, LocalDatetime, LocalTime,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nothing,
    Uuid(Uuid),
    Str(String),
    Bytes(Bytes),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    BigInt(BigInt),
    Decimal(Decimal),
    Bool(bool),
    Datetime(Datetime),
    LocalDatetime(LocalDatetime),
    LocalDate(LocalDate),
    LocalTime(LocalTime),
    Duration(Duration),
    Json(Json),
    Set(Vec<Value>),
    Array(Vec<Value>),
    Object {
        shape: ObjectShape,
        fields: Vec<Option<Value>>,
    },
    Tuple(Vec<Value>),
    NamedTuple {
        shape: NamedTupleShape,
        fields: Vec<Value>,
    },
    Enum(EnumValue),
}

/// The shape of a query result row: field names and link flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectShape(pub(crate) Arc<ObjectShapeInfo>);

#[derive(Debug, PartialEq, Eq)]
pub struct ObjectShapeInfo {
    pub elements: Vec<ShapeElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeElement {
    pub flag_implicit: bool,
    pub flag_link_property: bool,
    pub flag_link: bool,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedTupleShape(pub(crate) Arc<NamedTupleShapeInfo>);

#[derive(Debug, PartialEq, Eq)]
pub struct NamedTupleShapeInfo {
    pub elements: Vec<TupleElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleElement {
    pub name: String,
}

impl Value {
    pub fn kind(&self) -> &'static str {
        use Value::*;
        match self {
            Nothing => "nothing",
            Uuid(..) => "uuid",
            Str(..) => "str",
            Bytes(..) => "bytes",
            Int16(..) => "int16",
            Int32(..) => "int32",
            Int64(..) => "int64",
            Float32(..) => "float32",
            Float64(..) => "float64",
            BigInt(..) => "bigint",
            Decimal(..) => "decimal",
            Bool(..) => "bool",
            Datetime(..) => "datetime",
            LocalDatetime(..) => "local_datetime",
            LocalDate(..) => "local_date",
            LocalTime(..) => "local_time",
            Duration(..) => "duration",
            Json(..) => "json",
            Set(..) => "set",
            Array(..) => "array",
            Object { .. } => "object",
            Tuple(..) => "tuple",
            NamedTuple { .. } => "named_tuple",
            Enum(..) => "enum",
        }
    }
}

impl ObjectShape {
    pub fn new(elements: Vec<ShapeElement>) -> ObjectShape {
        ObjectShape(Arc::new(ObjectShapeInfo { elements }))
    }
}

impl Deref for ObjectShape {
    type Target = ObjectShapeInfo;
    fn deref(&self) -> &ObjectShapeInfo {
        &self.0
    }
}

impl NamedTupleShape {
    pub fn new(names: impl IntoIterator<Item = String>) -> NamedTupleShape {
        NamedTupleShape(Arc::new(NamedTupleShapeInfo {
            elements: names
                .into_iter()
                .map(|name| TupleElement { name })
                .collect(),
        }))
    }
    pub fn field_position(&self, name: &str) -> Option<usize> {
        self.0.elements.iter().position(|e| e.name == name)
    }
}

impl Deref for NamedTupleShape {
    type Target = NamedTupleShapeInfo;
    fn deref(&self) -> &NamedTupleShapeInfo {
        &self.0
    }
}

fn mismatch(expected: &'static str, value: &Value) -> Error {
    DescriptorMismatch::with_message(format!("expected {}, got {}", expected, value.kind()))
}

macro_rules! try_from_value {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl TryFrom<Value> for $ty {
                type Error = Error;
                fn try_from(value: Value) -> Result<$ty, Error> {
                    match value {
                        Value::$variant(inner) => Ok(inner),
                        other => Err(mismatch(stringify!($ty), &other)),
                    }
                }
            }
        )*
    }
}

try_from_value! {
    Uuid => Uuid,
    Str => String,
    Bytes => Bytes,
    Int16 => i16,
    Int32 => i32,
    Int64 => i64,
    Float32 => f32,
    Float64 => f64,
    Bool => bool,
    BigInt => BigInt,
    Decimal => Decimal,
    Datetime => Datetime,
    LocalDatetime => LocalDatetime,
    LocalDate => LocalDate,
    LocalTime => LocalTime,
    Duration => Duration,
    Json => Json,
}
