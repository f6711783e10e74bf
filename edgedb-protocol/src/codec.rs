/*!
Codecs turn the binary payload of a `Data` message into a [Value] and
back. Every codec corresponds to one type descriptor; composite codecs
hold their element codecs, so a whole query result shape is one tree.

The [CodecRegistry] caches codecs by descriptor id. It is seeded with
the well-known scalar types and grows as descriptor blobs arrive; it is
never evicted, because a descriptor id permanently identifies one
structural type.
*/

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use bytes::{Buf, BufMut};
use snafu::{ensure, OptionExt};
use uuid::Uuid;

use crate::descriptors::{self, Descriptor, Typedesc, TypePos};
use crate::encoding::{ensure_exact, Input, Output};
use crate::errors::{self, invalid_value, CodecError, DecodeError, EncodeError};
use crate::model;
use crate::value::{self, NamedTupleShape, ObjectShape, Value};

pub const STD_UUID: Uuid = Uuid::from_u128(0x100);
pub const STD_STR: Uuid = Uuid::from_u128(0x101);
pub const STD_BYTES: Uuid = Uuid::from_u128(0x102);
pub const STD_INT16: Uuid = Uuid::from_u128(0x103);
pub const STD_INT32: Uuid = Uuid::from_u128(0x104);
pub const STD_INT64: Uuid = Uuid::from_u128(0x105);
pub const STD_FLOAT32: Uuid = Uuid::from_u128(0x106);
pub const STD_FLOAT64: Uuid = Uuid::from_u128(0x107);
pub const STD_DECIMAL: Uuid = Uuid::from_u128(0x108);
pub const STD_BOOL: Uuid = Uuid::from_u128(0x109);
pub const STD_DATETIME: Uuid = Uuid::from_u128(0x10a);
pub const CAL_LOCAL_DATETIME: Uuid = Uuid::from_u128(0x10b);
pub const CAL_LOCAL_DATE: Uuid = Uuid::from_u128(0x10c);
pub const CAL_LOCAL_TIME: Uuid = Uuid::from_u128(0x10d);
pub const STD_DURATION: Uuid = Uuid::from_u128(0x10e);
pub const STD_JSON: Uuid = Uuid::from_u128(0x10f);
pub const STD_BIGINT: Uuid = Uuid::from_u128(0x110);

/// The null codec's id.
pub const NOTHING: Uuid = Uuid::from_u128(0);

pub trait Codec: fmt::Debug + Send + Sync + 'static {
    fn decode(&self, buf: &mut Input) -> Result<Value, DecodeError>;
    fn encode(&self, buf: &mut Output, value: &Value) -> Result<(), EncodeError>;
    /// For codecs describing a query's input: the declared argument
    /// names, in order.
    fn input_fields(&self) -> Option<&NamedTupleShape> {
        None
    }
}

/// Process-visible cache of codecs keyed by descriptor id.
///
/// A registry is an explicit handle so that every pool (and every test)
/// may own an isolated one.
#[derive(Debug, Clone)]
pub struct CodecRegistry {
    inner: Arc<RwLock<HashMap<Uuid, Arc<dyn Codec>>>>,
}

impl CodecRegistry {
    pub fn new() -> CodecRegistry {
        let mut map: HashMap<Uuid, Arc<dyn Codec>> = HashMap::new();
        map.insert(NOTHING, Arc::new(Nothing {}));
        for id in [
            STD_UUID,
            STD_STR,
            STD_BYTES,
            STD_INT16,
            STD_INT32,
            STD_INT64,
            STD_FLOAT32,
            STD_FLOAT64,
            STD_DECIMAL,
            STD_BOOL,
            STD_DATETIME,
            CAL_LOCAL_DATETIME,
            CAL_LOCAL_DATE,
            CAL_LOCAL_TIME,
            STD_DURATION,
            STD_JSON,
            STD_BIGINT,
        ] {
            map.insert(id, scalar_codec(&id).expect("seeded scalar"));
        }
        CodecRegistry {
            inner: Arc::new(RwLock::new(map)),
        }
    }
    pub fn get(&self, id: &Uuid) -> Option<Arc<dyn Codec>> {
        self.inner.read().expect("registry lock").get(id).cloned()
    }
    pub fn contains(&self, id: &Uuid) -> bool {
        self.inner.read().expect("registry lock").contains_key(id)
    }
    /// Builds and registers a codec for every descriptor in the blob,
    /// returning the codec of the blob's root.
    pub fn build(&self, typedesc: &Typedesc) -> Result<Arc<dyn Codec>, CodecError> {
        if let Some(codec) = self.get(typedesc.id()) {
            return Ok(codec);
        }
        let dlist = CodecBuilder {
            descriptors: typedesc.descriptors(),
        };
        let mut lock = self.inner.write().expect("registry lock");
        for (index, descriptor) in typedesc.descriptors().iter().enumerate() {
            if matches!(descriptor, Descriptor::TypeAnnotation(..)) {
                continue;
            }
            let codec = dlist.build(TypePos(index as u16))?;
            lock.insert(*descriptor.id(), codec);
        }
        drop(lock);
        match typedesc.root_pos() {
            Some(_) => self
                .get(typedesc.id())
                .context(errors::CodecNotFound { uuid: *typedesc.id() }),
            None => Ok(Arc::new(Nothing {})),
        }
    }
}

impl Default for CodecRegistry {
    fn default() -> CodecRegistry {
        CodecRegistry::new()
    }
}

struct CodecBuilder<'a> {
    descriptors: &'a [Descriptor],
}

impl CodecBuilder<'_> {
    fn build(&self, pos: TypePos) -> Result<Arc<dyn Codec>, CodecError> {
        use Descriptor as D;
        let item = self
            .descriptors
            .get(pos.0 as usize)
            .context(errors::UnexpectedTypePos { position: pos.0 })?;
        match item {
            D::BaseScalar(base) => scalar_codec(&base.id),
            D::Scalar(d) => Ok(Arc::new(DerivedScalar {
                inner: self.build(d.base_type_pos)?,
            })),
            D::Set(d) => Ok(Arc::new(Set {
                element: self.build(d.type_pos)?,
            })),
            D::Array(d) => Ok(Arc::new(Array {
                element: self.build(d.type_pos)?,
            })),
            D::ObjectShape(d) => Ok(Arc::new(Object::build(d, self)?)),
            D::Tuple(d) => Ok(Arc::new(Tuple {
                elements: d
                    .element_types
                    .iter()
                    .map(|&p| self.build(p))
                    .collect::<Result<_, _>>()?,
            })),
            D::NamedTuple(d) => Ok(Arc::new(NamedTuple::build(d, self)?)),
            D::Enumeration(d) => Ok(Arc::new(Enum {
                members: d.members.iter().map(|m| m[..].into()).collect(),
            })),
            D::TypeAnnotation(..) => errors::UnexpectedTypePos { position: pos.0 }.fail(),
        }
    }
}

pub fn build_codec(
    root_pos: Option<TypePos>,
    descriptors: &[Descriptor],
) -> Result<Arc<dyn Codec>, CodecError> {
    let builder = CodecBuilder { descriptors };
    match root_pos {
        Some(pos) => builder.build(pos),
        None => Ok(Arc::new(Nothing {})),
    }
}

pub fn scalar_codec(uuid: &Uuid) -> Result<Arc<dyn Codec>, CodecError> {
    match *uuid {
        STD_UUID => Ok(Arc::new(UuidCodec {})),
        STD_STR => Ok(Arc::new(Str {})),
        STD_BYTES => Ok(Arc::new(BytesCodec {})),
        STD_INT16 => Ok(Arc::new(Int16 {})),
        STD_INT32 => Ok(Arc::new(Int32 {})),
        STD_INT64 => Ok(Arc::new(Int64 {})),
        STD_FLOAT32 => Ok(Arc::new(Float32 {})),
        STD_FLOAT64 => Ok(Arc::new(Float64 {})),
        STD_DECIMAL => Ok(Arc::new(Decimal {})),
        STD_BOOL => Ok(Arc::new(Bool {})),
        STD_DATETIME => Ok(Arc::new(Datetime {})),
        CAL_LOCAL_DATETIME => Ok(Arc::new(LocalDatetime {})),
        CAL_LOCAL_DATE => Ok(Arc::new(LocalDate {})),
        CAL_LOCAL_TIME => Ok(Arc::new(LocalTime {})),
        STD_DURATION => Ok(Arc::new(Duration {})),
        STD_JSON => Ok(Arc::new(Json {})),
        STD_BIGINT => Ok(Arc::new(BigInt {})),
        _ => errors::UndefinedBaseScalar { uuid: *uuid }.fail(),
    }
}

#[derive(Debug)]
pub struct Nothing {}

#[derive(Debug)]
pub struct UuidCodec {}

#[derive(Debug)]
pub struct Str {}

#[derive(Debug)]
pub struct BytesCodec {}

#[derive(Debug)]
pub struct Int16 {}

#[derive(Debug)]
pub struct Int32 {}

#[derive(Debug)]
pub struct Int64 {}

#[derive(Debug)]
pub struct Float32 {}

#[derive(Debug)]
pub struct Float64 {}

#[derive(Debug)]
pub struct Decimal {}

#[derive(Debug)]
pub struct BigInt {}

#[derive(Debug)]
pub struct Bool {}

#[derive(Debug)]
pub struct Datetime {}

#[derive(Debug)]
pub struct LocalDatetime {}

#[derive(Debug)]
pub struct LocalDate {}

#[derive(Debug)]
pub struct LocalTime {}

#[derive(Debug)]
pub struct Duration {}

#[derive(Debug)]
pub struct Json {}

#[derive(Debug)]
pub struct DerivedScalar {
    inner: Arc<dyn Codec>,
}

#[derive(Debug)]
pub struct Set {
    element: Arc<dyn Codec>,
}

#[derive(Debug)]
pub struct Array {
    element: Arc<dyn Codec>,
}

#[derive(Debug)]
pub struct Object {
    shape: ObjectShape,
    codecs: Vec<Arc<dyn Codec>>,
}

#[derive(Debug)]
pub struct Tuple {
    elements: Vec<Arc<dyn Codec>>,
}

#[derive(Debug)]
pub struct NamedTuple {
    shape: NamedTupleShape,
    elements: Vec<Arc<dyn Codec>>,
}

#[derive(Debug)]
pub struct Enum {
    members: Vec<Arc<str>>,
}

impl Object {
    fn build(
        d: &descriptors::ObjectShapeDescriptor,
        dlist: &CodecBuilder,
    ) -> Result<Object, CodecError> {
        Ok(Object {
            shape: ObjectShape::new(
                d.elements
                    .iter()
                    .map(|e| value::ShapeElement {
                        flag_implicit: e.flag_implicit,
                        flag_link_property: e.flag_link_property,
                        flag_link: e.flag_link,
                        name: e.name.clone(),
                    })
                    .collect(),
            ),
            codecs: d
                .elements
                .iter()
                .map(|e| dlist.build(e.type_pos))
                .collect::<Result<_, _>>()?,
        })
    }
}

impl NamedTuple {
    fn build(
        d: &descriptors::NamedTupleTypeDescriptor,
        dlist: &CodecBuilder,
    ) -> Result<NamedTuple, CodecError> {
        Ok(NamedTuple {
            shape: NamedTupleShape::new(d.elements.iter().map(|e| e.name.clone())),
            elements: d
                .elements
                .iter()
                .map(|e| dlist.build(e.type_pos))
                .collect::<Result<_, _>>()?,
        })
    }
}

impl Codec for Nothing {
    fn decode(&self, _buf: &mut Input) -> Result<Value, DecodeError> {
        Ok(Value::Nothing)
    }
    fn encode(&self, _buf: &mut Output, value: &Value) -> Result<(), EncodeError> {
        match value {
            Value::Nothing => Ok(()),
            _ => Err(invalid_value("nothing", value)),
        }
    }
}

impl Codec for UuidCodec {
    fn decode(&self, buf: &mut Input) -> Result<Value, DecodeError> {
        ensure_exact(buf, 16)?;
        let mut bytes = [0u8; 16];
        buf.copy_to_slice(&mut bytes);
        Ok(Value::Uuid(Uuid::from_bytes(bytes)))
    }
    fn encode(&self, buf: &mut Output, value: &Value) -> Result<(), EncodeError> {
        let &Value::Uuid(val) = value else {
            return Err(invalid_value("uuid", value));
        };
        buf.extend_from_slice(val.as_bytes());
        Ok(())
    }
}

impl Codec for Str {
    fn decode(&self, buf: &mut Input) -> Result<Value, DecodeError> {
        let text = std::str::from_utf8(buf).map_err(|e| errors::decode_error(e))?;
        let text = text.to_owned();
        let len = buf.remaining();
        buf.advance(len);
        Ok(Value::Str(text))
    }
    fn encode(&self, buf: &mut Output, value: &Value) -> Result<(), EncodeError> {
        let Value::Str(val) = value else {
            return Err(invalid_value("str", value));
        };
        buf.extend_from_slice(val.as_bytes());
        Ok(())
    }
}

impl Codec for BytesCodec {
    fn decode(&self, buf: &mut Input) -> Result<Value, DecodeError> {
        let len = buf.remaining();
        let data = buf.copy_to_bytes(len);
        Ok(Value::Bytes(data))
    }
    fn encode(&self, buf: &mut Output, value: &Value) -> Result<(), EncodeError> {
        let Value::Bytes(val) = value else {
            return Err(invalid_value("bytes", value));
        };
        buf.extend_from_slice(val);
        Ok(())
    }
}

macro_rules! implement_fixed {
    ($codec:ident, $variant:ident, $size:expr, $get:ident, $put:ident, $name:expr) => {
        impl Codec for $codec {
            fn decode(&self, buf: &mut Input) -> Result<Value, DecodeError> {
                ensure_exact(buf, $size)?;
                Ok(Value::$variant(buf.$get()))
            }
            fn encode(&self, buf: &mut Output, value: &Value) -> Result<(), EncodeError> {
                let &Value::$variant(val) = value else {
                    return Err(invalid_value($name, value));
                };
                buf.reserve($size);
                buf.$put(val);
                Ok(())
            }
        }
    };
}

implement_fixed!(Int16, Int16, 2, get_i16, put_i16, "int16");
implement_fixed!(Int32, Int32, 4, get_i32, put_i32, "int32");
implement_fixed!(Int64, Int64, 8, get_i64, put_i64, "int64");
implement_fixed!(Float32, Float32, 4, get_f32, put_f32, "float32");
implement_fixed!(Float64, Float64, 8, get_f64, put_f64, "float64");

impl Codec for Bool {
    fn decode(&self, buf: &mut Input) -> Result<Value, DecodeError> {
        ensure_exact(buf, 1)?;
        match buf.get_u8() {
            0 => Ok(Value::Bool(false)),
            1 => Ok(Value::Bool(true)),
            val => errors::InvalidBool { val }.fail(),
        }
    }
    fn encode(&self, buf: &mut Output, value: &Value) -> Result<(), EncodeError> {
        let &Value::Bool(val) = value else {
            return Err(invalid_value("bool", value));
        };
        buf.put_u8(val as u8);
        Ok(())
    }
}

impl Codec for Datetime {
    fn decode(&self, buf: &mut Input) -> Result<Value, DecodeError> {
        ensure_exact(buf, 8)?;
        Ok(Value::Datetime(model::Datetime {
            micros: buf.get_i64(),
        }))
    }
    fn encode(&self, buf: &mut Output, value: &Value) -> Result<(), EncodeError> {
        let &Value::Datetime(val) = value else {
            return Err(invalid_value("datetime", value));
        };
        buf.put_i64(val.micros);
        Ok(())
    }
}

impl Codec for LocalDatetime {
    fn decode(&self, buf: &mut Input) -> Result<Value, DecodeError> {
        ensure_exact(buf, 8)?;
        Ok(Value::LocalDatetime(model::LocalDatetime {
            micros: buf.get_i64(),
        }))
    }
    fn encode(&self, buf: &mut Output, value: &Value) -> Result<(), EncodeError> {
        let &Value::LocalDatetime(val) = value else {
            return Err(invalid_value("local_datetime", value));
        };
        buf.put_i64(val.micros);
        Ok(())
    }
}

impl Codec for LocalDate {
    fn decode(&self, buf: &mut Input) -> Result<Value, DecodeError> {
        ensure_exact(buf, 4)?;
        Ok(Value::LocalDate(model::LocalDate {
            days: buf.get_i32(),
        }))
    }
    fn encode(&self, buf: &mut Output, value: &Value) -> Result<(), EncodeError> {
        let &Value::LocalDate(val) = value else {
            return Err(invalid_value("local_date", value));
        };
        buf.put_i32(val.days);
        Ok(())
    }
}

impl Codec for LocalTime {
    fn decode(&self, buf: &mut Input) -> Result<Value, DecodeError> {
        ensure_exact(buf, 8)?;
        let micros = buf.get_i64();
        ensure!(
            (0..model::MICROS_PER_DAY).contains(&micros),
            errors::InvalidDate
        );
        Ok(Value::LocalTime(model::LocalTime { micros }))
    }
    fn encode(&self, buf: &mut Output, value: &Value) -> Result<(), EncodeError> {
        let &Value::LocalTime(val) = value else {
            return Err(invalid_value("local_time", value));
        };
        buf.put_i64(val.micros);
        Ok(())
    }
}

impl Codec for Duration {
    fn decode(&self, buf: &mut Input) -> Result<Value, DecodeError> {
        ensure_exact(buf, 16)?;
        let micros = buf.get_i64();
        let days = buf.get_u32();
        let months = buf.get_u32();
        ensure!(days == 0 && months == 0, errors::NonZeroReservedBytes);
        Ok(Value::Duration(model::Duration { micros }))
    }
    fn encode(&self, buf: &mut Output, value: &Value) -> Result<(), EncodeError> {
        let &Value::Duration(val) = value else {
            return Err(invalid_value("duration", value));
        };
        buf.reserve(16);
        buf.put_i64(val.micros);
        buf.put_u32(0);
        buf.put_u32(0);
        Ok(())
    }
}

impl Codec for Json {
    fn decode(&self, buf: &mut Input) -> Result<Value, DecodeError> {
        ensure!(buf.remaining() >= 1, errors::Underflow);
        let format = buf.get_u8();
        ensure!(format == 1, errors::InvalidJsonFormat);
        let text = std::str::from_utf8(buf).map_err(|e| errors::decode_error(e))?;
        let text = text.to_owned();
        let len = buf.remaining();
        buf.advance(len);
        Ok(Value::Json(model::Json::new_unchecked(text)))
    }
    fn encode(&self, buf: &mut Output, value: &Value) -> Result<(), EncodeError> {
        let Value::Json(val) = value else {
            return Err(invalid_value("json", value));
        };
        buf.reserve(1 + val.len());
        buf.put_u8(1);
        buf.extend_from_slice(val.as_bytes());
        Ok(())
    }
}

fn decode_digits(buf: &mut Input) -> Result<(bool, i16, u16, Vec<u16>), DecodeError> {
    ensure!(buf.remaining() >= 8, errors::Underflow);
    let ndigits = buf.get_u16() as usize;
    let weight = buf.get_i16();
    let negative = match buf.get_u16() {
        0x0000 => false,
        0x4000 => true,
        _ => return errors::BadSign.fail(),
    };
    let decimal_digits = buf.get_u16();
    ensure!(buf.remaining() == ndigits * 2, errors::Underflow);
    let digits = (0..ndigits).map(|_| buf.get_u16()).collect();
    Ok((negative, weight, decimal_digits, digits))
}

fn encode_digits(
    buf: &mut Output,
    negative: bool,
    weight: i16,
    decimal_digits: u16,
    digits: &[u16],
) {
    buf.reserve(8 + digits.len() * 2);
    buf.put_u16(digits.len() as u16);
    buf.put_i16(weight);
    buf.put_u16(if negative { 0x4000 } else { 0x0000 });
    buf.put_u16(decimal_digits);
    for &digit in digits {
        buf.put_u16(digit);
    }
}

impl Codec for BigInt {
    fn decode(&self, buf: &mut Input) -> Result<Value, DecodeError> {
        let (negative, weight, decimal_digits, digits) = decode_digits(buf)?;
        ensure!(decimal_digits == 0, errors::NonZeroReservedBytes);
        Ok(Value::BigInt(model::BigInt {
            negative,
            weight,
            digits,
        }))
    }
    fn encode(&self, buf: &mut Output, value: &Value) -> Result<(), EncodeError> {
        let Value::BigInt(val) = value else {
            return Err(invalid_value("bigint", value));
        };
        ensure!(val.digits.len() <= 0x4_0000, errors::BigIntTooLong);
        encode_digits(buf, val.negative, val.weight, 0, &val.digits);
        Ok(())
    }
}

impl Codec for Decimal {
    fn decode(&self, buf: &mut Input) -> Result<Value, DecodeError> {
        let (negative, weight, decimal_digits, digits) = decode_digits(buf)?;
        Ok(Value::Decimal(model::Decimal {
            negative,
            weight,
            decimal_digits,
            digits,
        }))
    }
    fn encode(&self, buf: &mut Output, value: &Value) -> Result<(), EncodeError> {
        let Value::Decimal(val) = value else {
            return Err(invalid_value("decimal", value));
        };
        ensure!(val.digits.len() <= 0x4_0000, errors::DecimalTooLong);
        encode_digits(
            buf,
            val.negative,
            val.weight,
            val.decimal_digits,
            &val.digits,
        );
        Ok(())
    }
}

impl Codec for DerivedScalar {
    fn decode(&self, buf: &mut Input) -> Result<Value, DecodeError> {
        self.inner.decode(buf)
    }
    fn encode(&self, buf: &mut Output, value: &Value) -> Result<(), EncodeError> {
        self.inner.encode(buf, value)
    }
}

impl Codec for Enum {
    fn decode(&self, buf: &mut Input) -> Result<Value, DecodeError> {
        let text = std::str::from_utf8(buf).map_err(|e| errors::decode_error(e))?;
        let member = self
            .members
            .iter()
            .find(|m| ***m == *text)
            .cloned()
            .ok_or_else(|| errors::ExtraEnumValue.build())?;
        let len = buf.remaining();
        buf.advance(len);
        Ok(Value::Enum(model::EnumValue(member)))
    }
    fn encode(&self, buf: &mut Output, value: &Value) -> Result<(), EncodeError> {
        let name = match value {
            Value::Enum(val) => val.name(),
            Value::Str(val) => &val[..],
            _ => return Err(invalid_value("enum", value)),
        };
        ensure!(
            self.members.iter().any(|m| **m == *name),
            errors::MissingEnumValue
        );
        buf.extend_from_slice(name.as_bytes());
        Ok(())
    }
}

/// Decodes the common array/set envelope and the contained elements.
fn decode_array_like(
    buf: &mut Input,
    element: &Arc<dyn Codec>,
) -> Result<Vec<Value>, DecodeError> {
    ensure!(buf.remaining() >= 12, errors::Underflow);
    let ndims = buf.get_i32();
    let _reserved0 = buf.get_u32();
    let _reserved1 = buf.get_u32();
    if ndims == 0 {
        ensure!(buf.remaining() == 0, errors::ExtraData);
        return Ok(Vec::new());
    }
    ensure!(ndims == 1, errors::InvalidArrayOrSetShape);
    ensure!(buf.remaining() >= 8, errors::Underflow);
    let upper = buf.get_i32();
    let lower = buf.get_i32();
    let count = (upper as i64 - lower as i64 + 1).max(0) as usize;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        ensure!(buf.remaining() >= 4, errors::Underflow);
        let len = buf.get_i32();
        ensure!(len >= 0, errors::InvalidArrayOrSetShape);
        ensure!(buf.remaining() >= len as usize, errors::Underflow);
        let mut chunk = buf.slice_to(len as usize);
        items.push(element.decode(&mut chunk)?);
        ensure!(chunk.remaining() == 0, errors::ExtraData);
    }
    ensure!(buf.remaining() == 0, errors::ExtraData);
    Ok(items)
}

fn encode_array_like(
    buf: &mut Output,
    element: &Arc<dyn Codec>,
    items: &[Value],
) -> Result<(), EncodeError> {
    if items.is_empty() {
        buf.reserve(12);
        buf.put_i32(0); // ndims
        buf.put_u32(0);
        buf.put_u32(0);
        return Ok(());
    }
    ensure!(items.len() <= i32::MAX as usize, errors::ArrayTooLong);
    buf.reserve(20);
    buf.put_i32(1); // ndims
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_i32(items.len() as i32); // upper
    buf.put_i32(1); // lower
    for item in items {
        encode_element(buf, element, item)?;
    }
    Ok(())
}

/// Writes one length-prefixed element, backfilling the length.
fn encode_element(
    buf: &mut Output,
    codec: &Arc<dyn Codec>,
    value: &Value,
) -> Result<(), EncodeError> {
    buf.reserve(4);
    let pos = buf.len();
    buf.put_u32(0);
    codec.encode(buf, value)?;
    let len = i32::try_from(buf.len() - pos - 4)
        .map_err(|_| errors::ElementTooLong.build())?;
    buf[pos..pos + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

impl Codec for Array {
    fn decode(&self, buf: &mut Input) -> Result<Value, DecodeError> {
        Ok(Value::Array(decode_array_like(buf, &self.element)?))
    }
    fn encode(&self, buf: &mut Output, value: &Value) -> Result<(), EncodeError> {
        let Value::Array(items) = value else {
            return Err(invalid_value("array", value));
        };
        encode_array_like(buf, &self.element, items)
    }
}

impl Codec for Set {
    fn decode(&self, buf: &mut Input) -> Result<Value, DecodeError> {
        Ok(Value::Set(decode_array_like(buf, &self.element)?))
    }
    fn encode(&self, buf: &mut Output, value: &Value) -> Result<(), EncodeError> {
        let Value::Set(items) = value else {
            return Err(invalid_value("set", value));
        };
        encode_array_like(buf, &self.element, items)
    }
}

impl Codec for Object {
    fn decode(&self, buf: &mut Input) -> Result<Value, DecodeError> {
        ensure!(buf.remaining() >= 4, errors::Underflow);
        let nfields = buf.get_u32() as usize;
        ensure!(nfields == self.codecs.len(), errors::ObjectSizeMismatch);
        let mut fields = Vec::with_capacity(nfields);
        for codec in &self.codecs {
            ensure!(buf.remaining() >= 8, errors::Underflow);
            let _reserved = buf.get_i32();
            let len = buf.get_i32();
            if len < 0 {
                fields.push(None);
            } else {
                ensure!(buf.remaining() >= len as usize, errors::Underflow);
                let mut chunk = buf.slice_to(len as usize);
                fields.push(Some(codec.decode(&mut chunk)?));
                ensure!(chunk.remaining() == 0, errors::ExtraData);
            }
        }
        ensure!(buf.remaining() == 0, errors::ExtraData);
        Ok(Value::Object {
            shape: self.shape.clone(),
            fields,
        })
    }
    fn encode(&self, buf: &mut Output, value: &Value) -> Result<(), EncodeError> {
        let Value::Object { shape, fields } = value else {
            return Err(invalid_value("object", value));
        };
        ensure!(shape == &self.shape, errors::ObjectShapeMismatch);
        ensure!(fields.len() == self.codecs.len(), errors::ObjectShapeMismatch);
        buf.reserve(4 + fields.len() * 8);
        buf.put_u32(fields.len() as u32);
        for (codec, field) in self.codecs.iter().zip(fields) {
            buf.reserve(8);
            buf.put_i32(0); // reserved
            match field {
                Some(value) => encode_element(buf, codec, value)?,
                None => buf.put_i32(-1),
            }
        }
        Ok(())
    }
}

impl Codec for Tuple {
    fn decode(&self, buf: &mut Input) -> Result<Value, DecodeError> {
        ensure!(buf.remaining() >= 4, errors::Underflow);
        let nfields = buf.get_u32() as usize;
        ensure!(nfields == self.elements.len(), errors::TupleSizeMismatch);
        let mut fields = Vec::with_capacity(nfields);
        for codec in &self.elements {
            ensure!(buf.remaining() >= 8, errors::Underflow);
            let _reserved = buf.get_i32();
            let len = buf.get_i32();
            ensure!(len >= 0, errors::TupleSizeMismatch);
            ensure!(buf.remaining() >= len as usize, errors::Underflow);
            let mut chunk = buf.slice_to(len as usize);
            fields.push(codec.decode(&mut chunk)?);
            ensure!(chunk.remaining() == 0, errors::ExtraData);
        }
        ensure!(buf.remaining() == 0, errors::ExtraData);
        Ok(Value::Tuple(fields))
    }
    fn encode(&self, buf: &mut Output, value: &Value) -> Result<(), EncodeError> {
        let Value::Tuple(fields) = value else {
            return Err(invalid_value("tuple", value));
        };
        ensure!(fields.len() == self.elements.len(), errors::TupleShapeMismatch);
        buf.reserve(4 + fields.len() * 8);
        buf.put_u32(fields.len() as u32);
        for (codec, field) in self.elements.iter().zip(fields) {
            buf.reserve(8);
            buf.put_i32(0); // reserved
            encode_element(buf, codec, field)?;
        }
        Ok(())
    }
}

impl Codec for NamedTuple {
    fn decode(&self, buf: &mut Input) -> Result<Value, DecodeError> {
        ensure!(buf.remaining() >= 4, errors::Underflow);
        let nfields = buf.get_u32() as usize;
        ensure!(nfields == self.elements.len(), errors::TupleSizeMismatch);
        let mut fields = Vec::with_capacity(nfields);
        for codec in &self.elements {
            ensure!(buf.remaining() >= 8, errors::Underflow);
            let _reserved = buf.get_i32();
            let len = buf.get_i32();
            ensure!(len >= 0, errors::TupleSizeMismatch);
            ensure!(buf.remaining() >= len as usize, errors::Underflow);
            let mut chunk = buf.slice_to(len as usize);
            fields.push(codec.decode(&mut chunk)?);
            ensure!(chunk.remaining() == 0, errors::ExtraData);
        }
        ensure!(buf.remaining() == 0, errors::ExtraData);
        Ok(Value::NamedTuple {
            shape: self.shape.clone(),
            fields,
        })
    }
    fn encode(&self, buf: &mut Output, value: &Value) -> Result<(), EncodeError> {
        let Value::NamedTuple { shape, fields } = value else {
            return Err(invalid_value("named_tuple", value));
        };
        ensure!(shape == &self.shape, errors::ObjectShapeMismatch);
        ensure!(fields.len() == self.elements.len(), errors::TupleShapeMismatch);
        buf.reserve(4 + fields.len() * 8);
        buf.put_u32(fields.len() as u32);
        for (codec, field) in self.elements.iter().zip(fields) {
            buf.reserve(8);
            buf.put_i32(0); // reserved
            encode_element(buf, codec, field)?;
        }
        Ok(())
    }
    fn input_fields(&self) -> Option<&NamedTupleShape> {
        Some(&self.shape)
    }
}
