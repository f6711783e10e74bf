use std::error::Error;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use uuid::Uuid;

use edgedb_protocol::codec::{self, build_codec, Codec, CodecRegistry};
use edgedb_protocol::descriptors::{
    ArrayTypeDescriptor, BaseScalarTypeDescriptor, Descriptor, NamedTupleTypeDescriptor,
    ObjectShapeDescriptor, ShapeElement, Typedesc, TupleElement, TypePos,
};
use edgedb_protocol::encoding::{Input, Output};
use edgedb_protocol::features::ProtocolVersion;
use edgedb_protocol::model::{BigInt, Json};
use edgedb_protocol::value::{self, Value};

mod base;

fn decode(codec: &Arc<dyn Codec>, data: &[u8]) -> Result<Value, Box<dyn Error>> {
    let mut input = Input::new(
        ProtocolVersion::current(),
        Bytes::copy_from_slice(data),
    );
    let value = codec.decode(&mut input)?;
    assert!(input.remaining() == 0);
    Ok(value)
}

fn encode(codec: &Arc<dyn Codec>, value: &Value) -> Result<Bytes, Box<dyn Error>> {
    let proto = ProtocolVersion::current();
    let mut buf = BytesMut::new();
    codec.encode(&mut Output::new(&proto, &mut buf), value)?;
    Ok(buf.freeze())
}

fn roundtrip(codec: &Arc<dyn Codec>, value: Value) -> Result<(), Box<dyn Error>> {
    let encoded = encode(codec, &value)?;
    assert_eq!(decode(codec, &encoded)?, value);
    Ok(())
}

#[test]
fn int_codecs() -> Result<(), Box<dyn Error>> {
    let codec = codec::scalar_codec(&codec::STD_INT64)?;
    assert_eq!(
        decode(&codec, b"\0\0\0\0\0\0\0\x2a")?,
        Value::Int64(42)
    );
    roundtrip(&codec, Value::Int64(-1))?;

    let codec = codec::scalar_codec(&codec::STD_INT16)?;
    assert_eq!(decode(&codec, b"\xff\xff")?, Value::Int16(-1));
    assert!(decode(&codec, b"\xff\xff\xff").is_err());
    Ok(())
}

#[test]
fn str_codec() -> Result<(), Box<dyn Error>> {
    let codec = codec::scalar_codec(&codec::STD_STR)?;
    assert_eq!(
        decode(&codec, b"Hello, Dotnet!")?,
        Value::Str(String::from("Hello, Dotnet!"))
    );
    assert_eq!(decode(&codec, b"")?, Value::Str(String::new()));
    roundtrip(&codec, Value::Str(String::from("data\0binary")))?;
    assert!(decode(&codec, b"\xff\xfe").is_err());
    Ok(())
}

#[test]
fn bool_codec() -> Result<(), Box<dyn Error>> {
    let codec = codec::scalar_codec(&codec::STD_BOOL)?;
    assert_eq!(decode(&codec, b"\x01")?, Value::Bool(true));
    assert_eq!(decode(&codec, b"\x00")?, Value::Bool(false));
    assert!(decode(&codec, b"\x02").is_err());
    Ok(())
}

#[test]
fn uuid_codec() -> Result<(), Box<dyn Error>> {
    let codec = codec::scalar_codec(&codec::STD_UUID)?;
    let id: Uuid = "1783b028-46d0-5898-b70c-1c75cda51bef".parse()?;
    roundtrip(&codec, Value::Uuid(id))?;
    assert!(decode(&codec, b"\0\0\0").is_err());
    Ok(())
}

#[test]
fn duration_codec() -> Result<(), Box<dyn Error>> {
    let codec = codec::scalar_codec(&codec::STD_DURATION)?;
    assert_eq!(
        decode(&codec, b"\0\0\0\0\0\x0f\x42\x40\0\0\0\0\0\0\0\0")?,
        Value::Duration(edgedb_protocol::model::Duration::from_micros(1_000_000))
    );
    // non-zero days or months are reserved
    assert!(decode(&codec, b"\0\0\0\0\0\x0f\x42\x40\0\0\0\x01\0\0\0\0").is_err());
    Ok(())
}

#[test]
fn json_codec() -> Result<(), Box<dyn Error>> {
    let codec = codec::scalar_codec(&codec::STD_JSON)?;
    assert_eq!(
        decode(&codec, b"\x01{\"a\": 1}")?,
        Value::Json(Json::new_unchecked(String::from("{\"a\": 1}")))
    );
    assert!(decode(&codec, b"\x02{}").is_err());
    Ok(())
}

#[test]
fn bigint_codec() -> Result<(), Box<dyn Error>> {
    let codec = codec::scalar_codec(&codec::STD_BIGINT)?;
    assert_eq!(
        decode(&codec, b"\0\x01\0\0\0\0\0\0\0\x2a")?,
        Value::BigInt(BigInt::from(42))
    );
    roundtrip(&codec, Value::BigInt(BigInt::from(-10_020_030)))?;
    // bad sign bytes
    assert!(decode(&codec, b"\0\x01\0\0\x60\0\0\0\0\x2a").is_err());
    Ok(())
}

#[test]
fn array_codec() -> Result<(), Box<dyn Error>> {
    let codec = build_codec(
        Some(TypePos(1)),
        &[
            Descriptor::BaseScalar(BaseScalarTypeDescriptor {
                id: codec::STD_INT32,
            }),
            Descriptor::Array(ArrayTypeDescriptor {
                id: "1783b028-46d0-5898-b70c-1c75cda51bef".parse()?,
                type_pos: TypePos(0),
                dimensions: vec![-1],
            }),
        ],
    )?;
    assert_eq!(
        decode(
            &codec,
            bconcat!(
                b"\0\0\0\x01\0\0\0\0\0\0\0\0"
                b"\0\0\0\x03\0\0\0\x01"
                b"\0\0\0\x04\0\0\0\x01"
                b"\0\0\0\x04\0\0\0\x02"
                b"\0\0\0\x04\0\0\0\x03"
            )
            .as_ref()
        )?,
        Value::Array(vec![Value::Int32(1), Value::Int32(2), Value::Int32(3)])
    );
    assert_eq!(
        decode(&codec, b"\0\0\0\0\0\0\0\0\0\0\0\0")?,
        Value::Array(vec![])
    );
    roundtrip(&codec, Value::Array(vec![Value::Int32(7)]))?;
    roundtrip(&codec, Value::Array(vec![]))?;
    Ok(())
}

#[test]
fn object_codec() -> Result<(), Box<dyn Error>> {
    let codec = build_codec(
        Some(TypePos(2)),
        &[
            Descriptor::BaseScalar(BaseScalarTypeDescriptor {
                id: codec::STD_STR,
            }),
            Descriptor::BaseScalar(BaseScalarTypeDescriptor {
                id: codec::STD_INT64,
            }),
            Descriptor::ObjectShape(ObjectShapeDescriptor {
                id: "1d4d67e7-7bdd-5d39-9097-4f82fad8af37".parse()?,
                elements: vec![
                    ShapeElement {
                        flag_implicit: false,
                        flag_link_property: false,
                        flag_link: false,
                        name: String::from("title"),
                        type_pos: TypePos(0),
                    },
                    ShapeElement {
                        flag_implicit: false,
                        flag_link_property: false,
                        flag_link: false,
                        name: String::from("count"),
                        type_pos: TypePos(1),
                    },
                ],
            }),
        ],
    )?;
    let shape = value::ObjectShape::new(vec![
        value::ShapeElement {
            flag_implicit: false,
            flag_link_property: false,
            flag_link: false,
            name: String::from("title"),
        },
        value::ShapeElement {
            flag_implicit: false,
            flag_link_property: false,
            flag_link: false,
            name: String::from("count"),
        },
    ]);
    assert_eq!(
        decode(
            &codec,
            bconcat!(
                b"\0\0\0\x02"
                b"\0\0\0\0\0\0\0\x05hello"
                b"\0\0\0\0\xff\xff\xff\xff"
            )
            .as_ref()
        )?,
        Value::Object {
            shape: shape.clone(),
            fields: vec![Some(Value::Str(String::from("hello"))), None],
        }
    );
    roundtrip(
        &codec,
        Value::Object {
            shape,
            fields: vec![
                Some(Value::Str(String::from("x"))),
                Some(Value::Int64(3)),
            ],
        },
    )?;
    Ok(())
}

#[test]
fn registry_builds_and_caches() -> Result<(), Box<dyn Error>> {
    let registry = CodecRegistry::new();
    assert!(registry.contains(&codec::STD_STR));
    assert!(registry.contains(&codec::NOTHING));

    let root: Uuid = "ee8db72e-13b0-5af1-aa96-54f63e9671e8".parse()?;
    let typedesc = Typedesc::decode_with_id(
        root,
        &mut Input::new(
            ProtocolVersion::current(),
            bconcat!(
                b"\x02\0\0\0\0\0\0\0\0\0\0\0\0\0\0\x01\x05"
                b"\x04\xee\x8d\xb7\x2e\x13\xb0\x5a\xf1\xaa\x96\x54\xf6\x3e\x96\x71\xe8"
                b"\0\x02\0\0\0\x01x\0\0\0\0\0\x01y\0\0"
            )
            .freeze(),
        ),
    )?;
    let codec = registry.build(&typedesc)?;
    assert!(registry.contains(&root));

    // named tuples expose their field names for argument encoding
    let shape = codec.input_fields().expect("named tuple input");
    assert_eq!(shape.field_position("x"), Some(0));
    assert_eq!(shape.field_position("y"), Some(1));
    assert_eq!(shape.field_position("z"), None);

    let again = registry.build(&typedesc)?;
    assert!(Arc::ptr_eq(&codec, &again));

    // the whole argument blob for {x: 2, y: 3}
    let value = Value::NamedTuple {
        shape: value::NamedTupleShape::new(
            [String::from("x"), String::from("y")],
        ),
        fields: vec![Value::Int64(2), Value::Int64(3)],
    };
    let encoded = encode(&codec, &value)?;
    assert_eq!(
        &encoded[..],
        &bconcat!(
            b"\0\0\0\x02"
            b"\0\0\0\0\0\0\0\x08\0\0\0\0\0\0\0\x02"
            b"\0\0\0\0\0\0\0\x08\0\0\0\0\0\0\0\x03"
        )[..]
    );
    assert_eq!(decode(&codec, &encoded)?, value);
    Ok(())
}

#[test]
fn registry_isolated_instances() -> Result<(), Box<dyn Error>> {
    let one = CodecRegistry::new();
    let two = CodecRegistry::new();
    let root: Uuid = "9176ff8c-95b6-11ef-9c20-5b0e8c3daac8".parse()?;
    let typedesc = Typedesc::decode_with_id(
        root,
        &mut Input::new(
            ProtocolVersion::current(),
            bconcat!(
                b"\x02\0\0\0\0\0\0\0\0\0\0\0\0\0\0\x01\x05"
                b"\x07\x91\x76\xff\x8c\x95\xb6\x11\xef\x9c\x20\x5b\x0e\x8c\x3d\xaa\xc8"
                b"\0\0"
            )
            .freeze(),
        ),
    )?;
    one.build(&typedesc)?;
    assert!(one.contains(&root));
    assert!(!two.contains(&root));
    Ok(())
}

#[test]
fn named_tuple_shape_check() -> Result<(), Box<dyn Error>> {
    let codec = build_codec(
        Some(TypePos(1)),
        &[
            Descriptor::BaseScalar(BaseScalarTypeDescriptor {
                id: codec::STD_INT64,
            }),
            Descriptor::NamedTuple(NamedTupleTypeDescriptor {
                id: "ee8db72e-13b0-5af1-aa96-54f63e9671e8".parse()?,
                elements: vec![TupleElement {
                    name: String::from("x"),
                    type_pos: TypePos(0),
                }],
            }),
        ],
    )?;
    // a value with a different shape must be rejected
    let wrong = Value::NamedTuple {
        shape: value::NamedTupleShape::new([String::from("other")]),
        fields: vec![Value::Int64(1)],
    };
    let proto = ProtocolVersion::current();
    let mut buf = BytesMut::new();
    assert!(codec
        .encode(&mut Output::new(&proto, &mut buf), &wrong)
        .is_err());
    Ok(())
}
