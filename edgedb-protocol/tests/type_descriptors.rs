use bytes::{Buf, Bytes};
use pretty_assertions::assert_eq;
use std::error::Error;
use uuid::Uuid;

use edgedb_protocol::descriptors::BaseScalarTypeDescriptor;
use edgedb_protocol::descriptors::ScalarTypeDescriptor;
use edgedb_protocol::descriptors::{ArrayTypeDescriptor, TupleTypeDescriptor};
use edgedb_protocol::descriptors::{Descriptor, Typedesc, TypePos};
use edgedb_protocol::descriptors::{EnumerationTypeDescriptor, TypeAnnotationDescriptor};
use edgedb_protocol::descriptors::{ObjectShapeDescriptor, ShapeElement};
use edgedb_protocol::encoding::{Decode, Input};
use edgedb_protocol::errors::DecodeError;
use edgedb_protocol::features::ProtocolVersion;

mod base;

fn decode(bytes: &[u8]) -> Result<Vec<Descriptor>, DecodeError> {
    let bytes = Bytes::copy_from_slice(bytes);
    let mut input = Input::new(ProtocolVersion::current(), bytes);
    let mut result = Vec::new();
    while input.remaining() > 0 {
        result.push(Descriptor::decode(&mut input)?);
    }
    assert!(input.remaining() == 0);
    Ok(result)
}

#[test]
fn single_int() -> Result<(), Box<dyn Error>> {
    assert_eq!(
        decode(b"\x02\0\0\0\0\0\0\0\0\0\0\0\0\0\0\x01\x05")?,
        vec![Descriptor::BaseScalar(BaseScalarTypeDescriptor {
            id: "00000000-0000-0000-0000-000000000105".parse::<Uuid>()?,
        })]
    );
    Ok(())
}

#[test]
fn derived_scalar() -> Result<(), Box<dyn Error>> {
    assert_eq!(
        decode(&bconcat!(
            b"\x02\0\0\0\0\0\0\0\0\0\0\0\0\0\0\x01\x05"
            b"\x07\x91\x76\xff\x8c\x95\xb6\x11\xef\x9c\x20\x5b\x0e\x8c\x3d\xaa\xc8"
            b"\0\0"
        ))?,
        vec![
            Descriptor::BaseScalar(BaseScalarTypeDescriptor {
                id: "00000000-0000-0000-0000-000000000105".parse::<Uuid>()?,
            }),
            Descriptor::Scalar(ScalarTypeDescriptor {
                id: "9176ff8c-95b6-11ef-9c20-5b0e8c3daac8".parse::<Uuid>()?,
                base_type_pos: TypePos(0),
            }),
        ]
    );
    Ok(())
}

#[test]
fn object_shape() -> Result<(), Box<dyn Error>> {
    assert_eq!(
        decode(&bconcat!(
            b"\x02\0\0\0\0\0\0\0\0\0\0\0\0\0\0\x01\x01"
            b"\x02\0\0\0\0\0\0\0\0\0\0\0\0\0\0\x01\x00"
            b"\x01\x1d\x4d\x67\xe7\x7b\xdd\x5d\x39\x90\x97\x4f\x82\xfa\xd8\xaf\x37"
            b"\0\x03"
            b"\0\0\0\x09__tname__\x01\0\0"
            b"\0\0\0\x02id\x01\0\x01"
            b"\0\0\0\x05title\0\0\0"
        ))?,
        vec![
            Descriptor::BaseScalar(BaseScalarTypeDescriptor {
                id: "00000000-0000-0000-0000-000000000101".parse::<Uuid>()?,
            }),
            Descriptor::BaseScalar(BaseScalarTypeDescriptor {
                id: "00000000-0000-0000-0000-000000000100".parse::<Uuid>()?,
            }),
            Descriptor::ObjectShape(ObjectShapeDescriptor {
                id: "1d4d67e7-7bdd-5d39-9097-4f82fad8af37".parse::<Uuid>()?,
                elements: vec![
                    ShapeElement {
                        flag_implicit: true,
                        flag_link_property: false,
                        flag_link: false,
                        name: String::from("__tname__"),
                        type_pos: TypePos(0),
                    },
                    ShapeElement {
                        flag_implicit: true,
                        flag_link_property: false,
                        flag_link: false,
                        name: String::from("id"),
                        type_pos: TypePos(1),
                    },
                    ShapeElement {
                        flag_implicit: false,
                        flag_link_property: false,
                        flag_link: false,
                        name: String::from("title"),
                        type_pos: TypePos(0),
                    },
                ],
            }),
        ]
    );
    Ok(())
}

#[test]
fn array_of_tuple() -> Result<(), Box<dyn Error>> {
    assert_eq!(
        decode(&bconcat!(
            b"\x02\0\0\0\0\0\0\0\0\0\0\0\0\0\0\x01\x05"
            b"\x02\0\0\0\0\0\0\0\0\0\0\0\0\0\0\x01\x01"
            b"\x03\xee\x8d\xb7\x2e\x13\xb0\x5a\xf1\xaa\x96\x54\xf6\x3e\x96\x71\xe8"
            b"\0\x02\0\0\0\x01"
            b"\x05\x17\x83\xb0\x28\x46\xd0\x58\x98\xb7\x0c\x1c\x75\xcd\xa5\x1b\xef"
            b"\0\x02\0\x01\xff\xff\xff\xff"
        ))?,
        vec![
            Descriptor::BaseScalar(BaseScalarTypeDescriptor {
                id: "00000000-0000-0000-0000-000000000105".parse::<Uuid>()?,
            }),
            Descriptor::BaseScalar(BaseScalarTypeDescriptor {
                id: "00000000-0000-0000-0000-000000000101".parse::<Uuid>()?,
            }),
            Descriptor::Tuple(TupleTypeDescriptor {
                id: "ee8db72e-13b0-5af1-aa96-54f63e9671e8".parse::<Uuid>()?,
                element_types: vec![TypePos(0), TypePos(1)],
            }),
            Descriptor::Array(ArrayTypeDescriptor {
                id: "1783b028-46d0-5898-b70c-1c75cda51bef".parse::<Uuid>()?,
                type_pos: TypePos(2),
                dimensions: vec![-1],
            }),
        ]
    );
    Ok(())
}

#[test]
fn enumeration() -> Result<(), Box<dyn Error>> {
    assert_eq!(
        decode(&bconcat!(
            b"\x06\xc3\xcc\xa7\x52\x95\xb7\x11\xef\xb4\x87\x1d\x1b\x9f\xa2\x30\x03"
            b"\0\x02\0\0\0\x03red\0\0\0\x05green"
        ))?,
        vec![Descriptor::Enumeration(EnumerationTypeDescriptor {
            id: "c3cca752-95b7-11ef-b487-1d1b9fa23003".parse::<Uuid>()?,
            members: vec![String::from("red"), String::from("green")],
        })]
    );
    Ok(())
}

#[test]
fn annotation_keeps_positions() -> Result<(), Box<dyn Error>> {
    let root: Uuid = "00000000-0000-0000-0000-000000000101".parse()?;
    let blob = bconcat!(
        b"\xff\xc3\xcc\xa7\x52\x95\xb7\x11\xef\xb4\x87\x1d\x1b\x9f\xa2\x30\x03"
        b"\0\0\0\x0edefault::color"
        b"\x02\0\0\0\0\0\0\0\0\0\0\0\0\0\0\x01\x01"
    );
    let mut input = Input::new(ProtocolVersion::current(), blob.freeze());
    let typedesc = Typedesc::decode_with_id(root, &mut input)?;
    assert_eq!(typedesc.root_pos(), Some(TypePos(1)));
    assert_eq!(
        typedesc.descriptors()[0],
        Descriptor::TypeAnnotation(TypeAnnotationDescriptor {
            annotated_tag: 0xff,
            id: "c3cca752-95b7-11ef-b487-1d1b9fa23003".parse::<Uuid>()?,
            annotation: String::from("default::color"),
        })
    );
    Ok(())
}

#[test]
fn unknown_mandatory_tag() {
    let err = decode(b"\x08\0\0\0\0\0\0\0\0\0\0\0\0\0\0\x01\x01\0\0").unwrap_err();
    assert!(matches!(
        err,
        DecodeError::InvalidTypeDescriptor { descriptor: 0x08, .. }
    ));
}
