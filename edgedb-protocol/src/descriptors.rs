/*!
Type descriptors: the server's structural description of a query's input
and output types.

A descriptor blob is a flat sequence of entries. Later entries refer to
earlier ones by position, so a blob always arrives children-first and can
be turned into a codec tree in a single pass.
*/

use std::sync::Arc;

use bytes::Buf;
use snafu::ensure;
use uuid::Uuid;

use crate::codec::{build_codec, Codec};
use crate::encoding::{Decode, Input};
use crate::errors::{self, CodecError, DecodeError};
use crate::features::ProtocolVersion;

/// Index of a descriptor within the blob it arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypePos(pub u16);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    Set(SetDescriptor),
    ObjectShape(ObjectShapeDescriptor),
    BaseScalar(BaseScalarTypeDescriptor),
    Tuple(TupleTypeDescriptor),
    NamedTuple(NamedTupleTypeDescriptor),
    Array(ArrayTypeDescriptor),
    Enumeration(EnumerationTypeDescriptor),
    Scalar(ScalarTypeDescriptor),
    TypeAnnotation(TypeAnnotationDescriptor),
}

/// A parsed descriptor blob together with its root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Typedesc {
    pub(crate) proto: ProtocolVersion,
    pub(crate) array: Vec<Descriptor>,
    pub(crate) root_id: Uuid,
    pub(crate) root_pos: Option<TypePos>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDescriptor {
    pub id: Uuid,
    pub type_pos: TypePos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectShapeDescriptor {
    pub id: Uuid,
    pub elements: Vec<ShapeElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeElement {
    pub flag_implicit: bool,
    pub flag_link_property: bool,
    pub flag_link: bool,
    pub name: String,
    pub type_pos: TypePos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseScalarTypeDescriptor {
    pub id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarTypeDescriptor {
    pub id: Uuid,
    pub base_type_pos: TypePos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleTypeDescriptor {
    pub id: Uuid,
    pub element_types: Vec<TypePos>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedTupleTypeDescriptor {
    pub id: Uuid,
    pub elements: Vec<TupleElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleElement {
    pub name: String,
    pub type_pos: TypePos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayTypeDescriptor {
    pub id: Uuid,
    pub type_pos: TypePos,
    pub dimensions: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumerationTypeDescriptor {
    pub id: Uuid,
    pub members: Vec<String>,
}

/// A forward-compatible annotation entry (any tag with the high bit
/// set). Decoded only to keep blob positions aligned; never referenced
/// by a type position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeAnnotationDescriptor {
    pub annotated_tag: u8,
    pub id: Uuid,
    pub annotation: String,
}

impl Descriptor {
    pub fn id(&self) -> &Uuid {
        use Descriptor::*;
        match self {
            Set(d) => &d.id,
            ObjectShape(d) => &d.id,
            BaseScalar(d) => &d.id,
            Tuple(d) => &d.id,
            NamedTuple(d) => &d.id,
            Array(d) => &d.id,
            Enumeration(d) => &d.id,
            Scalar(d) => &d.id,
            TypeAnnotation(d) => &d.id,
        }
    }
}

impl Typedesc {
    pub fn id(&self) -> &Uuid {
        &self.root_id
    }
    pub fn descriptors(&self) -> &[Descriptor] {
        &self.array
    }
    pub fn root_pos(&self) -> Option<TypePos> {
        self.root_pos
    }
    pub fn proto(&self) -> &ProtocolVersion {
        &self.proto
    }
    /// The descriptor of a query that produces no data.
    pub fn nothing(proto: &ProtocolVersion) -> Typedesc {
        Typedesc {
            proto: proto.clone(),
            array: Vec::new(),
            root_id: Uuid::from_u128(0),
            root_pos: None,
        }
    }
    pub fn build_codec(&self) -> Result<Arc<dyn Codec>, CodecError> {
        build_codec(self.root_pos, &self.array)
    }
    /// Parses a whole blob; `root_id` is the descriptor id announced in
    /// the enclosing message.
    pub fn decode_with_id(root_id: Uuid, buf: &mut Input) -> Result<Typedesc, DecodeError> {
        let mut array = Vec::new();
        let mut root_pos = None;
        while buf.remaining() > 0 {
            ensure!(array.len() <= u16::MAX as usize, errors::TooManyDescriptors {
                index: array.len()
            });
            let descriptor = Descriptor::decode(buf)?;
            if descriptor.id() == &root_id {
                root_pos = Some(TypePos(array.len() as u16));
            }
            array.push(descriptor);
        }
        Ok(Typedesc {
            proto: buf.proto().clone(),
            array,
            root_id,
            root_pos,
        })
    }
}

impl Decode for Descriptor {
    fn decode(buf: &mut Input) -> Result<Descriptor, DecodeError> {
        ensure!(buf.remaining() >= 17, errors::Underflow);
        let tag = buf.get_u8();
        let id = Uuid::decode(buf)?;
        match tag {
            0 => {
                ensure!(buf.remaining() >= 2, errors::Underflow);
                let type_pos = TypePos(buf.get_u16());
                Ok(Descriptor::Set(SetDescriptor { id, type_pos }))
            }
            1 => {
                ensure!(buf.remaining() >= 2, errors::Underflow);
                let element_count = buf.get_u16();
                let mut elements = Vec::with_capacity(element_count as usize);
                for _ in 0..element_count {
                    let name = String::decode(buf)?;
                    ensure!(buf.remaining() >= 3, errors::Underflow);
                    let flags = buf.get_u8();
                    let type_pos = TypePos(buf.get_u16());
                    elements.push(ShapeElement {
                        flag_implicit: flags & 0b001 != 0,
                        flag_link_property: flags & 0b010 != 0,
                        flag_link: flags & 0b100 != 0,
                        name,
                        type_pos,
                    });
                }
                Ok(Descriptor::ObjectShape(ObjectShapeDescriptor {
                    id,
                    elements,
                }))
            }
            2 => Ok(Descriptor::BaseScalar(BaseScalarTypeDescriptor { id })),
            3 => {
                ensure!(buf.remaining() >= 2, errors::Underflow);
                let element_count = buf.get_u16();
                ensure!(
                    buf.remaining() >= 2 * element_count as usize,
                    errors::Underflow
                );
                let element_types = (0..element_count)
                    .map(|_| TypePos(buf.get_u16()))
                    .collect();
                Ok(Descriptor::Tuple(TupleTypeDescriptor { id, element_types }))
            }
            4 => {
                ensure!(buf.remaining() >= 2, errors::Underflow);
                let element_count = buf.get_u16();
                let mut elements = Vec::with_capacity(element_count as usize);
                for _ in 0..element_count {
                    let name = String::decode(buf)?;
                    ensure!(buf.remaining() >= 2, errors::Underflow);
                    let type_pos = TypePos(buf.get_u16());
                    elements.push(TupleElement { name, type_pos });
                }
                Ok(Descriptor::NamedTuple(NamedTupleTypeDescriptor {
                    id,
                    elements,
                }))
            }
            5 => {
                ensure!(buf.remaining() >= 4, errors::Underflow);
                let type_pos = TypePos(buf.get_u16());
                let dimension_count = buf.get_u16();
                ensure!(
                    buf.remaining() >= 4 * dimension_count as usize,
                    errors::Underflow
                );
                let dimensions = (0..dimension_count).map(|_| buf.get_i32()).collect();
                Ok(Descriptor::Array(ArrayTypeDescriptor {
                    id,
                    type_pos,
                    dimensions,
                }))
            }
            6 => {
                ensure!(buf.remaining() >= 2, errors::Underflow);
                let member_count = buf.get_u16();
                let mut members = Vec::with_capacity(member_count as usize);
                for _ in 0..member_count {
                    members.push(String::decode(buf)?);
                }
                Ok(Descriptor::Enumeration(EnumerationTypeDescriptor {
                    id,
                    members,
                }))
            }
            7 => {
                ensure!(buf.remaining() >= 2, errors::Underflow);
                let base_type_pos = TypePos(buf.get_u16());
                Ok(Descriptor::Scalar(ScalarTypeDescriptor {
                    id,
                    base_type_pos,
                }))
            }
            tag if tag & 0x80 != 0 => {
                let annotation = String::decode(buf)?;
                Ok(Descriptor::TypeAnnotation(TypeAnnotationDescriptor {
                    annotated_tag: tag,
                    id,
                    annotation,
                }))
            }
            descriptor => errors::InvalidTypeDescriptor { descriptor }.fail(),
        }
    }
}
