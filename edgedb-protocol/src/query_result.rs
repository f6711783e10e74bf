/*!
Contains the [QueryResult](crate::query_result::QueryResult) trait.
*/

use std::sync::Arc;

use bytes::Bytes;

use edgedb_errors::{Error, ErrorKind, ProtocolEncodingError};

use crate::codec::Codec;
use crate::encoding::Input;
use crate::features::ProtocolVersion;
use crate::model;
use crate::value::Value;

/// A trait representing a single row of a query result.
///
/// Implemented for [Value] (the fully dynamic form) and for the scalar
/// types a codec can produce directly.
pub trait QueryResult: Sized + Send {
    fn decode(
        codec: &Arc<dyn Codec>,
        proto: &ProtocolVersion,
        msg: &Bytes,
    ) -> Result<Self, Error>;
}

impl QueryResult for Value {
    fn decode(
        codec: &Arc<dyn Codec>,
        proto: &ProtocolVersion,
        msg: &Bytes,
    ) -> Result<Value, Error> {
        let mut input = Input::new(proto.clone(), msg.clone());
        codec
            .decode(&mut input)
            .map_err(ProtocolEncodingError::with_source)
    }
}

macro_rules! implement_query_result {
    ($($ty:ty),* $(,)?) => {
        $(
            impl QueryResult for $ty {
                fn decode(
                    codec: &Arc<dyn Codec>,
                    proto: &ProtocolVersion,
                    msg: &Bytes,
                ) -> Result<$ty, Error> {
                    Value::decode(codec, proto, msg)?.try_into()
                }
            }
        )*
    }
}

implement_query_result! {
    String,
    Bytes,
    i16,
    i32,
    i64,
    f32,
    f64,
    bool,
    uuid::Uuid,
    model::BigInt,
    model::Decimal,
    model::Datetime,
    model::LocalDatetime,
    model::LocalDate,
    model::LocalTime,
    model::Duration,
    model::Json,
}
