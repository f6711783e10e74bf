use crate::error::Tag;
use crate::traits::{ErrorKind, Sealed};

macro_rules! define_errors {
    ($( (struct $id:ident, $code:expr, $tags: expr), )*) => {
        $(
            pub struct $id;

            impl Sealed for $id {
                const CODE: u32 = $code;
                const NAME: &'static str = stringify!($id);
                const TAGS: u32 = $tags;
            }

            impl ErrorKind for $id {}
        )*
        pub(crate) fn tag_check(code: u32, bit: u32) -> bool {
            let tag_mask = match code {
                $(
                    $code => $tags,
                )*
                _ => 0,
            };
            return tag_mask & (1 << bit) != 0;
        }
        pub(crate) fn error_name(code: u32) -> &'static str {
            match code {
                $(
                    $code => stringify!($id),
                )*
                _ => "EdgeDBError",
            }
        }
    }
}

/// Retrying the whole operation (e.g. a transaction) may succeed.
pub static SHOULD_RETRY: Tag = Tag { bit: 1 };
/// The connection is no longer usable and must be re-established.
pub static SHOULD_RECONNECT: Tag = Tag { bit: 0 };

const RECONNECT: u32 = 1 << 0;
const RETRY: u32 = 1 << 1;

define_errors![
    // Server-assigned codes.  The four code bytes form the class
    // hierarchy; a zero suffix byte marks a whole class.
    (struct InternalServerError, 0x01000000u32, 0),
    (struct UnsupportedFeatureError, 0x02000000u32, 0),
    (struct ProtocolError, 0x03000000u32, 0),
    (struct BinaryProtocolError, 0x03010000u32, 0),
    (struct UnsupportedProtocolVersionError, 0x03010001u32, 0),
    (struct TypeSpecNotFoundError, 0x03010002u32, 0),
    (struct UnexpectedMessageError, 0x03010003u32, 0),
    (struct InputDataError, 0x03020000u32, 0),
    (struct ResultCardinalityMismatchError, 0x03030000u32, 0),
    (struct CapabilityError, 0x03040000u32, 0),
    (struct UnsupportedCapabilityError, 0x03040100u32, 0),
    (struct DisabledCapabilityError, 0x03040200u32, 0),
    (struct QueryError, 0x04000000u32, 0),
    (struct InvalidSyntaxError, 0x04010000u32, 0),
    (struct EdgeQLSyntaxError, 0x04010100u32, 0),
    (struct InvalidTypeError, 0x04020000u32, 0),
    (struct InvalidReferenceError, 0x04030000u32, 0),
    (struct UnknownModuleError, 0x04030001u32, 0),
    (struct SchemaError, 0x04040000u32, 0),
    (struct SchemaDefinitionError, 0x04050000u32, 0),
    (struct SessionTimeoutError, 0x04060000u32, 0),
    (struct QueryTimeoutError, 0x04060200u32, 0),
    (struct ExecutionError, 0x05000000u32, 0),
    (struct InvalidValueError, 0x05010000u32, 0),
    (struct DivisionByZeroError, 0x05010001u32, 0),
    (struct NumericOutOfRangeError, 0x05010002u32, 0),
    (struct IntegrityError, 0x05020000u32, 0),
    (struct ConstraintViolationError, 0x05020001u32, 0),
    (struct CardinalityViolationError, 0x05020002u32, 0),
    (struct MissingRequiredError, 0x05020003u32, 0),
    (struct TransactionError, 0x10000000u32, 0),
    (struct TransactionConflictError, 0x10010000u32, RETRY),
    (struct TransactionSerializationError, 0x10010001u32, RETRY),
    (struct TransactionDeadlockError, 0x10010002u32, RETRY),
    (struct ConfigurationError, 0x06000000u32, 0),
    (struct AccessError, 0x07000000u32, 0),
    (struct AuthenticationError, 0x07010000u32, 0),
    (struct AvailabilityError, 0x08000000u32, 0),
    (struct BackendUnavailableError, 0x08000001u32, RETRY),

    // Errors produced by the user's own code inside a transaction
    // closure; never retried.
    (struct UserError, 0xFE000000u32, 0),

    // Client-assigned codes, never sent by the server.
    (struct ClientError, 0xFF000000u32, 0),
    (struct ClientConnectionError, 0xFF010000u32, RECONNECT),
    (struct ClientConnectionFailedError, 0xFF010001u32, RECONNECT),
    (struct ClientConnectionFailedTemporarilyError, 0xFF010002u32, RECONNECT | RETRY),
    (struct ClientConnectionTimeoutError, 0xFF010003u32, RECONNECT | RETRY),
    (struct ClientConnectionClosedError, 0xFF010004u32, RECONNECT | RETRY),
    (struct ClientConnectionEosError, 0xFF010005u32, RECONNECT),
    (struct InterfaceError, 0xFF020000u32, 0),
    (struct QueryArgumentError, 0xFF020100u32, 0),
    (struct MissingArgumentError, 0xFF020101u32, 0),
    (struct UnknownArgumentError, 0xFF020102u32, 0),
    (struct InvalidArgumentError, 0xFF020103u32, 0),
    (struct InvalidStateError, 0xFF020200u32, 0),
    (struct DatabaseNotEmptyError, 0xFF020300u32, 0),
    (struct NoDataError, 0xFF030000u32, 0),
    (struct InternalClientError, 0xFF040000u32, 0),
    (struct ProtocolEncodingError, 0xFF040100u32, 0),
    (struct ProtocolOutOfOrderError, 0xFF040200u32, 0),
    (struct ClientInconsistentError, 0xFF040300u32, 0),
    (struct DescriptorMismatch, 0xFF040400u32, 0),
    (struct NoResultExpected, 0xFF040500u32, 0),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn subclass_matching() {
        let err = TransactionSerializationError::build();
        assert!(err.is::<TransactionSerializationError>());
        assert!(err.is::<TransactionConflictError>());
        assert!(err.is::<TransactionError>());
        assert!(!err.is::<QueryError>());
        assert!(!err.is::<ClientError>());
    }

    #[test]
    fn server_code_maps_to_kind() {
        let err = Error::from_code_and_message(0x10010001, "serialization failure");
        assert_eq!(err.kind_name(), "TransactionSerializationError");
        assert!(err.is::<TransactionConflictError>());
        assert!(err.has_tag(SHOULD_RETRY));
        assert!(!err.has_tag(SHOULD_RECONNECT));
    }

    #[test]
    fn unknown_leaf_code_still_matches_class() {
        // A code minted by a newer server than this client.
        let err = Error::from_code_and_message(0x0501_00FF, "some new value error");
        assert_eq!(err.kind_name(), "EdgeDBError");
        assert!(err.is::<InvalidValueError>());
        assert!(err.is::<ExecutionError>());
    }

    #[test]
    fn connection_errors_reconnect() {
        let err = ClientConnectionTimeoutError::with_message("connect timed out");
        assert!(err.has_tag(SHOULD_RECONNECT));
        assert!(err.has_tag(SHOULD_RETRY));
        let err = ClientConnectionEosError::build();
        assert!(err.has_tag(SHOULD_RECONNECT));
        assert!(!err.has_tag(SHOULD_RETRY));
    }

    #[test]
    fn display_includes_context() {
        let err = InvalidArgumentError::with_message("expected std::int64")
            .context("argument $x");
        assert_eq!(
            err.to_string(),
            "InvalidArgumentError: argument $x: expected std::int64"
        );
    }
}
