/// Errors that can occur while reading the binary wire grammar.
///
/// Every variant is a hard decode failure: malformed input is never coerced
/// into a value.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    /// Input ended before the value was complete.
    #[error("Unexpected end of input: needed {needed} more bytes at offset {offset}")]
    UnexpectedEnd { offset: usize, needed: usize },

    /// Varint does not fit into 64 bits.
    #[error("Varint overflows 64 bits at offset {0}")]
    VarIntOverflow(usize),

    /// Varint is encoded with redundant trailing groups.
    #[error("Non-canonical varint at offset {0}")]
    NonCanonicalVarInt(usize),

    /// Declared length of a byte string exceeds the allowed maximum.
    #[error("Declared length {declared} exceeds maximum {max}")]
    LengthTooLarge { declared: u64, max: usize },

    /// Unknown marker of a tree node.
    #[error("Unknown tree node marker {0}")]
    UnknownMarker(u64),

    /// Unknown type byte of a genesis point.
    #[error("Unknown genesis point type {0}")]
    UnknownGenesisType(u8),

    /// Memoized back-reference points outside of the materialized objects.
    #[error("Back-reference {index} is out of range (known objects: {known})")]
    BackReferenceOutOfRange { index: u64, known: usize },

    /// Memoized back-reference points to an object of another kind.
    #[error("Back-reference {0} points to an object of another type")]
    BackReferenceTypeMismatch(u64),

    /// Value is structurally valid, but breaks an encoding rule.
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(&'static str),

    /// There are unread bytes after the top-level object.
    #[error("{0} trailing bytes after the object")]
    TrailingBytes(usize),

    /// Embedded Bitcoin consensus encoding failed to decode.
    #[error("Consensus decoding error: {0}")]
    Consensus(String),

    /// String is not valid UTF-8.
    #[error("Invalid UTF-8 string")]
    InvalidUtf8,
}

pub type MarshalResult<T> = Result<T, MarshalError>;
