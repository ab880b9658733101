//! Binary marshaling framework of the Hue colored coin protocol.
//!
//! One wire grammar (varints, length-prefixed and fixed-length bytes) is
//! written in two modes: raw mode produces the literal encoding, hash mode
//! replaces nested [`Hashable`]s with their committed hashes and feeds the
//! stream into a domain-separated HMAC-SHA256. This gives every composite
//! type a canonical, structurally-recursive content hash.

mod errors;
pub use errors::{MarshalError, MarshalResult};

mod hash;
pub use hash::{HashCache, Hashable, HmacKey, ObjectHash, HMAC_KEY_SIZE};

mod serializer;
pub use serializer::{Mode, Serializer};

mod deserializer;
pub use deserializer::{Deserializer, MAX_BYTES_LENGTH};

mod primitives;

/// A value with a binary encoding in the wire grammar.
pub trait Serializable: Sized {
    fn serialize(&self, serializer: &mut Serializer);

    fn deserialize(deserializer: &mut Deserializer<'_>) -> MarshalResult<Self>;

    /// Raw mode encoding of the value.
    fn to_raw_bytes(&self) -> Vec<u8> {
        let mut serializer = Serializer::raw();
        self.serialize(&mut serializer);

        serializer.into_bytes()
    }

    /// Decode the value from its raw mode encoding, rejecting trailing bytes.
    fn from_raw_bytes(bytes: &[u8]) -> MarshalResult<Self> {
        let mut deserializer = Deserializer::new(bytes);
        let value = Self::deserialize(&mut deserializer)?;
        deserializer.finish()?;

        Ok(value)
    }
}

/// A shared object that can be written once and referenced afterwards by
/// memoizing serializers.
pub trait Memoizable: Serializable + Send + Sync + 'static {
    /// Identity of the object among objects of the same type.
    fn memo_key(&self) -> [u8; 32];
}
