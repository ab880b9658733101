use bitcoin::hashes::hmac::{Hmac, HmacEngine};
use bitcoin::hashes::{sha256::Hash as Sha256Hash, Hash, HashEngine};
use core::fmt;
use core::ops::Deref;
use core::str::FromStr;
use once_cell::sync::OnceCell;

use crate::{Serializable, Serializer};

/// Length of the domain separation key of every [`Hashable`] kind.
pub const HMAC_KEY_SIZE: usize = 16;

/// Domain separation key for HMAC-SHA256 commitments.
pub type HmacKey = [u8; HMAC_KEY_SIZE];

/// Content hash of a [`Hashable`] object.
///
/// Defined as: `H = HMAC-SHA256(key, hash_mode(obj))`, where `key` is the
/// 16-byte key of the object kind and `hash_mode(obj)` is the hash-mode
/// serialization of the object.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ObjectHash(pub Sha256Hash);

impl ObjectHash {
    pub const SIZE: usize = 32;

    /// Compute HMAC-SHA256 of `data` under `key`.
    pub fn hmac(key: &[u8], data: &[u8]) -> Self {
        let mut engine = HmacEngine::<Sha256Hash>::new(key);
        engine.input(data);

        let hmac = Hmac::<Sha256Hash>::from_engine(engine);

        Self(Sha256Hash::from_inner(hmac.into_inner()))
    }

    pub fn from_byte_array(bytes: [u8; Self::SIZE]) -> Self {
        Self(Sha256Hash::from_inner(bytes))
    }

    pub fn to_byte_array(&self) -> [u8; Self::SIZE] {
        self.0.into_inner()
    }

    /// Return bit at `index`, MSB-first within each byte.
    pub fn bit(&self, index: usize) -> bool {
        let bytes = self.0.as_inner();
        let byte = bytes[index / 8];

        (byte >> (7 - (index % 8))) & 1 == 1
    }
}

impl Deref for ObjectHash {
    type Target = Sha256Hash;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Sha256Hash> for ObjectHash {
    fn from(hash: Sha256Hash) -> Self {
        Self(hash)
    }
}

impl fmt::Display for ObjectHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0.as_inner()))
    }
}

impl fmt::Debug for ObjectHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHash({})", self)
    }
}

impl FromStr for ObjectHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; Self::SIZE];
        hex::decode_to_slice(s, &mut bytes)?;

        Ok(Self::from_byte_array(bytes))
    }
}

/// An immutable object with a structurally-recursive content hash.
///
/// Nested `Hashable`s are committed by their hash when the outer object is
/// serialized in hash mode, see [`Serializer::write_hashable`].
pub trait Hashable: Serializable {
    /// Domain separation key of this object kind.
    const HMAC_KEY: HmacKey;

    /// Return the cached content hash. Implementations keep a [`HashCache`]
    /// and call [`Hashable::compute_hash`] on first use.
    fn hash(&self) -> ObjectHash;

    fn compute_hash(&self) -> ObjectHash {
        let mut serializer = Serializer::hashing();
        self.serialize(&mut serializer);

        serializer.finalize_hmac(&Self::HMAC_KEY)
    }
}

/// Lazily computed hash of an immutable object.
///
/// The cache is transient state: it never takes part in equality checks.
#[derive(Clone, Default)]
pub struct HashCache(OnceCell<ObjectHash>);

impl HashCache {
    pub fn new() -> Self {
        Self(OnceCell::new())
    }

    pub fn get_or_compute(&self, compute: impl FnOnce() -> ObjectHash) -> ObjectHash {
        *self.0.get_or_init(compute)
    }
}

impl fmt::Debug for HashCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.get() {
            Some(hash) => write!(f, "HashCache({})", hash),
            None => f.write_str("HashCache(<empty>)"),
        }
    }
}

impl PartialEq for HashCache {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for HashCache {}
