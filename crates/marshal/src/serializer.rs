use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::{Hashable, HmacKey, Memoizable, ObjectHash, Serializable};

/// Output mode of a [`Serializer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Literal field encoding.
    Raw,
    /// Nested [`Hashable`]s are replaced by their committed hashes, the whole
    /// stream is fed into one HMAC-SHA256.
    Hash,
}

/// Writer of the binary wire grammar.
///
/// The same object graph produces different output depending on [`Mode`].
pub struct Serializer {
    buf: Vec<u8>,
    mode: Mode,
    /// Indexes of already written memoizable objects, keyed by type and
    /// object identity. `None` if memoization is disabled.
    memo: Option<HashMap<(TypeId, [u8; 32]), u64>>,
}

impl Serializer {
    pub fn new(mode: Mode) -> Self {
        Self {
            buf: Vec::new(),
            mode,
            memo: None,
        }
    }

    /// Create raw mode serializer.
    pub fn raw() -> Self {
        Self::new(Mode::Raw)
    }

    /// Create hash mode serializer.
    pub fn hashing() -> Self {
        Self::new(Mode::Hash)
    }

    /// Create raw mode serializer that writes repeated objects as
    /// back-references. Must be read with a memoizing [`Deserializer`].
    ///
    /// [`Deserializer`]: crate::Deserializer
    pub fn memoized() -> Self {
        Self {
            buf: Vec::new(),
            mode: Mode::Raw,
            memo: Some(HashMap::new()),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_hash_mode(&self) -> bool {
        self.mode == Mode::Hash
    }

    /// Create an empty serializer with the same mode (memoization is not
    /// inherited).
    pub fn fork(&self) -> Self {
        Self::new(self.mode)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write unsigned varint: little-endian base-128 groups, MSB of every
    /// byte is the continuation bit.
    pub fn write_var_int(&mut self, mut value: u64) {
        loop {
            let group = (value & 0x7f) as u8;
            value >>= 7;

            if value == 0 {
                self.buf.push(group);
                return;
            }

            self.buf.push(group | 0x80);
        }
    }

    /// Write varint length followed by the bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_var_int(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    /// Write bytes without length prefix.
    pub fn write_fixed_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    pub fn write<T: Serializable>(&mut self, value: &T) {
        value.serialize(self);
    }

    /// Write nested hashable object: inline in raw mode, as a committed hash
    /// in hash mode.
    pub fn write_hashable<T: Hashable>(&mut self, value: &T) {
        match self.mode {
            Mode::Raw => value.serialize(self),
            Mode::Hash => self.write_fixed_bytes(&value.hash().to_byte_array()),
        }
    }

    /// Write a shared object.
    ///
    /// The first occurrence is written as `0` followed by the object. With
    /// memoization enabled, every later occurrence is written as `index + 1`,
    /// where `index` is the position of the first occurrence among memoized
    /// objects. Without memoization every occurrence is a first one.
    pub fn write_memoized<T: Memoizable>(&mut self, value: &Arc<T>) {
        let Some(memo) = self.memo.as_mut() else {
            self.write_var_int(0);
            value.serialize(self);
            return;
        };

        let key = (TypeId::of::<T>(), value.memo_key());

        if let Some(index) = memo.get(&key) {
            let reference = *index + 1;
            self.write_var_int(reference);
            return;
        }

        let index = memo.len() as u64;
        memo.insert(key, index);

        self.write_var_int(0);
        value.serialize(self);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Finish hash mode serialization and commit the stream.
    pub fn finalize_hmac(self, key: &HmacKey) -> ObjectHash {
        ObjectHash::hmac(key, &self.buf)
    }
}
