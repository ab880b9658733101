//! Wire encoding of scalar values and Bitcoin primitives.

use std::collections::BTreeMap;

use bitcoin::consensus::encode;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, OutPoint, Script, Transaction, Txid};

use crate::{
    Deserializer, MarshalError, MarshalResult, Memoizable, ObjectHash, Serializable, Serializer,
};

impl Serializable for u64 {
    fn serialize(&self, serializer: &mut Serializer) {
        serializer.write_var_int(*self);
    }

    fn deserialize(deserializer: &mut Deserializer<'_>) -> MarshalResult<Self> {
        deserializer.read_var_int()
    }
}

impl Serializable for u32 {
    fn serialize(&self, serializer: &mut Serializer) {
        serializer.write_var_int(*self as u64);
    }

    fn deserialize(deserializer: &mut Deserializer<'_>) -> MarshalResult<Self> {
        let value = deserializer.read_var_int()?;

        u32::try_from(value).map_err(|_| MarshalError::InvalidEncoding("u32 out of range"))
    }
}

impl Serializable for String {
    fn serialize(&self, serializer: &mut Serializer) {
        serializer.write_bytes(self.as_bytes());
    }

    fn deserialize(deserializer: &mut Deserializer<'_>) -> MarshalResult<Self> {
        let bytes = deserializer.read_bytes()?;

        String::from_utf8(bytes).map_err(|_| MarshalError::InvalidUtf8)
    }
}

impl<T: Serializable> Serializable for Vec<T> {
    fn serialize(&self, serializer: &mut Serializer) {
        serializer.write_var_int(self.len() as u64);

        for item in self {
            item.serialize(serializer);
        }
    }

    fn deserialize(deserializer: &mut Deserializer<'_>) -> MarshalResult<Self> {
        let len = deserializer.read_var_int()?;

        // Every item takes at least one byte.
        if len > deserializer.remaining() as u64 {
            return Err(MarshalError::UnexpectedEnd {
                offset: deserializer.position(),
                needed: (len - deserializer.remaining() as u64) as usize,
            });
        }

        (0..len).map(|_| T::deserialize(deserializer)).collect()
    }
}

/// Maps are written as a count followed by key-value pairs in key order.
/// Reading rejects unsorted or repeated keys, so each map has exactly one
/// encoding.
impl<K: Serializable + Ord, V: Serializable> Serializable for BTreeMap<K, V> {
    fn serialize(&self, serializer: &mut Serializer) {
        serializer.write_var_int(self.len() as u64);

        for (key, value) in self {
            key.serialize(serializer);
            value.serialize(serializer);
        }
    }

    fn deserialize(deserializer: &mut Deserializer<'_>) -> MarshalResult<Self> {
        let len = deserializer.read_var_int()?;
        let mut map = BTreeMap::new();

        for _ in 0..len {
            let key = K::deserialize(deserializer)?;
            let value = V::deserialize(deserializer)?;

            if let Some((last, _)) = map.last_key_value() {
                if &key <= last {
                    return Err(MarshalError::InvalidEncoding("map keys are not sorted"));
                }
            }

            map.insert(key, value);
        }

        Ok(map)
    }
}

impl Serializable for ObjectHash {
    fn serialize(&self, serializer: &mut Serializer) {
        serializer.write_fixed_bytes(&self.to_byte_array());
    }

    fn deserialize(deserializer: &mut Deserializer<'_>) -> MarshalResult<Self> {
        Ok(ObjectHash::from_byte_array(deserializer.read_array()?))
    }
}

impl Serializable for Txid {
    fn serialize(&self, serializer: &mut Serializer) {
        serializer.write_fixed_bytes(&self[..]);
    }

    fn deserialize(deserializer: &mut Deserializer<'_>) -> MarshalResult<Self> {
        Ok(Txid::from_inner(deserializer.read_array()?))
    }
}

impl Serializable for BlockHash {
    fn serialize(&self, serializer: &mut Serializer) {
        serializer.write_fixed_bytes(&self[..]);
    }

    fn deserialize(deserializer: &mut Deserializer<'_>) -> MarshalResult<Self> {
        Ok(BlockHash::from_inner(deserializer.read_array()?))
    }
}

/// `txid` as 32 fixed bytes followed by varint `vout`.
impl Serializable for OutPoint {
    fn serialize(&self, serializer: &mut Serializer) {
        self.txid.serialize(serializer);
        serializer.write_var_int(self.vout as u64);
    }

    fn deserialize(deserializer: &mut Deserializer<'_>) -> MarshalResult<Self> {
        let txid = Txid::deserialize(deserializer)?;
        let vout = u32::deserialize(deserializer)?;

        Ok(OutPoint { txid, vout })
    }
}

impl Serializable for Script {
    fn serialize(&self, serializer: &mut Serializer) {
        serializer.write_bytes(self.as_bytes());
    }

    fn deserialize(deserializer: &mut Deserializer<'_>) -> MarshalResult<Self> {
        Ok(Script::from(deserializer.read_bytes()?))
    }
}

/// Length-prefixed Bitcoin consensus encoding.
impl Serializable for Transaction {
    fn serialize(&self, serializer: &mut Serializer) {
        serializer.write_bytes(&encode::serialize(self));
    }

    fn deserialize(deserializer: &mut Deserializer<'_>) -> MarshalResult<Self> {
        let bytes = deserializer.read_bytes()?;

        encode::deserialize(&bytes).map_err(|err| MarshalError::Consensus(err.to_string()))
    }
}

impl Memoizable for Transaction {
    fn memo_key(&self) -> [u8; 32] {
        self.wtxid().into_inner()
    }
}
