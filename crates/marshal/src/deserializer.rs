use std::any::Any;
use std::sync::Arc;

use crate::{MarshalError, MarshalResult, Memoizable, Serializable};

/// Upper bound for length-prefixed byte strings read from untrusted input.
pub const MAX_BYTES_LENGTH: usize = 1024 * 1024;

/// Maximum number of bytes in a varint of a 64 bit value.
const MAX_VAR_INT_SIZE: usize = 10;

/// Reader of the binary wire grammar written by raw mode
/// [`Serializer`](crate::Serializer)s.
pub struct Deserializer<'a> {
    data: &'a [u8],
    pos: usize,
    /// Objects materialized from memoized entries, in order of appearance.
    memo: Vec<Arc<dyn Any + Send + Sync>>,
}

impl<'a> Deserializer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            memo: Vec::new(),
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Check that the whole input was consumed.
    pub fn finish(self) -> MarshalResult<()> {
        match self.remaining() {
            0 => Ok(()),
            trailing => Err(MarshalError::TrailingBytes(trailing)),
        }
    }

    pub fn read_var_int(&mut self) -> MarshalResult<u64> {
        let start = self.pos;
        let mut value: u64 = 0;

        for i in 0..MAX_VAR_INT_SIZE {
            let byte = self.read_u8()?;
            let group = (byte & 0x7f) as u64;
            let shift = 7 * i as u32;

            // The tenth group may only carry the single highest bit.
            if i == MAX_VAR_INT_SIZE - 1 && group > 1 {
                return Err(MarshalError::VarIntOverflow(start));
            }

            value |= group << shift;

            if byte & 0x80 == 0 {
                if byte == 0 && i > 0 {
                    return Err(MarshalError::NonCanonicalVarInt(start));
                }

                return Ok(value);
            }
        }

        Err(MarshalError::VarIntOverflow(start))
    }

    /// Read varint length followed by that many bytes. Lengths above
    /// [`MAX_BYTES_LENGTH`] are rejected.
    pub fn read_bytes(&mut self) -> MarshalResult<Vec<u8>> {
        let declared = self.read_var_int()?;

        if declared > MAX_BYTES_LENGTH as u64 {
            return Err(MarshalError::LengthTooLarge {
                declared,
                max: MAX_BYTES_LENGTH,
            });
        }

        Ok(self.read_fixed_bytes(declared as usize)?.to_vec())
    }

    pub fn read_fixed_bytes(&mut self, len: usize) -> MarshalResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(MarshalError::UnexpectedEnd {
                offset: self.pos,
                needed: len - self.remaining(),
            });
        }

        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;

        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> MarshalResult<[u8; N]> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.read_fixed_bytes(N)?);

        Ok(array)
    }

    pub fn read_u8(&mut self) -> MarshalResult<u8> {
        Ok(self.read_fixed_bytes(1)?[0])
    }

    pub fn read<T: Serializable>(&mut self) -> MarshalResult<T> {
        T::deserialize(self)
    }

    /// Read an object written by
    /// [`Serializer::write_memoized`](crate::Serializer::write_memoized)
    /// of a memoizing serializer.
    pub fn read_memoized<T: Memoizable>(&mut self) -> MarshalResult<Arc<T>> {
        let reference = self.read_var_int()?;

        if reference == 0 {
            let value = Arc::new(T::deserialize(self)?);
            self.memo.push(value.clone());

            return Ok(value);
        }

        let index = reference - 1;
        let entry = self
            .memo
            .get(index as usize)
            .ok_or(MarshalError::BackReferenceOutOfRange {
                index,
                known: self.memo.len(),
            })?
            .clone();

        entry
            .downcast::<T>()
            .map_err(|_| MarshalError::BackReferenceTypeMismatch(index))
    }
}
