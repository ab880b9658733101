use bitcoin::consensus::encode;
use bitcoin::{OutPoint, Script};
use core::fmt;

use hue_marshal::{Deserializer, HmacKey, MarshalError, MarshalResult, Serializable, Serializer};
use hue_merbinner::TreeKey;

const TX_OUT_POINT_FLAG: u8 = 1u8;
const SCRIPT_PUBKEY_FLAG: u8 = 2u8;

/// A ledger location authorized to create new color.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GenesisPoint {
    /// A specific previous output.
    TxOutPoint(OutPoint),
    /// Any output paying to the script.
    ScriptPubkey(Script),
}

impl GenesisPoint {
    pub fn is_outpoint(&self) -> bool {
        matches!(self, GenesisPoint::TxOutPoint(_))
    }

    pub fn is_script(&self) -> bool {
        matches!(self, GenesisPoint::ScriptPubkey(_))
    }

    /// Element inserted into bloom filters so that peers relay transactions
    /// touching the genesis point: the consensus encoding of the outpoint
    /// (txid followed by little-endian vout), or the raw script.
    pub fn bloom_element(&self) -> Vec<u8> {
        match self {
            GenesisPoint::TxOutPoint(outpoint) => encode::serialize(outpoint),
            GenesisPoint::ScriptPubkey(script) => script.to_bytes(),
        }
    }
}

impl From<OutPoint> for GenesisPoint {
    fn from(outpoint: OutPoint) -> Self {
        Self::TxOutPoint(outpoint)
    }
}

impl From<Script> for GenesisPoint {
    fn from(script: Script) -> Self {
        Self::ScriptPubkey(script)
    }
}

impl fmt::Display for GenesisPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenesisPoint::TxOutPoint(outpoint) => write!(f, "outpoint:{}", outpoint),
            GenesisPoint::ScriptPubkey(script) => write!(f, "script:{:x}", script),
        }
    }
}

impl Serializable for GenesisPoint {
    fn serialize(&self, serializer: &mut Serializer) {
        match self {
            GenesisPoint::TxOutPoint(outpoint) => {
                serializer.write_u8(TX_OUT_POINT_FLAG);
                outpoint.serialize(serializer);
            }
            GenesisPoint::ScriptPubkey(script) => {
                serializer.write_u8(SCRIPT_PUBKEY_FLAG);
                script.serialize(serializer);
            }
        }
    }

    fn deserialize(deserializer: &mut Deserializer<'_>) -> MarshalResult<Self> {
        let kind = deserializer.read_u8()?;

        match kind {
            TX_OUT_POINT_FLAG => Ok(GenesisPoint::TxOutPoint(deserializer.read()?)),
            SCRIPT_PUBKEY_FLAG => Ok(GenesisPoint::ScriptPubkey(deserializer.read()?)),
            _ => Err(MarshalError::UnknownGenesisType(kind)),
        }
    }
}

impl TreeKey for GenesisPoint {
    const KEY_HMAC_KEY: HmacKey = *b"hue/genesis/key\0";
}
