use std::collections::BTreeMap;
use std::sync::Arc;

use bitcoin::{OutPoint, Script};
use core::fmt;
use once_cell::sync::Lazy;

use hue_marshal::{
    Deserializer, HashCache, Hashable, HmacKey, MarshalError, MarshalResult, Memoizable,
    ObjectHash, Serializable, Serializer,
};
use hue_merbinner::MerbinnerTree;

use crate::{DefinitionError, GenesisPoint, Network};

/// Version of the color definition encoding.
pub const DEFINITION_VERSION: u64 = 1;

/// Length of the steganographic key.
pub const STEGO_KEY_SIZE: usize = 16;

pub const NAME_KEY: &str = "name";
pub const NETWORK_KEY: &str = "network";

const BITCOIN_NAME: &str = "Bitcoin";
const UNKNOWN_NAME: &str = "Unknown";

pub type GenesisTree = MerbinnerTree<GenesisPoint, u64>;

static BITCOIN_DEFINITIONS: Lazy<[Arc<ColorDefinition>; 4]> = Lazy::new(|| {
    Network::ALL.map(|network| Arc::new(ColorDefinition::reserved(BITCOIN_NAME, network)))
});

static UNKNOWN_DEFINITIONS: Lazy<[Arc<ColorDefinition>; 4]> = Lazy::new(|| {
    Network::ALL.map(|network| Arc::new(ColorDefinition::reserved(UNKNOWN_NAME, network)))
});

/// Immutable commitment to a color: where it may be created and what it is.
///
/// The identity of a definition is its content hash, so two definitions are
/// equal if and only if they have the same committed content.
#[derive(Clone)]
pub struct ColorDefinition {
    version: u64,
    /// Outpoint genesis points with the quantity each of them creates.
    outpoint_genesis: GenesisTree,
    /// Script genesis points with their unit.
    script_genesis: GenesisTree,
    metadata: BTreeMap<String, String>,
    /// Block height before which none of the genesis points were created.
    block_height: u64,
    stego_key: [u8; STEGO_KEY_SIZE],
    hash: HashCache,
}

impl ColorDefinition {
    /// Create definition, checking that every genesis point is in its tree.
    pub fn new(
        outpoint_genesis: GenesisTree,
        script_genesis: GenesisTree,
        metadata: BTreeMap<String, String>,
        block_height: u64,
        stego_key: [u8; STEGO_KEY_SIZE],
    ) -> Result<Self, DefinitionError> {
        if let Some(point) = outpoint_genesis.keys().find(|point| !point.is_outpoint()) {
            return Err(DefinitionError::MisplacedGenesisPoint(point.clone()));
        }

        if let Some(point) = script_genesis.keys().find(|point| !point.is_script()) {
            return Err(DefinitionError::MisplacedGenesisPoint(point.clone()));
        }

        Ok(Self {
            version: DEFINITION_VERSION,
            outpoint_genesis,
            script_genesis,
            metadata,
            block_height,
            stego_key,
            hash: HashCache::new(),
        })
    }

    pub fn builder() -> ColorDefinitionBuilder {
        ColorDefinitionBuilder::default()
    }

    /// Definition of untagged native value on `network`.
    pub fn bitcoin(network: Network) -> Arc<ColorDefinition> {
        BITCOIN_DEFINITIONS[network.index()].clone()
    }

    /// Bucket for color that was observed but couldn't be identified.
    pub fn unknown(network: Network) -> Arc<ColorDefinition> {
        UNKNOWN_DEFINITIONS[network.index()].clone()
    }

    fn reserved(name: &str, network: Network) -> Self {
        let metadata = BTreeMap::from([
            (NAME_KEY.to_string(), name.to_string()),
            (NETWORK_KEY.to_string(), network.to_string()),
        ]);

        Self {
            version: DEFINITION_VERSION,
            outpoint_genesis: GenesisTree::new(),
            script_genesis: GenesisTree::new(),
            metadata,
            block_height: 0,
            stego_key: [0u8; STEGO_KEY_SIZE],
            hash: HashCache::new(),
        }
    }

    fn reserved_network(&self) -> Option<Network> {
        self.metadata.get(NETWORK_KEY)?.parse().ok()
    }

    pub fn is_bitcoin(&self) -> bool {
        self.reserved_network()
            .map_or(false, |network| self == &*Self::bitcoin(network))
    }

    pub fn is_unknown(&self) -> bool {
        self.reserved_network()
            .map_or(false, |network| self == &*Self::unknown(network))
    }

    /// Either of the reserved definitions. Reserved definitions have no
    /// genesis points and are never tracked.
    pub fn is_reserved(&self) -> bool {
        self.is_bitcoin() || self.is_unknown()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata.get(NAME_KEY).map(String::as_str)
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn block_height(&self) -> u64 {
        self.block_height
    }

    pub fn stego_key(&self) -> &[u8; STEGO_KEY_SIZE] {
        &self.stego_key
    }

    pub fn outpoint_genesis(&self) -> &GenesisTree {
        &self.outpoint_genesis
    }

    pub fn script_genesis(&self) -> &GenesisTree {
        &self.script_genesis
    }

    /// Sum of quantities of the outpoint genesis points.
    pub fn total_genesis_quantity(&self) -> u64 {
        self.outpoint_genesis.sum()
    }

    pub fn contains(&self, point: &GenesisPoint) -> bool {
        match point {
            GenesisPoint::TxOutPoint(_) => self.outpoint_genesis.contains(point),
            GenesisPoint::ScriptPubkey(_) => self.script_genesis.contains(point),
        }
    }

    /// Declared quantity of an outpoint genesis point, or unit of a script
    /// genesis point.
    pub fn genesis_quantity(&self, point: &GenesisPoint) -> Option<u64> {
        match point {
            GenesisPoint::TxOutPoint(_) => self.outpoint_genesis.get(point).copied(),
            GenesisPoint::ScriptPubkey(_) => self.script_genesis.get(point).copied(),
        }
    }

    /// All genesis points, outpoints first.
    pub fn genesis_points(&self) -> impl Iterator<Item = &GenesisPoint> {
        self.outpoint_genesis.keys().chain(self.script_genesis.keys())
    }

    /// Whether an output created at `outpoint` paying to `script` creates
    /// color of this definition.
    pub fn is_genesis_output(&self, outpoint: &OutPoint, script: &Script) -> bool {
        self.contains(&GenesisPoint::TxOutPoint(*outpoint))
            || self.contains(&GenesisPoint::ScriptPubkey(script.clone()))
    }
}

impl PartialEq for ColorDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl Eq for ColorDefinition {}

impl fmt::Debug for ColorDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColorDefinition")
            .field("hash", &self.hash())
            .field("name", &self.name())
            .field("outpoint_genesis", &self.outpoint_genesis.len())
            .field("script_genesis", &self.script_genesis.len())
            .field("block_height", &self.block_height)
            .finish()
    }
}

impl fmt::Display for ColorDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.hash()),
            None => write!(f, "{}", self.hash()),
        }
    }
}

impl Serializable for ColorDefinition {
    fn serialize(&self, serializer: &mut Serializer) {
        serializer.write_var_int(self.version);
        serializer.write_hashable(&self.outpoint_genesis);
        serializer.write_hashable(&self.script_genesis);
        serializer.write(&self.metadata);
        serializer.write_var_int(self.block_height);
        serializer.write_fixed_bytes(&self.stego_key);
    }

    fn deserialize(deserializer: &mut Deserializer<'_>) -> MarshalResult<Self> {
        let version = deserializer.read_var_int()?;
        if version != DEFINITION_VERSION {
            return Err(MarshalError::InvalidEncoding("unsupported definition version"));
        }

        let outpoint_genesis = deserializer.read()?;
        let script_genesis = deserializer.read()?;
        let metadata = deserializer.read()?;
        let block_height = deserializer.read_var_int()?;
        let stego_key = deserializer.read_array::<STEGO_KEY_SIZE>()?;

        Self::new(
            outpoint_genesis,
            script_genesis,
            metadata,
            block_height,
            stego_key,
        )
        .map_err(|_| MarshalError::InvalidEncoding("genesis point in a wrong tree"))
    }
}

impl Hashable for ColorDefinition {
    const HMAC_KEY: HmacKey = *b"hue/definition\0\0";

    fn hash(&self) -> ObjectHash {
        self.hash.get_or_compute(|| self.compute_hash())
    }
}

impl Memoizable for ColorDefinition {
    fn memo_key(&self) -> [u8; 32] {
        self.hash().to_byte_array()
    }
}

/// Collects genesis points and metadata of a new [`ColorDefinition`].
#[derive(Debug, Default)]
pub struct ColorDefinitionBuilder {
    outpoints: Vec<(GenesisPoint, u64)>,
    scripts: Vec<(GenesisPoint, u64)>,
    metadata: BTreeMap<String, String>,
    block_height: u64,
    stego_key: [u8; STEGO_KEY_SIZE],
}

impl ColorDefinitionBuilder {
    pub fn outpoint_genesis(mut self, outpoint: OutPoint, quantity: u64) -> Self {
        self.outpoints.push((outpoint.into(), quantity));
        self
    }

    pub fn script_genesis(mut self, script: Script, unit: u64) -> Self {
        self.scripts.push((script.into(), unit));
        self
    }

    pub fn name(self, name: impl Into<String>) -> Self {
        self.metadata(NAME_KEY, name)
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn block_height(mut self, block_height: u64) -> Self {
        self.block_height = block_height;
        self
    }

    pub fn stego_key(mut self, stego_key: [u8; STEGO_KEY_SIZE]) -> Self {
        self.stego_key = stego_key;
        self
    }

    pub fn build(self) -> Result<ColorDefinition, DefinitionError> {
        ColorDefinition::new(
            GenesisTree::from_nodes(self.outpoints)?,
            GenesisTree::from_nodes(self.scripts)?,
            self.metadata,
            self.block_height,
            self.stego_key,
        )
    }
}
