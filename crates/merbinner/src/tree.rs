use std::collections::BTreeMap;
use std::fmt;

use hue_marshal::{
    Deserializer, HashCache, Hashable, HmacKey, MarshalError, MarshalResult, ObjectHash,
    Serializable, Serializer,
};

use crate::TreeError;

/// Maximum split depth: the bit length of a key hash.
pub const MAX_DEPTH: usize = ObjectHash::SIZE * 8;

const EMPTY_MARKER: u64 = 0;
const LEAF_MARKER: u64 = 1;
const SPLIT_MARKER: u64 = 2;

/// Commits a half of a split node in hash mode.
const HALF_HMAC_KEY: HmacKey = *b"hue/merbin/half\0";

/// Key of a tree node.
pub trait TreeKey: Serializable + Ord + Clone + fmt::Debug {
    /// Domain separation key of the key hashes that drive the splits.
    const KEY_HMAC_KEY: HmacKey;

    fn key_hash(&self) -> ObjectHash {
        ObjectHash::hmac(&Self::KEY_HMAC_KEY, &self.to_raw_bytes())
    }
}

/// Value of a tree node.
pub trait TreeValue: Serializable + Clone + PartialEq + fmt::Debug {
    /// Scalar contribution of the value to the subtree sums.
    fn sum_value(&self) -> u64;
}

impl TreeValue for u64 {
    fn sum_value(&self) -> u64 {
        *self
    }
}

/// Set of `(key, value)` nodes serialized as a binary radix tree.
///
/// Encoding of a subtree at `depth`:
///
/// - no nodes: marker `0`;
/// - one node: marker `1`, key, value;
/// - two or more nodes: marker `2`, then both halves split on bit `depth`
///   of the key hashes. Raw mode inlines the halves; hash mode writes each
///   half as the HMAC of its own hash mode encoding followed by its sum.
#[derive(Clone, PartialEq, Eq)]
pub struct MerbinnerTree<K: TreeKey, V: TreeValue> {
    nodes: BTreeMap<K, V>,
    sum: u64,
    hash: HashCache,
}

struct Node<'a, K, V> {
    key_hash: ObjectHash,
    key: &'a K,
    value: &'a V,
}

impl<K: TreeKey, V: TreeValue> Default for MerbinnerTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: TreeKey, V: TreeValue> MerbinnerTree<K, V> {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            sum: 0,
            hash: HashCache::new(),
        }
    }

    /// Build the tree from nodes, rejecting repeated keys.
    pub fn from_nodes(nodes: impl IntoIterator<Item = (K, V)>) -> Result<Self, TreeError> {
        let mut tree = Self::new();

        for (key, value) in nodes {
            if tree.nodes.contains_key(&key) {
                return Err(TreeError::DuplicateKey);
            }

            tree.insert(key, value)?;
        }

        Ok(tree)
    }

    /// Insert or replace a node. Returns the replaced value.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>, TreeError> {
        let previous = self.nodes.get(&key).map(TreeValue::sum_value).unwrap_or(0);

        let sum = (self.sum - previous)
            .checked_add(value.sum_value())
            .ok_or(TreeError::SumOverflow)?;

        self.sum = sum;
        self.hash = HashCache::new();

        Ok(self.nodes.insert(key, value))
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.nodes.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.nodes.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.nodes.keys()
    }

    /// Sum of all node values.
    pub fn sum(&self) -> u64 {
        self.sum
    }

    /// Root commitment of the tree.
    pub fn root_hash(&self) -> ObjectHash {
        self.hash()
    }

    fn serialize_nodes(serializer: &mut Serializer, nodes: &[Node<'_, K, V>], depth: usize) -> u64 {
        match nodes {
            [] => {
                serializer.write_var_int(EMPTY_MARKER);
                0
            }
            [node] => {
                serializer.write_var_int(LEAF_MARKER);
                node.key.serialize(serializer);
                node.value.serialize(serializer);

                node.value.sum_value()
            }
            _ => {
                serializer.write_var_int(SPLIT_MARKER);

                let (right, left): (Vec<_>, Vec<_>) = nodes
                    .iter()
                    .map(|node| Node {
                        key_hash: node.key_hash,
                        key: node.key,
                        value: node.value,
                    })
                    .partition(|node| node.key_hash.bit(depth));

                let left_sum = Self::serialize_half(serializer, &left, depth + 1);
                let right_sum = Self::serialize_half(serializer, &right, depth + 1);

                left_sum + right_sum
            }
        }
    }

    fn serialize_half(serializer: &mut Serializer, nodes: &[Node<'_, K, V>], depth: usize) -> u64 {
        if !serializer.is_hash_mode() {
            return Self::serialize_nodes(serializer, nodes, depth);
        }

        let mut half = serializer.fork();
        let sum = Self::serialize_nodes(&mut half, nodes, depth);

        serializer.write_fixed_bytes(&half.finalize_hmac(&HALF_HMAC_KEY).to_byte_array());
        serializer.write_var_int(sum);

        sum
    }

    /// Read a raw mode subtree. `path` holds the split bits leading to it;
    /// every leaf key hash must start with them, and every split must
    /// separate at least two nodes, so only canonical encodings are accepted.
    fn deserialize_nodes(
        deserializer: &mut Deserializer<'_>,
        path: &mut Vec<bool>,
        nodes: &mut BTreeMap<K, V>,
    ) -> MarshalResult<usize> {
        match deserializer.read_var_int()? {
            EMPTY_MARKER => Ok(0),
            LEAF_MARKER => {
                let key = K::deserialize(deserializer)?;
                let value = V::deserialize(deserializer)?;

                let key_hash = key.key_hash();
                let on_path = path
                    .iter()
                    .enumerate()
                    .all(|(depth, bit)| key_hash.bit(depth) == *bit);

                if !on_path {
                    return Err(MarshalError::InvalidEncoding("tree node is off its path"));
                }

                if nodes.insert(key, value).is_some() {
                    return Err(MarshalError::InvalidEncoding("duplicate tree key"));
                }

                Ok(1)
            }
            SPLIT_MARKER => {
                if path.len() >= MAX_DEPTH {
                    return Err(MarshalError::InvalidEncoding("tree is too deep"));
                }

                path.push(false);
                let left = Self::deserialize_nodes(deserializer, path, nodes)?;
                path.pop();

                path.push(true);
                let right = Self::deserialize_nodes(deserializer, path, nodes)?;
                path.pop();

                if left + right < 2 {
                    return Err(MarshalError::InvalidEncoding(
                        "split of less than two tree nodes",
                    ));
                }

                Ok(left + right)
            }
            marker => Err(MarshalError::UnknownMarker(marker)),
        }
    }
}

impl<K: TreeKey, V: TreeValue> Serializable for MerbinnerTree<K, V> {
    fn serialize(&self, serializer: &mut Serializer) {
        let nodes = self
            .nodes
            .iter()
            .map(|(key, value)| Node {
                key_hash: key.key_hash(),
                key,
                value,
            })
            .collect::<Vec<_>>();

        Self::serialize_nodes(serializer, &nodes, 0);
    }

    /// Only raw mode encodings can be read back: hash mode replaces the
    /// halves with one-way commitments.
    fn deserialize(deserializer: &mut Deserializer<'_>) -> MarshalResult<Self> {
        let mut nodes = BTreeMap::new();
        Self::deserialize_nodes(deserializer, &mut Vec::new(), &mut nodes)?;

        let mut sum: u64 = 0;
        for value in nodes.values() {
            sum = sum
                .checked_add(value.sum_value())
                .ok_or(MarshalError::InvalidEncoding("tree sum overflows"))?;
        }

        Ok(Self {
            nodes,
            sum,
            hash: HashCache::new(),
        })
    }
}

impl<K: TreeKey, V: TreeValue> Hashable for MerbinnerTree<K, V> {
    const HMAC_KEY: HmacKey = *b"hue/merbin/root\0";

    fn hash(&self) -> ObjectHash {
        self.hash.get_or_compute(|| self.compute_hash())
    }
}

impl<K: TreeKey, V: TreeValue> fmt::Debug for MerbinnerTree<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MerbinnerTree")
            .field("nodes", &self.nodes)
            .field("sum", &self.sum)
            .finish()
    }
}
