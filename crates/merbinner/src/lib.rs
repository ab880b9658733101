//! Merbinner tree: a canonical, bit-indexed binary Merkle-radix commitment
//! over a key/value set with an aggregated sum of values.
//!
//! Nodes are split on the bits of their domain-separated key hashes, so the
//! hash mode encoding depends on the member set only, never on insertion
//! order.

mod errors;
pub use errors::TreeError;

mod tree;
pub use tree::{MerbinnerTree, TreeKey, TreeValue, MAX_DEPTH};
