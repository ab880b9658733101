use bitcoin::{OutPoint, Txid};

use hue_marshal::{MarshalError, ObjectHash};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackError {
    /// Proof or transaction belongs to another color.
    #[error("Definition mismatch: track follows {expected}, got {found}")]
    DefinitionMismatch {
        expected: ObjectHash,
        found: ObjectHash,
    },

    #[error("Undo requested with empty history")]
    EmptyHistory,

    /// Undo of a transaction the track never applied.
    #[error("Transaction {0} is not in the track history")]
    UnknownTransaction(Txid),

    #[error("Transaction {0} is already applied")]
    DuplicateTransaction(Txid),

    /// Replayed proof doesn't give the declared quantity.
    #[error("Quantity mismatch at {outpoint}: proof declares {expected}, replay gives {actual}")]
    QuantityMismatch {
        outpoint: OutPoint,
        expected: u64,
        actual: u64,
    },

    #[error("Malformed proof: {0}")]
    Marshal(#[from] MarshalError),
}
