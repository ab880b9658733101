use bitcoin::Txid;

use hue_marshal::{MarshalError, ObjectHash};
use hue_track::TrackError;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ScannerError {
    #[error("Track error: {0}")]
    Track(#[from] TrackError),

    #[error("Malformed scanner state: {0}")]
    Marshal(#[from] MarshalError),

    /// Definition with the same hash is already followed.
    #[error("Definition {0} is already followed")]
    DefinitionCollision(ObjectHash),

    /// Bitcoin and Unknown definitions have no tracks.
    #[error("Reserved definition {0} can't be followed")]
    ReservedDefinition(ObjectHash),

    #[error("Definition {0} is not followed")]
    UnknownDefinition(ObjectHash),

    /// Persisted state has an unsupported version.
    #[error("Unsupported scanner state version {0}")]
    UnsupportedVersion(u64),
}

/// Terminal failure delivered to callers waiting for the colors of a
/// transaction.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// Colors were not resolved before the next best block.
    #[error("Could not determine asset type of transaction {0}")]
    UnknownAssetType(Txid),

    /// Scanner was stopped.
    #[error("Scanner stopped before the transaction was resolved")]
    Cancelled,
}
