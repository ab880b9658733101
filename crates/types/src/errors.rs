use hue_marshal::MarshalError;
use hue_merbinner::TreeError;

use crate::GenesisPoint;

/// Errors of building or importing a [`ColorDefinition`](crate::ColorDefinition).
#[derive(thiserror::Error, Debug)]
pub enum DefinitionError {
    #[error("Invalid genesis tree: {0}")]
    Tree(#[from] TreeError),

    /// Outpoint tree holds a script, or script tree holds an outpoint.
    #[error("Genesis point {0} is in a wrong tree")]
    MisplacedGenesisPoint(GenesisPoint),

    #[error("Malformed definition: {0}")]
    Marshal(#[from] MarshalError),

    #[error("Invalid definition document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Definition is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Name of the document differs from the committed one.
    #[error("Document name {document:?} doesn't match committed name {committed:?}")]
    NameMismatch { document: String, committed: String },
}
