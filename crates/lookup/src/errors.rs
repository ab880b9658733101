use bitcoin::OutPoint;

use hue_marshal::MarshalError;

/// Failure of a proof fetch. Every variant is transient for the lookup
/// service: the fetch is retried with backoff.
#[derive(thiserror::Error, Debug)]
pub enum LookupError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Server answered, but not with success.
    #[error("Proof server returned status {status}: {}", .error.as_deref().unwrap_or("no details"))]
    Status {
        status: String,
        error: Option<String>,
    },

    #[error("Malformed proof server response: {0}")]
    MalformedResponse(String),

    #[error("Malformed proof: {0}")]
    MalformedProof(#[from] MarshalError),

    /// Proof is about another output than the requested one.
    #[error("Proof for {found} returned for requested {requested}")]
    OutpointMismatch {
        requested: OutPoint,
        found: OutPoint,
    },
}
