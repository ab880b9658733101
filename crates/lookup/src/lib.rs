//! Color lookup for wallets without a full chain view.
//!
//! Pending transactions whose colors the scanner can't derive from its own
//! tracks are resolved by fetching color proofs of their outputs from a
//! proof server and merging them into the tracks.

mod errors;
pub use errors::LookupError;

mod config;
pub use config::LookupConfig;

mod fetcher;
#[cfg(any(test, feature = "mocks"))]
pub use fetcher::MockProofFetcher;
pub use fetcher::{FetchedProofs, HttpProofFetcher, ProofFetcher, ProofResponse};

mod service;
pub use service::LookupService;
