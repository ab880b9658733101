//! Scanner state machine of the Hue colored coin protocol.
//!
//! Drives the color tracks from block, mempool and reorganization events,
//! keeps the bloom filter offered to peers in sync with the followed colors
//! and resolves callers waiting for the colors of a transaction.

mod errors;
pub use errors::{ResolutionError, ScannerError};

mod config;
pub use config::ScannerConfig;

mod assets;
pub use assets::AssetMap;

pub mod bloom;
pub use bloom::BloomFilter;

mod scanner;
pub use scanner::{ColorScanner, FilterCalculation, Resolution, ResolutionReceiver};

pub use hue_track::{ColorProof, ColorTrack, WalletOracle};

#[cfg(test)]
mod tests;
