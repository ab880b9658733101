//! Color track: the per-color ledger of colored outputs, built by replaying
//! transactions through the transfer kernel, with exact LIFO undo.

mod errors;
pub use errors::TrackError;

mod oracle;
#[cfg(feature = "mocks")]
pub use oracle::MockWalletOracle;
pub use oracle::WalletOracle;

mod track;
pub use track::ColorTrack;

mod proof;
pub use proof::ColorProof;

#[cfg(test)]
mod tests;
