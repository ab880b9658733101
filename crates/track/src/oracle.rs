use bitcoin::{OutPoint, TxOut};

/// View of the wallet the colored outputs belong to.
///
/// Implemented by the wallet library; the color engine never derives keys or
/// scripts itself.
#[cfg_attr(feature = "mocks", mockall::automock)]
pub trait WalletOracle: Send + Sync {
    /// Whether the output pays to the wallet.
    fn is_mine(&self, output: &TxOut) -> bool;

    /// Whether the output pays to one of the color-specific wallet chains,
    /// meaning it is expected to carry color.
    fn is_colored_chain_output(&self, output: &TxOut) -> bool;

    /// Previous output spent by a wallet input, if the wallet knows it.
    fn get_output(&self, outpoint: &OutPoint) -> Option<TxOut>;

    /// Current candidate unspent outputs of the wallet.
    fn unspent_outputs(&self) -> Vec<(OutPoint, TxOut)>;
}
