/// Errors of building a [`MerbinnerTree`](crate::MerbinnerTree).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// Sum of the tree values doesn't fit into 64 bits.
    #[error("Sum of tree values overflows")]
    SumOverflow,

    /// The same key was provided twice.
    #[error("Duplicate key in tree nodes")]
    DuplicateKey,
}
