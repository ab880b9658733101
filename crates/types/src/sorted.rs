use std::cmp::Ordering;
use std::sync::Arc;

use bitcoin::{Transaction, Txid};

use hue_marshal::{Deserializer, MarshalResult, Serializable, Serializer};

/// Transaction with its position inside of the containing block.
///
/// Ordered by position, so that transactions of one block are replayed in
/// their topological order.
#[derive(Debug, Clone)]
pub struct SortedTransaction {
    pub position: u32,
    pub tx: Arc<Transaction>,
}

impl SortedTransaction {
    pub fn new(position: u32, tx: Arc<Transaction>) -> Self {
        Self { position, tx }
    }

    pub fn txid(&self) -> Txid {
        self.tx.txid()
    }
}

impl PartialEq for SortedTransaction {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortedTransaction {}

impl PartialOrd for SortedTransaction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortedTransaction {
    fn cmp(&self, other: &Self) -> Ordering {
        self.position
            .cmp(&other.position)
            .then_with(|| self.txid().cmp(&other.txid()))
    }
}

/// The transaction is memoized: a serializer shared with other structures
/// writes it once.
impl Serializable for SortedTransaction {
    fn serialize(&self, serializer: &mut Serializer) {
        serializer.write_var_int(self.position as u64);
        serializer.write_memoized(&self.tx);
    }

    fn deserialize(deserializer: &mut Deserializer<'_>) -> MarshalResult<Self> {
        let position = deserializer.read()?;
        let tx = deserializer.read_memoized()?;

        Ok(Self { position, tx })
    }
}
