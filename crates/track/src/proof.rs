use std::collections::HashSet;
use std::sync::Arc;

use bitcoin::{OutPoint, Transaction};

use hue_marshal::{Deserializer, MarshalResult, Serializable, Serializer};
use hue_types::ColorDefinition;

use crate::{ColorTrack, TrackError};

/// Proof that an output carries a quantity of a color.
///
/// Holds the ancestry of the output from the genesis transactions, in
/// application order. Fetched from proof servers by light clients.
#[derive(Debug, Clone)]
pub struct ColorProof {
    definition: Arc<ColorDefinition>,
    outpoint: OutPoint,
    quantity: u64,
    transactions: Vec<Arc<Transaction>>,
}

impl ColorProof {
    pub fn new(
        definition: Arc<ColorDefinition>,
        outpoint: OutPoint,
        quantity: u64,
        transactions: Vec<Arc<Transaction>>,
    ) -> Self {
        Self {
            definition,
            outpoint,
            quantity,
            transactions,
        }
    }

    /// Build the proof for `outpoint` from a track that knows it. Only the
    /// transactions the output's color descends from are included.
    pub fn from_track(track: &ColorTrack, outpoint: OutPoint) -> Option<Self> {
        let quantity = track.quantity(&outpoint)?;

        let mut ancestors = HashSet::from([outpoint.txid]);
        let mut transactions = Vec::new();

        for tx in track.transactions().rev() {
            if !ancestors.contains(&tx.txid()) {
                continue;
            }

            for input in &tx.input {
                if track.outputs().contains_key(&input.previous_output) {
                    ancestors.insert(input.previous_output.txid);
                }
            }

            transactions.push(tx.clone());
        }

        transactions.reverse();

        Some(Self {
            definition: track.definition().clone(),
            outpoint,
            quantity,
            transactions,
        })
    }

    pub fn definition(&self) -> &Arc<ColorDefinition> {
        &self.definition
    }

    pub fn outpoint(&self) -> OutPoint {
        self.outpoint
    }

    pub fn quantity(&self) -> u64 {
        self.quantity
    }

    pub fn transactions(&self) -> &[Arc<Transaction>] {
        &self.transactions
    }

    /// Replay the transactions through an empty track and check the
    /// resulting quantity at the proven output.
    pub fn verify(&self) -> Result<(), TrackError> {
        let mut track = ColorTrack::new(self.definition.clone());

        for tx in &self.transactions {
            track.add(tx.clone())?;
        }

        let actual = track.quantity(&self.outpoint).unwrap_or(0);
        if actual != self.quantity {
            return Err(TrackError::QuantityMismatch {
                outpoint: self.outpoint,
                expected: self.quantity,
                actual,
            });
        }

        Ok(())
    }
}

impl Serializable for ColorProof {
    fn serialize(&self, serializer: &mut Serializer) {
        serializer.write(self.definition.as_ref());
        serializer.write(&self.outpoint);
        serializer.write_var_int(self.quantity);

        serializer.write_var_int(self.transactions.len() as u64);
        for tx in &self.transactions {
            serializer.write(tx.as_ref());
        }
    }

    fn deserialize(deserializer: &mut Deserializer<'_>) -> MarshalResult<Self> {
        let definition = Arc::new(deserializer.read::<ColorDefinition>()?);
        let outpoint = deserializer.read()?;
        let quantity = deserializer.read_var_int()?;

        let transactions = deserializer
            .read::<Vec<Transaction>>()?
            .into_iter()
            .map(Arc::new)
            .collect();

        Ok(Self {
            definition,
            outpoint,
            quantity,
            transactions,
        })
    }
}
