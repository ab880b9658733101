use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use bitcoin::{OutPoint, Transaction, Txid};

use hue_marshal::{
    Deserializer, Hashable, HmacKey, MarshalError, MarshalResult, ObjectHash, Serializable,
    Serializer,
};
use hue_types::{apply_kernel, unpad, ColorDefinition};

use crate::{ColorProof, TrackError, WalletOracle};

const STATE_HMAC_KEY: HmacKey = *b"hue/track/state\0";

/// Change of one output made by an applied transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CreatedOutput {
    outpoint: OutPoint,
    quantity: u64,
}

/// Colored output spent by an applied transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SpentOutput {
    outpoint: OutPoint,
    quantity: u64,
}

/// Applied transaction with everything needed to revert it.
#[derive(Debug, Clone)]
struct AppliedTransaction {
    tx: Arc<Transaction>,
    created: Vec<CreatedOutput>,
    spent: Vec<SpentOutput>,
}

/// Ledger of outputs carrying the color of one definition.
///
/// Mutated only by [`ColorTrack::add`] and the undo operations; undo is
/// strictly LIFO, so the track always equals a replay of its history.
#[derive(Debug, Clone)]
pub struct ColorTrack {
    definition: Arc<ColorDefinition>,
    /// Every colored output ever seen.
    outputs: BTreeMap<OutPoint, u64>,
    /// Colored outputs not spent by the history.
    unspent_outputs: BTreeMap<OutPoint, u64>,
    /// History in application order.
    history: Vec<AppliedTransaction>,
    applied: HashSet<Txid>,
}

impl ColorTrack {
    pub fn new(definition: Arc<ColorDefinition>) -> Self {
        Self {
            definition,
            outputs: BTreeMap::new(),
            unspent_outputs: BTreeMap::new(),
            history: Vec::new(),
            applied: HashSet::new(),
        }
    }

    pub fn definition(&self) -> &Arc<ColorDefinition> {
        &self.definition
    }

    pub fn definition_hash(&self) -> ObjectHash {
        self.definition.hash()
    }

    /// Apply transaction to the track.
    pub fn add(&mut self, tx: Arc<Transaction>) -> Result<(), TrackError> {
        let txid = tx.txid();

        if self.applied.contains(&txid) {
            tracing::error!(
                txid = %txid,
                definition = %self.definition_hash(),
                "Transaction is already in the track"
            );
            return Err(TrackError::DuplicateTransaction(txid));
        }

        let mut created_quantities: BTreeMap<u32, u64> = BTreeMap::new();

        for (vout, output) in tx.output.iter().enumerate() {
            let outpoint = OutPoint::new(txid, vout as u32);

            if self
                .definition
                .is_genesis_output(&outpoint, &output.script_pubkey)
            {
                created_quantities.insert(vout as u32, unpad(output.value));
            }
        }

        let color_ins = tx
            .input
            .iter()
            .map(|input| self.unspent_outputs.get(&input.previous_output).copied())
            .collect::<Vec<_>>();

        let color_outs = apply_kernel(&tx, &color_ins);

        for (vout, quantity) in color_outs.into_iter().enumerate() {
            if let Some(quantity) = quantity {
                *created_quantities.entry(vout as u32).or_insert(0) += quantity;
            }
        }

        let created = created_quantities
            .into_iter()
            .map(|(vout, quantity)| CreatedOutput {
                outpoint: OutPoint::new(txid, vout),
                quantity,
            })
            .collect::<Vec<_>>();

        for output in &created {
            self.outputs.insert(output.outpoint, output.quantity);
            self.unspent_outputs.insert(output.outpoint, output.quantity);
        }

        let mut spent = Vec::new();
        for input in &tx.input {
            if let Some(quantity) = self.unspent_outputs.remove(&input.previous_output) {
                spent.push(SpentOutput {
                    outpoint: input.previous_output,
                    quantity,
                });
            }
        }

        tracing::debug!(
            txid = %txid,
            definition = %self.definition_hash(),
            created = created.len(),
            spent = spent.len(),
            "Applied transaction to color track"
        );

        self.applied.insert(txid);
        self.history.push(AppliedTransaction { tx, created, spent });

        Ok(())
    }

    /// Revert the most recently applied transaction.
    pub fn undo_last(&mut self) -> Result<Arc<Transaction>, TrackError> {
        let Some(applied) = self.history.pop() else {
            tracing::error!(
                definition = %self.definition_hash(),
                "Undo requested with empty history"
            );
            return Err(TrackError::EmptyHistory);
        };

        for spent in &applied.spent {
            self.unspent_outputs.insert(spent.outpoint, spent.quantity);
        }

        // An outpoint is created by exactly one transaction, so it was absent
        // before this one.
        for created in &applied.created {
            self.outputs.remove(&created.outpoint);
            self.unspent_outputs.remove(&created.outpoint);
        }

        let txid = applied.tx.txid();
        self.applied.remove(&txid);

        tracing::debug!(
            txid = %txid,
            definition = %self.definition_hash(),
            "Undone transaction from color track"
        );

        Ok(applied.tx)
    }

    /// Revert transactions back to and including `txid`, most recent first.
    /// Returns the reverted transactions in the order they were undone.
    pub fn undo(&mut self, txid: &Txid) -> Result<Vec<Arc<Transaction>>, TrackError> {
        if !self.applied.contains(txid) {
            tracing::error!(
                txid = %txid,
                definition = %self.definition_hash(),
                "Undo of unknown transaction"
            );
            return Err(TrackError::UnknownTransaction(*txid));
        }

        let mut undone = Vec::new();

        loop {
            let tx = self.undo_last()?;
            let done = tx.txid() == *txid;
            undone.push(tx);

            if done {
                return Ok(undone);
            }
        }
    }

    /// Whether applying `tx` can change the track.
    pub fn is_transaction_relevant(&self, tx: &Transaction, wallet: &dyn WalletOracle) -> bool {
        if tx
            .input
            .iter()
            .any(|input| self.unspent_outputs.contains_key(&input.previous_output))
        {
            return true;
        }

        let txid = tx.txid();

        tx.output.iter().enumerate().any(|(vout, output)| {
            self.definition
                .is_genesis_output(&OutPoint::new(txid, vout as u32), &output.script_pubkey)
                || wallet.is_mine(output)
        })
    }

    /// Merge a network proof into the track. Returns the number of applied
    /// transactions.
    pub fn merge_proof(&mut self, proof: &ColorProof) -> Result<usize, TrackError> {
        let found = proof.definition().hash();
        if found != self.definition_hash() {
            return Err(TrackError::DefinitionMismatch {
                expected: self.definition_hash(),
                found,
            });
        }

        proof.verify()?;

        if self.quantity(&proof.outpoint()) == Some(proof.quantity()) {
            return Ok(0);
        }

        let txids = proof
            .transactions()
            .iter()
            .map(|tx| tx.txid())
            .collect::<HashSet<_>>();
        let applied = txids.iter().filter(|txid| !self.contains_tx(txid)).count();

        // Transactions already in the history may have been applied before
        // their inputs' colors were known. Rewind to the earliest of them,
        // replay the proof, then the rest of the rewound history.
        let first_known = self
            .history
            .iter()
            .map(|applied| applied.tx.txid())
            .find(|txid| txids.contains(txid));

        let rewound = match first_known {
            Some(txid) => self.undo(&txid)?,
            None => Vec::new(),
        };

        for tx in proof.transactions().iter().chain(rewound.iter().rev()) {
            if !self.contains_tx(&tx.txid()) {
                self.add(tx.clone())?;
            }
        }

        tracing::debug!(
            definition = %self.definition_hash(),
            outpoint = %proof.outpoint(),
            applied,
            "Merged color proof"
        );

        Ok(applied)
    }

    /// Quantity of any output that ever carried the color.
    pub fn quantity(&self, outpoint: &OutPoint) -> Option<u64> {
        self.outputs.get(outpoint).copied()
    }

    pub fn unspent_quantity(&self, outpoint: &OutPoint) -> Option<u64> {
        self.unspent_outputs.get(outpoint).copied()
    }

    pub fn outputs(&self) -> &BTreeMap<OutPoint, u64> {
        &self.outputs
    }

    pub fn unspent_outputs(&self) -> &BTreeMap<OutPoint, u64> {
        &self.unspent_outputs
    }

    pub fn unspent_total(&self) -> u64 {
        self.unspent_outputs
            .values()
            .fold(0u64, |total, quantity| total.saturating_add(*quantity))
    }

    pub fn contains_tx(&self, txid: &Txid) -> bool {
        self.applied.contains(txid)
    }

    /// Applied transactions in application order.
    pub fn transactions(&self) -> impl DoubleEndedIterator<Item = &Arc<Transaction>> {
        self.history.iter().map(|applied| &applied.tx)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Bloom filter elements of the definition's genesis points.
    pub fn bloom_elements(&self) -> Vec<Vec<u8>> {
        self.definition
            .genesis_points()
            .map(|point| point.bloom_element())
            .collect()
    }

    /// Commitment to the definition, the output maps and the history, for
    /// checking that two replicas are in sync.
    pub fn state_hash(&self) -> ObjectHash {
        let mut serializer = Serializer::hashing();

        serializer.write_hashable(self.definition.as_ref());
        serializer.write(&self.outputs);
        serializer.write(&self.unspent_outputs);

        serializer.write_var_int(self.history.len() as u64);
        for applied in &self.history {
            serializer.write(&applied.tx.txid());
        }

        serializer.finalize_hmac(&STATE_HMAC_KEY)
    }
}

impl Serializable for CreatedOutput {
    fn serialize(&self, serializer: &mut Serializer) {
        serializer.write(&self.outpoint);
        serializer.write_var_int(self.quantity);
    }

    fn deserialize(deserializer: &mut Deserializer<'_>) -> MarshalResult<Self> {
        Ok(Self {
            outpoint: deserializer.read()?,
            quantity: deserializer.read_var_int()?,
        })
    }
}

impl Serializable for SpentOutput {
    fn serialize(&self, serializer: &mut Serializer) {
        serializer.write(&self.outpoint);
        serializer.write_var_int(self.quantity);
    }

    fn deserialize(deserializer: &mut Deserializer<'_>) -> MarshalResult<Self> {
        Ok(Self {
            outpoint: deserializer.read()?,
            quantity: deserializer.read_var_int()?,
        })
    }
}

impl Serializable for AppliedTransaction {
    fn serialize(&self, serializer: &mut Serializer) {
        serializer.write_memoized(&self.tx);
        serializer.write(&self.created);
        serializer.write(&self.spent);
    }

    fn deserialize(deserializer: &mut Deserializer<'_>) -> MarshalResult<Self> {
        Ok(Self {
            tx: deserializer.read_memoized()?,
            created: deserializer.read()?,
            spent: deserializer.read()?,
        })
    }
}

/// Persistent form of the track. Definition and transactions are memoized.
impl Serializable for ColorTrack {
    fn serialize(&self, serializer: &mut Serializer) {
        serializer.write_memoized(&self.definition);
        serializer.write(&self.outputs);
        serializer.write(&self.unspent_outputs);
        serializer.write(&self.history);
    }

    fn deserialize(deserializer: &mut Deserializer<'_>) -> MarshalResult<Self> {
        let definition = deserializer.read_memoized()?;
        let outputs = deserializer.read()?;
        let unspent_outputs = deserializer.read()?;
        let history: Vec<AppliedTransaction> = deserializer.read()?;

        let mut applied = HashSet::with_capacity(history.len());
        for entry in &history {
            if !applied.insert(entry.tx.txid()) {
                return Err(MarshalError::InvalidEncoding(
                    "repeated transaction in track history",
                ));
            }
        }

        Ok(Self {
            definition,
            outputs,
            unspent_outputs,
            history,
            applied,
        })
    }
}
