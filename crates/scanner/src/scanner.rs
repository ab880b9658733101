use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use bitcoin::{BlockHash, OutPoint, Transaction, TxOut, Txid};
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::oneshot;

use hue_marshal::{Deserializer, Hashable, MarshalError, ObjectHash, Serializable, Serializer};
use hue_track::{ColorProof, ColorTrack, TrackError, WalletOracle};
use hue_types::{unpad, ColorDefinition, Network, SortedTransaction};

use crate::bloom::{BloomFilter, BLOOM_UPDATE_NONE};
use crate::{AssetMap, ResolutionError, ScannerConfig, ScannerError};

/// Version of the persisted scanner state.
const STATE_VERSION: u64 = 1;

pub type Resolution = Result<Arc<Transaction>, ResolutionError>;

/// Completion of [`ColorScanner::get_transaction_with_known_assets`].
pub type ResolutionReceiver = oneshot::Receiver<Resolution>;

#[derive(Default)]
struct ScannerState {
    /// One track per followed definition, keyed by definition hash.
    tracks: BTreeMap<ObjectHash, ColorTrack>,
    /// Relevant transactions of every seen block, sorted by position.
    block_txs: BTreeMap<BlockHash, Vec<SortedTransaction>>,
    /// Transactions seen before confirmation.
    pending: BTreeMap<Txid, Arc<Transaction>>,
    /// Callers waiting for the colors of a transaction.
    unknown_futures: HashMap<Txid, Vec<oneshot::Sender<Resolution>>>,
    started: bool,
}

impl ScannerState {
    /// Apply transaction to every track it is relevant to. Returns whether
    /// any track changed.
    fn apply(
        &mut self,
        tx: &Arc<Transaction>,
        wallet: &dyn WalletOracle,
    ) -> Result<bool, TrackError> {
        let txid = tx.txid();
        let mut applied = false;

        for track in self.tracks.values_mut() {
            if track.contains_tx(&txid) || !track.is_transaction_relevant(tx, wallet) {
                continue;
            }

            track.add(tx.clone())?;
            applied = true;
        }

        Ok(applied)
    }

    /// Apply pending transactions, parents before children.
    fn apply_pending(&mut self, wallet: &dyn WalletOracle) -> Result<(), TrackError> {
        for tx in topological_order(&self.pending) {
            self.apply(&tx, wallet)?;
        }

        Ok(())
    }

    /// Definition and quantity of a colored output known to any track.
    fn find_quantity(&self, outpoint: &OutPoint) -> Option<(&Arc<ColorDefinition>, u64)> {
        self.tracks.values().find_map(|track| {
            track
                .quantity(outpoint)
                .map(|quantity| (track.definition(), quantity))
        })
    }

    /// Outputs of `tx` expected to carry color whose color no track knows.
    fn unknown_outputs(&self, tx: &Transaction, wallet: &dyn WalletOracle) -> Vec<OutPoint> {
        let txid = tx.txid();

        tx.output
            .iter()
            .enumerate()
            .filter(|(_, output)| wallet.is_colored_chain_output(output))
            .map(|(vout, _)| OutPoint::new(txid, vout as u32))
            .filter(|outpoint| self.find_quantity(outpoint).is_none())
            .collect()
    }

    fn is_known(&self, tx: &Transaction, wallet: &dyn WalletOracle) -> bool {
        self.unknown_outputs(tx, wallet).is_empty()
    }

    fn fulfil(&mut self, tx: &Arc<Transaction>) {
        let Some(senders) = self.unknown_futures.remove(&tx.txid()) else {
            return;
        };

        tracing::debug!(
            txid = %tx.txid(),
            waiting = senders.len(),
            "Resolved colors of transaction"
        );

        for sender in senders {
            // The caller may have given up waiting.
            let _ = sender.send(Ok(tx.clone()));
        }
    }

    fn fail_all(&mut self, error: impl Fn(Txid) -> ResolutionError) {
        for (txid, senders) in self.unknown_futures.drain() {
            tracing::warn!(txid = %txid, "Failed to resolve colors of transaction");

            for sender in senders {
                let _ = sender.send(Err(error(txid)));
            }
        }
    }

    /// Add the color carried by `output` at `outpoint` to `assets`, with
    /// the given sign.
    fn classify_output(
        &self,
        assets: &mut AssetMap,
        outpoint: &OutPoint,
        output: &TxOut,
        sign: i128,
        wallet: &dyn WalletOracle,
        network: Network,
    ) {
        if let Some((definition, quantity)) = self.find_quantity(outpoint) {
            assets.add(definition, sign * quantity as i128);
        } else if wallet.is_colored_chain_output(output) {
            assets.add(
                &ColorDefinition::unknown(network),
                sign * unpad(output.value) as i128,
            );
        } else {
            assets.add(
                &ColorDefinition::bitcoin(network),
                sign * output.value as i128,
            );
        }
    }
}

/// Pending transactions ordered so that every transaction comes after the
/// pending transactions it spends.
fn topological_order(pending: &BTreeMap<Txid, Arc<Transaction>>) -> Vec<Arc<Transaction>> {
    let mut remaining = pending.clone();
    let mut ordered = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let ready = remaining
            .iter()
            .filter(|(_, tx)| {
                tx.input
                    .iter()
                    .all(|input| !remaining.contains_key(&input.previous_output.txid))
            })
            .map(|(txid, _)| *txid)
            .collect::<Vec<_>>();

        if ready.is_empty() {
            ordered.extend(remaining.into_values());
            break;
        }

        for txid in ready {
            if let Some(tx) = remaining.remove(&txid) {
                ordered.push(tx);
            }
        }
    }

    ordered
}

/// Feeds chain and peer events into the tracks of the followed colors.
///
/// Lock order is wallet lock, filter lock, state lock. The wallet lock is
/// held by callers; every method that changes the state takes the filter
/// lock before the state lock, so that a filter calculation never sees a
/// half applied update. [`WalletOracle`] methods are called with the
/// scanner locks held and must not call back into the scanner.
pub struct ColorScanner {
    config: ScannerConfig,
    wallet: Arc<dyn WalletOracle>,
    filter_lock: Mutex<()>,
    state: Mutex<ScannerState>,
}

impl ColorScanner {
    pub fn new(config: ScannerConfig, wallet: Arc<dyn WalletOracle>) -> Self {
        Self {
            config,
            wallet,
            filter_lock: Mutex::new(()),
            state: Mutex::new(ScannerState::default()),
        }
    }

    pub fn network(&self) -> Network {
        self.config.network
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    fn lock_for_update(&self) -> (MutexGuard<'_, ()>, MutexGuard<'_, ScannerState>) {
        let filter = self.filter_lock.lock();
        let state = self.state.lock();

        (filter, state)
    }

    /// Start following a color.
    pub fn add_definition(&self, definition: Arc<ColorDefinition>) -> Result<(), ScannerError> {
        let hash = definition.hash();

        if definition.is_reserved() {
            return Err(ScannerError::ReservedDefinition(hash));
        }

        let (_filter, mut state) = self.lock_for_update();

        if state.tracks.contains_key(&hash) {
            tracing::error!(definition = %hash, "Definition is already followed");
            return Err(ScannerError::DefinitionCollision(hash));
        }

        tracing::info!(definition = %definition, "Following color");

        state.tracks.insert(hash, ColorTrack::new(definition));

        Ok(())
    }

    /// Stop following a color, dropping its track.
    pub fn remove_definition(&self, hash: &ObjectHash) -> Result<ColorTrack, ScannerError> {
        let (_filter, mut state) = self.lock_for_update();

        let track = state
            .tracks
            .remove(hash)
            .ok_or(ScannerError::UnknownDefinition(*hash))?;

        tracing::info!(definition = %hash, "Stopped following color");

        Ok(track)
    }

    /// Followed definitions. Reserved definitions are not included.
    pub fn definitions(&self) -> Vec<Arc<ColorDefinition>> {
        let state = self.state.lock();

        state
            .tracks
            .values()
            .map(|track| track.definition().clone())
            .collect()
    }

    pub fn definition(&self, hash: &ObjectHash) -> Option<Arc<ColorDefinition>> {
        let state = self.state.lock();

        state
            .tracks
            .get(hash)
            .map(|track| track.definition().clone())
    }

    /// Copy of the track of a followed color.
    pub fn track(&self, hash: &ObjectHash) -> Option<ColorTrack> {
        self.state.lock().tracks.get(hash).cloned()
    }

    pub fn is_transaction_relevant(&self, tx: &Transaction) -> bool {
        let state = self.state.lock();

        state
            .tracks
            .values()
            .any(|track| track.is_transaction_relevant(tx, self.wallet.as_ref()))
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    /// Replay the pending transactions and start applying new ones.
    pub fn start(&self) -> Result<(), ScannerError> {
        let (_filter, mut state) = self.lock_for_update();

        state.started = true;
        state.apply_pending(self.wallet.as_ref())?;

        let pending = state.pending.values().cloned().collect::<Vec<_>>();
        for tx in pending {
            if state.is_known(&tx, self.wallet.as_ref()) {
                state.fulfil(&tx);
            }
        }

        tracing::info!(pending = state.pending.len(), "Color scanner started");

        Ok(())
    }

    /// Fail every waiting caller with [`ResolutionError::Cancelled`]. Pending
    /// transactions are kept for the next [`ColorScanner::start`].
    ///
    /// Lookups running against a stopped scanner drop their results instead
    /// of merging them.
    pub fn stop(&self) {
        let mut state = self.state.lock();

        state.started = false;
        state.fail_all(|_| ResolutionError::Cancelled);

        tracing::info!("Color scanner stopped");
    }

    /// Handle relevant transaction of a block at `position`.
    pub fn receive_from_block(
        &self,
        tx: Arc<Transaction>,
        block_hash: BlockHash,
        position: u32,
        best_chain: bool,
    ) -> Result<(), ScannerError> {
        let (_filter, mut state) = self.lock_for_update();
        let txid = tx.txid();

        let block = state.block_txs.entry(block_hash).or_default();
        let sorted = SortedTransaction::new(position, tx.clone());
        if let Err(index) = block.binary_search(&sorted) {
            block.insert(index, sorted);
        }

        if !best_chain {
            tracing::debug!(
                txid = %txid,
                block = %block_hash,
                "Recorded side chain transaction"
            );
            return Ok(());
        }

        state.pending.remove(&txid);
        let applied = state.apply(&tx, self.wallet.as_ref())?;

        tracing::debug!(
            txid = %txid,
            block = %block_hash,
            position,
            applied,
            "Received transaction from block"
        );

        state.fulfil(&tx);

        Ok(())
    }

    /// Handle transaction seen before confirmation.
    pub fn add_pending(&self, tx: Arc<Transaction>) -> Result<(), ScannerError> {
        let (_filter, mut state) = self.lock_for_update();
        let txid = tx.txid();

        state.pending.insert(txid, tx.clone());

        if !state.started {
            tracing::debug!(txid = %txid, "Queued pending transaction until start");
            return Ok(());
        }

        state.apply(&tx, self.wallet.as_ref())?;

        if state.is_known(&tx, self.wallet.as_ref()) {
            state.fulfil(&tx);
        }

        Ok(())
    }

    /// Switch from `old_blocks` to `new_blocks`, both ordered tip first and
    /// both descending from `split_point`.
    pub fn reorganize(
        &self,
        split_point: BlockHash,
        old_blocks: &[BlockHash],
        new_blocks: &[BlockHash],
    ) -> Result<(), ScannerError> {
        let (_filter, mut state) = self.lock_for_update();
        let state = &mut *state;

        tracing::info!(
            split_point = %split_point,
            old = old_blocks.len(),
            new = new_blocks.len(),
            "Reorganizing color tracks"
        );

        let abandoned = old_blocks
            .iter()
            .filter_map(|block_hash| state.block_txs.get(block_hash))
            .flatten()
            .map(SortedTransaction::txid)
            .collect::<HashSet<_>>();

        // Transactions undone per track, most recent first.
        let mut rewound = Vec::with_capacity(state.tracks.len());

        for (hash, track) in state.tracks.iter_mut() {
            let mut undone = Vec::new();

            for block_hash in old_blocks {
                let Some(block) = state.block_txs.get(block_hash) else {
                    continue;
                };

                // Undo is LIFO: undoing the first applied transaction of the
                // block undoes every later one, including transactions of
                // blocks that stay on the chain.
                let first = block
                    .iter()
                    .find(|sorted| track.contains_tx(&sorted.txid()));

                if let Some(first) = first {
                    undone.extend(track.undo(&first.txid())?);
                }
            }

            rewound.push((*hash, undone));
        }

        for block_hash in new_blocks.iter().rev() {
            let Some(block) = state.block_txs.get(block_hash).cloned() else {
                continue;
            };

            for sorted in block {
                state.pending.remove(&sorted.txid());
                state.apply(&sorted.tx, self.wallet.as_ref())?;
                state.fulfil(&sorted.tx);
            }
        }

        for (hash, undone) in rewound {
            let Some(track) = state.tracks.get_mut(&hash) else {
                continue;
            };

            for tx in undone.into_iter().rev() {
                let txid = tx.txid();
                if abandoned.contains(&txid) || track.contains_tx(&txid) {
                    continue;
                }

                track.add(tx)?;
            }
        }

        if state.started {
            state.apply_pending(self.wallet.as_ref())?;
        }

        Ok(())
    }

    /// Fail callers waiting for colors: what wasn't resolved by the next
    /// best block won't be resolved locally.
    pub fn notify_new_best_block(&self, block_hash: BlockHash) {
        let mut state = self.state.lock();

        if !state.unknown_futures.is_empty() {
            tracing::debug!(
                block = %block_hash,
                "Failing unresolved transactions on new best block"
            );
        }

        state.fail_all(ResolutionError::UnknownAssetType);
    }

    /// Wait until the colors of all outputs of `tx` expected to carry color
    /// are known. Resolved immediately if they already are.
    pub fn get_transaction_with_known_assets(&self, tx: Arc<Transaction>) -> ResolutionReceiver {
        let (sender, receiver) = oneshot::channel();
        let mut state = self.state.lock();

        if state.is_known(&tx, self.wallet.as_ref()) {
            let _ = sender.send(Ok(tx));
            return receiver;
        }

        state
            .unknown_futures
            .entry(tx.txid())
            .or_default()
            .push(sender);

        receiver
    }

    /// Merge a network proof into the track of its definition.
    pub fn merge_proof(&self, proof: &ColorProof) -> Result<usize, ScannerError> {
        let (_filter, mut state) = self.lock_for_update();
        let hash = proof.definition().hash();

        let track = state
            .tracks
            .get_mut(&hash)
            .ok_or(ScannerError::UnknownDefinition(hash))?;

        Ok(track.merge_proof(proof)?)
    }

    /// Apply pending transactions and clear the ones whose colors are now
    /// known, resolving their callers. Returns the still unresolved ones.
    pub fn resolve_pending(&self) -> Result<Vec<Txid>, ScannerError> {
        let (_filter, mut state) = self.lock_for_update();

        if state.started {
            state.apply_pending(self.wallet.as_ref())?;
        }

        let pending = state.pending.values().cloned().collect::<Vec<_>>();
        let mut unresolved = Vec::new();

        for tx in pending {
            if state.is_known(&tx, self.wallet.as_ref()) {
                state.pending.remove(&tx.txid());
                state.fulfil(&tx);
            } else {
                unresolved.push(tx.txid());
            }
        }

        Ok(unresolved)
    }

    /// Outputs of a pending transaction expected to carry color whose color
    /// is not known locally.
    pub fn unknown_outputs(&self, txid: &Txid) -> Vec<OutPoint> {
        let state = self.state.lock();

        match state.pending.get(txid) {
            Some(tx) => state.unknown_outputs(tx, self.wallet.as_ref()),
            None => Vec::new(),
        }
    }

    pub fn pending_transactions(&self) -> Vec<Arc<Transaction>> {
        self.state.lock().pending.values().cloned().collect()
    }

    /// Colors received by the wallet outputs of `tx` minus colors of the
    /// wallet outputs it spends. Uncolored value goes to the Bitcoin
    /// definition, unidentified color to the Unknown definition.
    pub fn get_net_asset_change(&self, tx: &Transaction) -> AssetMap {
        let state = self.state.lock();
        let wallet = self.wallet.as_ref();
        let network = self.network();
        let txid = tx.txid();

        let mut assets = AssetMap::new();

        for (vout, output) in tx.output.iter().enumerate() {
            if !wallet.is_mine(output) {
                continue;
            }

            let outpoint = OutPoint::new(txid, vout as u32);
            state.classify_output(&mut assets, &outpoint, output, 1, wallet, network);
        }

        for input in &tx.input {
            let Some(previous) = wallet.get_output(&input.previous_output) else {
                continue;
            };

            if !wallet.is_mine(&previous) {
                continue;
            }

            state.classify_output(
                &mut assets,
                &input.previous_output,
                &previous,
                -1,
                wallet,
                network,
            );
        }

        assets.without_zeros()
    }

    /// Colors of the wallet unspent outputs.
    pub fn get_balances(&self) -> AssetMap {
        let state = self.state.lock();
        let wallet = self.wallet.as_ref();

        let mut assets = AssetMap::new();

        for (outpoint, output) in wallet.unspent_outputs() {
            state.classify_output(&mut assets, &outpoint, &output, 1, wallet, self.network());
        }

        assets.without_zeros()
    }

    /// Clear all derived state before a full rescan. Followed definitions
    /// are kept with empty tracks, waiting callers fail with
    /// [`ResolutionError::Cancelled`].
    pub fn reset(&self) {
        let (_filter, mut state) = self.lock_for_update();

        let definitions = state
            .tracks
            .values()
            .map(|track| track.definition().clone())
            .collect::<Vec<_>>();

        state.tracks = definitions
            .into_iter()
            .map(|definition| (definition.hash(), ColorTrack::new(definition)))
            .collect();
        state.block_txs.clear();
        state.pending.clear();
        state.fail_all(|_| ResolutionError::Cancelled);

        tracing::info!("Color scanner state reset");
    }

    /// Persistent form of the tracks, the block history and the pending
    /// transactions. Shared transactions are written once.
    pub fn snapshot(&self) -> Vec<u8> {
        let state = self.state.lock();
        let mut serializer = Serializer::memoized();

        serializer.write_var_int(STATE_VERSION);

        serializer.write_var_int(state.tracks.len() as u64);
        for track in state.tracks.values() {
            serializer.write(track);
        }

        serializer.write(&state.block_txs);

        serializer.write_var_int(state.pending.len() as u64);
        for tx in state.pending.values() {
            serializer.write_memoized(tx);
        }

        serializer.into_bytes()
    }

    /// Recreate scanner from [`ColorScanner::snapshot`]. The scanner is not
    /// started.
    pub fn restore(
        bytes: &[u8],
        config: ScannerConfig,
        wallet: Arc<dyn WalletOracle>,
    ) -> Result<Self, ScannerError> {
        let mut deserializer = Deserializer::new(bytes);

        let version = deserializer.read_var_int()?;
        if version != STATE_VERSION {
            return Err(ScannerError::UnsupportedVersion(version));
        }

        let mut tracks = BTreeMap::new();
        let track_count = deserializer.read_var_int()?;
        for _ in 0..track_count {
            let track = ColorTrack::deserialize(&mut deserializer)?;

            if tracks.insert(track.definition_hash(), track).is_some() {
                return Err(MarshalError::InvalidEncoding("repeated track definition").into());
            }
        }

        let block_txs = deserializer.read()?;

        let mut pending = BTreeMap::new();
        let pending_count = deserializer.read_var_int()?;
        for _ in 0..pending_count {
            let tx: Arc<Transaction> = deserializer.read_memoized()?;
            pending.insert(tx.txid(), tx);
        }

        deserializer.finish()?;

        tracing::info!(
            tracks = tracks.len(),
            pending = pending.len(),
            "Restored color scanner state"
        );

        Ok(Self {
            config,
            wallet,
            filter_lock: Mutex::new(()),
            state: Mutex::new(ScannerState {
                tracks,
                block_txs,
                pending,
                unknown_futures: HashMap::new(),
                started: false,
            }),
        })
    }

    /// Hold the filter lock for a bloom filter calculation, so the tracks
    /// can't change between counting and inserting elements.
    pub fn begin_filter_calculation(&self) -> FilterCalculation<'_> {
        FilterCalculation {
            scanner: self,
            _guard: self.filter_lock.lock(),
        }
    }

    /// Bloom filter with the elements of every followed color, using the
    /// configured false positive rate and tweak.
    pub fn bloom_filter(&self) -> BloomFilter {
        let calculation = self.begin_filter_calculation();

        let mut filter = BloomFilter::new(
            calculation.element_count(),
            self.config.bloom_false_positive_rate,
            self.config.bloom_tweak,
            BLOOM_UPDATE_NONE,
        );
        calculation.insert_into(&mut filter);

        filter
    }
}

/// Scoped bloom filter calculation. Releases the filter lock on drop.
pub struct FilterCalculation<'a> {
    scanner: &'a ColorScanner,
    _guard: MutexGuard<'a, ()>,
}

impl FilterCalculation<'_> {
    fn elements(&self) -> Vec<Vec<u8>> {
        let state = self.scanner.state.lock();

        state
            .tracks
            .values()
            .flat_map(|track| track.bloom_elements())
            .collect()
    }

    pub fn element_count(&self) -> usize {
        self.elements().len()
    }

    pub fn insert_into(&self, filter: &mut BloomFilter) {
        for element in self.elements() {
            filter.insert(&element);
        }
    }
}
