use std::sync::Arc;

use bitcoin::hashes::Hash;
use bitcoin::{
    BlockHash, OutPoint, PackedLockTime, Script, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use once_cell::sync::Lazy;

use hue_marshal::{Hashable, ObjectHash};
use hue_track::MockWalletOracle;
use hue_types::{pad, ColorDefinition, Network};

use crate::{ColorScanner, ResolutionError, ScannerConfig, ScannerError, WalletOracle};

/// Wallet chain for colored outputs.
fn colored_script() -> Script {
    Script::from(vec![0x51])
}

/// Wallet chain for plain bitcoin.
fn bitcoin_script() -> Script {
    Script::from(vec![0x52])
}

fn foreign_script() -> Script {
    Script::from(vec![0x53])
}

static GENESIS_TX: Lazy<Arc<Transaction>> = Lazy::new(|| {
    transaction(
        &[(OutPoint::new(Txid::from_inner([1; 32]), 0), 0)],
        &[(pad(10, 546), foreign_script())],
    )
});

static DEFINITION: Lazy<Arc<ColorDefinition>> = Lazy::new(|| {
    let definition = ColorDefinition::builder()
        .name("Gold")
        .outpoint_genesis(OutPoint::new(GENESIS_TX.txid(), 0), 10)
        .build()
        .expect("valid definition");

    Arc::new(definition)
});

fn transaction(inputs: &[(OutPoint, u32)], outputs: &[(u64, Script)]) -> Arc<Transaction> {
    Arc::new(Transaction {
        version: 2,
        lock_time: PackedLockTime::ZERO,
        input: inputs
            .iter()
            .map(|(previous_output, sequence)| TxIn {
                previous_output: *previous_output,
                script_sig: Script::new(),
                sequence: Sequence(*sequence),
                witness: Witness::new(),
            })
            .collect(),
        output: outputs
            .iter()
            .map(|(value, script)| TxOut {
                value: *value,
                script_pubkey: script.clone(),
            })
            .collect(),
    })
}

fn block_hash(byte: u8) -> BlockHash {
    BlockHash::from_inner([byte; 32])
}

fn wallet_with_unspent(unspent: Vec<(OutPoint, TxOut)>) -> Arc<dyn WalletOracle> {
    let mut wallet = MockWalletOracle::new();

    wallet.expect_is_mine().returning(|output| {
        output.script_pubkey == colored_script() || output.script_pubkey == bitcoin_script()
    });
    wallet
        .expect_is_colored_chain_output()
        .returning(|output| output.script_pubkey == colored_script());
    wallet.expect_get_output().returning(|_| None);
    wallet
        .expect_unspent_outputs()
        .returning(move || unspent.clone());

    Arc::new(wallet)
}

fn wallet() -> Arc<dyn WalletOracle> {
    wallet_with_unspent(Vec::new())
}

fn config() -> ScannerConfig {
    ScannerConfig {
        network: Network::Regtest,
        ..Default::default()
    }
}

fn scanner_with_genesis(wallet: Arc<dyn WalletOracle>) -> ColorScanner {
    let scanner = ColorScanner::new(config(), wallet);
    scanner
        .add_definition(DEFINITION.clone())
        .expect("definition is new");
    scanner
        .receive_from_block(GENESIS_TX.clone(), block_hash(1), 0, true)
        .expect("genesis applies");

    scanner
}

/// Transfer of the genesis color into the wallet: 10 known units at output
/// 0, 7 units of unidentified color at output 1 and plain bitcoin at
/// output 2.
fn incoming_transfer() -> Arc<Transaction> {
    transaction(
        &[
            (OutPoint::new(GENESIS_TX.txid(), 0), 0b1),
            (OutPoint::new(Txid::from_inner([2; 32]), 0), 0b10),
        ],
        &[
            (pad(10, 546), colored_script()),
            (pad(7, 546), colored_script()),
            (1000, bitcoin_script()),
        ],
    )
}

fn track_state(scanner: &ColorScanner) -> ObjectHash {
    scanner
        .track(&DEFINITION.hash())
        .expect("definition is followed")
        .state_hash()
}

#[test]
fn test_net_asset_change_buckets_unknown_color() {
    let scanner = scanner_with_genesis(wallet());
    let transfer = incoming_transfer();

    scanner
        .receive_from_block(transfer.clone(), block_hash(2), 0, true)
        .expect("transfer applies");

    let change = scanner.get_net_asset_change(&transfer);
    let unknown = ColorDefinition::unknown(Network::Regtest);
    let bitcoin = ColorDefinition::bitcoin(Network::Regtest);

    assert_eq!(change.get(&DEFINITION), 10);
    assert_eq!(change.get(&unknown), 7);
    assert_eq!(change.get(&bitcoin), 1000);

    let colored_total = change
        .iter()
        .filter(|(definition, _)| !definition.is_bitcoin())
        .map(|(_, amount)| amount)
        .sum::<i128>();
    assert_eq!(colored_total, 17);
}

#[test]
fn test_balances() {
    let transfer = incoming_transfer();
    let unspent = transfer
        .output
        .iter()
        .enumerate()
        .map(|(vout, output)| (OutPoint::new(transfer.txid(), vout as u32), output.clone()))
        .collect();

    let scanner = scanner_with_genesis(wallet_with_unspent(unspent));
    scanner
        .receive_from_block(transfer, block_hash(2), 0, true)
        .expect("transfer applies");

    let balances = scanner.get_balances();

    assert_eq!(balances.len(), 3);
    assert_eq!(balances.get(&DEFINITION), 10);
    assert_eq!(balances.get(&ColorDefinition::unknown(Network::Regtest)), 7);
    assert_eq!(balances.get(&ColorDefinition::bitcoin(Network::Regtest)), 1000);
}

#[test]
fn test_reorganize_and_back() {
    let scanner = scanner_with_genesis(wallet());
    let genesis_outpoint = OutPoint::new(GENESIS_TX.txid(), 0);

    let main_transfer = transaction(
        &[(genesis_outpoint, 0b1)],
        &[(pad(10, 546), colored_script())],
    );
    let side_transfer = transaction(
        &[(genesis_outpoint, 0b10)],
        &[(1000, bitcoin_script()), (pad(10, 546), colored_script())],
    );

    scanner
        .receive_from_block(main_transfer.clone(), block_hash(2), 0, true)
        .expect("main transfer applies");
    scanner
        .receive_from_block(side_transfer.clone(), block_hash(3), 0, false)
        .expect("side transfer is recorded");

    let main_state = track_state(&scanner);
    let track = scanner.track(&DEFINITION.hash()).expect("followed");
    assert!(track.contains_tx(&main_transfer.txid()));
    assert!(!track.contains_tx(&side_transfer.txid()));

    scanner
        .reorganize(block_hash(1), &[block_hash(2)], &[block_hash(3)])
        .expect("reorganization succeeds");

    let track = scanner.track(&DEFINITION.hash()).expect("followed");
    assert!(!track.contains_tx(&main_transfer.txid()));
    assert_eq!(
        track.unspent_quantity(&OutPoint::new(side_transfer.txid(), 1)),
        Some(10)
    );
    assert_eq!(track.quantity(&OutPoint::new(main_transfer.txid(), 0)), None);

    scanner
        .reorganize(block_hash(1), &[block_hash(3)], &[block_hash(2)])
        .expect("reorganization back succeeds");

    assert_eq!(track_state(&scanner), main_state);
}

#[test]
fn test_reorganize_undoes_all_blocks() {
    let scanner = scanner_with_genesis(wallet());
    let before = track_state(&scanner);

    let first = transaction(
        &[(OutPoint::new(GENESIS_TX.txid(), 0), 0b1)],
        &[(pad(10, 546), colored_script())],
    );
    let second = transaction(
        &[(OutPoint::new(first.txid(), 0), 0b1)],
        &[(pad(10, 546), colored_script())],
    );

    scanner
        .receive_from_block(first, block_hash(2), 0, true)
        .expect("first applies");
    scanner
        .receive_from_block(second, block_hash(3), 0, true)
        .expect("second applies");

    scanner
        .reorganize(block_hash(1), &[block_hash(3), block_hash(2)], &[])
        .expect("reorganization succeeds");

    assert_eq!(track_state(&scanner), before);
}

#[test]
fn test_reorganize_keeps_transactions_applied_after_the_abandoned_block() {
    let genesis = transaction(
        &[(OutPoint::new(Txid::from_inner([3; 32]), 0), 0)],
        &[(pad(10, 546), foreign_script()), (pad(5, 546), foreign_script())],
    );
    let definition = ColorDefinition::builder()
        .name("Silver")
        .outpoint_genesis(OutPoint::new(genesis.txid(), 0), 10)
        .outpoint_genesis(OutPoint::new(genesis.txid(), 1), 5)
        .build()
        .expect("valid definition");
    let hash = definition.hash();

    let scanner = ColorScanner::new(config(), wallet());
    scanner
        .add_definition(Arc::new(definition))
        .expect("definition is new");
    scanner
        .receive_from_block(genesis.clone(), block_hash(1), 0, true)
        .expect("genesis applies");
    scanner.start().expect("start succeeds");

    // Seen unconfirmed first, confirmed in a later block than `confirmed`.
    let pending = transaction(
        &[(OutPoint::new(genesis.txid(), 0), 0b1)],
        &[(pad(10, 546), colored_script())],
    );
    let confirmed = transaction(
        &[(OutPoint::new(genesis.txid(), 1), 0b1)],
        &[(pad(5, 546), colored_script())],
    );

    scanner.add_pending(pending.clone()).expect("pending applies");
    scanner
        .receive_from_block(confirmed.clone(), block_hash(2), 0, true)
        .expect("confirmed applies");
    scanner
        .receive_from_block(pending.clone(), block_hash(3), 0, true)
        .expect("pending confirms");

    scanner
        .reorganize(block_hash(2), &[block_hash(3)], &[])
        .expect("reorganization succeeds");

    let track = scanner.track(&hash).expect("followed");
    assert!(!track.contains_tx(&pending.txid()));
    assert!(track.contains_tx(&confirmed.txid()));
    assert_eq!(
        track.unspent_quantity(&OutPoint::new(confirmed.txid(), 0)),
        Some(5)
    );

    scanner
        .reorganize(block_hash(2), &[], &[block_hash(3)])
        .expect("reorganization back succeeds");

    let track = scanner.track(&hash).expect("followed");
    assert!(track.contains_tx(&pending.txid()));
    assert!(track.contains_tx(&confirmed.txid()));
    assert_eq!(
        track.unspent_quantity(&OutPoint::new(pending.txid(), 0)),
        Some(10)
    );
}

#[tokio::test]
async fn test_unresolved_transaction_fails_on_next_block() {
    let scanner = scanner_with_genesis(wallet());

    // Output 0 expects color, but nothing colored is spent.
    let tx = transaction(
        &[(OutPoint::new(Txid::from_inner([9; 32]), 0), 0b1)],
        &[(pad(3, 546), colored_script())],
    );

    let receiver = scanner.get_transaction_with_known_assets(tx.clone());
    scanner.notify_new_best_block(block_hash(5));

    let result = receiver.await.expect("sender is not dropped");
    assert_eq!(result.err(), Some(ResolutionError::UnknownAssetType(tx.txid())));
}

#[tokio::test]
async fn test_known_transaction_resolves() {
    let scanner = scanner_with_genesis(wallet());

    let plain = transaction(
        &[(OutPoint::new(Txid::from_inner([9; 32]), 0), 0)],
        &[(1000, bitcoin_script())],
    );
    let result = scanner
        .get_transaction_with_known_assets(plain.clone())
        .await
        .expect("sender is not dropped");
    assert_eq!(result.ok().map(|tx| tx.txid()), Some(plain.txid()));

    let transfer = transaction(
        &[(OutPoint::new(GENESIS_TX.txid(), 0), 0b1)],
        &[(pad(10, 546), colored_script())],
    );
    let receiver = scanner.get_transaction_with_known_assets(transfer.clone());
    scanner
        .receive_from_block(transfer.clone(), block_hash(2), 0, true)
        .expect("transfer applies");

    let result = receiver.await.expect("sender is not dropped");
    assert_eq!(result.ok().map(|tx| tx.txid()), Some(transfer.txid()));
}

#[tokio::test]
async fn test_stop_cancels_waiting_callers() {
    let scanner = scanner_with_genesis(wallet());
    scanner.start().expect("start succeeds");

    let tx = transaction(
        &[(OutPoint::new(Txid::from_inner([9; 32]), 0), 0b1)],
        &[(pad(3, 546), colored_script())],
    );
    scanner.add_pending(tx.clone()).expect("pending is recorded");

    let receiver = scanner.get_transaction_with_known_assets(tx);
    scanner.stop();

    let result = receiver.await.expect("sender is not dropped");
    assert_eq!(result.err(), Some(ResolutionError::Cancelled));
    assert_eq!(scanner.pending_transactions().len(), 1);
    assert!(!scanner.is_started());
}

#[test]
fn test_pending_transactions_apply_on_start() {
    let scanner = scanner_with_genesis(wallet());

    let first = transaction(
        &[(OutPoint::new(GENESIS_TX.txid(), 0), 0b1)],
        &[(pad(10, 546), colored_script())],
    );
    let second = transaction(
        &[(OutPoint::new(first.txid(), 0), 0b1)],
        &[(pad(10, 546), colored_script())],
    );

    // Children may arrive before parents.
    scanner.add_pending(second.clone()).expect("pending is recorded");
    scanner.add_pending(first.clone()).expect("pending is recorded");

    let track = scanner.track(&DEFINITION.hash()).expect("followed");
    assert!(!track.contains_tx(&first.txid()));

    scanner.start().expect("start succeeds");

    let track = scanner.track(&DEFINITION.hash()).expect("followed");
    assert!(track.contains_tx(&first.txid()));
    assert!(track.contains_tx(&second.txid()));
    assert_eq!(
        track.unspent_quantity(&OutPoint::new(second.txid(), 0)),
        Some(10)
    );

    // Confirmation removes it from pending and leaves the track untouched.
    let state = track_state(&scanner);
    scanner
        .receive_from_block(first.clone(), block_hash(2), 0, true)
        .expect("first confirms");
    assert_eq!(track_state(&scanner), state);
    assert_eq!(scanner.pending_transactions().len(), 1);

    let unresolved = scanner.resolve_pending().expect("resolution succeeds");
    assert!(unresolved.is_empty());
    assert!(scanner.pending_transactions().is_empty());
}

#[test]
fn test_snapshot_and_restore() {
    let scanner = scanner_with_genesis(wallet());

    let transfer = transaction(
        &[(OutPoint::new(GENESIS_TX.txid(), 0), 0b1)],
        &[(pad(10, 546), colored_script())],
    );
    scanner
        .receive_from_block(transfer.clone(), block_hash(2), 0, true)
        .expect("transfer applies");

    let pending = transaction(
        &[(OutPoint::new(transfer.txid(), 0), 0b1)],
        &[(pad(10, 546), colored_script())],
    );
    scanner.add_pending(pending.clone()).expect("pending is recorded");

    let bytes = scanner.snapshot();
    let restored = ColorScanner::restore(&bytes, config(), wallet()).expect("valid snapshot");

    assert_eq!(track_state(&restored), track_state(&scanner));
    assert_eq!(restored.definitions(), vec![DEFINITION.clone()]);
    assert_eq!(
        restored
            .pending_transactions()
            .iter()
            .map(|tx| tx.txid())
            .collect::<Vec<_>>(),
        vec![pending.txid()]
    );

    // Block history survives: reorganization still undoes the transfer.
    restored
        .reorganize(block_hash(1), &[block_hash(2)], &[])
        .expect("reorganization succeeds");
    let track = restored.track(&DEFINITION.hash()).expect("followed");
    assert!(!track.contains_tx(&transfer.txid()));

    assert!(matches!(
        ColorScanner::restore(&bytes[..bytes.len() - 1], config(), wallet()),
        Err(ScannerError::Marshal(_))
    ));
}

#[test]
fn test_definition_management() {
    let scanner = ColorScanner::new(config(), wallet());

    assert_eq!(
        scanner.add_definition(ColorDefinition::bitcoin(Network::Regtest)),
        Err(ScannerError::ReservedDefinition(
            ColorDefinition::bitcoin(Network::Regtest).hash()
        ))
    );

    scanner
        .add_definition(DEFINITION.clone())
        .expect("definition is new");
    assert_eq!(
        scanner.add_definition(DEFINITION.clone()),
        Err(ScannerError::DefinitionCollision(DEFINITION.hash()))
    );

    assert!(scanner.is_transaction_relevant(&GENESIS_TX));

    scanner
        .remove_definition(&DEFINITION.hash())
        .expect("definition is followed");
    assert!(scanner.definitions().is_empty());
    assert!(!scanner.is_transaction_relevant(&GENESIS_TX));
}

#[test]
fn test_bloom_filter_holds_genesis_points() {
    let scanner = scanner_with_genesis(wallet());

    {
        let calculation = scanner.begin_filter_calculation();
        assert_eq!(calculation.element_count(), 1);
    }

    let filter = scanner.bloom_filter();
    for point in DEFINITION.genesis_points() {
        assert!(filter.contains(&point.bloom_element()));
    }
}

#[test]
fn test_reset_clears_derived_state() {
    let scanner = scanner_with_genesis(wallet());
    let empty = hue_track::ColorTrack::new(DEFINITION.clone()).state_hash();
    assert_ne!(track_state(&scanner), empty);

    scanner.reset();

    assert_eq!(track_state(&scanner), empty);
    assert_eq!(scanner.definitions(), vec![DEFINITION.clone()]);
}

#[tokio::test]
async fn test_reset_cancels_waiting_callers() {
    let scanner = scanner_with_genesis(wallet());
    scanner.start().expect("start succeeds");

    let tx = transaction(
        &[(OutPoint::new(Txid::from_inner([9; 32]), 0), 0b1)],
        &[(pad(3, 546), colored_script())],
    );
    scanner.add_pending(tx.clone()).expect("pending is recorded");
    let receiver = scanner.get_transaction_with_known_assets(tx);

    scanner.reset();

    let result = receiver.await.expect("sender is not dropped");
    assert_eq!(result.err(), Some(ResolutionError::Cancelled));
    assert!(scanner.pending_transactions().is_empty());
}
