use std::sync::Arc;

use bitcoin::hashes::Hash;
use bitcoin::{
    OutPoint, PackedLockTime, Script, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use once_cell::sync::Lazy;

use hue_marshal::{Deserializer, Hashable, Serializable, Serializer};
use hue_types::{pad, ColorDefinition, Network};

use crate::{ColorProof, ColorTrack, TrackError, WalletOracle};

/// Wallet that owns nothing.
struct EmptyWallet;

impl WalletOracle for EmptyWallet {
    fn is_mine(&self, _output: &TxOut) -> bool {
        false
    }

    fn is_colored_chain_output(&self, _output: &TxOut) -> bool {
        false
    }

    fn get_output(&self, _outpoint: &OutPoint) -> Option<TxOut> {
        None
    }

    fn unspent_outputs(&self) -> Vec<(OutPoint, TxOut)> {
        Vec::new()
    }
}

/// Wallet that owns every output paying to `script`.
struct ScriptWallet(Script);

impl WalletOracle for ScriptWallet {
    fn is_mine(&self, output: &TxOut) -> bool {
        output.script_pubkey == self.0
    }

    fn is_colored_chain_output(&self, output: &TxOut) -> bool {
        self.is_mine(output)
    }

    fn get_output(&self, _outpoint: &OutPoint) -> Option<TxOut> {
        None
    }

    fn unspent_outputs(&self) -> Vec<(OutPoint, TxOut)> {
        Vec::new()
    }
}

fn transaction(inputs: &[(OutPoint, u32)], output_values: &[u64]) -> Arc<Transaction> {
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
        output: output_values
            .iter()
            .map(|value| TxOut {
                value: *value,
                script_pubkey: Script::from(vec![0x51]),
            })
            .collect(),
    })
}

/// Genesis transaction funded from outside of the color, creating 10 units
/// at output 0.
static GENESIS_TX: Lazy<Arc<Transaction>> = Lazy::new(|| {
    transaction(
        &[(OutPoint::new(Txid::from_inner([1; 32]), 0), 0)],
        &[pad(10, 546), 5000],
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

fn new_track() -> ColorTrack {
    ColorTrack::new(DEFINITION.clone())
}

#[test]
fn test_color_moves_and_gets_destroyed() {
    let mut track = new_track();

    let genesis_outpoint = OutPoint::new(GENESIS_TX.txid(), 0);
    track.add(GENESIS_TX.clone()).expect("genesis applies");

    assert_eq!(track.unspent_quantity(&genesis_outpoint), Some(10));
    assert_eq!(track.quantity(&OutPoint::new(GENESIS_TX.txid(), 1)), None);

    // All color to output 0.
    let transfer = transaction(&[(genesis_outpoint, 0b1)], &[pad(10, 546)]);
    let transfer_outpoint = OutPoint::new(transfer.txid(), 0);
    track.add(transfer.clone()).expect("transfer applies");

    assert_eq!(track.unspent_quantity(&genesis_outpoint), None);
    assert_eq!(track.unspent_quantity(&transfer_outpoint), Some(10));

    // No bit set: everything is destroyed.
    let burn = transaction(&[(transfer_outpoint, 0)], &[pad(10, 546)]);
    track.add(burn.clone()).expect("burn applies");

    assert!(track.unspent_outputs().is_empty());
    assert_eq!(track.unspent_total(), 0);
    assert_eq!(track.quantity(&genesis_outpoint), Some(10));
    assert_eq!(track.quantity(&transfer_outpoint), Some(10));
    assert_eq!(track.quantity(&OutPoint::new(burn.txid(), 0)), None);

    let history = track.transactions().map(|tx| tx.txid()).collect::<Vec<_>>();
    assert_eq!(history, vec![GENESIS_TX.txid(), transfer.txid(), burn.txid()]);
}

#[test]
fn test_split_between_outputs() {
    let mut track = new_track();
    track.add(GENESIS_TX.clone()).expect("genesis applies");

    let genesis_outpoint = OutPoint::new(GENESIS_TX.txid(), 0);
    // Capacities 6 and 8.
    let split = transaction(&[(genesis_outpoint, 0b11)], &[12, 16]);
    track.add(split.clone()).expect("split applies");

    assert_eq!(track.unspent_quantity(&OutPoint::new(split.txid(), 0)), Some(6));
    assert_eq!(track.unspent_quantity(&OutPoint::new(split.txid(), 1)), Some(4));
    assert_eq!(track.unspent_total(), 10);
}

#[test]
fn test_add_then_undo_restores_state() {
    let mut rng = fastrand::Rng::with_seed(42);
    let mut track = new_track();

    let mut unspent = vec![OutPoint::new(GENESIS_TX.txid(), 0)];
    let mut transactions = vec![GENESIS_TX.clone()];

    for _ in 0..20 {
        let input_count = rng.usize(1..=unspent.len().min(3));
        let inputs = (0..input_count)
            .map(|_| {
                let outpoint = unspent.swap_remove(rng.usize(0..unspent.len()));
                (outpoint, rng.u32(0..8))
            })
            .collect::<Vec<_>>();

        let output_values = (0..rng.usize(1..4))
            .map(|_| rng.u64(0..30))
            .collect::<Vec<_>>();

        let tx = transaction(&inputs, &output_values);
        for vout in 0..output_values.len() {
            unspent.push(OutPoint::new(tx.txid(), vout as u32));
        }

        transactions.push(tx);

        if unspent.is_empty() {
            break;
        }
    }

    let mut snapshots = Vec::new();
    for tx in &transactions {
        snapshots.push((
            track.outputs().clone(),
            track.unspent_outputs().clone(),
            track.state_hash(),
        ));

        track.add(tx.clone()).expect("transaction applies");
    }

    for tx in transactions.iter().rev() {
        let undone = track.undo_last().expect("history is not empty");
        assert_eq!(undone.txid(), tx.txid());

        let (outputs, unspent_outputs, state_hash) = snapshots.pop().expect("snapshot exists");
        assert_eq!(track.outputs(), &outputs);
        assert_eq!(track.unspent_outputs(), &unspent_outputs);
        assert_eq!(track.state_hash(), state_hash);
    }

    assert_eq!(track.undo_last().err(), Some(TrackError::EmptyHistory));
}

#[test]
fn test_undo_to_transaction() {
    let mut track = new_track();
    track.add(GENESIS_TX.clone()).expect("genesis applies");
    let after_genesis = track.state_hash();

    let first = transaction(&[(OutPoint::new(GENESIS_TX.txid(), 0), 1)], &[20]);
    let second = transaction(&[(OutPoint::new(first.txid(), 0), 1)], &[20]);
    track.add(first.clone()).expect("first applies");
    track.add(second.clone()).expect("second applies");

    let undone = track.undo(&first.txid()).expect("first is in history");
    let undone = undone.iter().map(|tx| tx.txid()).collect::<Vec<_>>();

    assert_eq!(undone, vec![second.txid(), first.txid()]);
    assert_eq!(track.state_hash(), after_genesis);
    assert!(!track.contains_tx(&second.txid()));

    assert_eq!(
        track.undo(&second.txid()).err(),
        Some(TrackError::UnknownTransaction(second.txid()))
    );
}

#[test]
fn test_duplicate_transaction_is_rejected() {
    let mut track = new_track();
    track.add(GENESIS_TX.clone()).expect("genesis applies");

    assert_eq!(
        track.add(GENESIS_TX.clone()).err(),
        Some(TrackError::DuplicateTransaction(GENESIS_TX.txid()))
    );
    assert_eq!(track.history_len(), 1);
}

#[test]
fn test_transaction_relevance() {
    let mut track = new_track();

    assert!(track.is_transaction_relevant(&GENESIS_TX, &EmptyWallet));
    track.add(GENESIS_TX.clone()).expect("genesis applies");

    let spend = transaction(&[(OutPoint::new(GENESIS_TX.txid(), 0), 1)], &[20]);
    assert!(track.is_transaction_relevant(&spend, &EmptyWallet));

    let unrelated = transaction(&[(OutPoint::new(GENESIS_TX.txid(), 1), 1)], &[20]);
    assert!(!track.is_transaction_relevant(&unrelated, &EmptyWallet));
    assert!(track.is_transaction_relevant(&unrelated, &ScriptWallet(Script::from(vec![0x51]))));
}

#[test]
fn test_state_hash_tracks_history() {
    let mut first = new_track();
    let mut second = new_track();
    assert_eq!(first.state_hash(), second.state_hash());

    first.add(GENESIS_TX.clone()).expect("genesis applies");
    assert_ne!(first.state_hash(), second.state_hash());

    second.add(GENESIS_TX.clone()).expect("genesis applies");
    assert_eq!(first.state_hash(), second.state_hash());
}

#[test]
fn test_track_persistence() {
    let mut track = new_track();
    track.add(GENESIS_TX.clone()).expect("genesis applies");
    let transfer = transaction(&[(OutPoint::new(GENESIS_TX.txid(), 0), 0b10)], &[2, 40]);
    track.add(transfer).expect("transfer applies");

    let mut serializer = Serializer::memoized();
    track.serialize(&mut serializer);
    let bytes = serializer.into_bytes();

    let mut deserializer = Deserializer::new(&bytes);
    let mut restored = ColorTrack::deserialize(&mut deserializer).expect("valid encoding");
    deserializer.finish().expect("no trailing bytes");

    assert_eq!(restored.state_hash(), track.state_hash());
    assert_eq!(restored.definition_hash(), DEFINITION.hash());

    // Undo records survive persistence.
    restored.undo_last().expect("history is not empty");
    track.undo_last().expect("history is not empty");
    assert_eq!(restored.state_hash(), track.state_hash());
}

#[test]
fn test_proof_verification_and_merge() {
    let mut source = new_track();
    source.add(GENESIS_TX.clone()).expect("genesis applies");
    let transfer = transaction(&[(OutPoint::new(GENESIS_TX.txid(), 0), 1)], &[pad(10, 546)]);
    source.add(transfer.clone()).expect("transfer applies");

    let outpoint = OutPoint::new(transfer.txid(), 0);
    let proof = ColorProof::from_track(&source, outpoint).expect("outpoint is colored");
    assert_eq!(proof.quantity(), 10);
    proof.verify().expect("proof is valid");

    let bytes = proof.to_raw_bytes();
    let decoded = ColorProof::from_raw_bytes(&bytes).expect("valid encoding");
    assert_eq!(decoded.outpoint(), outpoint);
    decoded.verify().expect("decoded proof is valid");

    let mut track = new_track();
    track.add(GENESIS_TX.clone()).expect("genesis applies");
    assert_eq!(track.merge_proof(&decoded), Ok(1));
    assert_eq!(track.state_hash(), source.state_hash());

    // Already merged.
    assert_eq!(track.merge_proof(&decoded), Ok(0));
}

#[test]
fn test_proof_holds_only_the_ancestry() {
    let mut source = new_track();
    source.add(GENESIS_TX.clone()).expect("genesis applies");
    // Spends the uncolored genesis change.
    let unrelated = transaction(&[(OutPoint::new(GENESIS_TX.txid(), 1), 0)], &[4000]);
    source.add(unrelated.clone()).expect("unrelated applies");
    let transfer = transaction(&[(OutPoint::new(GENESIS_TX.txid(), 0), 1)], &[pad(10, 546)]);
    source.add(transfer.clone()).expect("transfer applies");
    let spend = transaction(&[(OutPoint::new(transfer.txid(), 0), 1)], &[pad(10, 546)]);
    source.add(spend.clone()).expect("spend applies");

    let txids = |proof: &ColorProof| {
        proof
            .transactions()
            .iter()
            .map(|tx| tx.txid())
            .collect::<Vec<_>>()
    };

    let proof = ColorProof::from_track(&source, OutPoint::new(transfer.txid(), 0))
        .expect("outpoint is colored");
    assert_eq!(txids(&proof), vec![GENESIS_TX.txid(), transfer.txid()]);
    proof.verify().expect("proof is valid");

    let proof = ColorProof::from_track(&source, OutPoint::new(spend.txid(), 0))
        .expect("outpoint is colored");
    assert_eq!(
        txids(&proof),
        vec![GENESIS_TX.txid(), transfer.txid(), spend.txid()]
    );
    proof.verify().expect("proof is valid");

    assert!(ColorProof::from_track(&source, OutPoint::new(unrelated.txid(), 0)).is_none());
}

#[test]
fn test_merge_replays_transactions_applied_before_their_ancestry() {
    let transfer = transaction(&[(OutPoint::new(GENESIS_TX.txid(), 0), 1)], &[pad(10, 546)]);
    let outpoint = OutPoint::new(transfer.txid(), 0);

    let mut track = new_track();
    track.add(transfer.clone()).expect("transfer applies");
    assert_eq!(track.quantity(&outpoint), None);

    let proof = ColorProof::new(
        DEFINITION.clone(),
        outpoint,
        10,
        vec![GENESIS_TX.clone(), transfer.clone()],
    );
    assert_eq!(track.merge_proof(&proof), Ok(1));
    assert_eq!(track.quantity(&outpoint), Some(10));

    let mut expected = new_track();
    expected.add(GENESIS_TX.clone()).expect("genesis applies");
    expected.add(transfer).expect("transfer applies");
    assert_eq!(track.state_hash(), expected.state_hash());
}

#[test]
fn test_invalid_proofs_are_rejected() {
    let transfer = transaction(&[(OutPoint::new(GENESIS_TX.txid(), 0), 1)], &[pad(10, 546)]);
    let outpoint = OutPoint::new(transfer.txid(), 0);

    let inflated = ColorProof::new(
        DEFINITION.clone(),
        outpoint,
        11,
        vec![GENESIS_TX.clone(), transfer.clone()],
    );
    assert_eq!(
        inflated.verify(),
        Err(TrackError::QuantityMismatch {
            outpoint,
            expected: 11,
            actual: 10
        })
    );

    let foreign = ColorProof::new(
        ColorDefinition::bitcoin(Network::Regtest),
        outpoint,
        0,
        vec![transfer],
    );

    let mut track = new_track();
    let before = track.state_hash();
    assert!(matches!(
        track.merge_proof(&foreign),
        Err(TrackError::DefinitionMismatch { .. })
    ));
    assert!(matches!(
        track.merge_proof(&inflated),
        Err(TrackError::QuantityMismatch { .. })
    ));
    assert_eq!(track.state_hash(), before);
}
