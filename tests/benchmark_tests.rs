//! Performance benchmarks for the merge, reconciliation and codec paths

use client::sync::SyncState;
use relay::table::Table;
use shared::{
    ClientInfo, Delta, EntityStore, Field, FieldValue, OutBatch, Packet, Piece, Roster, Snapshot,
};
use std::time::Instant;

fn layout(count: u32) -> Vec<Piece> {
    (1..=count)
        .map(|id| {
            let mut piece = Piece::new(id, id as f32, 0.0);
            piece.z = id - 1;
            piece
        })
        .collect()
}

fn move_batch(first: u32, count: u32, offset: f32) -> OutBatch {
    let mut batch = OutBatch::default();
    for id in first..first + count {
        let mut delta = Delta::new();
        delta.insert(Field::X, FieldValue::X(offset));
        delta.insert(Field::Y, FieldValue::Y(-offset));
        batch.pieces.insert(id, delta);
    }
    batch
}

/// Benchmarks the relay merging batches of moves
#[test]
fn benchmark_table_merge() {
    let mut table = Table::with_layout(layout(1000));
    let mut roster = Roster::new();
    roster.insert(1, ClientInfo::new("a", 0, 1));
    roster.insert(2, ClientInfo::new("b", 1, 2));

    let iterations = 10_000;
    let start = Instant::now();

    for i in 0..iterations {
        let sender = 1 + i % 2;
        let batch = move_batch((i * 7) % 990 + 1, 10, i as f32);
        let _ = table.merge(sender, i + 1, batch, &roster);
    }

    let duration = start.elapsed();
    println!(
        "Table merge: {} batches in {:?} ({:.2} μs/batch)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks a participant reconciling relayed batches
#[test]
fn benchmark_reconcile() {
    let mut table = Table::with_layout(layout(500));
    let mut roster = Roster::new();
    for (id, team) in [(1, 0), (2, 1)] {
        let hand = table.claim_hand(id);
        roster.insert(id, ClientInfo::new(&format!("p{}", id), team, hand));
    }

    let mut sync = SyncState::new(0);
    sync.on_state(1, roster.clone(), table.snapshot());

    let iterations = 2_000;
    let start = Instant::now();

    for i in 0..iterations {
        sync.update_piece(i % 500 + 1, FieldValue::R(i as f32));
        if let Some(Packet::Queue { sequence, batch }) = sync.flush_outbound() {
            let corrected = table.merge(1, sequence, batch, &roster);
            sync.on_queue(1, sequence, corrected);
        }

        let corrected = table.merge(2, i + 1, move_batch(i % 490 + 1, 10, i as f32), &roster);
        sync.on_queue(2, i + 1, corrected);
        sync.process_inbound();
    }

    let duration = start.elapsed();
    println!(
        "Reconcile: {} rounds in {:?} ({:.2} μs/round)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(sync.store().same_state(table.store()));
    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks framing and decoding a relayed batch
#[test]
fn benchmark_packet_serialization() {
    use bincode::deserialize;
    use shared::protocol::encode_frame;

    let table = Table::with_layout(layout(200));
    let packet = Packet::Relayed {
        sender: 0,
        sequence: 0,
        batch: table.sweep(),
    };

    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let frame = encode_frame(&packet).unwrap();
        let decoded: Packet = deserialize(&frame[4..]).unwrap();
        assert!(matches!(decoded, Packet::Relayed { .. }));
    }

    let duration = start.elapsed();
    println!(
        "Packet serialization: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks taking and loading a large snapshot
#[test]
fn benchmark_snapshot() {
    let store = EntityStore::from_snapshot(&Snapshot {
        pieces: layout(5000),
        hands: Vec::new(),
    });

    let iterations = 20;
    let start = Instant::now();

    for _ in 0..iterations {
        let snapshot = store.snapshot();
        let loaded = EntityStore::from_snapshot(&snapshot);
        assert_eq!(loaded.piece_count(), 5000);
    }

    let duration = start.elapsed();
    println!(
        "Snapshot: 5000 pieces × {} in {:?} ({:.2} ms/iter)",
        iterations,
        duration,
        duration.as_millis() as f64 / iterations as f64
    );

    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);
}

/// Stress tests draw order changes on a crowded table
#[test]
fn stress_test_draw_order() {
    let mut store = EntityStore::from_snapshot(&Snapshot {
        pieces: layout(1000),
        hands: Vec::new(),
    });

    let iterations = 10_000;
    let start = Instant::now();

    for i in 0..iterations {
        let top = store.top_rank();
        store.set_order(i % 1000 + 1, top);
    }

    let duration = start.elapsed();
    println!(
        "Draw order: {} raises in {:?} ({:.2} μs/raise)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(store.order().len(), 1000);
    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}
