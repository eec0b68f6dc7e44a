//! In-memory table of pieces and hands
//!
//! The same store type backs every client's local view and the relay's
//! authoritative copy. Draw order lives in an explicit index: `order[rank]`
//! is the id of the piece drawn at that rank (0 is the bottom), and every
//! piece's `z` mirrors its rank.

use crate::entity::{full_delta, Entity, Field, Hand, Piece};
use crate::protocol::StampedBatch;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Full copy of a table, as sent to a joining participant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub pieces: Vec<Piece>,
    pub hands: Vec<Hand>,
}

impl Snapshot {
    /// Every field of every entity, stamped with its stored provenance
    pub fn to_batch(&self) -> StampedBatch {
        let mut batch = StampedBatch::default();
        for piece in &self.pieces {
            batch.pieces.insert(piece.id, full_delta(piece, &Field::PIECE));
        }
        for hand in &self.hands {
            batch.hands.insert(hand.id, full_delta(hand, &Field::HAND));
        }
        batch
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    pieces: BTreeMap<u32, Piece>,
    hands: BTreeMap<u32, Hand>,
    order: Vec<u32>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from a snapshot, keeping its draw order
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut store = Self::new();
        let mut pieces = snapshot.pieces.clone();
        pieces.sort_by_key(|piece| piece.z);
        for piece in pieces {
            store.insert_piece(piece);
        }
        for hand in &snapshot.hands {
            store.insert_hand(hand.clone());
        }
        store
    }

    /// Adds or replaces a piece; its `z` is taken as the requested rank
    pub fn insert_piece(&mut self, piece: Piece) {
        let id = piece.id;
        let rank = piece.z;
        if self.pieces.insert(id, piece).is_none() {
            self.order.push(id);
        }
        self.set_order(id, rank);
    }

    pub fn insert_hand(&mut self, hand: Hand) {
        self.hands.insert(hand.id, hand);
    }

    pub fn piece(&self, id: u32) -> Option<&Piece> {
        self.pieces.get(&id)
    }

    pub fn piece_mut(&mut self, id: u32) -> Option<&mut Piece> {
        self.pieces.get_mut(&id)
    }

    pub fn hand(&self, id: u32) -> Option<&Hand> {
        self.hands.get(&id)
    }

    pub fn hand_mut(&mut self, id: u32) -> Option<&mut Hand> {
        self.hands.get_mut(&id)
    }

    pub fn pieces(&self) -> impl Iterator<Item = &Piece> {
        self.pieces.values()
    }

    pub fn hands(&self) -> impl Iterator<Item = &Hand> {
        self.hands.values()
    }

    pub fn contains_piece(&self, id: u32) -> bool {
        self.pieces.contains_key(&id)
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty() && self.hands.is_empty()
    }

    pub fn clear(&mut self) {
        self.pieces.clear();
        self.hands.clear();
        self.order.clear();
    }

    /// Piece ids from bottom to top
    pub fn order(&self) -> &[u32] {
        &self.order
    }

    pub fn top_rank(&self) -> u32 {
        self.order.len().saturating_sub(1) as u32
    }

    /// Moves a piece to `rank`, clamped to the top of the stack
    ///
    /// Pieces between the old and new rank shift by one. Returns false for an
    /// unknown id.
    pub fn set_order(&mut self, id: u32, rank: u32) -> bool {
        let Some(current) = self.order.iter().position(|other| *other == id) else {
            return false;
        };

        self.order.remove(current);
        let target = (rank as usize).min(self.order.len());
        self.order.insert(target, id);

        let (low, high) = (current.min(target), current.max(target));
        for (rank, id) in self.order.iter().enumerate().take(high + 1).skip(low) {
            if let Some(piece) = self.pieces.get_mut(id) {
                piece.z = rank as u32;
            }
        }
        true
    }

    /// Applies several rank requests bottom-up so that results do not depend
    /// on the order the requests arrived in
    pub fn apply_orders(&mut self, mut requests: Vec<(u32, u32)>) {
        requests.sort_by_key(|(id, rank)| (*rank, *id));
        for (id, rank) in requests {
            if !self.set_order(id, rank) {
                debug!("Ignoring draw order for unknown piece {}", id);
            }
        }
    }

    /// Drops every selection without recording a change
    pub fn unselect_all(&mut self) {
        for piece in self.pieces.values_mut() {
            piece.unselect(piece.holder, true);
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            pieces: self
                .order
                .iter()
                .filter_map(|id| self.pieces.get(id).cloned())
                .collect(),
            hands: self.hands.values().cloned().collect(),
        }
    }

    /// Every field of every entity, stamped with its stored provenance
    pub fn full_batch(&self) -> StampedBatch {
        self.snapshot().to_batch()
    }

    /// True when both stores hold the same values, ignoring provenance
    pub fn same_state(&self, other: &EntityStore) -> bool {
        self.order == other.order
            && self.pieces.len() == other.pieces.len()
            && self
                .pieces
                .values()
                .all(|piece| other.piece(piece.id).is_some_and(|o| piece.same_state(o)))
            && self.hands.len() == other.hands.len()
            && self.hands.values().all(|hand| {
                other.hand(hand.id).is_some_and(|o| {
                    hand.owner == o.owner
                        && Field::HAND
                            .iter()
                            .all(|field| hand.get_field(*field) == o.get_field(*field))
                })
            })
    }
}
