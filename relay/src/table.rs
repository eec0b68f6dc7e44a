//! The relay's authoritative copy of the table
//!
//! Every participant batch goes through [`Table::merge`], in arrival order.
//! Entries that lose against the current holder are rewritten with the stored
//! values and provenance, so the batch that gets broadcast already agrees with
//! the relay.

use log::{debug, info, warn};
use rand::Rng;
use shared::entity::well_formed;
use shared::{
    Entity, EntityStore, Field, FieldValue, Hand, OutBatch, Piece, Provenance, Roster, Snapshot,
    Stamped, StampedBatch, StampedDelta,
};

/// Width and height of the area seeded pieces are scattered over
pub const SEED_AREA: f32 = 1000.0;

pub struct Table {
    store: EntityStore,
    layout: Vec<Piece>,
}

impl Table {
    /// An empty table; the first participant's push populates it
    pub fn new() -> Self {
        Self::with_layout(Vec::new())
    }

    /// A table that starts, and resets, to `layout`
    pub fn with_layout(layout: Vec<Piece>) -> Self {
        let mut table = Self {
            store: EntityStore::new(),
            layout,
        };
        table.load_layout();
        table
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    /// Every piece and hand with its stored provenance
    pub fn sweep(&self) -> StampedBatch {
        self.store.full_batch()
    }

    /// Arbitrates one participant batch and returns the corrected copy
    pub fn merge(
        &mut self,
        sender: u32,
        sequence: u32,
        batch: OutBatch,
        roster: &Roster,
    ) -> StampedBatch {
        let provenance = Provenance::new(sender, sequence);
        let mut corrected = StampedBatch::default();
        let mut orders = Vec::new();

        for (id, delta) in batch.pieces {
            let Some(piece) = self.store.piece_mut(id) else {
                warn!("Client {} sent a delta for unknown piece {}", sender, id);
                continue;
            };

            let contested =
                piece.is_held() && piece.holder != sender && roster.contains_key(&piece.holder);
            if contested {
                debug!(
                    "Rewriting delta of client {} for piece {} held by {}",
                    sender, id, piece.holder
                );
                corrected.pieces.insert(id, stored(piece, delta.keys()));
                continue;
            }

            let mut out = StampedDelta::new();
            for (field, value) in well_formed(&delta, FieldValue::field) {
                let accepted = match *value {
                    FieldValue::Holder(holder) => {
                        piece.assign_holder(holder, roster);
                        true
                    }
                    FieldValue::Selector(team) => {
                        piece.select(team, sender, roster);
                        piece.selector == team
                    }
                    FieldValue::Z(rank) => {
                        orders.push((id, rank));
                        true
                    }
                    other => piece.set_field(other),
                };

                if accepted {
                    piece.stamp(field, provenance);
                    out.insert(
                        field,
                        Stamped {
                            value: *value,
                            provenance,
                        },
                    );
                } else if let Some(authoritative) = piece.stamped(field) {
                    out.insert(field, authoritative);
                }
            }
            corrected.pieces.insert(id, out);
        }

        self.store.apply_orders(orders);

        for (id, delta) in batch.hands {
            let Some(hand) = self.store.hand_mut(id) else {
                warn!("Client {} sent a delta for unknown hand {}", sender, id);
                continue;
            };

            if hand.owner != Some(sender) {
                debug!("Rewriting delta of client {} for hand {}", sender, id);
                corrected.hands.insert(id, stored(hand, delta.keys()));
                continue;
            }

            let mut out = StampedDelta::new();
            for (field, value) in well_formed(&delta, FieldValue::field) {
                if hand.set_field(*value) {
                    hand.stamp(field, provenance);
                    out.insert(
                        field,
                        Stamped {
                            value: *value,
                            provenance,
                        },
                    );
                }
            }
            corrected.hands.insert(id, out);
        }

        corrected
    }

    /// Adds pieces the table does not have yet
    ///
    /// Known ids are left untouched. New pieces keep their pushed values, lose
    /// any holder, and are stamped as the pusher's batch 0. Returns how many
    /// pieces were created.
    pub fn populate(&mut self, sender: u32, mut pieces: Vec<Piece>) -> usize {
        pieces.sort_by_key(|piece| piece.z);

        let mut created = 0;
        for mut piece in pieces {
            if self.store.contains_piece(piece.id) {
                continue;
            }
            piece.holder = shared::NO_HOLDER;
            for field in Field::PIECE {
                piece.stamp(field, Provenance::new(sender, 0));
            }
            self.store.insert_piece(piece);
            created += 1;
        }

        if created > 0 {
            info!("Client {} pushed {} new pieces", sender, created);
        }
        created
    }

    /// Drops every piece and restores the startup layout; hands survive
    pub fn reset(&mut self) {
        let hands: Vec<Hand> = self.store.hands().cloned().collect();
        self.store.clear();
        for hand in hands {
            self.store.insert_hand(hand);
        }
        self.load_layout();
        info!("Table reset to {} pieces", self.store.piece_count());
    }

    /// Gives `participant` a free hand, creating one if the pool is empty
    pub fn claim_hand(&mut self, participant: u32) -> u32 {
        if let Some(id) = self.hand_of(participant) {
            return id;
        }

        let free = self
            .store
            .hands()
            .find(|hand| hand.owner.is_none())
            .map(|hand| hand.id);

        let id = match free {
            Some(id) => id,
            None => {
                let id = self.store.hands().map(|hand| hand.id).max().unwrap_or(0) + 1;
                self.store.insert_hand(Hand::new(id, None));
                id
            }
        };

        if let Some(hand) = self.store.hand_mut(id) {
            hand.owner = Some(participant);
        }
        id
    }

    /// Returns the participant's hand to the pool
    pub fn free_hand(&mut self, participant: u32) {
        if let Some(id) = self.hand_of(participant) {
            if let Some(hand) = self.store.hand_mut(id) {
                hand.owner = None;
            }
        }
    }

    fn hand_of(&self, participant: u32) -> Option<u32> {
        self.store
            .hands()
            .find(|hand| hand.owner == Some(participant))
            .map(|hand| hand.id)
    }

    fn load_layout(&mut self) {
        for piece in &self.layout {
            self.store.insert_piece(piece.clone());
        }
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

/// Stored values and provenance for the given fields
fn stored<'a, E: Entity>(entity: &E, fields: impl Iterator<Item = &'a Field>) -> StampedDelta {
    fields
        .filter_map(|field| entity.stamped(*field).map(|stamped| (*field, stamped)))
        .collect()
}

/// Scatters `count` pieces with ids `1..=count` over the seed area
pub fn seed_layout<R: Rng>(count: u32, rng: &mut R) -> Vec<Piece> {
    (1..=count)
        .map(|id| {
            let mut piece = Piece::new(
                id,
                rng.gen_range(-SEED_AREA / 2.0..SEED_AREA / 2.0),
                rng.gen_range(-SEED_AREA / 2.0..SEED_AREA / 2.0),
            );
            piece.r = rng.gen_range(0.0..360.0);
            piece.z = id - 1;
            piece
        })
        .collect()
}
