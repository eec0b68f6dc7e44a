//! Client-side replication: the outbound and inbound delta queues and the
//! reconciliation pass that applies relayed batches
//!
//! Local edits change the local table at once and are remembered in the
//! outbound queue until the next housekeeping flush. Relayed batches pile up in
//! the inbound queue and are applied together, also on the housekeeping tick.
//!
//! Reconciliation follows two rules:
//! - A field stamped by this participant is ignored while a newer local change
//!   to it has not come back yet. Once the relay has echoed the batch carrying
//!   that change, whatever the relay stored wins.
//! - While this participant holds a piece, only the holder field of that
//!   piece is taken from the network.

use log::{debug, info};
use shared::entity::well_formed;
use shared::{
    Entity, EntityStore, Field, FieldValue, Hand, OutBatch, Packet, Piece, Provenance, Roster,
    Snapshot, Stamped, StampedBatch, StampedDelta, NO_HOLDER, NO_TEAM,
};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Kind {
    Piece,
    Hand,
}

pub struct SyncState {
    /// Participant id, zero until the relay's `State` arrives
    id: u32,
    team: i32,
    ready: bool,
    store: EntityStore,
    roster: Roster,

    /// Number of the last batch sent
    sequence: u32,
    outbound: OutBatch,
    inbound: StampedBatch,
    /// Batch number each locally changed field was (or will be) sent in
    last_sent: HashMap<(Kind, u32, Field), u32>,
    /// Highest own batch number the relay has echoed back
    acked: u32,
}

impl SyncState {
    pub fn new(team: i32) -> Self {
        Self {
            id: NO_HOLDER,
            team: team.max(0),
            ready: false,
            store: EntityStore::new(),
            roster: Roster::new(),
            sequence: 0,
            outbound: OutBatch::default(),
            inbound: StampedBatch::default(),
            last_sent: HashMap::new(),
            acked: 0,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn team(&self) -> i32 {
        self.team
    }

    /// True once the first `State` has been processed
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn has_pending_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Id of the hand the relay assigned to this participant
    pub fn my_hand(&self) -> Option<u32> {
        self.roster.get(&self.id).map(|info| info.hand)
    }

    /// Adds a piece created locally; it reaches the relay through a push
    pub fn add_piece(&mut self, piece: Piece) {
        self.store.insert_piece(piece);
    }

    /// Changes one field of a piece and queues it for the relay
    pub fn update_piece(&mut self, id: u32, value: FieldValue) -> bool {
        let changed = match value {
            FieldValue::Z(rank) => self.store.set_order(id, rank),
            other => self
                .store
                .piece_mut(id)
                .is_some_and(|piece| piece.set_field(other)),
        };
        if changed {
            self.queue(Kind::Piece, id, value);
        }
        changed
    }

    /// Grabs a piece for dragging and raises it to the top
    pub fn hold(&mut self, id: u32, force: bool) -> bool {
        let Some(piece) = self.store.piece_mut(id) else {
            return false;
        };
        if !piece.hold(self.id, force, &self.roster) {
            return false;
        }

        self.queue(Kind::Piece, id, FieldValue::Holder(self.id));
        let top = self.store.top_rank();
        self.update_piece(id, FieldValue::Z(top));
        true
    }

    pub fn release(&mut self, id: u32, force: bool) -> bool {
        let released = self
            .store
            .piece_mut(id)
            .is_some_and(|piece| piece.release(self.id, force, &self.roster));
        if released {
            self.queue(Kind::Piece, id, FieldValue::Holder(NO_HOLDER));
        }
        released
    }

    /// Puts a held piece back where it was grabbed, then lets go
    pub fn cancel_hold(&mut self, id: u32) -> bool {
        let Some(pose) = self
            .store
            .piece(id)
            .filter(|piece| piece.is_held() && piece.holder == self.id)
            .and_then(|piece| piece.pre_hold())
        else {
            return false;
        };

        for value in [
            FieldValue::X(pose.x),
            FieldValue::Y(pose.y),
            FieldValue::R(pose.r),
            FieldValue::S(pose.s),
        ] {
            self.update_piece(id, value);
        }
        self.release(id, false)
    }

    /// Selects a piece for this participant's team
    pub fn select(&mut self, id: u32) -> bool {
        let selected = self
            .store
            .piece_mut(id)
            .is_some_and(|piece| piece.select(self.team, self.id, &self.roster));
        if selected {
            self.queue(Kind::Piece, id, FieldValue::Selector(self.team));
        }
        selected
    }

    pub fn unselect(&mut self, id: u32) -> bool {
        let unselected = self
            .store
            .piece_mut(id)
            .is_some_and(|piece| piece.unselect(self.id, false));
        if unselected {
            self.queue(Kind::Piece, id, FieldValue::Selector(NO_TEAM));
        }
        unselected
    }

    /// Moves this participant's hand
    pub fn move_hand(&mut self, x: f32, y: f32) -> bool {
        let Some(id) = self.my_hand() else {
            return false;
        };
        let Some(hand) = self.store.hand_mut(id) else {
            return false;
        };

        hand.x = x;
        hand.y = y;
        self.queue(Kind::Hand, id, FieldValue::X(x));
        self.queue(Kind::Hand, id, FieldValue::Y(y));
        true
    }

    fn queue(&mut self, kind: Kind, id: u32, value: FieldValue) {
        let field = value.field();
        let deltas = match kind {
            Kind::Piece => &mut self.outbound.pieces,
            Kind::Hand => &mut self.outbound.hands,
        };
        deltas.entry(id).or_default().insert(field, value);
        self.last_sent.insert((kind, id, field), self.sequence + 1);
    }

    /// Takes the outbound queue as the next numbered batch
    pub fn flush_outbound(&mut self) -> Option<Packet> {
        if !self.ready || self.outbound.is_empty() {
            return None;
        }

        self.sequence += 1;
        let batch = std::mem::take(&mut self.outbound);
        debug!("Sending batch {} with {} entities", self.sequence, batch.len());
        Some(Packet::Queue {
            sequence: self.sequence,
            batch,
        })
    }

    /// Queues a relayed batch for the next housekeeping tick
    pub fn on_queue(&mut self, sender: u32, sequence: u32, batch: StampedBatch) {
        if !self.ready {
            debug!("Ignoring batch {} from {} before state", sequence, sender);
            return;
        }
        if sender == self.id {
            self.acked = self.acked.max(sequence);
        }
        self.inbound.absorb(batch);
    }

    /// Adopts the roster, creating hands this participant has not seen yet
    pub fn on_clients(&mut self, roster: Roster) {
        for (id, info) in &roster {
            if self.store.hand(info.hand).is_none() {
                self.store.insert_hand(Hand::new(info.hand, Some(*id)));
            }
        }

        let hand_ids: Vec<u32> = self.store.hands().map(|hand| hand.id).collect();
        for hand_id in hand_ids {
            let owner = roster
                .iter()
                .find(|(_, info)| info.hand == hand_id)
                .map(|(id, _)| *id);
            if let Some(hand) = self.store.hand_mut(hand_id) {
                hand.owner = owner;
            }
        }

        if let Some(info) = roster.get(&self.id) {
            self.team = info.team;
        }
        self.roster = roster;
    }

    /// Processes the relay's full table
    ///
    /// Returns a `Push` carrying the local pieces the relay does not know.
    pub fn on_state(&mut self, id: u32, roster: Roster, snapshot: Snapshot) -> Option<Packet> {
        info!(
            "Joined as participant {} ({} pieces, {} hands)",
            id,
            snapshot.pieces.len(),
            snapshot.hands.len()
        );
        self.id = id;
        self.store.unselect_all();

        for piece in &snapshot.pieces {
            if !self.store.contains_piece(piece.id) {
                self.store.insert_piece(piece.clone());
            }
        }
        for hand in &snapshot.hands {
            if self.store.hand(hand.id).is_none() {
                self.store.insert_hand(hand.clone());
            }
        }
        self.on_clients(roster);

        let missing: Vec<Piece> = self
            .store
            .snapshot()
            .pieces
            .into_iter()
            .filter(|piece| !snapshot.pieces.iter().any(|known| known.id == piece.id))
            .collect();

        self.inbound = snapshot.to_batch();
        self.process_inbound();
        self.ready = true;

        if missing.is_empty() {
            None
        } else {
            info!("Pushing {} pieces the relay does not have", missing.len());
            Some(Packet::Push { pieces: missing })
        }
    }

    /// Applies everything in the inbound queue
    pub fn process_inbound(&mut self) {
        let inbound = std::mem::take(&mut self.inbound);
        if inbound.is_empty() {
            return;
        }

        // the relay has ruled on every change up to the last echoed batch
        let acked = self.acked;
        self.last_sent.retain(|_, sent| *sent > acked);

        let mut orders = Vec::new();
        for (id, delta) in inbound.pieces {
            self.reconcile_piece(id, &delta, &mut orders);
        }
        self.store.apply_orders(orders);

        let my_hand = self.my_hand();
        for (id, delta) in inbound.hands {
            if Some(id) == my_hand {
                continue;
            }
            self.reconcile_hand(id, &delta);
        }
    }

    fn accepts(&self, kind: Kind, id: u32, field: Field, provenance: Provenance) -> bool {
        if provenance.sender != self.id {
            return true;
        }
        self.last_sent
            .get(&(kind, id, field))
            .map_or(true, |sent| *sent <= provenance.sequence)
    }

    fn reconcile_piece(&mut self, id: u32, delta: &StampedDelta, orders: &mut Vec<(u32, u32)>) {
        let accepted: Vec<(Field, Stamped)> = well_formed(delta, |stamped: &Stamped| {
            stamped.value.field()
        })
        .filter(|(field, stamped)| self.accepts(Kind::Piece, id, *field, stamped.provenance))
        .map(|(field, stamped)| (field, *stamped))
        .collect();

        let Some(piece) = self.store.piece_mut(id) else {
            debug!("Ignoring delta for unknown piece {}", id);
            return;
        };

        // holder first: it decides whether anything else applies
        for (field, stamped) in &accepted {
            if let FieldValue::Holder(holder) = stamped.value {
                piece.assign_holder(holder, &self.roster);
                piece.stamp(*field, stamped.provenance);
            }
        }

        if self.id != NO_HOLDER && piece.holder == self.id {
            return;
        }

        for (field, stamped) in accepted {
            match stamped.value {
                FieldValue::Holder(_) => continue,
                FieldValue::Z(rank) => orders.push((id, rank)),
                value => {
                    piece.set_field(value);
                }
            }
            piece.stamp(field, stamped.provenance);
        }
    }

    fn reconcile_hand(&mut self, id: u32, delta: &StampedDelta) {
        let accepted: Vec<(Field, Stamped)> = well_formed(delta, |stamped: &Stamped| {
            stamped.value.field()
        })
        .filter(|(field, stamped)| self.accepts(Kind::Hand, id, *field, stamped.provenance))
        .map(|(field, stamped)| (field, *stamped))
        .collect();

        let Some(hand) = self.store.hand_mut(id) else {
            debug!("Ignoring delta for unknown hand {}", id);
            return;
        };

        for (field, stamped) in accepted {
            if hand.set_field(stamped.value) {
                hand.stamp(field, stamped.provenance);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::ClientInfo;

    fn roster() -> Roster {
        let mut roster = Roster::new();
        roster.insert(1, ClientInfo::new("one", 0, 1));
        roster.insert(2, ClientInfo::new("two", 1, 2));
        roster
    }

    fn snapshot() -> Snapshot {
        let mut pieces = Vec::new();
        for id in 1..=3 {
            let mut piece = Piece::new(id, 0.0, 0.0);
            piece.z = id - 1;
            pieces.push(piece);
        }
        Snapshot {
            pieces,
            hands: vec![Hand::new(1, Some(1)), Hand::new(2, Some(2))],
        }
    }

    fn joined(id: u32) -> SyncState {
        let mut sync = SyncState::new(if id == 1 { 0 } else { 1 });
        assert!(sync.on_state(id, roster(), snapshot()).is_none());
        sync
    }

    fn relayed(id: u32, values: &[(FieldValue, Provenance)]) -> StampedBatch {
        let mut batch = StampedBatch::default();
        let delta: StampedDelta = values
            .iter()
            .map(|(value, provenance)| {
                (
                    value.field(),
                    Stamped {
                        value: *value,
                        provenance: *provenance,
                    },
                )
            })
            .collect();
        batch.pieces.insert(id, delta);
        batch
    }

    #[test]
    fn test_state_marks_ready() {
        let sync = joined(1);
        assert!(sync.is_ready());
        assert_eq!(sync.id(), 1);
        assert_eq!(sync.store().piece_count(), 3);
        assert_eq!(sync.my_hand(), Some(1));
    }

    #[test]
    fn test_updates_coalesce_into_one_batch() {
        let mut sync = joined(1);
        sync.update_piece(1, FieldValue::X(1.0));
        sync.update_piece(1, FieldValue::X(2.0));
        sync.update_piece(2, FieldValue::Y(3.0));

        match sync.flush_outbound() {
            Some(Packet::Queue { sequence, batch }) => {
                assert_eq!(sequence, 1);
                assert_eq!(batch.pieces.len(), 2);
                assert_eq!(batch.pieces[&1][&Field::X], FieldValue::X(2.0));
            }
            other => panic!("Expected Queue, got {:?}", other),
        }
        assert!(sync.flush_outbound().is_none());
    }

    #[test]
    fn test_no_flush_before_state() {
        let mut sync = SyncState::new(0);
        sync.add_piece(Piece::new(1, 0.0, 0.0));
        sync.update_piece(1, FieldValue::X(4.0));
        assert!(sync.flush_outbound().is_none());
    }

    #[test]
    fn test_queue_ignored_before_state() {
        let mut sync = SyncState::new(0);
        sync.add_piece(Piece::new(1, 0.0, 0.0));
        sync.on_queue(2, 1, relayed(1, &[(FieldValue::X(9.0), Provenance::new(2, 1))]));
        sync.process_inbound();
        assert_approx_eq!(sync.store().piece(1).unwrap().x, 0.0);
    }

    #[test]
    fn test_own_update_not_regressed() {
        let mut sync = joined(1);
        sync.update_piece(1, FieldValue::X(5.0));
        sync.flush_outbound();
        sync.update_piece(1, FieldValue::X(6.0));

        // echo of batch 1 arrives after batch 2 was queued locally
        sync.on_queue(1, 1, relayed(1, &[(FieldValue::X(5.0), Provenance::new(1, 1))]));
        sync.process_inbound();

        assert_approx_eq!(sync.store().piece(1).unwrap().x, 6.0);
    }

    #[test]
    fn test_own_echo_accepted_once_current() {
        let mut sync = joined(1);
        sync.update_piece(1, FieldValue::X(5.0));
        sync.flush_outbound();

        sync.on_queue(1, 1, relayed(1, &[(FieldValue::X(5.0), Provenance::new(1, 1))]));
        sync.process_inbound();

        let piece = sync.store().piece(1).unwrap();
        assert_approx_eq!(piece.x, 5.0);
        assert_eq!(piece.provenance(Field::X), Provenance::new(1, 1));
    }

    #[test]
    fn test_holder_shields_position() {
        let mut sync = joined(1);
        assert!(sync.hold(1, false));
        sync.update_piece(1, FieldValue::X(3.0));

        sync.on_queue(
            2,
            4,
            relayed(
                1,
                &[
                    (FieldValue::X(-8.0), Provenance::new(2, 4)),
                    (FieldValue::R(90.0), Provenance::new(2, 4)),
                ],
            ),
        );
        sync.process_inbound();

        let piece = sync.store().piece(1).unwrap();
        assert_approx_eq!(piece.x, 3.0);
        assert_approx_eq!(piece.r, 0.0);
    }

    #[test]
    fn test_lost_hold_takes_network_values() {
        let mut sync = joined(2);
        assert!(sync.hold(1, false));
        sync.update_piece(1, FieldValue::X(-5.0));
        sync.flush_outbound();

        // the relay let participant 1 win and rewrote our batch
        sync.on_queue(
            2,
            1,
            relayed(
                1,
                &[
                    (FieldValue::Holder(1), Provenance::new(1, 1)),
                    (FieldValue::X(10.0), Provenance::new(1, 1)),
                ],
            ),
        );
        sync.process_inbound();

        let piece = sync.store().piece(1).unwrap();
        assert_eq!(piece.holder, 1);
        assert_approx_eq!(piece.x, 10.0);
    }

    #[test]
    fn test_rewrite_with_older_own_stamp_wins() {
        let mut sync = joined(2);
        sync.update_piece(1, FieldValue::X(3.0));
        sync.flush_outbound();
        sync.on_queue(2, 1, relayed(1, &[(FieldValue::X(3.0), Provenance::new(2, 1))]));
        sync.process_inbound();

        assert!(sync.hold(1, false));
        sync.update_piece(1, FieldValue::X(-5.0));
        sync.flush_outbound();

        // participant 1 grabbed first; the relay kept our x from batch 1
        sync.on_queue(1, 1, relayed(1, &[(FieldValue::Holder(1), Provenance::new(1, 1))]));
        sync.on_queue(
            2,
            2,
            relayed(
                1,
                &[
                    (FieldValue::Holder(1), Provenance::new(1, 1)),
                    (FieldValue::X(3.0), Provenance::new(2, 1)),
                ],
            ),
        );
        sync.process_inbound();

        let piece = sync.store().piece(1).unwrap();
        assert_eq!(piece.holder, 1);
        assert_approx_eq!(piece.x, 3.0);
    }

    #[test]
    fn test_pending_change_survives_older_echo() {
        let mut sync = joined(1);
        sync.update_piece(1, FieldValue::Y(1.0));
        sync.flush_outbound();
        sync.update_piece(1, FieldValue::Y(2.0));
        sync.flush_outbound();

        // only batch 1 has come back; batch 2 is still in flight
        sync.on_queue(1, 1, relayed(1, &[(FieldValue::Y(1.0), Provenance::new(1, 1))]));
        sync.process_inbound();
        assert_approx_eq!(sync.store().piece(1).unwrap().y, 2.0);

        sync.on_queue(1, 2, relayed(1, &[(FieldValue::Y(2.0), Provenance::new(1, 2))]));
        sync.process_inbound();
        assert_approx_eq!(sync.store().piece(1).unwrap().y, 2.0);
    }

    #[test]
    fn test_hold_raises_and_queues_order() {
        let mut sync = joined(1);
        assert!(sync.hold(1, false));
        assert_eq!(sync.store().order(), &[2, 3, 1]);

        match sync.flush_outbound() {
            Some(Packet::Queue { batch, .. }) => {
                assert_eq!(batch.pieces[&1][&Field::Holder], FieldValue::Holder(1));
                assert_eq!(batch.pieces[&1][&Field::Z], FieldValue::Z(2));
            }
            other => panic!("Expected Queue, got {:?}", other),
        }
    }

    #[test]
    fn test_hold_refused_when_held() {
        let mut sync = joined(1);
        sync.on_queue(
            2,
            1,
            relayed(2, &[(FieldValue::Holder(2), Provenance::new(2, 1))]),
        );
        sync.process_inbound();

        assert!(!sync.hold(2, false));
        assert!(sync.hold(2, true));
    }

    #[test]
    fn test_cancel_hold_restores_grab_pose() {
        let mut sync = joined(1);
        assert!(sync.hold(2, false));
        sync.update_piece(2, FieldValue::X(40.0));
        sync.update_piece(2, FieldValue::R(15.0));

        assert!(sync.cancel_hold(2));

        let piece = sync.store().piece(2).unwrap();
        assert!(!piece.is_held());
        assert_approx_eq!(piece.x, 0.0);
        assert_approx_eq!(piece.r, 0.0);
        match sync.flush_outbound() {
            Some(Packet::Queue { batch, .. }) => {
                let delta = &batch.pieces[&2];
                assert_eq!(delta[&Field::X], FieldValue::X(0.0));
                assert_eq!(delta[&Field::Holder], FieldValue::Holder(NO_HOLDER));
            }
            other => panic!("Expected Queue, got {:?}", other),
        }
        assert!(!sync.cancel_hold(2));
    }

    #[test]
    fn test_select_and_unselect() {
        let mut sync = joined(2);
        assert!(sync.select(3));
        assert_eq!(sync.store().piece(3).unwrap().selector, 1);
        assert!(!sync.select(3));
        assert!(sync.unselect(3));
        assert_eq!(sync.store().piece(3).unwrap().selector, NO_TEAM);
    }

    #[test]
    fn test_inbound_draw_order_applied_last() {
        let mut sync = joined(1);
        let mut batch = relayed(1, &[(FieldValue::Z(2), Provenance::new(2, 1))]);
        batch.absorb(relayed(3, &[(FieldValue::Z(0), Provenance::new(2, 1))]));

        sync.on_queue(2, 1, batch);
        sync.process_inbound();

        assert_eq!(sync.store().order(), &[3, 2, 1]);
    }

    #[test]
    fn test_unknown_entities_ignored() {
        let mut sync = joined(1);
        sync.on_queue(2, 1, relayed(42, &[(FieldValue::X(1.0), Provenance::new(2, 1))]));
        sync.process_inbound();
        assert!(sync.store().piece(42).is_none());
    }

    #[test]
    fn test_own_hand_ignored() {
        let mut sync = joined(1);
        sync.move_hand(10.0, 20.0);

        let mut batch = StampedBatch::default();
        for hand in [1, 2] {
            let mut delta = StampedDelta::new();
            delta.insert(
                Field::X,
                Stamped {
                    value: FieldValue::X(-1.0),
                    provenance: Provenance::new(0, 0),
                },
            );
            batch.hands.insert(hand, delta);
        }
        sync.on_queue(0, 0, batch);
        sync.process_inbound();

        assert_approx_eq!(sync.store().hand(1).unwrap().x, 10.0);
        assert_approx_eq!(sync.store().hand(2).unwrap().x, -1.0);
    }

    #[test]
    fn test_state_pushes_local_only_pieces() {
        let mut sync = SyncState::new(0);
        sync.add_piece(Piece::new(1, 0.0, 0.0));
        sync.add_piece(Piece::new(50, 0.0, 0.0));

        match sync.on_state(1, roster(), snapshot()) {
            Some(Packet::Push { pieces }) => {
                assert_eq!(pieces.len(), 1);
                assert_eq!(pieces[0].id, 50);
            }
            other => panic!("Expected Push, got {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_idempotent() {
        let mut sync = joined(1);
        let before = sync.store().clone();

        sync.on_state(1, roster(), snapshot());

        assert!(sync.store().same_state(&before));
    }

    #[test]
    fn test_clients_creates_missing_hands() {
        let mut sync = joined(1);
        let mut roster = roster();
        roster.insert(3, ClientInfo::new("three", 2, 5));
        roster.remove(&2);

        sync.on_clients(roster);

        assert_eq!(sync.store().hand(5).unwrap().owner, Some(3));
        assert_eq!(sync.store().hand(2).unwrap().owner, None);
    }
}
