//! # Table Sync Shared Library
//!
//! Types and rules used by both the relay and every participant. Nothing in
//! this crate owns a socket or a timer; it is the deterministic core that the
//! two event loops drive.
//!
//! ## Module Organization
//!
//! ### Entity Module (`entity`)
//! The replicated objects and their field model:
//! - `Piece` and `Hand` behind the `Entity` trait
//! - Typed `FieldValue`s keyed by `Field`
//! - Per-field `Provenance` (last sender, last batch sequence)
//!
//! ### Ownership Module (`ownership`)
//! Hold, release, select and unselect, applied identically on clients
//! (optimistically) and on the relay (authoritatively), plus the `Roster` of
//! connected participants those rules consult.
//!
//! ### Store Module (`store`)
//! `EntityStore`, the in-memory table with an explicit draw-order index, and
//! `Snapshot`, the full copy sent to joining participants.
//!
//! ### Protocol Module (`protocol`)
//! The `Packet` enum, delta batches, and the length-prefixed bincode frame
//! codec used over TCP.
//!
//! ## Data Flow
//!
//! local edit → optimistic local change + outbound delta → housekeeping flush →
//! relay merge and correction → broadcast to everyone → inbound reconciliation
//! (suppressed for pieces the receiver is holding).

pub mod entity;
pub mod error;
pub mod ownership;
pub mod protocol;
pub mod store;

pub use entity::{
    Delta, Entity, Field, FieldValue, Hand, Piece, Pose, Provenance, Stamped, StampedDelta,
    NO_HOLDER, NO_TEAM, RELAY_ID,
};
pub use error::ProtocolError;
pub use ownership::{ClientInfo, Roster};
pub use protocol::{read_packet, write_packet, Batch, OutBatch, Packet, StampedBatch};
pub use store::{EntityStore, Snapshot};

pub const DEFAULT_PORT: u16 = 8080;
/// Period of the queue flush tick, in milliseconds
pub const HOUSEKEEPING_MS: u64 = 100;
/// Period of the relay's full-state sweep, in milliseconds
pub const SWEEP_MS: u64 = 10_000;
