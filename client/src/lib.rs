//! # Table Client Library
//!
//! A participant at a shared table. Local edits take effect immediately and
//! are sent to the relay in batches; batches the relay broadcasts back are
//! reconciled against what this participant has changed since.
//!
//! ## Architecture Overview
//!
//! ### Optimistic Local Edits
//! Holding, selecting and moving a piece change the local table at once. Each
//! changed field is queued and remembers the batch number it will go out in,
//! so an older echo from the relay cannot undo a newer local change.
//!
//! ### Reconciliation
//! On every housekeeping tick the queued relayed batches are applied, holder
//! changes first. While this participant holds a piece, every other field of
//! that piece coming from the network is ignored until the piece is released.
//!
//! ### Snapshot
//! The relay's first reply is the full table. Until it has been processed,
//! relayed batches are dropped and nothing is sent.
//!
//! ## Module Organization
//!
//! ### Sync Module (`sync`)
//! `SyncState`: the local table, the outbound and inbound queues and the
//! reconciliation rules.
//!
//! ### Bot Module (`bot`)
//! A scripted participant that drags random pieces around, and the grid layout
//! used to create local pieces.
//!
//! ### Network Module (`network`)
//! TCP connection to the relay, optional simulated latency, and the event
//! loop driving housekeeping and the bot.

pub mod bot;
pub mod network;
pub mod sync;
