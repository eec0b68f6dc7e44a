//! # Table Relay Library
//!
//! The relay is the single point of arbitration for a shared table. Every
//! participant sends it batches of changed fields; it decides who wins,
//! rewrites losing entries in place, and broadcasts the corrected batches to
//! everyone, the original sender included.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Merge
//! Batches are merged in arrival order. An edit to a piece held by another
//! connected participant is replaced with the stored values and provenance
//! before it is relayed, which is how two simultaneous grabs of the same piece
//! resolve: the first batch processed wins and the second arrives corrected.
//!
//! ### Participant Management
//! Handles the lifecycle of every connection:
//! - Id assignment and the `hallo` handshake
//! - Hand allocation from a reusable pool
//! - Roster broadcasts on every join, leave and rename
//! - Capacity limits and `/boot`
//!
//! ### Recovery
//! New participants receive the full table directly. Every `sweep_ms` the
//! relay also rebroadcasts the full table as an ordinary batch from sender 0,
//! repairing any participant whose incremental view drifted.
//!
//! ## Architecture Design
//!
//! ### Single Event Loop
//! One task owns the table, the client manager and the outbound queue. Each
//! connection gets a reader task, which forwards decoded packets over a
//! channel, and a writer task, which drains that connection's outbox. No
//! locks are needed.
//!
//! ### TCP Transport
//! The protocol depends on per-connection ordering, so packets travel over
//! TCP as length-prefixed bincode frames.
//!
//! ## Module Organization
//!
//! ### Admin Module (`admin`)
//! Parsing of `/reset`, `/boot` and `/set` chat commands, and the runtime
//! `Tunables` that `/set` may change.
//!
//! ### Client Manager Module (`client_manager`)
//! Connections, join state, roster building and per-connection outboxes.
//!
//! ### Table Module (`table`)
//! The authoritative store: merge and correction, full push, reset, sweep
//! and the hand pool.
//!
//! ### Network Module (`network`)
//! The listener, connection tasks and the main `select!` loop with its
//! housekeeping and sweep timers.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use relay::admin::Tunables;
//! use relay::network::Relay;
//! use relay::table::Table;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut relay = Relay::new("127.0.0.1:8080", Tunables::default(), 32, Table::new()).await?;
//!     relay.run().await?;
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod client_manager;
pub mod network;
pub mod table;
