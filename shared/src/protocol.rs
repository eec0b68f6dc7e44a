//! Wire messages and the frame codec
//!
//! Every message is one [`Packet`], framed as a 4-byte big-endian length
//! followed by its bincode encoding. The transport underneath must be ordered
//! and reliable (TCP); nothing here retries or reorders.

use crate::entity::{Delta, Field, Piece, StampedDelta};
use crate::error::ProtocolError;
use crate::ownership::Roster;
use crate::store::Snapshot;
use bincode::{deserialize, serialize};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame body either side will accept
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Per-entity deltas for pieces and hands, keyed by entity id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch<D> {
    pub pieces: BTreeMap<u32, D>,
    pub hands: BTreeMap<u32, D>,
}

impl<D> Default for Batch<D> {
    fn default() -> Self {
        Self {
            pieces: BTreeMap::new(),
            hands: BTreeMap::new(),
        }
    }
}

impl<D> Batch<D> {
    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty() && self.hands.is_empty()
    }

    /// Number of entities mentioned
    pub fn len(&self) -> usize {
        self.pieces.len() + self.hands.len()
    }
}

impl<V> Batch<BTreeMap<Field, V>> {
    /// Folds a later batch into this one; later values win field by field
    pub fn absorb(&mut self, later: Batch<BTreeMap<Field, V>>) {
        for (id, delta) in later.pieces {
            self.pieces.entry(id).or_default().extend(delta);
        }
        for (id, delta) in later.hands {
            self.hands.entry(id).or_default().extend(delta);
        }
    }
}

/// What a participant sends: bare values, provenance implied by the packet
pub type OutBatch = Batch<Delta>;

/// What the relay sends: every field carries its own provenance
pub type StampedBatch = Batch<StampedDelta>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    /// Join request (client → relay)
    Hallo { name: String, team: i32 },
    /// Assigned id, roster and full table (relay → client)
    State {
        id: u32,
        roster: Roster,
        snapshot: Snapshot,
    },
    /// Outbound batch (client → relay)
    Queue { sequence: u32, batch: OutBatch },
    /// Arbitrated batch (relay → clients); sender 0 marks an anti-entropy sweep
    Relayed {
        sender: u32,
        sequence: u32,
        batch: StampedBatch,
    },
    /// Full records of pieces the relay does not know yet (client → relay)
    Push { pieces: Vec<Piece> },
    /// Whole roster (either direction)
    Clients { roster: Roster },
    /// Free text; `/`-prefixed text is an admin command for the relay
    Chat { sender: u32, text: String },
    /// Forced disconnect notice (relay → client)
    YaBooted,
}

pub fn encode_frame(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    let body = serialize(packet)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: body.len(),
            max: MAX_FRAME_LEN,
        });
    }

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(packet)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one packet; `Ok(None)` means the peer closed the connection
pub async fn read_packet<R>(reader: &mut R) -> Result<Option<Packet>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(deserialize(&body)?))
}
