//! Scripted participant used in place of a human at the table

use crate::sync::SyncState;
use log::debug;
use rand::seq::IteratorRandom;
use rand::Rng;
use shared::{FieldValue, Piece};

/// Spacing between pieces of the local grid layout
pub const GRID_SPACING: f32 = 60.0;
/// Half the width of the area the bot drags pieces around in
pub const BOT_RANGE: f32 = 400.0;
/// Fraction of the remaining distance covered per frame
const DRAG_STEP: f32 = 0.15;
/// Chance that a drag ends by putting the piece back where it was
const PUT_BACK_CHANCE: f64 = 0.1;

/// `count` pieces with ids `1..=count` in a square grid centred on the origin
pub fn grid_layout(count: u32) -> Vec<Piece> {
    let columns = (count as f32).sqrt().ceil().max(1.0) as u32;
    let offset = (columns - 1) as f32 * GRID_SPACING / 2.0;

    (0..count)
        .map(|index| {
            let x = (index % columns) as f32 * GRID_SPACING - offset;
            let y = (index / columns) as f32 * GRID_SPACING - offset;
            let mut piece = Piece::new(index + 1, x, y);
            piece.z = index;
            piece
        })
        .collect()
}

struct Drag {
    piece: u32,
    target: (f32, f32),
    frames_left: u32,
    put_back: bool,
}

/// Grabs random free pieces, drags them somewhere else and lets go
#[derive(Default)]
pub struct Bot {
    drag: Option<Drag>,
}

impl Bot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Advances the bot by one frame
    pub fn step<R: Rng>(&mut self, sync: &mut SyncState, rng: &mut R) {
        if !sync.is_ready() {
            return;
        }

        match self.drag.take() {
            None => self.drag = Self::pick(sync, rng),
            Some(drag) => self.drag = Self::advance(drag, sync),
        }
    }

    fn pick<R: Rng>(sync: &mut SyncState, rng: &mut R) -> Option<Drag> {
        let piece = sync
            .store()
            .pieces()
            .filter(|piece| !piece.is_held())
            .map(|piece| piece.id)
            .choose(rng)?;

        if !sync.hold(piece, false) {
            return None;
        }
        sync.select(piece);

        let target = (
            rng.gen_range(-BOT_RANGE..BOT_RANGE),
            rng.gen_range(-BOT_RANGE..BOT_RANGE),
        );
        debug!("Bot dragging piece {} to {:?}", piece, target);

        Some(Drag {
            piece,
            target,
            frames_left: rng.gen_range(20..60),
            put_back: rng.gen_bool(PUT_BACK_CHANCE),
        })
    }

    fn advance(mut drag: Drag, sync: &mut SyncState) -> Option<Drag> {
        let held = sync
            .store()
            .piece(drag.piece)
            .is_some_and(|piece| piece.holder == sync.id());
        if !held {
            debug!("Bot lost piece {}", drag.piece);
            return None;
        }

        if drag.frames_left == 0 {
            if drag.put_back {
                sync.cancel_hold(drag.piece);
            } else {
                sync.release(drag.piece, false);
            }
            sync.unselect(drag.piece);
            return None;
        }

        let (x, y) = sync
            .store()
            .piece(drag.piece)
            .map(|piece| (piece.x, piece.y))
            .unwrap_or(drag.target);
        let x = x + (drag.target.0 - x) * DRAG_STEP;
        let y = y + (drag.target.1 - y) * DRAG_STEP;

        sync.update_piece(drag.piece, FieldValue::X(x));
        sync.update_piece(drag.piece, FieldValue::Y(y));
        sync.move_hand(x, y);

        drag.frames_left -= 1;
        Some(drag)
    }
}
