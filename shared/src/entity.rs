//! Replicated entities and their per-field provenance
//!
//! Every shared object on the table is either a [`Piece`] (movable, ownable,
//! selectable) or a [`Hand`] (a participant's cursor avatar). Both expose their
//! replicated state through the [`Entity`] trait so the queues, the
//! reconciliation pass and the relay's merge can treat fields generically.
//!
//! Each replicated field remembers who last set it and in which outbound
//! batch. That [`Provenance`] pair is the only input to conflict resolution.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Holder id meaning "nobody is holding this"
pub const NO_HOLDER: u32 = 0;
/// Selector team meaning "no team is selecting this"
pub const NO_TEAM: i32 = -1;
/// Sender id the relay uses for its own packets
pub const RELAY_ID: u32 = 0;

/// Names a replicated field
///
/// The declaration order is also the map order inside a delta, which puts
/// `Holder` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Field {
    Holder,
    X,
    Y,
    R,
    S,
    Texture,
    Selector,
    Z,
}

impl Field {
    pub const PIECE: [Field; 8] = [
        Field::Holder,
        Field::X,
        Field::Y,
        Field::R,
        Field::S,
        Field::Texture,
        Field::Selector,
        Field::Z,
    ];

    pub const HAND: [Field; 4] = [Field::X, Field::Y, Field::R, Field::Texture];
}

/// A typed value for one field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Holder(u32),
    X(f32),
    Y(f32),
    R(f32),
    S(f32),
    Texture(u32),
    Selector(i32),
    Z(u32),
}

impl FieldValue {
    pub fn field(&self) -> Field {
        match self {
            FieldValue::Holder(_) => Field::Holder,
            FieldValue::X(_) => Field::X,
            FieldValue::Y(_) => Field::Y,
            FieldValue::R(_) => Field::R,
            FieldValue::S(_) => Field::S,
            FieldValue::Texture(_) => Field::Texture,
            FieldValue::Selector(_) => Field::Selector,
            FieldValue::Z(_) => Field::Z,
        }
    }
}

/// Who last set a field, and in which of their outbound batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    pub sender: u32,
    pub sequence: u32,
}

impl Provenance {
    pub fn new(sender: u32, sequence: u32) -> Self {
        Self { sender, sequence }
    }
}

/// A field value travelling together with its provenance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stamped {
    pub value: FieldValue,
    pub provenance: Provenance,
}

/// Changed fields of one entity, as sent by a participant
///
/// An entry whose value does not belong to its key is malformed and is
/// skipped by every consumer.
pub type Delta = BTreeMap<Field, FieldValue>;

/// Changed fields of one entity, each carrying its own provenance
pub type StampedDelta = BTreeMap<Field, Stamped>;

/// Common interface of replicated entities
pub trait Entity {
    fn id(&self) -> u32;

    fn supports(&self, field: Field) -> bool;

    fn get_field(&self, field: Field) -> Option<FieldValue>;

    /// Writes a field directly, bypassing ownership rules
    ///
    /// Returns false if the entity has no such field. Draw order (`Z`) is
    /// owned by the store's order index and is refused here.
    fn set_field(&mut self, value: FieldValue) -> bool;

    fn provenance(&self, field: Field) -> Provenance;

    fn stamp(&mut self, field: Field, provenance: Provenance);

    fn stamped(&self, field: Field) -> Option<Stamped> {
        self.get_field(field).map(|value| Stamped {
            value,
            provenance: self.provenance(field),
        })
    }
}

/// Position, rotation and scale captured when a hold begins
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub x: f32,
    pub y: f32,
    pub r: f32,
    pub s: f32,
}

/// A movable, ownable, selectable object on the table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Piece {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub r: f32,
    pub s: f32,
    pub texture: u32,
    pub holder: u32,
    pub selector: i32,
    /// Rank in the draw stack, mirrored from the store's order index
    pub z: u32,
    provenance: BTreeMap<Field, Provenance>,
    #[serde(skip)]
    pub(crate) pre_hold: Option<Pose>,
}

impl Piece {
    pub fn new(id: u32, x: f32, y: f32) -> Self {
        Self {
            id,
            x,
            y,
            r: 0.0,
            s: 1.0,
            texture: 0,
            holder: NO_HOLDER,
            selector: NO_TEAM,
            z: 0,
            provenance: BTreeMap::new(),
            pre_hold: None,
        }
    }

    pub fn is_held(&self) -> bool {
        self.holder != NO_HOLDER
    }

    pub fn pose(&self) -> Pose {
        Pose {
            x: self.x,
            y: self.y,
            r: self.r,
            s: self.s,
        }
    }

    /// Pose the piece had when its current hold began, if any
    pub fn pre_hold(&self) -> Option<Pose> {
        self.pre_hold
    }

    /// Compares replicated values only, ignoring provenance
    pub fn same_state(&self, other: &Piece) -> bool {
        Field::PIECE
            .iter()
            .all(|field| self.get_field(*field) == other.get_field(*field))
            && self.id == other.id
    }
}

impl Entity for Piece {
    fn id(&self) -> u32 {
        self.id
    }

    fn supports(&self, _field: Field) -> bool {
        true
    }

    fn get_field(&self, field: Field) -> Option<FieldValue> {
        Some(match field {
            Field::Holder => FieldValue::Holder(self.holder),
            Field::X => FieldValue::X(self.x),
            Field::Y => FieldValue::Y(self.y),
            Field::R => FieldValue::R(self.r),
            Field::S => FieldValue::S(self.s),
            Field::Texture => FieldValue::Texture(self.texture),
            Field::Selector => FieldValue::Selector(self.selector),
            Field::Z => FieldValue::Z(self.z),
        })
    }

    fn set_field(&mut self, value: FieldValue) -> bool {
        match value {
            FieldValue::Holder(v) => self.holder = v,
            FieldValue::X(v) => self.x = v,
            FieldValue::Y(v) => self.y = v,
            FieldValue::R(v) => self.r = v,
            FieldValue::S(v) => self.s = v,
            FieldValue::Texture(v) => self.texture = v,
            FieldValue::Selector(v) => self.selector = v,
            FieldValue::Z(_) => return false,
        }
        true
    }

    fn provenance(&self, field: Field) -> Provenance {
        self.provenance.get(&field).copied().unwrap_or_default()
    }

    fn stamp(&mut self, field: Field, provenance: Provenance) {
        self.provenance.insert(field, provenance);
    }
}

/// A participant's cursor avatar
///
/// Hands are never arbitrated: only the owning participant moves one. The
/// relay hands them out from a pool and clears `owner` when the participant
/// leaves, so a hand outlives the session that first used it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hand {
    pub id: u32,
    pub owner: Option<u32>,
    pub x: f32,
    pub y: f32,
    pub r: f32,
    pub texture: u32,
    provenance: BTreeMap<Field, Provenance>,
}

impl Hand {
    pub fn new(id: u32, owner: Option<u32>) -> Self {
        Self {
            id,
            owner,
            x: 0.0,
            y: 0.0,
            r: 0.0,
            texture: 0,
            provenance: BTreeMap::new(),
        }
    }
}

impl Entity for Hand {
    fn id(&self) -> u32 {
        self.id
    }

    fn supports(&self, field: Field) -> bool {
        Field::HAND.contains(&field)
    }

    fn get_field(&self, field: Field) -> Option<FieldValue> {
        match field {
            Field::X => Some(FieldValue::X(self.x)),
            Field::Y => Some(FieldValue::Y(self.y)),
            Field::R => Some(FieldValue::R(self.r)),
            Field::Texture => Some(FieldValue::Texture(self.texture)),
            _ => None,
        }
    }

    fn set_field(&mut self, value: FieldValue) -> bool {
        match value {
            FieldValue::X(v) => self.x = v,
            FieldValue::Y(v) => self.y = v,
            FieldValue::R(v) => self.r = v,
            FieldValue::Texture(v) => self.texture = v,
            _ => return false,
        }
        true
    }

    fn provenance(&self, field: Field) -> Provenance {
        self.provenance.get(&field).copied().unwrap_or_default()
    }

    fn stamp(&mut self, field: Field, provenance: Provenance) {
        if self.supports(field) {
            self.provenance.insert(field, provenance);
        }
    }
}

/// Every supported field of an entity with its current provenance
pub fn full_delta<E: Entity>(entity: &E, fields: &[Field]) -> StampedDelta {
    fields
        .iter()
        .filter_map(|field| entity.stamped(*field).map(|stamped| (*field, stamped)))
        .collect()
}

/// Drops entries whose value does not belong to their key
pub fn well_formed<'a, V: 'a>(
    delta: impl IntoIterator<Item = (&'a Field, &'a V)>,
    value_field: impl Fn(&V) -> Field,
) -> impl Iterator<Item = (Field, &'a V)> {
    delta
        .into_iter()
        .filter(move |(field, value)| value_field(*value) == **field)
        .map(|(field, value)| (*field, value))
}
