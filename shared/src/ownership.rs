//! Holding and selecting rules
//!
//! A piece has at most one holder (a participant dragging it) and at most one
//! selecting team. The same four operations run on every client, optimistically,
//! and on the relay, authoritatively. They only consult the [`Roster`] to learn
//! who is still connected and which team they are on.
//!
//! None of these functions touch the outbound queue; callers decide whether a
//! change is worth sending.

use crate::entity::{Piece, NO_HOLDER, NO_TEAM};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Longest display name the relay keeps
pub const MAX_NAME_LEN: usize = 24;

/// Roster entry for one connected participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub team: i32,
    /// Id of the hand the relay assigned to this participant
    pub hand: u32,
}

impl ClientInfo {
    pub fn new(name: &str, team: i32, hand: u32) -> Self {
        Self {
            name: sanitize_name(name),
            team: team.max(0),
            hand,
        }
    }
}

/// Connected participants by id
pub type Roster = BTreeMap<u32, ClientInfo>;

/// Trims a display name to the length the relay keeps
pub fn sanitize_name(name: &str) -> String {
    name.trim().chars().take(MAX_NAME_LEN).collect()
}

fn is_connected(roster: &Roster, id: u32) -> bool {
    id != NO_HOLDER && roster.contains_key(&id)
}

impl Piece {
    /// Makes `participant` the holder
    ///
    /// Refused when someone still connected already holds the piece, unless
    /// `force` is set. Holding with participant 0 is a release. Returns true
    /// when the holder changed.
    pub fn hold(&mut self, participant: u32, force: bool, roster: &Roster) -> bool {
        if participant == self.holder {
            return false;
        }
        if participant == NO_HOLDER {
            return self.release(participant, force, roster);
        }
        if is_connected(roster, self.holder) && !force {
            return false;
        }

        self.pre_hold = Some(self.pose());
        self.holder = participant;
        true
    }

    /// Clears the holder
    ///
    /// Only the current holder may release, unless the holder has left or
    /// `force` is set.
    pub fn release(&mut self, participant: u32, force: bool, roster: &Roster) -> bool {
        if self.holder == NO_HOLDER {
            return false;
        }
        if is_connected(roster, self.holder) && self.holder != participant && !force {
            return false;
        }

        self.holder = NO_HOLDER;
        self.pre_hold = None;
        true
    }

    /// Applies a holder assignment the network insists on
    pub fn assign_holder(&mut self, participant: u32, roster: &Roster) -> bool {
        self.hold(participant, true, roster)
    }

    /// Marks the piece as selected by `team`
    ///
    /// A negative team is an unselect on behalf of `requester`. Otherwise it
    /// is refused while a connected participant from another team holds it.
    /// Any previous team's selection is evicted first.
    pub fn select(&mut self, team: i32, requester: u32, roster: &Roster) -> bool {
        if team == self.selector {
            return false;
        }
        if team < 0 {
            return self.unselect(requester, false);
        }
        if let Some(holder) = roster.get(&self.holder) {
            if holder.team != team {
                return false;
            }
        }

        // the previous team loses it silently; only the new team is sent
        self.selector = team;
        true
    }

    /// Clears the selection unless someone other than `requester` holds the piece
    pub fn unselect(&mut self, requester: u32, force: bool) -> bool {
        if self.selector == NO_TEAM {
            return false;
        }
        if !force && self.holder != NO_HOLDER && self.holder != requester {
            return false;
        }

        self.selector = NO_TEAM;
        true
    }
}
