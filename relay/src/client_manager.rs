//! Connection bookkeeping for the relay
//!
//! This module tracks every open connection, including:
//! - Participant id assignment (ids start at 1 and are never reused)
//! - Join state, name, team and assigned hand
//! - The outbox each connection's writer task drains
//! - Capacity enforcement
//!
//! A connection counts as a participant only after its `Hallo`. Until then it
//! receives nothing and appears in no roster.

use log::{info, warn};
use shared::{ClientInfo, Packet, Roster};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// One open connection
#[derive(Debug)]
pub struct Client {
    /// Participant id assigned by the relay
    pub id: u32,
    pub addr: SocketAddr,
    /// Name, team and hand once the participant has joined
    pub info: Option<ClientInfo>,
    outbox: mpsc::UnboundedSender<Packet>,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr, outbox: mpsc::UnboundedSender<Packet>) -> Self {
        Self {
            id,
            addr,
            info: None,
            outbox,
        }
    }

    pub fn is_joined(&self) -> bool {
        self.info.is_some()
    }

    /// Hands a packet to the connection's writer task
    ///
    /// Returns false once the writer has gone away; the reader side will
    /// report the close shortly after.
    pub fn send(&self, packet: Packet) -> bool {
        self.outbox.send(packet).is_ok()
    }
}

pub struct ClientManager {
    clients: BTreeMap<u32, Client>,
    next_client_id: u32,
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: BTreeMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Registers a new connection
    ///
    /// Returns None if the relay is at capacity.
    pub fn add_client(
        &mut self,
        addr: SocketAddr,
        outbox: mpsc::UnboundedSender<Packet>,
    ) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients
            .insert(client_id, Client::new(client_id, addr, outbox));

        Some(client_id)
    }

    pub fn remove_client(&mut self, client_id: u32) -> Option<Client> {
        let client = self.clients.remove(&client_id)?;
        info!("Client {} disconnected", client.id);
        Some(client)
    }

    /// Records the roster entry of a participant that said hallo
    pub fn join(&mut self, client_id: u32, info: ClientInfo) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                info!(
                    "Client {} joined as '{}' on team {} with hand {}",
                    client_id, info.name, info.team, info.hand
                );
                client.info = Some(info);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, client_id: u32) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    pub fn is_joined(&self, client_id: u32) -> bool {
        self.get(client_id).is_some_and(Client::is_joined)
    }

    /// Changes name and team of a joined participant; the hand stays put
    pub fn rename(&mut self, client_id: u32, name: &str, team: i32) -> bool {
        let Some(info) = self
            .clients
            .get_mut(&client_id)
            .and_then(|client| client.info.as_mut())
        else {
            return false;
        };

        let updated = ClientInfo::new(name, team, info.hand);
        *info = updated;
        true
    }

    /// Joined participants only
    pub fn roster(&self) -> Roster {
        self.clients
            .iter()
            .filter_map(|(id, client)| client.info.clone().map(|info| (*id, info)))
            .collect()
    }

    pub fn find_by_name(&self, name: &str) -> Vec<u32> {
        self.clients
            .values()
            .filter(|client| client.info.as_ref().is_some_and(|info| info.name == name))
            .map(|client| client.id)
            .collect()
    }

    pub fn joined_ids(&self) -> Vec<u32> {
        self.clients
            .values()
            .filter(|client| client.is_joined())
            .map(|client| client.id)
            .collect()
    }

    pub fn send(&self, client_id: u32, packet: Packet) {
        match self.clients.get(&client_id) {
            Some(client) => {
                if !client.send(packet) {
                    warn!("Outbox of client {} is closed", client_id);
                }
            }
            None => warn!("Dropping packet for unknown client {}", client_id),
        }
    }

    /// Sends a packet to every joined participant
    pub fn broadcast(&self, packet: &Packet) {
        for client in self.clients.values().filter(|client| client.is_joined()) {
            if !client.send(packet.clone()) {
                warn!("Outbox of client {} is closed", client.id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
