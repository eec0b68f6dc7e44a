//! Relay network layer: TCP connections, the event loop and its timers

use crate::admin::{AdminCommand, AdminError, Tunables};
use crate::client_manager::ClientManager;
use crate::table::Table;
use bincode::serialized_size;
use log::{debug, error, info, warn};
use shared::{read_packet, write_packet, ClientInfo, Packet, Roster, RELAY_ID};
use std::collections::VecDeque;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Messages sent from connection tasks to the main relay loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { client_id: u32, packet: Packet },
    Closed { client_id: u32 },
}

/// The relay: one listener, one table, one event loop
pub struct Relay {
    listener: TcpListener,
    clients: ClientManager,
    table: Table,
    tunables: Tunables,

    /// Relayed batches waiting for the next housekeeping flush
    outbound: VecDeque<(Instant, Packet)>,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Relay {
    pub async fn new(
        addr: &str,
        tunables: Tunables,
        max_clients: usize,
        table: Table,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("Relay listening on {}", listener.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Relay {
            listener,
            clients: ClientManager::new(max_clients),
            table,
            tunables,
            outbound: VecDeque::new(),
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Spawns the writer and reader tasks of a fresh connection
    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Could not disable Nagle for {}: {}", addr, e);
        }

        let (mut reader, mut writer) = stream.into_split();
        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<Packet>();

        tokio::spawn(async move {
            while let Some(packet) = outbox_rx.recv().await {
                let booted = matches!(packet, Packet::YaBooted);
                if let Err(e) = write_packet(&mut writer, &packet).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                    break;
                }
                if booted {
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        let Some(client_id) = self.clients.add_client(addr, outbox_tx.clone()) else {
            warn!("Rejecting {}: relay is full", addr);
            let _ = outbox_tx.send(Packet::YaBooted);
            return;
        };

        let server_tx = self.server_tx.clone();
        tokio::spawn(async move {
            loop {
                match read_packet(&mut reader).await {
                    Ok(Some(packet)) => {
                        if server_tx
                            .send(ServerMessage::PacketReceived { client_id, packet })
                            .is_err()
                        {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Dropping client {}: {}", client_id, e);
                        break;
                    }
                }
            }
            let _ = server_tx.send(ServerMessage::Closed { client_id });
        });
    }

    fn send_state(&self, client_id: u32) {
        let packet = Packet::State {
            id: client_id,
            roster: self.clients.roster(),
            snapshot: self.table.snapshot(),
        };
        self.clients.send(client_id, packet);
    }

    fn send_state_to_all(&self) {
        for client_id in self.clients.joined_ids() {
            self.send_state(client_id);
        }
    }

    fn broadcast_roster(&self) {
        self.clients.broadcast(&Packet::Clients {
            roster: self.clients.roster(),
        });
    }

    fn reply(&self, client_id: u32, text: String) {
        self.clients.send(
            client_id,
            Packet::Chat {
                sender: RELAY_ID,
                text,
            },
        );
    }

    fn handle_packet(&mut self, client_id: u32, packet: Packet) {
        if let Packet::Hallo { name, team } = packet {
            self.handle_hallo(client_id, &name, team);
            return;
        }

        if !self.clients.is_joined(client_id) {
            warn!("Ignoring packet from client {} before hallo", client_id);
            return;
        }

        match packet {
            Packet::Queue { sequence, batch } => {
                let roster = self.clients.roster();
                let corrected = self.table.merge(client_id, sequence, batch, &roster);
                if corrected.is_empty() {
                    return;
                }

                let packet = Packet::Relayed {
                    sender: client_id,
                    sequence,
                    batch: corrected,
                };
                debug!(
                    "Queued batch {} from client {} ({} bytes)",
                    sequence,
                    client_id,
                    serialized_size(&packet).unwrap_or(0)
                );
                self.outbound.push_back((Instant::now(), packet));
            }

            Packet::Push { pieces } => {
                if self.table.populate(client_id, pieces) > 0 {
                    self.send_state_to_all();
                }
            }

            Packet::Clients { roster } => self.handle_clients(roster),

            Packet::Chat { text, .. } => {
                if text.starts_with('/') {
                    self.handle_admin(client_id, &text);
                } else {
                    self.clients.broadcast(&Packet::Chat {
                        sender: client_id,
                        text,
                    });
                }
            }

            other => warn!("Unexpected packet from client {}: {:?}", client_id, other),
        }
    }

    fn handle_hallo(&mut self, client_id: u32, name: &str, team: i32) {
        let hand = self.table.claim_hand(client_id);
        if !self.clients.join(client_id, ClientInfo::new(name, team, hand)) {
            self.table.free_hand(client_id);
            return;
        }

        self.send_state(client_id);
        self.broadcast_roster();
    }

    /// Applies name and team changes for known participants
    fn handle_clients(&mut self, roster: Roster) {
        for (id, info) in roster {
            if !self.clients.rename(id, &info.name, info.team) {
                debug!("Ignoring roster entry for unknown client {}", id);
            }
        }
        self.broadcast_roster();
    }

    fn handle_admin(&mut self, client_id: u32, text: &str) {
        info!("Client {} issued {}", client_id, text);

        let reply = match AdminCommand::parse(text) {
            Ok(command) => self.run_admin(command),
            Err(e) => Err(e),
        };

        match reply {
            Ok(text) => self.reply(client_id, text),
            Err(e) => {
                warn!("Admin command from client {} failed: {}", client_id, e);
                self.reply(client_id, e.to_string());
            }
        }
    }

    fn run_admin(&mut self, command: AdminCommand) -> Result<String, AdminError> {
        match command {
            AdminCommand::Reset => {
                self.table.reset();
                self.outbound.clear();
                self.send_state_to_all();
                Ok(format!(
                    "Table reset ({} pieces)",
                    self.table.store().piece_count()
                ))
            }
            AdminCommand::Boot(name) => {
                let targets = self.clients.find_by_name(&name);
                for client_id in &targets {
                    self.clients.send(*client_id, Packet::YaBooted);
                    self.disconnect(*client_id);
                }
                Ok(format!("Booted {} client(s) named '{}'", targets.len(), name))
            }
            AdminCommand::Set { key, value } => {
                self.tunables.set(&key, value)?;
                Ok(format!("Settings: {}", self.tunables))
            }
        }
    }

    fn disconnect(&mut self, client_id: u32) {
        let Some(client) = self.clients.remove_client(client_id) else {
            return;
        };

        if client.is_joined() {
            self.table.free_hand(client_id);
            self.broadcast_roster();
        }
    }

    /// Sends every queued batch older than the simulated latency, in order
    fn flush_outbound(&mut self) {
        let now = Instant::now();
        let latency = self.tunables.latency();

        while let Some((queued_at, _)) = self.outbound.front() {
            if *queued_at + latency > now {
                break;
            }
            if let Some((_, packet)) = self.outbound.pop_front() {
                self.clients.broadcast(&packet);
            }
        }
    }

    fn queue_sweep(&mut self) {
        if self.clients.joined_ids().is_empty() {
            return;
        }

        let batch = self.table.sweep();
        if batch.is_empty() {
            return;
        }

        debug!("Queued sweep of {} entities", batch.len());
        self.outbound.push_back((
            Instant::now(),
            Packet::Relayed {
                sender: RELAY_ID,
                sequence: 0,
                batch,
            },
        ));
    }

    /// Main relay loop
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let mut periods = self.tunables;
        let mut housekeeping = ticker(periods.housekeeping());
        let mut sweep = ticker(periods.sweep());

        info!("Relay started ({})", self.tunables);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.accept(stream, addr),
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                },

                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { client_id, packet }) => {
                            self.handle_packet(client_id, packet);
                        },
                        Some(ServerMessage::Closed { client_id }) => {
                            self.disconnect(client_id);
                        },
                        None => {
                            info!("Relay shutting down");
                            break;
                        }
                    }
                },

                _ = housekeeping.tick() => self.flush_outbound(),

                _ = sweep.tick() => self.queue_sweep(),
            }

            if self.tunables.housekeeping_ms != periods.housekeeping_ms {
                housekeeping = ticker(self.tunables.housekeeping());
            }
            if self.tunables.sweep_ms != periods.sweep_ms {
                sweep = ticker(self.tunables.sweep());
            }
            periods = self.tunables;
        }

        Ok(())
    }
}

fn ticker(period: std::time::Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Field, Piece, Snapshot};
    use std::time::Duration;
    use tokio::time::timeout;

    async fn start_relay(table: Table, max_clients: usize) -> SocketAddr {
        let tunables = Tunables {
            housekeeping_ms: 10,
            latency_ms: 0,
            sweep_ms: 60_000,
        };
        start_relay_with(table, max_clients, tunables).await
    }

    async fn start_relay_with(table: Table, max_clients: usize, tunables: Tunables) -> SocketAddr {
        let mut relay = Relay::new("127.0.0.1:0", tunables, max_clients, table)
            .await
            .unwrap();
        let addr = relay.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = relay.run().await;
        });
        addr
    }

    async fn next_packet(stream: &mut TcpStream) -> Packet {
        timeout(Duration::from_secs(2), read_packet(stream))
            .await
            .expect("timed out waiting for packet")
            .unwrap()
            .expect("connection closed")
    }

    async fn join(addr: SocketAddr, name: &str, team: i32) -> (TcpStream, u32, Snapshot) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_packet(
            &mut stream,
            &Packet::Hallo {
                name: name.to_string(),
                team,
            },
        )
        .await
        .unwrap();

        match next_packet(&mut stream).await {
            Packet::State { id, snapshot, .. } => (stream, id, snapshot),
            other => panic!("Expected State, got {:?}", other),
        }
    }

    #[test]
    fn test_server_message_creation() {
        let msg = ServerMessage::PacketReceived {
            client_id: 3,
            packet: Packet::YaBooted,
        };

        match msg {
            ServerMessage::PacketReceived { client_id, packet } => {
                assert_eq!(client_id, 3);
                assert_eq!(packet, Packet::YaBooted);
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[tokio::test]
    async fn test_hallo_gets_state() {
        let table = Table::with_layout(vec![Piece::new(1, 5.0, 5.0)]);
        let addr = start_relay(table, 4).await;

        let (_stream, id, snapshot) = join(addr, "alice", 0).await;

        assert_eq!(id, 1);
        assert_eq!(snapshot.pieces.len(), 1);
        assert_eq!(snapshot.hands.len(), 1);
        assert_eq!(snapshot.hands[0].owner, Some(1));
    }

    #[tokio::test]
    async fn test_sweep_broadcasts_whole_table() {
        let table = Table::with_layout(vec![
            Piece::new(1, 0.0, 0.0),
            Piece::new(2, 10.0, 0.0),
            Piece::new(3, 20.0, 0.0),
        ]);
        let tunables = Tunables {
            housekeeping_ms: 10,
            latency_ms: 0,
            sweep_ms: 30,
        };
        let addr = start_relay_with(table, 4, tunables).await;
        let (mut stream, _, _) = join(addr, "alice", 0).await;

        let (sender, sequence, batch) = loop {
            if let Packet::Relayed {
                sender,
                sequence,
                batch,
            } = next_packet(&mut stream).await
            {
                break (sender, sequence, batch);
            }
        };

        assert_eq!(sender, RELAY_ID);
        assert_eq!(sequence, 0);
        assert_eq!(batch.pieces.len(), 3);
        assert_eq!(batch.hands.len(), 1);
        for delta in batch.pieces.values() {
            assert!(Field::PIECE.iter().all(|field| delta.contains_key(field)));
        }
        for delta in batch.hands.values() {
            assert!(Field::HAND.iter().all(|field| delta.contains_key(field)));
        }
    }

    #[tokio::test]
    async fn test_full_relay_boots_extra_connection() {
        let addr = start_relay(Table::new(), 1).await;
        let (_first, _, _) = join(addr, "alice", 0).await;

        let mut second = TcpStream::connect(addr).await.unwrap();
        assert_eq!(next_packet(&mut second).await, Packet::YaBooted);
    }

    #[tokio::test]
    async fn test_set_command_replies_from_relay() {
        let addr = start_relay(Table::new(), 4).await;
        let (mut stream, _, _) = join(addr, "alice", 0).await;

        // the join broadcasts the roster first
        assert!(matches!(
            next_packet(&mut stream).await,
            Packet::Clients { .. }
        ));

        write_packet(
            &mut stream,
            &Packet::Chat {
                sender: 0,
                text: "/set bogus 1".to_string(),
            },
        )
        .await
        .unwrap();

        match next_packet(&mut stream).await {
            Packet::Chat { sender, text } => {
                assert_eq!(sender, RELAY_ID);
                assert!(text.contains("bogus"));
            }
            other => panic!("Expected Chat, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_boot_by_name() {
        let addr = start_relay(Table::new(), 4).await;
        let (mut admin, _, _) = join(addr, "admin", 0).await;
        let (mut victim, _, _) = join(addr, "victim", 0).await;

        write_packet(
            &mut admin,
            &Packet::Chat {
                sender: 0,
                text: "/boot victim".to_string(),
            },
        )
        .await
        .unwrap();

        loop {
            match next_packet(&mut victim).await {
                Packet::YaBooted => break,
                Packet::Clients { .. } => continue,
                other => panic!("Unexpected packet {:?}", other),
            }
        }
    }
}
