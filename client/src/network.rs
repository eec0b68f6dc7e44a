use crate::bot::Bot;
use crate::sync::SyncState;
use bincode::serialized_size;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{read_packet, write_packet, Packet, Piece, HOUSEKEEPING_MS, RELAY_ID};
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// Settings for one participant session
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    pub name: String,
    pub team: i32,
    pub fake_ping_ms: u64,
    /// Locally created pieces, pushed if the relay lacks them
    pub pieces: Vec<Piece>,
    pub bot: bool,
    /// Chat line sent once after joining
    pub command: Option<String>,
}

pub struct Client {
    writer: OwnedWriteHalf,
    inbound_rx: mpsc::UnboundedReceiver<Packet>,
    sync: SyncState,
    bot: Option<Bot>,

    name: String,
    fake_ping_ms: u64,
    command: Option<String>,
}

impl Client {
    pub async fn new(config: ClientConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let stream = TcpStream::connect(&config.server_addr).await?;
        stream.set_nodelay(true)?;
        let (mut reader, writer) = stream.into_split();

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let fake_ping_ms = config.fake_ping_ms;

        tokio::spawn(async move {
            loop {
                match read_packet(&mut reader).await {
                    Ok(Some(packet)) => {
                        if fake_ping_ms > 0 {
                            sleep(Duration::from_millis(fake_ping_ms / 2)).await;
                        }
                        if inbound_tx.send(packet).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("Relay closed the connection");
                        break;
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        break;
                    }
                }
            }
        });

        let mut sync = SyncState::new(config.team);
        for piece in config.pieces {
            sync.add_piece(piece);
        }

        Ok(Client {
            writer,
            inbound_rx,
            sync,
            bot: config.bot.then(Bot::new),
            name: config.name,
            fake_ping_ms,
            command: config.command,
        })
    }

    pub fn sync(&self) -> &SyncState {
        &self.sync
    }

    async fn send_packet(&mut self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        write_packet(&mut self.writer, packet).await?;
        Ok(())
    }

    /// Handles one packet from the relay; returns false when the session is over
    async fn handle_packet(&mut self, packet: Packet) -> Result<bool, Box<dyn std::error::Error>> {
        match packet {
            Packet::State {
                id,
                roster,
                snapshot,
            } => {
                if let Some(push) = self.sync.on_state(id, roster, snapshot) {
                    self.send_packet(&push).await?;
                }
                if let Some(text) = self.command.take() {
                    self.send_packet(&Packet::Chat { sender: id, text }).await?;
                }
            }

            Packet::Relayed {
                sender,
                sequence,
                batch,
            } => {
                debug!(
                    "Batch {} from {} ({} entities)",
                    sequence,
                    sender,
                    batch.len()
                );
                self.sync.on_queue(sender, sequence, batch);
            }

            Packet::Clients { roster } => {
                info!("{} participants at the table", roster.len());
                self.sync.on_clients(roster);
            }

            Packet::Chat { sender, text } => {
                let from = if sender == RELAY_ID {
                    "Server".to_string()
                } else {
                    self.sync
                        .roster()
                        .get(&sender)
                        .map(|info| info.name.clone())
                        .unwrap_or_else(|| format!("#{}", sender))
                };
                info!("{}: {}", from, text);
            }

            Packet::YaBooted => {
                warn!("Booted by the relay");
                return Ok(false);
            }

            other => warn!("Unexpected packet type: {:?}", other),
        }

        Ok(true)
    }

    /// Applies inbound deltas, then sends the outbound queue
    async fn housekeeping(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.sync.process_inbound();

        if let Some(packet) = self.sync.flush_outbound() {
            debug!("Sending {} bytes", serialized_size(&packet).unwrap_or(0));
            self.send_packet(&packet).await?;
        }
        Ok(())
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Joining as '{}'", self.name);
        let hallo = Packet::Hallo {
            name: self.name.clone(),
            team: self.sync.team(),
        };
        self.send_packet(&hallo).await?;

        let mut housekeeping_interval = interval(Duration::from_millis(HOUSEKEEPING_MS));
        housekeeping_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut frame_interval = interval(Duration::from_millis(16));
        frame_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut rng = StdRng::from_entropy();

        loop {
            tokio::select! {
                packet = self.inbound_rx.recv() => {
                    let Some(packet) = packet else {
                        break;
                    };
                    if !self.handle_packet(packet).await? {
                        break;
                    }
                },

                _ = housekeeping_interval.tick() => {
                    self.housekeeping().await?;
                },

                _ = frame_interval.tick() => {
                    if let Some(bot) = self.bot.as_mut() {
                        bot.step(&mut self.sync, &mut rng);
                    }
                },
            }
        }

        Ok(())
    }
}
