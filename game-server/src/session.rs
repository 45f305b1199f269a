//! The server shell: client sessions, the tick clock and the glue between
//! sockets, the token collector and the game state.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use common::defines::{ErrorCode, TICK_MS};
use common::net::{Connection, Listener, MessageIn, MessageOut};
use common::protocol::*;
use common::token::{Token, TokenCollector};

use crate::account_link::{AccountLink, PlayerEnter};
use crate::config::Config;
use crate::entity::EntityId;
use crate::handler;
use crate::state::GameState;

struct GameClient {
    conn: Connection,
    character: Option<EntityId>,
}

pub struct GameServer {
    listener: Listener,
    clients: Vec<Option<GameClient>>,
    by_character: HashMap<EntityId, usize>,
    collector: TokenCollector<usize, PlayerEnter>,
    pub state: GameState,
    account: AccountLink,
    config: Config,
    last_tick: Instant,
    last_sweep: Instant,
    last_stats: Instant,
}

impl GameServer {
    pub fn new(config: Config, state: GameState) -> anyhow::Result<GameServer> {
        let listener = Listener::bind(&config.listen_address)?;
        log::info!("Listening for clients on {}", config.listen_address);
        let collector =
            TokenCollector::new(config.client_token_timeout, config.connect_token_timeout);
        let account = AccountLink::new(&config.account_address);
        Ok(GameServer {
            listener,
            clients: Vec::new(),
            by_character: HashMap::new(),
            collector,
            state,
            account,
            config,
            last_tick: Instant::now(),
            last_sweep: Instant::now(),
            last_stats: Instant::now(),
        })
    }

    fn store_client(&mut self, client: GameClient) -> usize {
        for (i, slot) in self.clients.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(client);
                return i;
            }
        }
        self.clients.push(Some(client));
        self.clients.len() - 1
    }

    /// One pass of the cooperative loop: network I/O, then a simulation
    /// tick when 100 ms elapsed. Sleeps out the remainder of the quantum.
    pub fn run_once(&mut self) {
        self.account.connect(
            &self.config.public_address,
            self.config.public_port,
            &self.config.net_password,
            &self.state.maps.ids(),
        );

        while let Some(conn) = self.listener.accept() {
            log::debug!("New connection from {}", conn.peer());
            self.store_client(GameClient {
                conn,
                character: None,
            });
        }

        self.poll_clients();

        let admissions = self.account.pump(&mut self.state, &mut self.collector);
        for (slot, payload) in admissions {
            self.admit(slot, payload);
        }

        if self.last_tick.elapsed() >= Duration::from_millis(TICK_MS as u64) {
            self.last_tick += Duration::from_millis(TICK_MS as u64);
            self.state.update();
            self.drain_outbox();
        }

        if self.last_sweep.elapsed() >= Duration::from_secs(1) {
            self.last_sweep = Instant::now();
            self.sweep_tokens();
        }

        if self.last_stats.elapsed() >= Duration::from_secs(60) {
            self.last_stats = Instant::now();
            let mut msg = MessageOut::new(GA_STATISTICS);
            msg.write_u32(self.by_character.len() as u32);
            self.state.send_to_account(msg);
        }

        self.flush_clients();
        std::thread::sleep(Duration::from_millis(5));
    }

    fn poll_clients(&mut self) {
        for slot in 0..self.clients.len() {
            let frames = {
                let Some(client) = self.clients[slot].as_mut() else {
                    continue;
                };
                client.conn.receive()
            };
            for frame in frames {
                let Some(mut msg) = MessageIn::new(&frame) else {
                    log::debug!("Dropping runt frame from client {}", slot);
                    continue;
                };
                self.handle_client_message(slot, &mut msg);
            }
            let closed = self.clients[slot]
                .as_ref()
                .map(|c| c.conn.is_closed())
                .unwrap_or(false);
            if closed {
                self.drop_client(slot, true);
            }
        }
    }

    fn handle_client_message(&mut self, slot: usize, msg: &mut MessageIn) {
        let character = self.clients[slot].as_ref().and_then(|c| c.character);
        match (character, msg.id()) {
            (None, CG_CONNECT) => {
                let token_bytes = msg.read_bytes(common::token::TOKEN_LENGTH);
                let Some(token) = Token::from_bytes(&token_bytes) else {
                    self.refuse(slot, GC_CONNECT_RESPONSE, ErrorCode::InvalidArgument);
                    return;
                };
                match self.collector.take_connect(&token) {
                    Some(payload) => self.admit(slot, payload),
                    None => self.collector.park_client(token, slot),
                }
            }
            (None, _) => {
                // No login, no game: everything else needs a character.
                self.refuse(slot, msg.id(), ErrorCode::NoLogin);
            }
            (Some(id), CG_DISCONNECT) => {
                self.state.logout_character(id);
                self.drop_client(slot, false);
            }
            (Some(id), _) => {
                handler::handle(&mut self.state, id, msg);
            }
        }
    }

    fn admit(&mut self, slot: usize, payload: PlayerEnter) {
        let Some(id) = self
            .state
            .admit_character(payload.db_id, &payload.name, &payload.data)
        else {
            self.refuse(slot, GC_CONNECT_RESPONSE, ErrorCode::Failure);
            return;
        };
        if let Some(client) = self.clients[slot].as_mut() {
            client.character = Some(id);
            let mut msg = MessageOut::new(GC_CONNECT_RESPONSE);
            msg.write_u8(ErrorCode::Ok as u8);
            client.conn.send(&msg);
        }
        self.by_character.insert(id, slot);
        handler::send_inventory(&mut self.state, id);
    }

    fn refuse(&mut self, slot: usize, msg_id: u16, code: ErrorCode) {
        if let Some(client) = self.clients[slot].as_mut() {
            let mut msg = MessageOut::new(msg_id);
            msg.write_u8(code as u8);
            client.conn.send(&msg);
        }
    }

    fn drop_client(&mut self, slot: usize, logout: bool) {
        let Some(mut client) = self.clients[slot].take() else {
            return;
        };
        if let Some(id) = client.character {
            self.by_character.remove(&id);
            if logout && self.state.world.contains(id) {
                self.state.logout_character(id);
            }
        } else {
            // A parked half-open session dies with its socket.
            self.collector.remove_client_where(|&s| s == slot);
        }
        client.conn.close();
    }

    fn drain_outbox(&mut self) {
        for (id, msg) in std::mem::take(&mut self.state.outbox) {
            let Some(&slot) = self.by_character.get(&id) else {
                continue;
            };
            if let Some(client) = self.clients[slot].as_mut() {
                client.conn.send(&msg);
            }
        }
        for id in std::mem::take(&mut self.state.closing) {
            if let Some(&slot) = self.by_character.get(&id) {
                self.by_character.remove(&id);
                if let Some(client) = self.clients[slot].as_mut() {
                    client.character = None;
                }
                self.drop_client(slot, false);
            }
        }
    }

    fn flush_clients(&mut self) {
        for slot in self.clients.iter_mut().flatten() {
            slot.conn.flush();
        }
    }

    /// Expired pending clients are refused with the timeout code; expired
    /// pending connects discard their snapshot (the gateway still has the
    /// authoritative copy).
    fn sweep_tokens(&mut self) {
        let (dead_clients, dead_connects) = self.collector.sweep(Instant::now());
        for slot in dead_clients {
            self.refuse(slot, GC_CONNECT_RESPONSE, ErrorCode::Timeout);
            self.drop_client(slot, false);
        }
        for payload in dead_connects {
            log::info!(
                "Discarding stale handoff for character {} ('{}')",
                payload.db_id,
                payload.name
            );
        }
    }

    /// Logs everyone out; used at shutdown.
    pub fn close_all(&mut self) {
        for slot in 0..self.clients.len() {
            self.drop_client(slot, true);
        }
    }
}
