//! The network shell around the broker: two listeners (clients and game
//! servers), slot bookkeeping and outbox draining.

use std::time::{Duration, Instant};

use common::net::{Connection, Listener, MessageIn};

use crate::broker::BrokerState;
use crate::config::Config;

pub struct AccountServer {
    client_listener: Listener,
    game_listener: Listener,
    clients: Vec<Option<Connection>>,
    games: Vec<Option<Connection>>,
    pub state: BrokerState,
    last_sweep: Instant,
}

impl AccountServer {
    pub fn new(config: &Config, state: BrokerState) -> anyhow::Result<AccountServer> {
        let client_listener = Listener::bind(&config.client_listen)?;
        log::info!("Listening for clients on {}", config.client_listen);
        let game_listener = Listener::bind(&config.game_listen)?;
        log::info!("Listening for game servers on {}", config.game_listen);
        Ok(AccountServer {
            client_listener,
            game_listener,
            clients: Vec::new(),
            games: Vec::new(),
            state,
            last_sweep: Instant::now(),
        })
    }

    /// One pass of the cooperative loop.
    pub fn run_once(&mut self) {
        while let Some(conn) = self.client_listener.accept() {
            let slot = self.state.open_client();
            while self.clients.len() <= slot {
                self.clients.push(None);
            }
            log::debug!("Client {} connected from {}", slot, conn.peer());
            self.clients[slot] = Some(conn);
        }

        while let Some(conn) = self.game_listener.accept() {
            let slot = self
                .games
                .iter()
                .position(|g| g.is_none())
                .unwrap_or_else(|| {
                    self.games.push(None);
                    self.games.len() - 1
                });
            log::info!("Game server connection from {}", conn.peer());
            self.games[slot] = Some(conn);
        }

        // Client traffic.
        for slot in 0..self.clients.len() {
            let frames = match self.clients[slot].as_mut() {
                Some(conn) => conn.receive(),
                None => continue,
            };
            for frame in frames {
                if let Some(mut msg) = MessageIn::new(&frame) {
                    self.state.handle_client_message(slot, &mut msg);
                }
            }
            if self.clients[slot]
                .as_ref()
                .map(|c| c.is_closed())
                .unwrap_or(false)
            {
                self.state.close_client(slot);
                if let Some(mut conn) = self.clients[slot].take() {
                    conn.close();
                }
            }
        }

        // Game server traffic.
        for slot in 0..self.games.len() {
            let frames = match self.games[slot].as_mut() {
                Some(conn) => conn.receive(),
                None => continue,
            };
            for frame in frames {
                if let Some(mut msg) = MessageIn::new(&frame) {
                    self.state.handle_game_message(slot, &mut msg);
                }
            }
            if self.games[slot]
                .as_ref()
                .map(|c| c.is_closed())
                .unwrap_or(false)
            {
                self.state.close_game(slot);
                if let Some(mut conn) = self.games[slot].take() {
                    conn.close();
                }
            }
        }

        // Outboxes.
        for (slot, msg) in std::mem::take(&mut self.state.outbox) {
            if let Some(Some(conn)) = self.clients.get_mut(slot) {
                conn.send(&msg);
            }
        }
        for (slot, msg) in std::mem::take(&mut self.state.game_outbox) {
            if let Some(Some(conn)) = self.games.get_mut(slot) {
                conn.send(&msg);
            }
        }
        for conn in self.clients.iter_mut().flatten() {
            conn.flush();
        }
        for conn in self.games.iter_mut().flatten() {
            conn.flush();
        }

        if self.last_sweep.elapsed() >= Duration::from_secs(1) {
            self.last_sweep = Instant::now();
            self.state.sweep(Instant::now());
        }

        std::thread::sleep(Duration::from_millis(5));
    }
}
