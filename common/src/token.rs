//! One-shot session tokens and the pending-token matcher.
//!
//! A token authorizes exactly one handoff from the account server to a game
//! or chat session. Both sides of a handoff feed a [`TokenCollector`]: the
//! server-to-server half arrives as a "connect" (snapshot waiting for its
//! client), the client half as a "client" (socket waiting for its data).
//! Whichever half arrives second completes the match.

use std::time::{Duration, Instant};

use rand::Rng;

pub const TOKEN_LENGTH: usize = 32;

/// An opaque 32-byte token, compared bytewise.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token([u8; TOKEN_LENGTH]);

impl Token {
    /// Draws a fresh token from the thread RNG. Bytes stay in the printable
    /// range 1..127 so tokens survive being logged or embedded in text
    /// protocols. Uniqueness is statistical, not checked; pair the token
    /// with the account or character id where collisions would matter.
    pub fn generate() -> Token {
        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; TOKEN_LENGTH];
        for b in bytes.iter_mut() {
            *b = rng.gen_range(1..127);
        }
        Token(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Token> {
        if bytes.len() != TOKEN_LENGTH {
            return None;
        }
        let mut buf = [0u8; TOKEN_LENGTH];
        buf.copy_from_slice(bytes);
        Some(Token(buf))
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_LENGTH] {
        &self.0
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token({})", String::from_utf8_lossy(&self.0))
    }
}

struct Pending<T> {
    token: Token,
    data: T,
    stamp: Instant,
}

/// Matches the two halves of a token handoff and expires stale halves.
///
/// `C` is the client-side payload (a connection handle), `P` the
/// server-side payload (a character snapshot or client descriptor). The two
/// tables carry independent timeouts: the connect side outlives the client
/// side because snapshots must survive a slow client reconnect.
pub struct TokenCollector<C, P> {
    pending_clients: Vec<Pending<C>>,
    pending_connects: Vec<Pending<P>>,
    client_timeout: Duration,
    connect_timeout: Duration,
}

impl<C, P> TokenCollector<C, P> {
    pub fn new(client_timeout: Duration, connect_timeout: Duration) -> Self {
        TokenCollector {
            pending_clients: Vec::new(),
            pending_connects: Vec::new(),
            client_timeout,
            connect_timeout,
        }
    }

    /// Registers a server half. If the matching client is already parked,
    /// both halves are consumed and handed back for the match callback.
    pub fn insert_connect(&mut self, token: Token, data: P) -> Result<(C, P), ()> {
        if let Some(idx) = self.pending_clients.iter().position(|p| p.token == token) {
            return Ok((self.pending_clients.remove(idx).data, data));
        }
        self.pending_connects.push(Pending {
            token,
            data,
            stamp: Instant::now(),
        });
        Err(())
    }

    /// Parks a client half without the awkward ownership dance of
    /// `insert_client`: the caller keeps nothing.
    pub fn park_client(&mut self, token: Token, data: C) {
        self.pending_clients.push(Pending {
            token,
            data,
            stamp: Instant::now(),
        });
    }

    /// Looks up and consumes a pending connect for `token` without adding
    /// a client entry on miss.
    pub fn take_connect(&mut self, token: &Token) -> Option<P> {
        self.pending_connects
            .iter()
            .position(|p| p.token == *token)
            .map(|idx| self.pending_connects.remove(idx).data)
    }

    /// Removes a parked client by predicate (e.g. its socket dropped).
    pub fn remove_client_where(&mut self, mut pred: impl FnMut(&C) -> bool) -> Option<C> {
        self.pending_clients
            .iter()
            .position(|p| pred(&p.data))
            .map(|idx| self.pending_clients.remove(idx).data)
    }

    /// Drops entries older than their side's timeout and returns them so
    /// the handler can reject the client or discard the snapshot.
    pub fn sweep(&mut self, now: Instant) -> (Vec<C>, Vec<P>) {
        let client_deadline = self.client_timeout;
        let connect_deadline = self.connect_timeout;

        let mut dead_clients = Vec::new();
        let mut i = 0;
        while i < self.pending_clients.len() {
            if now.duration_since(self.pending_clients[i].stamp) > client_deadline {
                dead_clients.push(self.pending_clients.remove(i).data);
            } else {
                i += 1;
            }
        }

        let mut dead_connects = Vec::new();
        let mut i = 0;
        while i < self.pending_connects.len() {
            if now.duration_since(self.pending_connects[i].stamp) > connect_deadline {
                dead_connects.push(self.pending_connects.remove(i).data);
            } else {
                i += 1;
            }
        }

        (dead_clients, dead_connects)
    }

    pub fn pending_client_count(&self) -> usize {
        self.pending_clients.len()
    }

    pub fn pending_connect_count(&self) -> usize {
        self.pending_connects.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_printable_and_distinct() {
        let a = Token::generate();
        let b = Token::generate();
        assert_ne!(a, b);
        assert!(a.as_bytes().iter().all(|&c| (1..127).contains(&c)));
    }

    #[test]
    fn connect_then_client_matches() {
        let mut collector: TokenCollector<u32, &str> =
            TokenCollector::new(Duration::from_secs(1), Duration::from_secs(5));
        let token = Token::generate();
        assert!(collector.insert_connect(token, "snapshot").is_err());
        assert_eq!(collector.take_connect(&token), Some("snapshot"));
        assert_eq!(collector.pending_connect_count(), 0);
    }

    #[test]
    fn client_then_connect_matches() {
        let mut collector: TokenCollector<u32, &str> =
            TokenCollector::new(Duration::from_secs(1), Duration::from_secs(5));
        let token = Token::generate();
        collector.park_client(token, 7);
        assert_eq!(collector.insert_connect(token, "snapshot"), Ok((7, "snapshot")));
        assert_eq!(collector.pending_client_count(), 0);
    }

    #[test]
    fn sweep_expires_per_side() {
        let mut collector: TokenCollector<u32, &str> =
            TokenCollector::new(Duration::from_millis(0), Duration::from_secs(60));
        collector.park_client(Token::generate(), 1);
        collector.insert_connect(Token::generate(), "keep").ok();
        std::thread::sleep(Duration::from_millis(2));
        let (clients, connects) = collector.sweep(Instant::now());
        assert_eq!(clients, vec![1]);
        assert!(connects.is_empty());
        assert_eq!(collector.pending_connect_count(), 1);
    }

    #[test]
    fn wrong_token_stays_parked() {
        let mut collector: TokenCollector<u32, &str> =
            TokenCollector::new(Duration::from_secs(1), Duration::from_secs(5));
        collector.park_client(Token::generate(), 3);
        assert!(collector.insert_connect(Token::generate(), "other").is_err());
        assert_eq!(collector.pending_client_count(), 1);
        assert_eq!(collector.pending_connect_count(), 1);
    }
}
