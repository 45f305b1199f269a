//! Non-blocking framed TCP connections.
//!
//! Frames are a 16-bit big-endian length followed by the message bytes
//! (message id + payload). The stream is reliable and ordered, which is all
//! the message layer asks of its transport.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use crate::net::MessageOut;

const MAX_FRAME_LEN: usize = 64 * 1024;

/// A non-blocking accept loop wrapper.
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    pub fn bind(addr: &str) -> std::io::Result<Listener> {
        let inner = TcpListener::bind(addr)?;
        inner.set_nonblocking(true)?;
        Ok(Listener { inner })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Accepts one pending connection, if any.
    pub fn accept(&self) -> Option<Connection> {
        match self.inner.accept() {
            Ok((stream, peer)) => match Connection::from_stream(stream, peer) {
                Ok(conn) => Some(conn),
                Err(e) => {
                    log::warn!("Failed to configure accepted socket: {}", e);
                    None
                }
            },
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => None,
            Err(e) => {
                log::warn!("accept() failed: {}", e);
                None
            }
        }
    }
}

/// One framed peer connection with buffered input and output.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    inbuf: Vec<u8>,
    outbuf: VecDeque<u8>,
    closed: bool,
}

impl Connection {
    pub fn connect(addr: impl ToSocketAddrs) -> std::io::Result<Connection> {
        let stream = TcpStream::connect(addr)?;
        let peer = stream.peer_addr()?;
        Connection::from_stream(stream, peer)
    }

    fn from_stream(stream: TcpStream, peer: SocketAddr) -> std::io::Result<Connection> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Connection {
            stream,
            peer,
            inbuf: Vec::new(),
            outbuf: VecDeque::new(),
            closed: false,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Queues a message for delivery. Actual writes happen in `flush`.
    pub fn send(&mut self, msg: &MessageOut) {
        let bytes = msg.as_bytes();
        let len = bytes.len() as u16;
        self.outbuf.extend(len.to_be_bytes());
        self.outbuf.extend(bytes.iter());
    }

    /// Reads whatever the socket has and returns the complete frames.
    /// A zero-length read or a hard error marks the connection closed;
    /// already-buffered frames are still returned so "deliver before
    /// close" messages are not lost.
    pub fn receive(&mut self) -> Vec<Vec<u8>> {
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.closed = true;
                    break;
                }
                Ok(n) => self.inbuf.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.closed = true;
                    break;
                }
            }
        }

        let mut frames = Vec::new();
        let mut start = 0usize;
        while self.inbuf.len() - start >= 2 {
            let len =
                u16::from_be_bytes([self.inbuf[start], self.inbuf[start + 1]]) as usize;
            if len > MAX_FRAME_LEN {
                log::warn!("Oversized frame ({} bytes) from {}", len, self.peer);
                self.closed = true;
                break;
            }
            if self.inbuf.len() - start - 2 < len {
                break;
            }
            frames.push(self.inbuf[start + 2..start + 2 + len].to_vec());
            start += 2 + len;
        }
        self.inbuf.drain(..start);
        frames
    }

    /// Writes as much of the output buffer as the socket accepts.
    pub fn flush(&mut self) {
        while !self.outbuf.is_empty() {
            let (head, _) = self.outbuf.as_slices();
            match self.stream.write(head) {
                Ok(0) => {
                    self.closed = true;
                    return;
                }
                Ok(n) => {
                    self.outbuf.drain(..n);
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.closed = true;
                    return;
                }
            }
        }
    }

    /// Final flush then shutdown, used for "deliver before close".
    pub fn close(&mut self) {
        self.flush();
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_round_trip_over_loopback() {
        let listener = Listener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = Connection::connect(addr).unwrap();

        let mut server = loop {
            if let Some(conn) = listener.accept() {
                break conn;
            }
        };

        let mut msg = MessageOut::new(0x0042);
        msg.write_string("ping");
        client.send(&msg);
        client.flush();

        let mut frames = Vec::new();
        for _ in 0..100 {
            frames = server.receive();
            if !frames.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(frames.len(), 1);
        let mut input = crate::net::MessageIn::new(&frames[0]).unwrap();
        assert_eq!(input.id(), 0x0042);
        assert_eq!(input.read_string(), "ping");
    }
}
