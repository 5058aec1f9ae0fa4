//! Per-connection frame assembly over a non-blocking [`mio::net::TcpStream`].

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

use delay_proxy_codec::{crc16, encode, HEADER_SIZE};

/// Outcome of one [`FramedStream::drain`] call: whether the connection is
/// still alive afterward. Decoded frames aren't returned directly; they're
/// pushed onto the caller-supplied queue as each one completes.
pub(crate) enum DrainOutcome {
    Alive,
    Disconnected,
}

enum RxState {
    Header {
        buf: [u8; HEADER_SIZE],
        have: usize,
    },
    Body {
        header: [u8; HEADER_SIZE],
        buf: Vec<u8>,
        have: usize,
    },
}

impl RxState {
    fn fresh_header() -> Self {
        RxState::Header {
            buf: [0u8; HEADER_SIZE],
            have: 0,
        }
    }
}

pub(crate) struct FramedStream {
    stream: mio::net::TcpStream,
    peer_addr: SocketAddr,
    rx_state: RxState,
}

impl FramedStream {
    pub(crate) fn new(stream: mio::net::TcpStream, peer_addr: SocketAddr) -> Self {
        Self {
            stream,
            peer_addr,
            rx_state: RxState::fresh_header(),
        }
    }

    pub(crate) fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Drains every byte currently available on the socket, decoding as
    /// many complete frames as are found and pushing each onto `out` in the
    /// order it completed.
    ///
    /// `mio` registers sockets edge-triggered: a readiness notification
    /// only fires once per arrival of new bytes. Stopping after the first
    /// decoded frame would leave any further frames already buffered
    /// behind that one notification (e.g. two frames coalesced into a
    /// single TCP segment) stranded until more bytes happen to arrive,
    /// which might be never. Looping until the socket reports `WouldBlock`
    /// (or disconnects) guarantees nothing sitting behind this
    /// notification is left unread. Malformed frames (bad length, bad CRC)
    /// are logged and skipped without interrupting the drain, so one
    /// notification can still yield every good frame behind a corrupt one.
    pub(crate) fn drain(&mut self, out: &mut VecDeque<Vec<u8>>) -> DrainOutcome {
        loop {
            match &mut self.rx_state {
                RxState::Header { buf, have } => match self.stream.read(&mut buf[*have..]) {
                    Ok(0) => return DrainOutcome::Disconnected,
                    Ok(n) => {
                        *have += n;
                        if *have < HEADER_SIZE {
                            continue;
                        }
                        let header = *buf;
                        let length = u32::from_be_bytes(header);
                        if !(3..=1024).contains(&length) {
                            tracing::warn!(
                                peer = %self.peer_addr,
                                length,
                                "dropping frame: length outside 3..=1024"
                            );
                            self.rx_state = RxState::fresh_header();
                            continue;
                        }
                        self.rx_state = RxState::Body {
                            header,
                            buf: vec![0u8; length as usize],
                            have: 0,
                        };
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return DrainOutcome::Alive,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::error!(peer = %self.peer_addr, error = %e, "socket error reading frame header");
                        return DrainOutcome::Disconnected;
                    }
                },
                RxState::Body { header, buf, have } => match self.stream.read(&mut buf[*have..]) {
                    Ok(0) => return DrainOutcome::Disconnected,
                    Ok(n) => {
                        *have += n;
                        if *have < buf.len() {
                            continue;
                        }
                        let body_len = buf.len() - 2;
                        let (body, crc_bytes) = buf.split_at(body_len);
                        let expected = u16::from_be_bytes([crc_bytes[0], crc_bytes[1]]);
                        let got = crc16(body, Some(crc16(header, None)));
                        if got != expected {
                            tracing::warn!(
                                peer = %self.peer_addr,
                                expected,
                                got,
                                "dropping frame: crc mismatch"
                            );
                            self.rx_state = RxState::fresh_header();
                            continue;
                        }
                        out.push_back(body.to_vec());
                        self.rx_state = RxState::fresh_header();
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return DrainOutcome::Alive,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::error!(peer = %self.peer_addr, error = %e, "socket error reading frame body");
                        return DrainOutcome::Disconnected;
                    }
                },
            }
        }
    }

    /// Writes an already-encoded wire buffer to this connection in a
    /// single best-effort attempt. Partial writes, and a write that would
    /// block entirely, are logged and dropped rather than queued for retry
    /// (see the endpoint's `send_frame`/`broadcast_frame` docs). Returns
    /// `false` only when the socket itself reports a hard error, meaning
    /// the connection should be torn down.
    pub(crate) fn write_wire(&mut self, wire: &[u8]) -> bool {
        match self.stream.write(wire) {
            Ok(n) if n == wire.len() => true,
            Ok(n) => {
                tracing::warn!(peer = %self.peer_addr, sent = n, total = wire.len(), "partial frame write");
                true
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                tracing::warn!(peer = %self.peer_addr, "frame write would block, dropping");
                true
            }
            Err(e) => {
                tracing::error!(peer = %self.peer_addr, error = %e, "socket error writing frame");
                false
            }
        }
    }

    /// Encodes `payload` and writes it to this connection.
    pub(crate) fn send_frame(&mut self, payload: &[u8]) -> bool {
        match encode(payload) {
            Ok(wire) => self.write_wire(&wire),
            Err(e) => {
                tracing::warn!(peer = %self.peer_addr, error = %e, "refusing to send frame");
                true
            }
        }
    }
}
