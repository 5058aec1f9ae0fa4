//! A listening endpoint that multiplexes one listener and all of its
//! accepted connections, speaking the framed wire protocol described in
//! `delay-proxy-codec`.

use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use delay_proxy_codec::encode;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use thiserror::Error;

use super::stream::{DrainOutcome, FramedStream};

const LISTENER_TOKEN: Token = Token(0);
const MULTIPLEX_TICK: Duration = Duration::from_millis(10);
const EVENT_CAPACITY: usize = 128;

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("failed to bind listener on port {port}: {source}")]
    Bind { port: u16, #[source] source: io::Error },
    #[error("failed to register with the OS poller: {0}")]
    Poll(#[source] io::Error),
}

/// A non-blocking TCP listener plus the set of connections it has accepted.
/// Never dials out: both the proxy's ingress and egress sides are
/// listen-only, so there is no reconnect/outbound machinery here.
pub struct FramedEndpoint {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    conns: Vec<(Token, FramedStream)>,
    next_token: usize,
    /// Frames decoded but not yet handed to the caller. `mio` is
    /// edge-triggered, so a single readiness notification is drained
    /// completely (see [`FramedStream::drain`]) and may yield more than
    /// one frame at once; this queue lets `accept_and_recv` still hand
    /// them out one per tick without losing the extras or waiting for a
    /// notification that will never come.
    ready_frames: VecDeque<Vec<u8>>,
}

impl FramedEndpoint {
    /// Binds to all interfaces on `port` with `SO_REUSEADDR` (mio sets this
    /// by default on Unix) and registers the listener for readability.
    pub fn open(port: u16) -> Result<Self, EndpointError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let mut listener =
            TcpListener::bind(addr).map_err(|source| EndpointError::Bind { port, source })?;
        let poll = Poll::new().map_err(EndpointError::Poll)?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
            .map_err(EndpointError::Poll)?;
        tracing::info!(port, "listening");
        Ok(Self {
            poll,
            events: Events::with_capacity(EVENT_CAPACITY),
            listener,
            conns: Vec::new(),
            next_token: LISTENER_TOKEN.0 + 1,
            ready_frames: VecDeque::new(),
        })
    }

    /// Runs one multiplex tick (bounded 10 ms wait): accepts any pending
    /// connections, fully drains every ready connection into the internal
    /// frame queue, then returns at most one frame from that queue. A
    /// connection that drops a malformed frame, or that has more than one
    /// frame queued up behind this tick's notification, stays registered
    /// and keeps yielding frames on this and later ticks until the queue
    /// it contributed to is empty.
    pub fn accept_and_recv(&mut self) -> Option<Vec<u8>> {
        match self.poll.poll(&mut self.events, Some(MULTIPLEX_TICK)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => tracing::error!(error = %e, "poll failed"),
        }

        let ready: Vec<Token> = self.events.iter().map(|event| event.token()).collect();

        for token in ready {
            if token == LISTENER_TOKEN {
                self.accept_pending();
                continue;
            }
            let Some(idx) = self.conns.iter().position(|(t, _)| *t == token) else {
                delay_proxy_utils::safe_panic!("poll event for untracked token {:?}", token);
                continue;
            };
            let outcome = self.conns[idx].1.drain(&mut self.ready_frames);
            if matches!(outcome, DrainOutcome::Disconnected) {
                let (_, stream) = self.conns.remove(idx);
                tracing::info!(peer = %stream.peer_addr(), "connection closed");
            }
        }

        self.ready_frames.pop_front()
    }

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer_addr)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    if let Err(e) =
                        self.poll.registry().register(&mut stream, token, Interest::READABLE)
                    {
                        tracing::error!(error = %e, "failed to register accepted connection");
                        continue;
                    }
                    tracing::info!(peer = %peer_addr, "accepted connection");
                    self.conns.push((token, FramedStream::new(stream, peer_addr)));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    /// Sends `payload` on a single connection. Returns `false` if the
    /// connection no longer exists (already removed) or was just torn down
    /// by a hard write error.
    pub fn send_frame(&mut self, token: Token, payload: &[u8]) -> bool {
        let Some(idx) = self.conns.iter().position(|(t, _)| *t == token) else {
            return false;
        };
        let alive = self.conns[idx].1.send_frame(payload);
        if !alive {
            let (_, stream) = self.conns.remove(idx);
            tracing::info!(peer = %stream.peer_addr(), "connection closed on write error");
        }
        alive
    }

    /// Sends `payload` on every currently connected client. This is how the
    /// consumer side fans a popped message out to all downstream
    /// listeners rather than picking just one. `payload` is encoded once
    /// and the resulting wire buffer is written to each connection, rather
    /// than re-running the codec per recipient.
    pub fn broadcast_frame(&mut self, payload: &[u8]) {
        let wire = match encode(payload) {
            Ok(wire) => wire,
            Err(e) => {
                tracing::warn!(error = %e, "refusing to broadcast frame");
                return;
            }
        };

        let mut dead = Vec::new();
        for (token, stream) in &mut self.conns {
            if !stream.write_wire(&wire) {
                dead.push(*token);
            }
        }
        for token in dead {
            if let Some(idx) = self.conns.iter().position(|(t, _)| *t == token) {
                let (_, stream) = self.conns.remove(idx);
                tracing::info!(peer = %stream.peer_addr(), "connection closed on write error");
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    /// Drops the listener and every accepted connection. OS-level errors on
    /// close are not surfaced; the sockets are gone either way.
    pub fn close(&mut self) {
        let closed = self.conns.len();
        self.conns.clear();
        self.ready_frames.clear();
        tracing::info!(closed_connections = closed, "endpoint closed");
    }
}
