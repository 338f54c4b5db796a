//! # Socket Backend
//!
//! A [`TcpStack`] on top of non-blocking `std::net` sockets.
//!
//! The operating system does the actual TCP work. This backend adds the
//! behavior an embedded stack exposes to its user: handles, armed hooks, a
//! per-connection receive window that is only reopened through
//! [`TcpStack::recved`], and a bounded outbound buffer.
//!
//! ## Example Usage
//!
//! ```ignore
//! use pollnet_stack::net::{NetConfig, NetStack};
//! use pollnet_server::server::{Config, TcpServer};
//!
//! let stack = NetStack::new(NetConfig::default());
//! let mut server = TcpServer::new(stack, Config::default());
//! server.listen(4242);
//! ```
use std::{
    collections::{BTreeMap, VecDeque},
    io::{self, ErrorKind, Read, Write},
    net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream},
    time::{Duration, Instant},
};

use bytes::Bytes;

use crate::{Hooks, Payload, Pcb, StackError, StackEvent, TcpStack};

/// Length of one coarse timer tick. Idle poll intervals are counted in ticks.
pub const TICK: Duration = Duration::from_millis(500);

const TCP_MSS: u16 = 1460;

#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Local address listeners are bound to
    pub bind_addr: IpAddr,
    /// Receive window advertised for each connection
    pub receive_window: u16,
    /// Capacity of the outbound buffer of each connection
    pub send_buffer: u16,
    /// Upper bound for flushing pending outbound data on a graceful close
    pub close_timeout: Duration,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            receive_window: 8 * TCP_MSS,
            send_buffer: 8 * TCP_MSS,
            close_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
enum Entry {
    Fresh { listener: Option<TcpListener> },
    Listening(Listening),
    Connected(Connection),
}

#[derive(Debug)]
struct Listening {
    listener: TcpListener,
    backlog: u8,
    /// Handshakes queued as events but not yet taken by the user
    pending: u8,
    hooks: Hooks,
}

#[derive(Debug)]
struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    hooks: Hooks,
    /// Remaining receive window
    window: u16,
    outbound: VecDeque<u8>,
    peer_closed: bool,
    last_poll: Instant,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr, window: u16) -> Connection {
        Connection {
            stream,
            peer,
            hooks: Hooks::NONE,
            window,
            outbound: VecDeque::new(),
            peer_closed: false,
            last_poll: Instant::now(),
        }
    }

    /// Flush everything still queued and shut down the write side.
    fn close(&mut self, timeout: Duration) -> io::Result<()> {
        self.stream.set_nonblocking(false)?;
        self.stream.set_write_timeout(Some(timeout))?;
        let (front, back) = self.outbound.as_slices();
        self.stream.write_all(front)?;
        self.stream.write_all(back)?;
        self.outbound.clear();
        match self.stream.shutdown(Shutdown::Write) {
            Err(e) if e.kind() != ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

/// Stack backed by operating system sockets.
#[derive(Debug)]
pub struct NetStack {
    config: NetConfig,
    entries: BTreeMap<Pcb, Entry>,
    next_id: u32,
    events: VecDeque<StackEvent>,
    scratch: Box<[u8]>,
}

impl NetStack {
    pub fn new(config: NetConfig) -> NetStack {
        let scratch = vec![0; usize::from(config.receive_window)].into_boxed_slice();
        NetStack {
            config,
            entries: BTreeMap::new(),
            next_id: 1,
            events: VecDeque::new(),
            scratch,
        }
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// The remote address of a connected handle
    pub fn peer_addr(&self, pcb: Pcb) -> Option<SocketAddr> {
        match self.entries.get(&pcb) {
            Some(Entry::Connected(conn)) => Some(conn.peer),
            _ => None,
        }
    }

    fn allocate(&mut self, entry: Entry) -> Pcb {
        let pcb = Pcb::from_raw(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.entries.insert(pcb, entry);
        pcb
    }

    /// Drop queued events for `pcb` that `hooks` does not want.
    ///
    /// Handshakes that are dropped this way release the new connection.
    fn purge_events(&mut self, pcb: Pcb, hooks: Hooks) {
        let events = std::mem::take(&mut self.events);
        for event in events {
            if event.pcb() != pcb || hooks.wants(&event) {
                self.events.push_back(event);
            } else if let StackEvent::Accepted {
                result: Ok(conn), ..
            } = event
            {
                log::debug!("Dropping unclaimed connection {}", conn);
                self.entries.remove(&conn);
            }
        }
    }

    fn forget(&mut self, pcb: Pcb) {
        self.entries.remove(&pcb);
        self.purge_events(pcb, Hooks::NONE);
    }

    fn poll_listener(&mut self, pcb: Pcb) {
        let window = self.config.receive_window;
        let Some(Entry::Listening(listening)) = self.entries.get_mut(&pcb) else {
            return;
        };
        if !listening.hooks.accept || listening.pending >= listening.backlog {
            return;
        }
        let accepted = match listening.listener.accept() {
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                return;
            }
            other => other,
        };
        listening.pending += 1;

        let result = accepted.and_then(|(stream, peer)| {
            stream.set_nonblocking(true)?;
            stream.set_nodelay(true)?;
            Ok((stream, peer))
        });
        let result = match result {
            Ok((stream, peer)) => {
                let conn = self.allocate(Entry::Connected(Connection::new(stream, peer, window)));
                log::debug!("Listener {} accepted {} from {}", pcb, conn, peer);
                Ok(conn)
            }
            Err(e) => {
                log::warn!("Listener {} failed to accept: {}", pcb, e);
                Err(StackError::from(e))
            }
        };
        self.events.push_back(StackEvent::Accepted {
            listener: pcb,
            result,
        });
    }

    fn poll_connection(&mut self, pcb: Pcb) {
        let Some(Entry::Connected(conn)) = self.entries.get_mut(&pcb) else {
            return;
        };
        let mut failure: Option<StackError> = None;

        while !conn.outbound.is_empty() {
            let (front, _) = conn.outbound.as_slices();
            match conn.stream.write(front) {
                Ok(0) => {
                    failure = Some(io::Error::from(ErrorKind::WriteZero).into());
                    break;
                }
                Ok(n) => {
                    conn.outbound.drain(..n);
                    log::trace!("{} flushed {} bytes", pcb, n);
                    if conn.hooks.sent {
                        self.events.push_back(StackEvent::Sent {
                            pcb,
                            len: n as u16,
                        });
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    failure = Some(e.into());
                    break;
                }
            }
        }

        if failure.is_none() && conn.hooks.recv && !conn.peer_closed && conn.window > 0 {
            let limit = usize::from(conn.window).min(self.scratch.len());
            match conn.stream.read(&mut self.scratch[..limit]) {
                Ok(0) => {
                    log::debug!("{}: peer closed its write side", pcb);
                    conn.peer_closed = true;
                    self.events
                        .push_back(StackEvent::Received { pcb, payload: None });
                }
                Ok(n) => {
                    conn.window -= n as u16;
                    log::trace!("{} read {} bytes, window now {}", pcb, n, conn.window);
                    let payload = Payload::from(Bytes::copy_from_slice(&self.scratch[..n]));
                    self.events.push_back(StackEvent::Received {
                        pcb,
                        payload: Some(payload),
                    });
                }
                Err(e)
                    if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {}
                Err(e) => failure = Some(e.into()),
            }
        }

        if failure.is_none()
            && let Some(ticks) = conn.hooks.poll_interval
            && ticks > 0
            && conn.last_poll.elapsed() >= TICK * u32::from(ticks)
        {
            conn.last_poll = Instant::now();
            self.events.push_back(StackEvent::Poll { pcb });
        }

        if let Some(error) = failure {
            let hooks = conn.hooks;
            log::warn!("{} failed: {}", pcb, error);
            self.entries.remove(&pcb);
            if hooks.err {
                self.events.push_back(StackEvent::Error { pcb, error });
            }
        }
    }
}

impl TcpStack for NetStack {
    fn receive_window(&self) -> u16 {
        self.config.receive_window
    }

    fn new_pcb(&mut self) -> Result<Pcb, StackError> {
        Ok(self.allocate(Entry::Fresh { listener: None }))
    }

    fn bind(&mut self, pcb: Pcb, port: u16) -> Result<(), StackError> {
        let addr = SocketAddr::new(self.config.bind_addr, port);
        match self.entries.get_mut(&pcb) {
            Some(Entry::Fresh { listener }) if listener.is_none() => {
                *listener = Some(TcpListener::bind(addr)?);
                log::debug!("{} bound to {}", pcb, addr);
                Ok(())
            }
            _ => Err(StackError::Argument),
        }
    }

    fn listen(&mut self, pcb: Pcb, backlog: u8) -> Result<Pcb, StackError> {
        if backlog == 0 {
            return Err(StackError::Argument);
        }
        match self.entries.remove(&pcb) {
            Some(Entry::Fresh {
                listener: Some(listener),
            }) => {
                if let Err(e) = listener.set_nonblocking(true) {
                    self.entries.insert(
                        pcb,
                        Entry::Fresh {
                            listener: Some(listener),
                        },
                    );
                    return Err(e.into());
                }
                Ok(self.allocate(Entry::Listening(Listening {
                    listener,
                    backlog,
                    pending: 0,
                    hooks: Hooks::NONE,
                })))
            }
            Some(other) => {
                self.entries.insert(pcb, other);
                Err(StackError::Connection)
            }
            None => Err(StackError::Argument),
        }
    }

    fn local_port(&self, pcb: Pcb) -> Option<u16> {
        let addr = match self.entries.get(&pcb)? {
            Entry::Fresh { listener } => listener.as_ref()?.local_addr(),
            Entry::Listening(listening) => listening.listener.local_addr(),
            Entry::Connected(conn) => conn.stream.local_addr(),
        };
        addr.ok().map(|addr| addr.port())
    }

    fn set_hooks(&mut self, pcb: Pcb, hooks: Hooks) {
        match self.entries.get_mut(&pcb) {
            Some(Entry::Listening(listening)) => {
                listening.hooks = hooks;
                if !hooks.accept {
                    listening.pending = 0;
                }
            }
            Some(Entry::Connected(conn)) => {
                conn.hooks = hooks;
                conn.last_poll = Instant::now();
            }
            _ => return,
        }
        self.purge_events(pcb, hooks);
    }

    fn send_buffer(&self, pcb: Pcb) -> u16 {
        match self.entries.get(&pcb) {
            Some(Entry::Connected(conn)) => self
                .config
                .send_buffer
                .saturating_sub(conn.outbound.len() as u16),
            _ => 0,
        }
    }

    fn write(&mut self, pcb: Pcb, data: &[u8]) -> Result<(), StackError> {
        let free = self.send_buffer(pcb);
        match self.entries.get_mut(&pcb) {
            Some(Entry::Connected(conn)) => {
                if data.len() > usize::from(free) {
                    return Err(StackError::OutOfMemory);
                }
                conn.outbound.extend(data);
                Ok(())
            }
            _ => Err(StackError::Connection),
        }
    }

    fn recved(&mut self, pcb: Pcb, len: u16) {
        if let Some(Entry::Connected(conn)) = self.entries.get_mut(&pcb) {
            conn.window = conn
                .window
                .saturating_add(len)
                .min(self.config.receive_window);
        }
    }

    fn close(&mut self, pcb: Pcb) -> Result<(), StackError> {
        match self.entries.get_mut(&pcb) {
            None => return Err(StackError::Argument),
            Some(Entry::Connected(conn)) => conn.close(self.config.close_timeout)?,
            Some(_) => {}
        }
        log::debug!("{} closed", pcb);
        self.forget(pcb);
        Ok(())
    }

    fn abort(&mut self, pcb: Pcb) {
        if let Some(Entry::Connected(conn)) = self.entries.get(&pcb) {
            let _ = conn.stream.shutdown(Shutdown::Both);
        }
        log::debug!("{} aborted", pcb);
        self.forget(pcb);
    }

    fn poll(&mut self) {
        let handles: Vec<Pcb> = self.entries.keys().copied().collect();
        for pcb in handles {
            match self.entries.get(&pcb) {
                Some(Entry::Listening(_)) => self.poll_listener(pcb),
                Some(Entry::Connected(_)) => self.poll_connection(pcb),
                _ => {}
            }
        }
    }

    fn next_event(&mut self) -> Option<StackEvent> {
        let event = self.events.pop_front()?;
        if let StackEvent::Accepted { listener, .. } = &event
            && let Some(Entry::Listening(listening)) = self.entries.get_mut(listener)
        {
            listening.pending = listening.pending.saturating_sub(1);
        }
        Some(event)
    }
}
