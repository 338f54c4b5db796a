use std::{thread, time::Duration};

use pollnet_stack::{EventHandler, Hooks, Payload, Pcb, StackError, TcpStack, dispatch};

use crate::{ring::RingBuffer, state::ConnectionState};

/// Number of pending handshakes the listening endpoint holds.
pub const BACKLOG: u8 = 1;

const POLL_TIME_S: u8 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    /// How long `accept()` sleeps between two cooperative yields to the stack.
    pub poll_interval: Duration,
    /// Idle poll period of a connection, in coarse stack ticks.
    pub idle_poll_ticks: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            idle_poll_ticks: POLL_TIME_S * 2,
        }
    }
}

/// Byte counters of the current connection.
///
/// Reset whenever a new connection is accepted.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Stats {
    /// Bytes the stack delivered into the ring buffer
    pub delivered: u64,
    /// Bytes handed back to the stack as reopened receive window
    pub acknowledged: u64,
    /// Bytes accepted by the stack through `send()`
    pub submitted: u64,
    /// Bytes the peer confirmed as received
    pub confirmed: u64,
}

/// Builder to create a [TcpServer] instance and modify configuration options
///
/// # Example
///
/// ```ignore
/// use pollnet_server::server::Builder;
/// use std::time::Duration;
///
/// let server = Builder::new()
///     .poll_interval(Duration::from_millis(2))
///     .idle_poll_ticks(4)
///     .build(my_stack);
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Set the sleep between two yields while waiting for a connection.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the idle poll period of connections, in stack ticks.
    pub fn idle_poll_ticks(mut self, ticks: u8) -> Self {
        self.config.idle_poll_ticks = ticks;
        self
    }

    /// Build and return the server
    pub fn build<S: TcpStack>(self, stack: S) -> TcpServer<S> {
        TcpServer::new(stack, self.config)
    }
}

/// A single-connection TCP server on top of an event-driven [`TcpStack`].
///
/// Inbound data is buffered in a [`RingBuffer`] as large as the stack's
/// receive window. Consumed bytes are acknowledged to the stack only when the
/// caller takes them out with [`TcpServer::receive`], which keeps the peer
/// from sending more than fits. Outbound data is not buffered: [`TcpServer::send`]
/// hands over as much as the stack accepts and the caller retries the rest.
#[derive(Debug)]
pub struct TcpServer<S: TcpStack> {
    stack: S,
    config: Config,
    state: ConnectionState,
    listener: Option<Pcb>,
    connection: Option<Pcb>,
    ring: RingBuffer,
    stats: Stats,
}

impl<S: TcpStack> TcpServer<S> {
    pub fn new(stack: S, config: Config) -> TcpServer<S> {
        let ring = RingBuffer::with_capacity(usize::from(stack.receive_window()).max(1));
        TcpServer {
            stack,
            config,
            state: ConnectionState::Closed,
            listener: None,
            connection: None,
            ring,
            stats: Stats::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }

    /// The port the listening endpoint is bound to
    pub fn local_port(&self) -> Option<u16> {
        self.stack.local_port(self.listener?)
    }

    /// Start listening for a single connection on `port`.
    ///
    /// Returns `false` if the server is not closed or the stack fails to
    /// allocate, bind or listen. Partially allocated resources are released.
    pub fn listen(&mut self, port: u16) -> bool {
        if self.state != ConnectionState::Closed {
            log::warn!("Cannot listen on port {}: server is {}", port, self.state);
            return false;
        }

        let pcb = match self.stack.new_pcb() {
            Ok(pcb) => pcb,
            Err(e) => {
                log::error!("Failed to allocate connection object: {}", e);
                return false;
            }
        };

        if let Err(e) = self.stack.bind(pcb, port) {
            log::error!("Failed to bind port {}: {}", port, e);
            self.release(pcb);
            return false;
        }

        let listener = match self.stack.listen(pcb, BACKLOG) {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("Failed to listen on port {}: {}", port, e);
                self.release(pcb);
                return false;
            }
        };

        self.stack.set_hooks(listener, Hooks::listener());
        self.listener = Some(listener);
        self.state = ConnectionState::Listening;
        log::info!("Server listening on port {}", port);
        true
    }

    /// Block until a peer connects.
    ///
    /// Yields to the stack once per iteration while listening. Returns `true`
    /// once a connection is open and `false` if the handshake failed. There is
    /// no timeout.
    pub fn accept(&mut self) -> bool {
        while self.state == ConnectionState::Listening {
            self.poll();
            if self.state != ConnectionState::Listening {
                break;
            }
            thread::sleep(self.config.poll_interval);
        }
        self.state == ConnectionState::Open
    }

    /// Copy up to `dest.len()` buffered bytes into `dest`.
    ///
    /// Every copied segment is acknowledged to the stack right after it was
    /// copied. Once the peer has closed and the buffer runs empty, the
    /// connection is torn down. Returns the number of bytes copied, which may
    /// be zero.
    pub fn receive(&mut self, dest: &mut [u8]) -> u16 {
        self.poll();

        let max = dest.len().min(usize::from(u16::MAX));
        let connection = self.connection;
        let stack = &mut self.stack;
        let stats = &mut self.stats;
        let transferred = self.ring.read_with(&mut dest[..max], |consumed| {
            if let Some(pcb) = connection {
                stack.recved(pcb, consumed as u16);
                stats.acknowledged += consumed as u64;
            }
        });
        if transferred > 0 {
            log::trace!(
                "Received {} bytes, {} still buffered",
                transferred,
                self.ring.len()
            );
        }

        if self.state == ConnectionState::Closing && self.ring.is_empty() {
            log::debug!("Receive buffer drained after peer close");
            self.close();
        }
        transferred as u16
    }

    /// Hand up to `src.len()` bytes to the stack.
    ///
    /// Returns how many bytes the stack took. Zero means the stack has no room
    /// right now and the caller should retry later.
    pub fn send(&mut self, src: &[u8]) -> u16 {
        self.poll();

        let Some(pcb) = self.connection else {
            log::debug!("Cannot send while {}", self.state);
            return 0;
        };
        let available = self.stack.send_buffer(pcb);
        let transfer = usize::from(available).min(src.len());
        if transfer == 0 {
            return 0;
        }
        match self.stack.write(pcb, &src[..transfer]) {
            Ok(()) => {
                self.stats.submitted += transfer as u64;
                log::trace!("Submitted {} bytes", transfer);
                transfer as u16
            }
            Err(e) => {
                log::debug!("Stack rejected {} bytes ({}), try again", transfer, e);
                0
            }
        }
    }

    /// Close the connection and the listening endpoint.
    ///
    /// Hooks are unregistered before anything is closed. A connection that
    /// cannot be closed gracefully is aborted. The server is closed afterwards
    /// in any case. Returns `true` if something was closed and every close was
    /// graceful.
    pub fn close(&mut self) -> bool {
        let mut closed_any = false;
        let mut graceful = true;

        if let Some(pcb) = self.connection.take() {
            closed_any = true;
            self.stack.clear_hooks(pcb);
            if let Err(e) = self.stack.close(pcb) {
                log::warn!("Graceful close failed ({}), aborting connection", e);
                self.stack.abort(pcb);
                graceful = false;
            }
            log::info!("Connection closed");
        }

        if let Some(listener) = self.listener.take() {
            closed_any = true;
            self.stack.clear_hooks(listener);
            graceful &= self.release(listener);
        }

        self.state = ConnectionState::Closed;
        closed_any && graceful
    }

    /// Let the stack make progress and handle all events it produced.
    pub fn poll(&mut self) {
        self.stack.poll();
        while let Some(event) = self.stack.next_event() {
            dispatch(event, self);
        }
    }

    /// Close `pcb`, aborting it if that fails. Returns whether the close was graceful.
    fn release(&mut self, pcb: Pcb) -> bool {
        match self.stack.close(pcb) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("Failed to close {} ({}), aborting", pcb, e);
                self.stack.abort(pcb);
                false
            }
        }
    }
}

impl<S: TcpStack> EventHandler for TcpServer<S> {
    fn on_accept(&mut self, listener: Pcb, result: Result<Pcb, StackError>) {
        if self.listener != Some(listener) {
            log::debug!("Ignoring handshake on stale listener {}", listener);
            if let Ok(pcb) = result {
                self.stack.abort(pcb);
            }
            return;
        }

        if self.state != ConnectionState::Listening {
            match result {
                Ok(pcb) => {
                    log::warn!("Rejecting {}: already serving a connection", pcb);
                    self.stack.abort(pcb);
                }
                Err(e) => log::debug!("Ignoring failed handshake while {}: {}", self.state, e),
            }
            return;
        }

        let pcb = match result {
            Ok(pcb) => pcb,
            Err(e) => {
                log::warn!("Failed to accept connection: {}", e);
                self.close();
                return;
            }
        };

        self.ring.reset();
        self.stats = Stats::default();
        self.connection = Some(pcb);
        self.stack
            .set_hooks(pcb, Hooks::connection(self.config.idle_poll_ticks));
        self.state = ConnectionState::Open;
        log::info!("Connection accepted");
    }

    fn on_recv(&mut self, pcb: Pcb, payload: Option<Payload>) {
        if self.connection != Some(pcb) {
            log::debug!("Ignoring data for stale {}", pcb);
            return;
        }

        let Some(payload) = payload else {
            log::debug!("Peer closed the connection");
            self.state = ConnectionState::Closing;
            return;
        };

        let len = payload.len();
        let stored = self.ring.write_with(len, |segment, offset| {
            payload.copy_partial(segment, offset);
        });
        match stored {
            Ok(()) => {
                self.stats.delivered += len as u64;
                log::trace!("Buffered {} bytes, {} stored", len, self.ring.len());
            }
            Err(overflow) => {
                log::error!(
                    "Insufficient space to store received data ({} stored): {}",
                    self.ring.len(),
                    overflow
                );
                self.close();
            }
        }
    }

    fn on_sent(&mut self, pcb: Pcb, len: u16) {
        if self.connection != Some(pcb) {
            log::debug!("Ignoring confirmation for stale {}", pcb);
            return;
        }
        self.stats.confirmed += u64::from(len);
        log::trace!("Peer confirmed {} bytes", len);
    }

    fn on_poll(&mut self, pcb: Pcb) {
        log::trace!("{} idle", pcb);
    }

    fn on_err(&mut self, pcb: Pcb, error: StackError) {
        // The stack has already released the handle.
        if self.connection == Some(pcb) {
            self.connection = None;
        } else if self.listener == Some(pcb) {
            self.listener = None;
        } else {
            log::debug!("Ignoring error on stale {}: {}", pcb, error);
            return;
        }
        log::warn!("Connection error on {}: {}", pcb, error);
        self.close();
    }
}

impl<S: TcpStack> Drop for TcpServer<S> {
    fn drop(&mut self) {
        self.close();
    }
}
