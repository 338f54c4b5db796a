use std::fmt::Display;

use crate::{error::StackError, payload::Payload};

/// Opaque handle to a transport object owned by the stack.
///
/// A handle is only meaningful to the stack that issued it. Once a handle was
/// closed, aborted or reported through [`StackEvent::Error`] it must not be
/// used again.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Pcb(u32);

impl Pcb {
    pub const fn from_raw(raw: u32) -> Pcb {
        Pcb(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl Display for Pcb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pcb#{}", self.0)
    }
}

/// The set of event hooks armed for a handle.
///
/// A stack only produces events for armed hooks. Disarming a hook drops any
/// event of that kind still queued for the handle.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Hooks {
    pub accept: bool,
    pub recv: bool,
    pub sent: bool,
    /// Idle poll period in coarse timer ticks. `None` disables idle polling.
    pub poll_interval: Option<u8>,
    pub err: bool,
}

impl Hooks {
    /// No hooks armed. Setting this unregisters a handle entirely.
    pub const NONE: Hooks = Hooks {
        accept: false,
        recv: false,
        sent: false,
        poll_interval: None,
        err: false,
    };

    /// Hooks for a passive listening endpoint.
    pub const fn listener() -> Hooks {
        Hooks {
            accept: true,
            ..Hooks::NONE
        }
    }

    /// Hooks for an established connection, with idle polling every
    /// `poll_interval` ticks.
    pub const fn connection(poll_interval: u8) -> Hooks {
        Hooks {
            accept: false,
            recv: true,
            sent: true,
            poll_interval: Some(poll_interval),
            err: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Hooks::NONE
    }

    /// Whether this hook set wants to see `event`.
    pub fn wants(&self, event: &StackEvent) -> bool {
        match event {
            StackEvent::Accepted { .. } => self.accept,
            StackEvent::Received { .. } => self.recv,
            StackEvent::Sent { .. } => self.sent,
            StackEvent::Poll { .. } => self.poll_interval.is_some(),
            StackEvent::Error { .. } => self.err,
        }
    }
}

/// A notification queued by the stack for one of the armed hooks.
#[derive(Debug)]
pub enum StackEvent {
    /// A listening endpoint finished (or failed) a handshake.
    Accepted {
        listener: Pcb,
        result: Result<Pcb, StackError>,
    },
    /// Inbound data arrived. `None` signals that the peer closed its write side.
    Received { pcb: Pcb, payload: Option<Payload> },
    /// The peer acknowledged `len` bytes of outbound data.
    Sent { pcb: Pcb, len: u16 },
    /// The connection was idle for its poll interval.
    Poll { pcb: Pcb },
    /// The connection failed. The stack has already released the handle.
    Error { pcb: Pcb, error: StackError },
}

impl StackEvent {
    /// The handle the event is addressed to
    pub fn pcb(&self) -> Pcb {
        match self {
            StackEvent::Accepted { listener, .. } => *listener,
            StackEvent::Received { pcb, .. }
            | StackEvent::Sent { pcb, .. }
            | StackEvent::Poll { pcb }
            | StackEvent::Error { pcb, .. } => *pcb,
        }
    }
}

/// The asynchronous, callback-driven network stack underneath a server.
///
/// Implementations own every transport object and hand out [`Pcb`] handles.
/// Nothing happens on the network until [`TcpStack::poll`] is called; events
/// produced by a poll are collected with [`TcpStack::next_event`] and routed to
/// an [`EventHandler`] with [`dispatch`].
pub trait TcpStack {
    /// The receive window advertised for every connection, in bytes.
    ///
    /// The stack never delivers more unacknowledged data than this.
    fn receive_window(&self) -> u16;

    /// Allocate a fresh, unbound transport object.
    fn new_pcb(&mut self) -> Result<Pcb, StackError>;

    /// Bind an unbound transport object to a local port.
    fn bind(&mut self, pcb: Pcb, port: u16) -> Result<(), StackError>;

    /// Turn a bound transport object into a listening endpoint holding at most
    /// `backlog` pending handshakes.
    ///
    /// On success `pcb` is consumed and the listening handle is returned. On
    /// failure `pcb` stays allocated and the caller has to release it.
    fn listen(&mut self, pcb: Pcb, backlog: u8) -> Result<Pcb, StackError>;

    /// The local port of a bound, listening or connected handle
    fn local_port(&self, pcb: Pcb) -> Option<u16>;

    /// Arm the given hooks for a handle, replacing the previous set.
    fn set_hooks(&mut self, pcb: Pcb, hooks: Hooks);

    /// Disarm all hooks of a handle.
    fn clear_hooks(&mut self, pcb: Pcb) {
        self.set_hooks(pcb, Hooks::NONE);
    }

    /// Space currently available in the outbound buffer of a connection.
    fn send_buffer(&self, pcb: Pcb) -> u16;

    /// Copy `data` into the outbound buffer of a connection.
    ///
    /// Fails without side effects if the data does not fit right now.
    fn write(&mut self, pcb: Pcb, data: &[u8]) -> Result<(), StackError>;

    /// Tell the stack that `len` received bytes were consumed, reopening the
    /// advertised receive window by that amount.
    fn recved(&mut self, pcb: Pcb, len: u16);

    /// Gracefully close a handle. On failure the handle stays allocated.
    fn close(&mut self, pcb: Pcb) -> Result<(), StackError>;

    /// Forcibly release a handle.
    fn abort(&mut self, pcb: Pcb);

    /// Let the stack and its link layer make progress.
    fn poll(&mut self);

    /// Take the next queued event.
    fn next_event(&mut self) -> Option<StackEvent>;
}

/// Capability interface through which a stack notifies its user.
///
/// The stack never stores the handler. It is handed to [`dispatch`] at every
/// yield point, so an unregistered handler can never be invoked.
pub trait EventHandler {
    fn on_accept(&mut self, listener: Pcb, result: Result<Pcb, StackError>);

    fn on_recv(&mut self, pcb: Pcb, payload: Option<Payload>);

    fn on_sent(&mut self, pcb: Pcb, len: u16);

    fn on_poll(&mut self, pcb: Pcb);

    fn on_err(&mut self, pcb: Pcb, error: StackError);
}

/// Route one event to the matching handler method.
pub fn dispatch(event: StackEvent, handler: &mut impl EventHandler) {
    match event {
        StackEvent::Accepted { listener, result } => handler.on_accept(listener, result),
        StackEvent::Received { pcb, payload } => handler.on_recv(pcb, payload),
        StackEvent::Sent { pcb, len } => handler.on_sent(pcb, len),
        StackEvent::Poll { pcb } => handler.on_poll(pcb),
        StackEvent::Error { pcb, error } => handler.on_err(pcb, error),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<&'static str>,
    }

    impl EventHandler for Recorder {
        fn on_accept(&mut self, _: Pcb, _: Result<Pcb, StackError>) {
            self.seen.push("accept");
        }

        fn on_recv(&mut self, _: Pcb, payload: Option<Payload>) {
            self.seen.push(if payload.is_some() { "recv" } else { "fin" });
        }

        fn on_sent(&mut self, _: Pcb, _: u16) {
            self.seen.push("sent");
        }

        fn on_poll(&mut self, _: Pcb) {
            self.seen.push("poll");
        }

        fn on_err(&mut self, _: Pcb, _: StackError) {
            self.seen.push("err");
        }
    }

    #[test]
    fn dispatch_routes_every_event_kind() {
        let pcb = Pcb::from_raw(3);
        let mut recorder = Recorder::default();
        for event in [
            StackEvent::Accepted {
                listener: pcb,
                result: Ok(Pcb::from_raw(4)),
            },
            StackEvent::Received {
                pcb,
                payload: Some(Payload::from(&b"x"[..])),
            },
            StackEvent::Received { pcb, payload: None },
            StackEvent::Sent { pcb, len: 1 },
            StackEvent::Poll { pcb },
            StackEvent::Error {
                pcb,
                error: StackError::Reset,
            },
        ] {
            assert_eq!(event.pcb(), pcb);
            dispatch(event, &mut recorder);
        }
        assert_eq!(
            recorder.seen,
            ["accept", "recv", "fin", "sent", "poll", "err"]
        );
    }

    #[test]
    fn listener_hooks_only_want_accepts() {
        let hooks = Hooks::listener();
        let pcb = Pcb::from_raw(1);
        assert!(hooks.wants(&StackEvent::Accepted {
            listener: pcb,
            result: Err(StackError::OutOfMemory),
        }));
        assert!(!hooks.wants(&StackEvent::Poll { pcb }));
        assert!(Hooks::NONE.is_empty());
        assert!(!Hooks::connection(10).is_empty());
    }
}
