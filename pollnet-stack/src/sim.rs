//! # Simulated Stack
//!
//! A deterministic, scripted [`TcpStack`] for tests.
//!
//! Nothing happens on its own: the test decides when a peer connects, which
//! bytes arrive, when the peer closes and which primitive fails next. Every
//! side effect the stack sees is recorded so tests can inspect it afterwards.
//!
//! Unlike a real stack, [`SimStack::deliver`] ignores the advertised receive
//! window. This makes it possible to provoke overflows on purpose.
use std::collections::{BTreeMap, VecDeque};

use bytes::Bytes;

use crate::{Hooks, Payload, Pcb, StackError, StackEvent, TcpStack};

/// Primitives whose next call can be made to fail
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Op {
    NewPcb,
    Bind,
    Listen,
    Write,
    Close,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Kind {
    Fresh { port: Option<u16> },
    Listening { port: u16, backlog: u8 },
    Connected { port: u16 },
}

#[derive(Debug)]
struct SimPcb {
    kind: Kind,
    hooks: Hooks,
    /// Bytes written but not yet confirmed by the peer
    in_flight: u16,
}

#[derive(Debug)]
pub struct SimStack {
    receive_window: u16,
    send_buffer: u16,
    next_id: u32,
    pcbs: BTreeMap<Pcb, SimPcb>,
    events: VecDeque<StackEvent>,
    failing: Vec<Op>,
    written: Vec<u8>,
    recved: Vec<u16>,
    closed: Vec<Pcb>,
    aborted: Vec<Pcb>,
    polls: usize,
}

impl Default for SimStack {
    fn default() -> Self {
        SimStack::new(200, 200)
    }
}

impl SimStack {
    pub fn new(receive_window: u16, send_buffer: u16) -> SimStack {
        SimStack {
            receive_window,
            send_buffer,
            next_id: 1,
            pcbs: BTreeMap::new(),
            events: VecDeque::new(),
            failing: Vec::new(),
            written: Vec::new(),
            recved: Vec::new(),
            closed: Vec::new(),
            aborted: Vec::new(),
            polls: 0,
        }
    }

    /// Make the next call of `op` fail.
    pub fn fail_next(&mut self, op: Op) {
        self.failing.push(op);
    }

    fn take_failure(&mut self, op: Op) -> bool {
        match self.failing.iter().position(|o| *o == op) {
            Some(index) => {
                self.failing.remove(index);
                true
            }
            None => false,
        }
    }

    fn allocate(&mut self, kind: Kind) -> Pcb {
        let pcb = Pcb::from_raw(self.next_id);
        self.next_id += 1;
        self.pcbs.insert(
            pcb,
            SimPcb {
                kind,
                hooks: Hooks::NONE,
                in_flight: 0,
            },
        );
        pcb
    }

    fn listener(&self) -> Option<(Pcb, u16)> {
        self.pcbs.iter().find_map(|(pcb, entry)| match entry.kind {
            Kind::Listening { port, .. } => Some((*pcb, port)),
            _ => None,
        })
    }

    /// The most recently accepted connection that is still alive
    pub fn connection(&self) -> Option<Pcb> {
        self.pcbs
            .iter()
            .rev()
            .find(|(_, entry)| matches!(entry.kind, Kind::Connected { .. }))
            .map(|(pcb, _)| *pcb)
    }

    /// A peer completes a handshake with the listening endpoint.
    ///
    /// Returns the new connection handle, or `None` if nothing is listening.
    pub fn connect(&mut self) -> Option<Pcb> {
        let (listener, port) = self.listener()?;
        let conn = self.allocate(Kind::Connected { port });
        self.events.push_back(StackEvent::Accepted {
            listener,
            result: Ok(conn),
        });
        Some(conn)
    }

    /// A handshake on the listening endpoint fails with `error`.
    pub fn fail_accept(&mut self, error: StackError) -> bool {
        let Some((listener, _)) = self.listener() else {
            return false;
        };
        self.events.push_back(StackEvent::Accepted {
            listener,
            result: Err(error),
        });
        true
    }

    /// Queue `data` as one delivery on the current connection.
    pub fn deliver(&mut self, data: &[u8]) -> bool {
        self.deliver_payload(Payload::from(data))
    }

    /// Queue one delivery made up of several segments.
    pub fn deliver_chain(&mut self, segments: &[&[u8]]) -> bool {
        self.deliver_payload(
            segments
                .iter()
                .map(|segment| Bytes::copy_from_slice(segment))
                .collect(),
        )
    }

    fn deliver_payload(&mut self, payload: Payload) -> bool {
        let Some(pcb) = self.connection() else {
            return false;
        };
        self.events.push_back(StackEvent::Received {
            pcb,
            payload: Some(payload),
        });
        true
    }

    /// The peer closes its write side.
    pub fn finish(&mut self) -> bool {
        let Some(pcb) = self.connection() else {
            return false;
        };
        self.events
            .push_back(StackEvent::Received { pcb, payload: None });
        true
    }

    /// The connection fails. Like a real stack, the handle is released before
    /// the error is reported.
    pub fn reset(&mut self, error: StackError) -> bool {
        let Some(pcb) = self.connection() else {
            return false;
        };
        self.pcbs.remove(&pcb);
        self.events.push_back(StackEvent::Error { pcb, error });
        true
    }

    /// The idle timer of the current connection fires.
    pub fn idle(&mut self) -> bool {
        let Some(pcb) = self.connection() else {
            return false;
        };
        self.events.push_back(StackEvent::Poll { pcb });
        true
    }

    /// The peer acknowledges up to `len` in-flight bytes.
    pub fn confirm(&mut self, len: u16) -> bool {
        let Some(pcb) = self.connection() else {
            return false;
        };
        let Some(entry) = self.pcbs.get_mut(&pcb) else {
            return false;
        };
        let len = len.min(entry.in_flight);
        entry.in_flight -= len;
        self.events.push_back(StackEvent::Sent { pcb, len });
        true
    }

    /// Change the outbound buffer capacity.
    pub fn set_send_buffer(&mut self, capacity: u16) {
        self.send_buffer = capacity;
    }

    /// All bytes accepted by [`TcpStack::write`], in order
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Every window restoration, in the order it was issued
    pub fn recved_log(&self) -> &[u16] {
        &self.recved
    }

    /// Total bytes acknowledged through window restoration
    pub fn acknowledged(&self) -> u64 {
        self.recved.iter().map(|len| u64::from(*len)).sum()
    }

    pub fn closed(&self) -> &[Pcb] {
        &self.closed
    }

    pub fn aborted(&self) -> &[Pcb] {
        &self.aborted
    }

    pub fn is_live(&self, pcb: Pcb) -> bool {
        self.pcbs.contains_key(&pcb)
    }

    pub fn live_count(&self) -> usize {
        self.pcbs.len()
    }

    /// The hooks currently armed for `pcb`
    pub fn hooks(&self, pcb: Pcb) -> Option<Hooks> {
        self.pcbs.get(&pcb).map(|entry| entry.hooks)
    }

    /// The backlog a listening handle was created with
    pub fn backlog(&self, pcb: Pcb) -> Option<u8> {
        match self.pcbs.get(&pcb)?.kind {
            Kind::Listening { backlog, .. } => Some(backlog),
            _ => None,
        }
    }

    /// Number of events still waiting to be taken
    pub fn queued(&self) -> usize {
        self.events.len()
    }

    /// How often [`TcpStack::poll`] was called
    pub fn polls(&self) -> usize {
        self.polls
    }

    fn release(&mut self, pcb: Pcb) {
        self.pcbs.remove(&pcb);
        self.events.retain(|event| event.pcb() != pcb);
    }
}

impl TcpStack for SimStack {
    fn receive_window(&self) -> u16 {
        self.receive_window
    }

    fn new_pcb(&mut self) -> Result<Pcb, StackError> {
        if self.take_failure(Op::NewPcb) {
            return Err(StackError::OutOfMemory);
        }
        Ok(self.allocate(Kind::Fresh { port: None }))
    }

    fn bind(&mut self, pcb: Pcb, port: u16) -> Result<(), StackError> {
        if self.take_failure(Op::Bind) {
            return Err(StackError::InUse);
        }
        match self.pcbs.get_mut(&pcb) {
            Some(entry) if entry.kind == Kind::Fresh { port: None } => {
                entry.kind = Kind::Fresh { port: Some(port) };
                Ok(())
            }
            _ => Err(StackError::Argument),
        }
    }

    fn listen(&mut self, pcb: Pcb, backlog: u8) -> Result<Pcb, StackError> {
        if self.take_failure(Op::Listen) {
            return Err(StackError::OutOfMemory);
        }
        let port = match self.pcbs.get(&pcb).map(|entry| entry.kind) {
            Some(Kind::Fresh { port: Some(port) }) => port,
            Some(_) => return Err(StackError::Connection),
            None => return Err(StackError::Argument),
        };
        self.pcbs.remove(&pcb);
        Ok(self.allocate(Kind::Listening { port, backlog }))
    }

    fn local_port(&self, pcb: Pcb) -> Option<u16> {
        match self.pcbs.get(&pcb)?.kind {
            Kind::Fresh { port } => port,
            Kind::Listening { port, .. } | Kind::Connected { port } => Some(port),
        }
    }

    fn set_hooks(&mut self, pcb: Pcb, hooks: Hooks) {
        let Some(entry) = self.pcbs.get_mut(&pcb) else {
            return;
        };
        entry.hooks = hooks;
        let events = std::mem::take(&mut self.events);
        for event in events {
            if event.pcb() != pcb || hooks.wants(&event) {
                self.events.push_back(event);
            } else if let StackEvent::Accepted {
                result: Ok(conn), ..
            } = event
            {
                self.pcbs.remove(&conn);
            }
        }
    }

    fn send_buffer(&self, pcb: Pcb) -> u16 {
        match self.pcbs.get(&pcb) {
            Some(entry) if matches!(entry.kind, Kind::Connected { .. }) => {
                self.send_buffer.saturating_sub(entry.in_flight)
            }
            _ => 0,
        }
    }

    fn write(&mut self, pcb: Pcb, data: &[u8]) -> Result<(), StackError> {
        if self.take_failure(Op::Write) {
            return Err(StackError::OutOfMemory);
        }
        if data.len() > usize::from(self.send_buffer(pcb)) {
            return Err(StackError::OutOfMemory);
        }
        match self.pcbs.get_mut(&pcb) {
            Some(entry) if matches!(entry.kind, Kind::Connected { .. }) => {
                entry.in_flight += data.len() as u16;
                self.written.extend_from_slice(data);
                Ok(())
            }
            _ => Err(StackError::Connection),
        }
    }

    fn recved(&mut self, pcb: Pcb, len: u16) {
        if self.pcbs.contains_key(&pcb) {
            self.recved.push(len);
        }
    }

    fn close(&mut self, pcb: Pcb) -> Result<(), StackError> {
        if !self.pcbs.contains_key(&pcb) {
            return Err(StackError::Argument);
        }
        if self.take_failure(Op::Close) {
            return Err(StackError::OutOfMemory);
        }
        self.release(pcb);
        self.closed.push(pcb);
        Ok(())
    }

    fn abort(&mut self, pcb: Pcb) {
        self.release(pcb);
        self.aborted.push(pcb);
    }

    fn poll(&mut self) {
        self.polls += 1;
    }

    fn next_event(&mut self) -> Option<StackEvent> {
        while let Some(event) = self.events.pop_front() {
            let armed = self
                .pcbs
                .get(&event.pcb())
                .is_some_and(|entry| entry.hooks.wants(&event));
            // Error events are raised after the handle was released.
            if armed || matches!(event, StackEvent::Error { .. }) {
                return Some(event);
            }
            if let StackEvent::Accepted {
                result: Ok(conn), ..
            } = event
            {
                self.pcbs.remove(&conn);
            }
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn listening(stack: &mut SimStack) -> Pcb {
        let pcb = stack.new_pcb().unwrap();
        stack.bind(pcb, 8080).unwrap();
        let listener = stack.listen(pcb, 1).unwrap();
        stack.set_hooks(listener, Hooks::listener());
        listener
    }

    #[test]
    fn listen_replaces_the_bound_handle() {
        let mut stack = SimStack::default();
        let pcb = stack.new_pcb().unwrap();
        stack.bind(pcb, 8080).unwrap();
        let listener = stack.listen(pcb, 1).unwrap();
        assert!(!stack.is_live(pcb));
        assert_eq!(stack.local_port(listener), Some(8080));
        assert_eq!(stack.backlog(listener), Some(1));
    }

    #[test]
    fn injected_failures_fire_once() {
        let mut stack = SimStack::default();
        stack.fail_next(Op::NewPcb);
        assert!(matches!(stack.new_pcb(), Err(StackError::OutOfMemory)));
        assert!(stack.new_pcb().is_ok());
    }

    #[test]
    fn events_for_unarmed_hooks_are_dropped() {
        let mut stack = SimStack::default();
        let listener = listening(&mut stack);
        let conn = stack.connect().unwrap();
        stack.clear_hooks(listener);
        assert_eq!(stack.queued(), 0);
        assert!(!stack.is_live(conn));
        assert!(stack.next_event().is_none());
    }

    #[test]
    fn writes_are_bounded_by_the_send_buffer() {
        let mut stack = SimStack::new(200, 10);
        let _ = listening(&mut stack);
        let conn = stack.connect().unwrap();
        assert_eq!(stack.send_buffer(conn), 10);
        stack.write(conn, b"hello").unwrap();
        assert_eq!(stack.send_buffer(conn), 5);
        assert!(stack.write(conn, b"world!").is_err());
        assert!(stack.confirm(5));
        assert_eq!(stack.send_buffer(conn), 10);
        assert_eq!(stack.written(), b"hello");
    }

    #[test]
    fn reset_releases_before_reporting() {
        let mut stack = SimStack::default();
        let listener = listening(&mut stack);
        let conn = stack.connect().unwrap();
        assert!(matches!(
            stack.next_event(),
            Some(StackEvent::Accepted { listener: l, result: Ok(c) }) if l == listener && c == conn
        ));
        stack.set_hooks(conn, Hooks::connection(10));
        assert!(stack.reset(StackError::Reset));
        assert!(!stack.is_live(conn));
        assert!(matches!(
            stack.next_event(),
            Some(StackEvent::Error { pcb, error: StackError::Reset }) if pcb == conn
        ));
    }
}
