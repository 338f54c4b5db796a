//! # pollnet Stack Contract
//!
//! This crate describes the asynchronous, callback-driven TCP stack that the
//! [`pollnet_server`](https://docs.rs/pollnet-server/) crate turns into a
//! synchronous, polling-style byte pipe.
//!
//! ## Overview
//!
//! Embedded TCP stacks hand out opaque connection objects and report progress
//! through callbacks: a connection was accepted, data arrived, data was
//! acknowledged, the connection has been idle, an error occurred. This crate
//! expresses that contract in Rust:
//!
//! - [`TcpStack`]: the primitives a stack offers (allocate, bind, listen,
//!   write, window restoration, close, abort) plus [`TcpStack::poll`] to let
//!   the stack and its link layer make progress.
//! - [`Pcb`]: an opaque handle to a transport object owned by the stack.
//! - [`Hooks`]: which event hooks are armed for a handle.
//! - [`StackEvent`] and [`EventHandler`]: the five notifications and the
//!   capability interface they are routed to with [`dispatch`].
//! - [`Payload`]: inbound data as a chain of segments.
//!
//! ## Backends
//!
//! - [`net::NetStack`] runs on top of non-blocking operating system sockets.
//! - `sim::SimStack` (feature `sim`) is a scripted stack for tests.
//!
//! ## Flow Control
//!
//! A stack advertises a receive window of [`TcpStack::receive_window`] bytes
//! per connection. It never delivers more unacknowledged data than that, and
//! only reopens the window when the user calls [`TcpStack::recved`].
//!
//! ```
//! use pollnet_stack::{Hooks, Payload, Pcb, StackEvent};
//!
//! let pcb = Pcb::from_raw(1);
//! let event = StackEvent::Received { pcb, payload: Some(Payload::from(&b"hi"[..])) };
//! assert!(Hooks::connection(10).wants(&event));
//! assert!(!Hooks::listener().wants(&event));
//! ```
//!
//! ## Error Handling
//!
//! Fallible primitives return [`error::StackError`].

pub mod error;
pub mod net;
pub mod payload;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod stack;

pub use error::StackError;
pub use payload::Payload;
pub use stack::*;
