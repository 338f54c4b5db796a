//! # pollnet Server Library
//!
//! This crate turns an asynchronous, callback-driven TCP stack into a simple,
//! synchronous byte pipe for a single connection.
//!
//! ## Overview
//!
//! Small devices often run a TCP stack that reports everything through
//! callbacks and has to be serviced from the main loop. Application code, on
//! the other hand, would rather call `accept()`, then `receive()` and `send()`
//! in a loop. [`server::TcpServer`] sits in between.
//!
//! ## Architecture
//!
//! - **[`ring::RingBuffer`]**: fixed-capacity store for inbound bytes, exactly
//!   as large as the stack's receive window
//! - **[`state::ConnectionState`]**: Closed, Listening, Open or Closing
//! - **[`server::TcpServer`]**: the public API and the adapter that turns stack
//!   events (accept, receive, sent, idle poll, error) into state changes
//!
//! The stack itself is abstracted by the
//! [`pollnet_stack::TcpStack`](https://docs.rs/pollnet-stack/) trait.
//!
//! ## Flow Control
//!
//! Received bytes are not acknowledged when they arrive. They are acknowledged
//! segment by segment while `receive()` copies them out. The stack's receive
//! window is therefore only reopened as fast as the application consumes data,
//! and the peer can never overrun the buffer.
//!
//! Outbound data is not buffered. `send()` hands over as much as currently
//! fits into the stack and returns that amount; the caller retries the rest.
//!
//! ## Basic Usage
//!
//! ```ignore
//! use pollnet_server::server::{Config, TcpServer};
//! use pollnet_stack::net::{NetConfig, NetStack};
//!
//! let mut server = TcpServer::new(NetStack::new(NetConfig::default()), Config::default());
//! if server.listen(4242) && server.accept() {
//!     let mut buf = [0u8; 512];
//!     loop {
//!         let n = server.receive(&mut buf) as usize;
//!         let mut sent = 0;
//!         while sent < n {
//!             sent += server.send(&buf[sent..n]) as usize;
//!         }
//!     }
//! }
//! ```
//!
//! ## Error Handling
//!
//! Failures surface as return values and state, never as panics:
//!
//! - `listen()` returns `false` if the stack cannot allocate, bind or listen
//! - `accept()` returns `false` if the handshake failed
//! - `send()` returns `0` if the stack has no room right now
//! - `close()` returns `false` if the connection had to be aborted
//!
//! Data arriving beyond the advertised window closes the connection.
//!
//! ## Logging
//!
//! This crate uses the `log` crate for diagnostics. Configure logging with an
//! implementation like `env_logger`.
//!
//! ## Thread Model
//!
//! Everything runs on the caller's thread. Stack events are only handled while
//! the caller is inside `accept()`, `receive()`, `send()` or `poll()`, so the
//! buffer needs no locking. A server must not be shared between threads
//! without external synchronization.
pub mod ring;
pub mod server;
pub mod state;

pub use server::{Builder, Config, TcpServer};
pub use state::ConnectionState;
