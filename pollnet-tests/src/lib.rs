//! Harness for end-to-end tests: runs an echo server over real sockets on a
//! background thread.
use std::{
    net::{IpAddr, Ipv4Addr},
    sync::mpsc,
    thread::{self, JoinHandle},
    time::Duration,
};

use pollnet_server::{Builder, ConnectionState, TcpServer, server::Stats};
use pollnet_stack::net::{NetConfig, NetStack};

/// A running echo server serving exactly one connection.
pub struct EchoServer {
    pub port: u16,
    handle: JoinHandle<Stats>,
}

impl EchoServer {
    /// Wait for the session to end and return its counters.
    pub fn join(self) -> Stats {
        self.handle.join().expect("echo server panicked")
    }
}

/// Loopback stack with the given receive window and outbound buffer.
pub fn loopback(receive_window: u16, send_buffer: u16) -> NetConfig {
    NetConfig {
        bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
        receive_window,
        send_buffer,
        ..NetConfig::default()
    }
}

/// Start an echo server on an ephemeral port.
///
/// Returns once the server is listening.
pub fn spawn_echo_server(config: NetConfig) -> EchoServer {
    let (port_tx, port_rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let mut server = Builder::new().build(NetStack::new(config));
        assert!(server.listen(0), "echo server failed to listen");
        port_tx
            .send(server.local_port().expect("listener has a port"))
            .expect("test is waiting for the port");
        assert!(server.accept(), "echo server failed to accept");
        echo(&mut server);
        server.stats()
    });
    let port = port_rx.recv().expect("echo server did not start");
    EchoServer { port, handle }
}

fn echo(server: &mut TcpServer<NetStack>) {
    let mut buf = vec![0u8; 1024];
    while server.state() != ConnectionState::Closed {
        let received = usize::from(server.receive(&mut buf));
        let mut sent = 0;
        while sent < received && server.state().is_connected() {
            let n = usize::from(server.send(&buf[sent..received]));
            if n == 0 {
                thread::sleep(Duration::from_millis(1));
            }
            sent += n;
        }
        if received == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }
    log::debug!("Echo session over");
}
