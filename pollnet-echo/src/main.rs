//! # pollnet Echo Server
//!
//! Serves one TCP connection at a time and sends every received byte back.
//!
//! ## Overview
//!
//! This binary wires [`pollnet_server`](https://docs.rs/pollnet-server/) to the
//! socket backend of [`pollnet_stack`](https://docs.rs/pollnet-stack/). It is a
//! small, complete user of the synchronous API: listen, accept, then receive
//! and send until the peer closes, and start over.
use std::error::Error;
use std::net::IpAddr;
use std::thread;
use std::time::Duration;

use clap::Parser;
use clap_num::number_range;
use env_logger::Env;
use pollnet_server::{Builder, ConnectionState, TcpServer};
use pollnet_stack::{
    TcpStack,
    net::{NetConfig, NetStack},
};

const DEFAULT_WINDOW: &str = "11680";

fn window_size(s: &str) -> Result<u16, String> {
    number_range(s, 64, u16::MAX)
}

#[derive(Parser)]
#[command(about = "Single-connection TCP echo server", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "4242")]
    port: u16,

    #[arg(short, long, default_value = "0.0.0.0")]
    ip: IpAddr,

    #[arg(
        short,
        long,
        help = "Receive window in bytes",
        default_value = DEFAULT_WINDOW,
        value_parser = window_size
    )]
    window: u16,

    #[arg(
        short,
        long,
        help = "Outbound buffer in bytes",
        default_value = DEFAULT_WINDOW,
        value_parser = window_size
    )]
    send_buffer: u16,

    #[arg(long, help = "Sleep between polls in milliseconds", default_value = "1")]
    poll_interval_ms: u64,

    #[arg(long, help = "Serve a single connection and exit")]
    once: bool,
}

/// Echo everything until the connection is gone.
fn serve<S: TcpStack>(server: &mut TcpServer<S>, buf: &mut [u8], idle: Duration) {
    loop {
        let received = usize::from(server.receive(buf));
        let mut sent = 0;
        while sent < received {
            let n = usize::from(server.send(&buf[sent..received]));
            if n == 0 {
                if !server.state().is_connected() {
                    log::warn!("Connection lost with {} bytes unsent", received - sent);
                    return;
                }
                thread::sleep(idle);
            }
            sent += n;
        }
        if server.state() == ConnectionState::Closed {
            return;
        }
        if received == 0 {
            thread::sleep(idle);
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    log::info!("Starting echo server");

    let args = Args::parse();
    log::debug!(
        "Parsed arguments: ip={}, port={}, window={}, send_buffer={}",
        args.ip,
        args.port,
        args.window,
        args.send_buffer
    );

    let stack = NetStack::new(NetConfig {
        bind_addr: args.ip,
        receive_window: args.window,
        send_buffer: args.send_buffer,
        ..NetConfig::default()
    });
    let idle = Duration::from_millis(args.poll_interval_ms);
    let mut server = Builder::new().poll_interval(idle).build(stack);
    let mut buf = vec![0u8; usize::from(args.window)];

    loop {
        if !server.listen(args.port) {
            return Err(format!("Could not listen on {}:{}", args.ip, args.port).into());
        }
        if let Some(port) = server.local_port() {
            log::info!("Waiting for a connection on {}:{}", args.ip, port);
        }

        if server.accept() {
            serve(&mut server, &mut buf, idle);
            let stats = server.stats();
            log::info!(
                "Session finished: {} bytes received, {} bytes sent",
                stats.acknowledged,
                stats.submitted
            );
        } else {
            log::warn!("Failed to accept a connection");
        }
        server.close();

        if args.once {
            break;
        }
    }
    Ok(())
}
