//! End-to-end tests: tokio clients talk to a `TcpServer<NetStack>` over loopback.

use std::net::Ipv4Addr;
use std::time::Duration;

use pollnet_tests::{EchoServer, loopback, spawn_echo_server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const LIMIT: Duration = Duration::from_secs(10);

async fn connect(server: &EchoServer) -> TcpStream {
    timeout(LIMIT, TcpStream::connect((Ipv4Addr::LOCALHOST, server.port)))
        .await
        .expect("connect timed out")
        .expect("connect failed")
}

async fn finish(server: EchoServer) -> pollnet_server::server::Stats {
    timeout(LIMIT, tokio::task::spawn_blocking(move || server.join()))
        .await
        .expect("server did not finish")
        .expect("join task failed")
}

#[tokio::test]
async fn echoes_a_short_message() {
    let _ = env_logger::builder().is_test(true).try_init();
    let server = spawn_echo_server(loopback(1024, 1024));
    let mut client = connect(&server).await;

    client.write_all(b"hello pollnet").await.unwrap();
    let mut buf = [0u8; 13];
    timeout(LIMIT, client.read_exact(&mut buf))
        .await
        .expect("echo timed out")
        .unwrap();
    assert_eq!(&buf, b"hello pollnet");

    client.shutdown().await.unwrap();
    let mut rest = Vec::new();
    timeout(LIMIT, client.read_to_end(&mut rest))
        .await
        .expect("server did not close")
        .unwrap();
    assert!(rest.is_empty());

    let stats = finish(server).await;
    assert_eq!(stats.delivered, 13);
    assert_eq!(stats.acknowledged, 13);
    assert_eq!(stats.submitted, 13);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn large_transfer_through_a_small_window() {
    let _ = env_logger::builder().is_test(true).try_init();
    let server = spawn_echo_server(loopback(512, 512));
    let client = connect(&server).await;
    let (mut reader, mut writer) = client.into_split();

    let data: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    let outgoing = data.clone();
    let write_task = tokio::spawn(async move {
        writer.write_all(&outgoing).await.unwrap();
        writer
    });

    let mut echoed = vec![0u8; data.len()];
    timeout(LIMIT, reader.read_exact(&mut echoed))
        .await
        .expect("echo timed out")
        .unwrap();
    assert_eq!(echoed, data);

    let mut writer = write_task.await.unwrap();
    writer.shutdown().await.unwrap();

    let stats = finish(server).await;
    assert_eq!(stats.delivered, data.len() as u64);
    assert_eq!(stats.acknowledged, data.len() as u64);
    assert_eq!(stats.submitted, data.len() as u64);
}

#[tokio::test]
async fn immediate_close_ends_the_session() {
    let server = spawn_echo_server(loopback(256, 256));
    let mut client = connect(&server).await;
    client.shutdown().await.unwrap();

    let mut rest = Vec::new();
    timeout(LIMIT, client.read_to_end(&mut rest))
        .await
        .expect("server did not close")
        .unwrap();
    assert!(rest.is_empty());

    let stats = finish(server).await;
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.submitted, 0);
}

#[tokio::test]
async fn second_client_is_turned_away() {
    let server = spawn_echo_server(loopback(256, 256));
    let mut first = connect(&server).await;
    first.write_all(b"one").await.unwrap();
    let mut buf = [0u8; 3];
    timeout(LIMIT, first.read_exact(&mut buf))
        .await
        .expect("echo timed out")
        .unwrap();

    let mut second = connect(&server).await;
    let mut probe = [0u8; 1];
    let outcome = timeout(LIMIT, second.read(&mut probe))
        .await
        .expect("second client was neither served nor dropped");
    assert!(matches!(outcome, Ok(0) | Err(_)));

    // The first connection is unaffected.
    first.write_all(b"two").await.unwrap();
    timeout(LIMIT, first.read_exact(&mut buf))
        .await
        .expect("echo timed out")
        .unwrap();
    assert_eq!(&buf, b"two");

    first.shutdown().await.unwrap();
    let stats = finish(server).await;
    assert_eq!(stats.submitted, 6);
}
