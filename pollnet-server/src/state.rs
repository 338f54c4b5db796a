use std::fmt::Display;

/// Lifecycle of the single connection a [`TcpServer`](crate::server::TcpServer) manages.
///
/// ```text
///  Closed ──listen()──▶ Listening ──accept ok──▶ Open ──peer closed──▶ Closing
///    ▲                      │                                            │
///    └──── accept failed ───┘                     drained by receive() ──┘
///    ▲
///    └──── close(), from any state
/// ```
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ConnectionState {
    /// Nothing allocated. The only state in which `listen()` succeeds.
    #[default]
    Closed,
    /// Waiting for a peer to complete a handshake.
    Listening,
    /// A connection is established.
    Open,
    /// The peer closed its write side; buffered data can still be drained.
    Closing,
}

impl ConnectionState {
    /// Whether a live connection exists, i.e. data may still be exchanged.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Closing)
    }
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Listening => "listening",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
        };
        write!(f, "{}", name)
    }
}

#[test]
fn initial_state_is_closed() {
    assert_eq!(ConnectionState::default(), ConnectionState::Closed);
    assert!(!ConnectionState::Listening.is_connected());
    assert!(ConnectionState::Closing.is_connected());
}
