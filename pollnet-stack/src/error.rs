use std::{error::Error, fmt::Display, io};

/// Errors reported by a [`TcpStack`](crate::TcpStack) implementation.
///
/// These mirror the small set of error codes an embedded TCP stack hands back
/// from its primitives and callbacks.
#[derive(Debug)]
pub enum StackError {
    /// The stack could not allocate a connection object or buffer space.
    OutOfMemory,
    /// The requested local address or port is already in use.
    InUse,
    /// An argument was rejected, e.g. a zero backlog or an unknown handle.
    Argument,
    /// The operation is not valid for the handle in its current state.
    Connection,
    /// The connection was aborted locally.
    Aborted,
    /// The connection was reset by the peer.
    Reset,
    /// The connection has already been closed.
    Closed,
    /// An I/O error from the underlying link.
    IoError(io::Error),
}

impl From<io::Error> for StackError {
    fn from(value: io::Error) -> Self {
        match value.kind() {
            io::ErrorKind::AddrInUse => StackError::InUse,
            io::ErrorKind::ConnectionReset => StackError::Reset,
            io::ErrorKind::ConnectionAborted => StackError::Aborted,
            io::ErrorKind::OutOfMemory => StackError::OutOfMemory,
            _ => StackError::IoError(value),
        }
    }
}

impl Display for StackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StackError::OutOfMemory => write!(f, "Out of memory"),
            StackError::InUse => write!(f, "Address in use"),
            StackError::Argument => write!(f, "Illegal argument"),
            StackError::Connection => write!(f, "Not connected"),
            StackError::Aborted => write!(f, "Connection aborted"),
            StackError::Reset => write!(f, "Connection reset"),
            StackError::Closed => write!(f, "Connection closed"),
            StackError::IoError(error) => write!(f, "{}", error),
        }
    }
}

impl Error for StackError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StackError::IoError(error) => Some(error),
            _ => None,
        }
    }
}

#[test]
fn io_errors_collapse_to_stack_codes() {
    let err = StackError::from(io::Error::from(io::ErrorKind::AddrInUse));
    assert!(matches!(err, StackError::InUse));
    let err = StackError::from(io::Error::from(io::ErrorKind::ConnectionReset));
    assert!(matches!(err, StackError::Reset));
    let err = StackError::from(io::Error::other("link down"));
    assert_eq!(err.to_string(), "link down");
}
