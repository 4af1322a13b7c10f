//! Port-shared listener acquisition.
//!
//! Binds TCP listeners with `SO_REUSEPORT` set, so a successor process can
//! bind the identical address/port pair while this process still holds it.
//! How the kernel balances incoming connections across the two sockets
//! during the overlap is OS-defined; callers must not assume exclusivity.

use std::net::SocketAddr;

use socket2::{Domain, Socket, Type};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

/// Accept backlog for newly bound listeners.
const LISTEN_BACKLOG: i32 = 1024;

/// Failure to acquire a port-shared listener.
#[derive(Debug, Error)]
pub enum BindError {
    /// The port is already held by a process that did not opt into
    /// port-sharing, so the kernel refuses a second bind.
    #[error("port unavailable at {addr}: {source}")]
    PortUnavailable {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Socket creation, option setup, bind, or listen failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

impl BindError {
    fn from_io(addr: SocketAddr, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::AddrInUse {
            BindError::PortUnavailable { addr, source }
        } else {
            BindError::Bind { addr, source }
        }
    }
}

/// Bind a TCP listener with `SO_REUSEADDR` and `SO_REUSEPORT` enabled.
///
/// The returned listener owns its socket; dropping it releases the OS
/// resource on every exit path.
///
/// Must be called from within a tokio runtime (the std listener is
/// registered with the active reactor).
pub fn bind_shared(addr: SocketAddr) -> Result<TcpListener, BindError> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };

    let socket = Socket::new(domain, Type::STREAM, None)
        .map_err(|e| BindError::Bind { addr, source: e })?;
    socket
        .set_nonblocking(true)
        .map_err(|e| BindError::Bind { addr, source: e })?;
    socket
        .set_reuse_address(true)
        .map_err(|e| BindError::Bind { addr, source: e })?;
    socket
        .set_reuse_port(true)
        .map_err(|e| BindError::Bind { addr, source: e })?;

    socket
        .bind(&addr.into())
        .map_err(|e| BindError::from_io(addr, e))?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|e| BindError::from_io(addr, e))?;

    let listener = TcpListener::from_std(socket.into())
        .map_err(|e| BindError::Bind { addr, source: e })?;

    info!(%addr, "bound port-shared listener");
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two port-shared listeners may hold the same address concurrently.
    /// This is the overlap window a handoff relies on.
    #[tokio::test]
    async fn second_shared_bind_on_same_port_succeeds() {
        let first = bind_shared("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();

        let second = bind_shared(addr).expect("second shared bind should succeed");
        assert_eq!(second.local_addr().unwrap(), addr);

        // Both sockets accept while the overlap lasts.
        let stream = tokio::net::TcpStream::connect(addr).await;
        assert!(stream.is_ok());
    }

    /// A port held by a non-sharing listener is reported as unavailable.
    #[tokio::test]
    async fn non_sharing_holder_is_port_unavailable() {
        let plain = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = plain.local_addr().unwrap();

        match bind_shared(addr) {
            Err(BindError::PortUnavailable { .. }) => {}
            other => panic!("expected PortUnavailable, got {other:?}"),
        }
    }

    /// An address this host cannot bind fails outright.
    #[tokio::test]
    async fn unbindable_address_is_bind_error() {
        // 198.51.100.0/24 (TEST-NET-2) is not assigned to any local interface.
        let addr: SocketAddr = "198.51.100.1:0".parse().unwrap();
        match bind_shared(addr) {
            Err(BindError::Bind { .. }) => {}
            other => panic!("expected Bind error, got {other:?}"),
        }
    }

    /// Dropping the listener releases the port for exclusive rebinding.
    #[tokio::test]
    async fn drop_releases_the_socket() {
        let listener = bind_shared("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        // A non-sharing bind only succeeds once the fd is actually closed.
        let rebound = std::net::TcpListener::bind(addr);
        assert!(rebound.is_ok());
    }
}
