use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::{TcpListener, TcpStream};

/// Accepts TCP connections and numbers them in arrival order.
pub struct Acceptor {
    listener: TcpListener,
    connection_count: AtomicUsize,
}

impl Acceptor {
    /// Bind to `addr`. Must be called from inside a Tokio runtime.
    pub fn bind<A: ToSocketAddrs>(addr: A, backlog: u32) -> io::Result<Self> {
        let socket_addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "No socket addresses found")
        })?;

        let socket = Self::create_socket(&socket_addr, backlog)?;
        let listener = TcpListener::from_std(socket.into())?;

        Ok(Self {
            listener,
            connection_count: AtomicUsize::new(0),
        })
    }

    /// Wait for the next connection.
    ///
    /// Returns the stream, the peer address and the connection's sequence
    /// number.
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr, usize)> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        let id = self.connection_count.fetch_add(1, Ordering::Relaxed);
        Ok((stream, peer, id))
    }

    /// Get the local address this acceptor is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of connections accepted so far
    pub fn accepted(&self) -> usize {
        self.connection_count.load(Ordering::Relaxed)
    }

    fn create_socket(addr: &SocketAddr, backlog: u32) -> io::Result<Socket> {
        let domain = if addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

        // Tokio needs the std listener in non-blocking mode
        socket.set_nonblocking(true)?;
        socket.set_reuse_address(true)?;

        #[cfg(unix)]
        socket.set_reuse_port(true)?;

        socket.bind(&(*addr).into())?;
        socket.listen(backlog.min(i32::MAX as u32) as i32)?;

        Ok(socket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ephemeral_port_and_count() {
        let acceptor = Acceptor::bind("127.0.0.1:0", 16).unwrap();
        let addr = acceptor.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (_stream, peer, id) = acceptor.accept().await.unwrap();
        let _client = client.await.unwrap();

        assert_eq!(id, 0);
        assert!(peer.ip().is_loopback());
        assert_eq!(acceptor.accepted(), 1);
    }
}
