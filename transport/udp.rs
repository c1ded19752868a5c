// UDP data transport bound to the broker-assigned port
use crate::traits::{is_poll_timeout, DatagramTransport, DEFAULT_POLL_INTERVAL};
use nix::sys::socket::{setsockopt, sockopt};
use std::io::{Error, ErrorKind, Result};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

// Room for a burst of full-size datagrams while a handler runs
const RECV_BUFFER_SIZE: usize = 1 << 20;

pub struct UdpTransport {
    socket: UdpSocket,
    remote: SocketAddr,
    closed: AtomicBool,
}

impl UdpTransport {
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        Self::connect_with_poll_interval(host, port, DEFAULT_POLL_INTERVAL)
    }

    pub fn connect_with_poll_interval(host: &str, port: u16, poll_interval: Duration) -> Result<Self> {
        let remote = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::new(ErrorKind::AddrNotAvailable, "address resolved to nothing"))?;
        let local = if remote.is_ipv4() {
            SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)
        } else {
            SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0)
        };

        let socket = UdpSocket::bind(local)?;
        socket.connect(remote)?;
        socket.set_read_timeout(Some(poll_interval))?;
        if let Err(e) = setsockopt(&socket, sockopt::RcvBuf, &RECV_BUFFER_SIZE) {
            warn!(error = %e, "could not enlarge udp receive buffer");
        }
        debug!(%remote, local = ?socket.local_addr().ok(), "udp data socket ready");

        Ok(UdpTransport {
            socket,
            remote,
            closed: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::new(ErrorKind::NotConnected, "Not connected"))
        } else {
            Ok(())
        }
    }
}

impl DatagramTransport for UdpTransport {
    fn send_datagram(&self, data: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        self.socket.send(data)
    }

    fn receive_datagram(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        self.ensure_open()?;
        match self.socket.recv(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if is_poll_timeout(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn disconnect(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
