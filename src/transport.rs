//! UDP transport for RIP datagrams.
//!
//! The daemon uses a single socket bound to port 520 for everything:
//! multicast updates leave through the interface selected right before
//! each send, unicast replies go straight to the requester and inbound
//! datagrams carry the interface they arrived on, taken from
//! `IP_PKTINFO`.

use async_trait::async_trait;
use nix::net::if_::if_nametoindex;
use nix::sys::socket::{ControlMessageOwned, MsgFlags, SockaddrIn, recvmsg, setsockopt, sockopt};
use parking_lot::{Mutex, RwLock};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::collections::HashMap;
use std::io::{self, IoSliceMut};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::fd::{AsRawFd, RawFd};
use tokio::io::Interest;
use tokio::net::UdpSocket;

use crate::config::Config;
use crate::error::Result;
use crate::local::Interfaces;
use crate::packet::{MAX_DATAGRAM, MULTICAST_ADDR, RIP_PORT};

/// One received datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub src: SocketAddrV4,
    /// Interface the datagram arrived on, if it could be resolved.
    pub iface: Option<String>,
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send to 224.0.0.9 out of `iface`.
    async fn send_multicast(&self, payload: &[u8], iface: &str) -> Result<()>;

    async fn send_unicast(&self, payload: &[u8], dest: SocketAddrV4) -> Result<()>;

    async fn recv(&self) -> Result<Datagram>;

    /// Refresh local addresses and multicast memberships after the
    /// configuration changed.
    fn rejoin(&self, cfg: &Config) -> Result<()>;

    /// Current view of the host's addresses.
    fn local(&self) -> Interfaces;
}

pub struct UdpTransport {
    socket: UdpSocket,
    // One send at a time: the outgoing multicast interface is socket state.
    send_lock: tokio::sync::Mutex<()>,
    interfaces: RwLock<Interfaces>,
    // Interface index -> name, for IP_PKTINFO.
    names: RwLock<HashMap<u32, String>>,
    // Local addresses we currently hold a group membership on.
    joined: Mutex<Vec<Ipv4Addr>>,
}

impl UdpTransport {
    /// Bind the RIP socket and join the multicast group on every
    /// configured interface. Must be called inside a tokio runtime.
    pub fn bind(cfg: &Config) -> Result<Self> {
        Self::bind_to(cfg, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, RIP_PORT))
    }

    pub fn bind_to(cfg: &Config, addr: SocketAddrV4) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        // Don't receive our own multicast packets.
        socket.set_multicast_loop_v4(false)?;
        socket.set_multicast_ttl_v4(1)?;
        setsockopt(&socket, sockopt::Ipv4PacketInfo, &true).map_err(io::Error::from)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let transport = UdpTransport {
            socket: UdpSocket::from_std(std_socket)?,
            send_lock: tokio::sync::Mutex::new(()),
            interfaces: RwLock::new(Interfaces::default()),
            names: RwLock::new(HashMap::new()),
            joined: Mutex::new(Vec::new()),
        };
        transport.rejoin(cfg)?;
        Ok(transport)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn iface_addr(&self, iface: &str) -> io::Result<Ipv4Addr> {
        self.interfaces.read().addr_of(iface).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no IPv4 address on {}", iface),
            )
        })
    }
}

/// One `recvmsg` call: payload length, IPv4 source and the index of the
/// interface the datagram arrived on.
fn recv_with_pktinfo(
    fd: RawFd,
    buf: &mut [u8],
) -> io::Result<(usize, Option<SocketAddrV4>, Option<u32>)> {
    let mut iov = [IoSliceMut::new(buf)];
    let mut cmsg = nix::cmsg_space!(nix::libc::in_pktinfo);
    let msg = recvmsg::<SockaddrIn>(fd, &mut iov, Some(&mut cmsg), MsgFlags::empty())
        .map_err(io::Error::from)?;

    let mut index = None;
    for c in msg.cmsgs().map_err(io::Error::from)? {
        if let ControlMessageOwned::Ipv4PacketInfo(info) = c {
            index = u32::try_from(info.ipi_ifindex).ok();
        }
    }
    let src = msg.address.map(|a| SocketAddrV4::new(a.ip(), a.port()));
    Ok((msg.bytes, src, index))
}

/// Interface name for every interface that has an IPv4 address.
fn index_names(interfaces: &Interfaces) -> HashMap<u32, String> {
    interfaces
        .addrs()
        .iter()
        .filter_map(|a| {
            if_nametoindex(a.iface.as_str())
                .ok()
                .map(|index| (index, a.iface.clone()))
        })
        .collect()
}

/// Memberships held on addresses that are no longer wanted.
fn departed(joined: &[Ipv4Addr], wanted: &[Ipv4Addr]) -> Vec<Ipv4Addr> {
    joined
        .iter()
        .filter(|addr| !wanted.contains(addr))
        .copied()
        .collect()
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_multicast(&self, payload: &[u8], iface: &str) -> Result<()> {
        let local = self.iface_addr(iface)?;
        let _guard = self.send_lock.lock().await;
        SockRef::from(&self.socket).set_multicast_if_v4(&local)?;
        self.socket
            .send_to(payload, SocketAddrV4::new(MULTICAST_ADDR, RIP_PORT))
            .await?;
        Ok(())
    }

    async fn send_unicast(&self, payload: &[u8], dest: SocketAddrV4) -> Result<()> {
        let _guard = self.send_lock.lock().await;
        self.socket.send_to(payload, dest).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Datagram> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let fd = self.socket.as_raw_fd();
        loop {
            let (n, src, index) = self
                .socket
                .async_io(Interest::READABLE, || recv_with_pktinfo(fd, &mut buf))
                .await?;
            let Some(src) = src else {
                continue;
            };
            let iface = index.and_then(|i| self.names.read().get(&i).cloned());
            if iface.is_none() {
                tracing::debug!(src = %src, index = ?index, "arrival interface unknown");
            }
            return Ok(Datagram {
                payload: buf[..n].to_vec(),
                src,
                iface,
            });
        }
    }

    fn rejoin(&self, cfg: &Config) -> Result<()> {
        let discovered = Interfaces::discover()?;
        let wanted: Vec<(&String, Ipv4Addr)> = cfg
            .interfaces
            .keys()
            .filter_map(|name| match discovered.addr_of(name) {
                Some(addr) => Some((name, addr)),
                None => {
                    tracing::warn!(iface = %name, "configured interface has no IPv4 address");
                    None
                }
            })
            .collect();
        let addrs: Vec<Ipv4Addr> = wanted.iter().map(|(_, addr)| *addr).collect();

        let mut joined = self.joined.lock();
        for addr in departed(&joined, &addrs) {
            match self.socket.leave_multicast_v4(MULTICAST_ADDR, addr) {
                Ok(()) => tracing::debug!(addr = %addr, "left {}", MULTICAST_ADDR),
                Err(e) => tracing::warn!(addr = %addr, error = %e, "multicast leave failed"),
            }
        }
        let mut now_joined = Vec::with_capacity(wanted.len());
        for (name, addr) in wanted {
            // Leaving first makes the join idempotent across reloads.
            let _ = self.socket.leave_multicast_v4(MULTICAST_ADDR, addr);
            match self.socket.join_multicast_v4(MULTICAST_ADDR, addr) {
                Ok(()) => {
                    tracing::debug!(iface = %name, addr = %addr, "joined {}", MULTICAST_ADDR);
                    now_joined.push(addr);
                }
                Err(e) => tracing::warn!(iface = %name, error = %e, "multicast join failed"),
            }
        }
        *joined = now_joined;

        *self.names.write() = index_names(&discovered);
        *self.interfaces.write() = discovered;
        Ok(())
    }

    fn local(&self) -> Interfaces {
        self.interfaces.read().clone()
    }
}
