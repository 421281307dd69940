//! Directly connected IPv4 interfaces of this host.

use nix::ifaddrs::getifaddrs;
use std::net::Ipv4Addr;

use crate::error::Result;
use crate::routing::RouteKey;

/// One IPv4 address configured on a local interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAddr {
    pub iface: String,
    pub addr: Ipv4Addr,
    pub mask: Ipv4Addr,
}

impl LocalAddr {
    pub fn subnet(&self) -> RouteKey {
        RouteKey::new(
            Ipv4Addr::from(u32::from(self.addr) & u32::from(self.mask)),
            self.mask,
        )
    }
}

/// Snapshot of the host's IPv4 addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interfaces {
    addrs: Vec<LocalAddr>,
}

impl Interfaces {
    pub fn new(addrs: Vec<LocalAddr>) -> Self {
        Interfaces { addrs }
    }

    /// Enumerate the IPv4 addresses currently configured on the host.
    pub fn discover() -> Result<Self> {
        let mut addrs = Vec::new();
        for ifa in getifaddrs().map_err(std::io::Error::from)? {
            let addr = ifa.address.as_ref().and_then(|a| a.as_sockaddr_in());
            let mask = ifa.netmask.as_ref().and_then(|a| a.as_sockaddr_in());
            if let (Some(addr), Some(mask)) = (addr, mask) {
                addrs.push(LocalAddr {
                    iface: ifa.interface_name.clone(),
                    addr: addr.ip(),
                    mask: mask.ip(),
                });
            }
        }
        Ok(Interfaces { addrs })
    }

    pub fn addrs(&self) -> &[LocalAddr] {
        &self.addrs
    }

    /// Whether `ip` is one of our own addresses.
    pub fn is_local(&self, ip: Ipv4Addr) -> bool {
        ip.is_loopback() || self.addrs.iter().any(|a| a.addr == ip)
    }

    /// First address of a named interface.
    pub fn addr_of(&self, iface: &str) -> Option<Ipv4Addr> {
        self.addrs.iter().find(|a| a.iface == iface).map(|a| a.addr)
    }

    /// Connected subnets of the given interfaces.
    pub fn connected<'a, I>(&self, names: I) -> Vec<(RouteKey, String)>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let names: Vec<&String> = names.into_iter().collect();
        self.addrs
            .iter()
            .filter(|a| names.contains(&&a.iface))
            .map(|a| (a.subnet(), a.iface.clone()))
            .collect()
    }
}
