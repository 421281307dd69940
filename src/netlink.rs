//! Kernel route programming through rtnetlink.
//!
//! Every route this daemon installs carries a private protocol number,
//! so deletion and flushing never touch routes owned by anyone else.

use async_trait::async_trait;
use futures::TryStreamExt;
use netlink_packet_route::route::{RouteAddress, RouteAttribute, RouteMessage, RouteProtocol};
use rtnetlink::{Handle, IpVersion};
use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::kernel::KernelRoutes;
use crate::routing::RouteKey;

/// Routing protocol number stamped on our routes.
pub const RIP_RT_PROTO: u8 = 250;

pub struct NetlinkRoutes {
    handle: Handle,
}

impl NetlinkRoutes {
    /// Open a netlink connection. Must be called inside a tokio runtime.
    pub fn new() -> Result<Self> {
        let (connection, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(connection);
        Ok(NetlinkRoutes { handle })
    }

    async fn install(&self, key: RouteKey, next_hop: Ipv4Addr, replace: bool) -> Result<()> {
        let mut req = self
            .handle
            .route()
            .add()
            .v4()
            .destination_prefix(key.network, key.prefix_len())
            .gateway(next_hop)
            .protocol(RouteProtocol::Other(RIP_RT_PROTO));
        if replace {
            req = req.replace();
        }
        req.execute()
            .await
            .map_err(|e| Error::Route(format!("cannot install {} via {}: {}", key, next_hop, e)))
    }

    /// Our routes, optionally limited to one destination.
    async fn owned(&self, key: Option<RouteKey>) -> Result<Vec<RouteMessage>> {
        let mut routes = self.handle.route().get(IpVersion::V4).execute();
        let mut found = Vec::new();
        while let Some(route) = routes
            .try_next()
            .await
            .map_err(|e| Error::Route(format!("cannot list routes: {}", e)))?
        {
            if route.header.protocol != RouteProtocol::Other(RIP_RT_PROTO) {
                continue;
            }
            let matches = key.is_none_or(|k| {
                route.header.destination_prefix_length == k.prefix_len()
                    && route.attributes.iter().any(|attr| {
                        matches!(attr, RouteAttribute::Destination(RouteAddress::Inet(addr)) if *addr == k.network)
                    })
            });
            if matches {
                found.push(route);
            }
        }
        Ok(found)
    }

    async fn remove(&self, routes: Vec<RouteMessage>) -> Result<()> {
        for route in routes {
            self.handle
                .route()
                .del(route)
                .execute()
                .await
                .map_err(|e| Error::Route(format!("cannot remove route: {}", e)))?;
        }
        Ok(())
    }
}

#[async_trait]
impl KernelRoutes for NetlinkRoutes {
    async fn add(&self, key: RouteKey, next_hop: Ipv4Addr) -> Result<()> {
        self.install(key, next_hop, false).await?;
        tracing::debug!(route = %key, next_hop = %next_hop, "kernel route added");
        Ok(())
    }

    async fn replace(&self, key: RouteKey, next_hop: Ipv4Addr) -> Result<()> {
        self.install(key, next_hop, true).await?;
        tracing::debug!(route = %key, next_hop = %next_hop, "kernel route replaced");
        Ok(())
    }

    async fn delete(&self, key: RouteKey) -> Result<()> {
        let routes = self.owned(Some(key)).await?;
        if routes.is_empty() {
            // Route not found is not an error
            tracing::debug!(route = %key, "no kernel route to delete");
            return Ok(());
        }
        self.remove(routes).await?;
        tracing::debug!(route = %key, "kernel route deleted");
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let routes = self.owned(None).await?;
        let count = routes.len();
        self.remove(routes).await?;
        tracing::info!(count, "flushed kernel routes");
        Ok(())
    }
}
