// src/node.rs
//! High-level RIP router.
//!
//! This ties the codec, the authenticator and both tables to a transport
//! and a kernel backend: inbound datagrams are classified, validated and
//! applied, outbound updates are fanned out to every destination.

use parking_lot::RwLock;
use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::auth::{self, KeyChain};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::kernel::{self, KernelRoutes};
use crate::neighbor::NeighborTable;
use crate::packet::{Command, Pdu, RIP_PORT};
use crate::routing::{AdjacencyTable, RequestReply};
use crate::transport::{Datagram, Transport};
use crate::update::{self, Destination, UpdateMode};

/// Current time on the runtime clock (follows paused time in tests).
pub fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Shared state of a running daemon.
pub struct Router {
    config: RwLock<Arc<Config>>,
    config_path: Option<PathBuf>,
    pub adjacency: AdjacencyTable,
    pub neighbors: NeighborTable,
    transport: Arc<dyn Transport>,
    kernel: Arc<dyn KernelRoutes>,
}

impl Router {
    pub fn new(
        config: Config,
        config_path: Option<PathBuf>,
        transport: Arc<dyn Transport>,
        kernel: Arc<dyn KernelRoutes>,
    ) -> Self {
        let neighbors = NeighborTable::with_static(config.neighbors.keys().copied(), now());
        Router {
            config: RwLock::new(Arc::new(config)),
            config_path,
            adjacency: AdjacencyTable::new(),
            neighbors,
            transport,
            kernel,
        }
    }

    pub fn config(&self) -> Arc<Config> {
        self.config.read().clone()
    }

    /// Re-read the configuration file and re-join multicast groups.
    /// The caller resets the adjacency scheduler afterwards.
    pub fn reload(&self) -> Result<Arc<Config>> {
        let Some(path) = &self.config_path else {
            return Ok(self.config());
        };
        let cfg = Arc::new(Config::load(path)?);
        self.transport.rejoin(&cfg)?;
        self.neighbors
            .set_static(cfg.neighbors.keys().copied(), now());
        *self.config.write() = cfg.clone();
        tracing::info!(path = %path.display(), "configuration reloaded");
        Ok(cfg)
    }

    /// Receive forever, handling each datagram on its own task.
    pub async fn run_receiver(self: Arc<Self>) {
        loop {
            match self.transport.recv().await {
                Ok(dgram) => {
                    let router = self.clone();
                    tokio::spawn(async move {
                        let src = dgram.src;
                        if let Err(e) = router.handle_datagram(dgram).await {
                            log_drop(src, &e);
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "receive failed"),
            }
        }
    }

    /// Full inbound pipeline for one datagram.
    pub async fn handle_datagram(&self, dgram: Datagram) -> Result<()> {
        let cfg = self.config();
        let src = *dgram.src.ip();
        let iface = self.source_iface(&cfg, &dgram)?;

        let mut pdu = Pdu::from_bytes(&dgram.payload)?;
        let chain = cfg.keychain_for(src, &iface).cloned().unwrap_or_default();
        auth::validate(&pdu, &dgram.payload, &chain)?;
        tracing::debug!(
            src = %src,
            iface = %iface,
            command = ?pdu.command,
            entries = pdu.entries.len(),
            "received pdu"
        );

        let now = now();
        if self.neighbors.update(src, &iface, pdu.auth.is_some(), now) {
            tracing::info!(neighbor = %src, iface = %iface, "neighbor up");
        }

        match pdu.command {
            Command::Response => {
                if dgram.src.port() != RIP_PORT {
                    tracing::debug!(src = %dgram.src, "response not from the RIP port");
                    return Ok(());
                }
                for network in pdu.sanitize() {
                    tracing::warn!(src = %src, network = %network, "invalid route forced unreachable");
                }
                let ops = self.adjacency.response_process(&pdu, src, &iface, now);
                kernel::apply(&*self.kernel, ops).await;
            }
            Command::Request => {
                self.answer_request(&cfg, &pdu, dgram.src, &iface, &chain)
                    .await;
            }
        }
        Ok(())
    }

    /// Classify the sender: its interface (or neighbor identity), or a
    /// source error for our own packets and strangers.
    fn source_iface(&self, cfg: &Config, dgram: &Datagram) -> Result<String> {
        let src = *dgram.src.ip();
        if self.transport.local().is_local(src) {
            return Err(Error::Source(src));
        }
        if cfg.neighbors.contains_key(&src) {
            return Ok(dgram.iface.clone().unwrap_or_else(|| src.to_string()));
        }
        match &dgram.iface {
            Some(name) if cfg.interfaces.contains_key(name) => Ok(name.clone()),
            _ => Err(Error::Source(src)),
        }
    }

    async fn answer_request(
        &self,
        cfg: &Config,
        pdu: &Pdu,
        requester: SocketAddrV4,
        iface: &str,
        chain: &KeyChain,
    ) {
        let src = *requester.ip();
        let datagrams = match self.adjacency.request_process(pdu) {
            RequestReply::FullTable => {
                let dest = if cfg.neighbors.contains_key(&src) {
                    Destination::Neighbor(src)
                } else {
                    Destination::Interface(iface.to_string())
                };
                let snapshot = self.adjacency.snapshot();
                update::build(&snapshot, UpdateMode::Regular, &dest, chain, cfg.max_entries())
            }
            RequestReply::Entries(entries) => {
                update::encode_reply(entries, chain, cfg.max_entries())
            }
        };
        for payload in datagrams {
            if let Err(e) = self.transport.send_unicast(&payload, requester).await {
                tracing::warn!(dest = %requester, error = %e, "reply failed");
            }
        }
    }

    async fn send_to(&self, dest: &Destination, payload: &[u8]) {
        let result = match dest {
            Destination::Interface(name) => self.transport.send_multicast(payload, name).await,
            Destination::Neighbor(ip) => {
                self.transport
                    .send_unicast(payload, SocketAddrV4::new(*ip, RIP_PORT))
                    .await
            }
        };
        if let Err(e) = result {
            tracing::warn!(dest = %dest, error = %e, "send failed");
        }
    }

    /// Send a `mode` update to every configured destination. After a
    /// CHANGED round the dirty bits are cleared once for the whole table.
    pub async fn send_updates(&self, cfg: &Config, mode: UpdateMode) {
        for (dest, chain) in update::destinations(cfg) {
            let snapshot = self.adjacency.snapshot();
            for payload in update::build(&snapshot, mode, &dest, &chain, cfg.max_entries()) {
                self.send_to(&dest, &payload).await;
            }
        }
        if mode == UpdateMode::Changed {
            self.adjacency.clear_changed();
        }
    }

    /// Ask every destination for its whole table.
    pub async fn request_tables(&self, cfg: &Config) {
        for (dest, chain) in update::destinations(cfg) {
            let payload = auth::sign(Pdu::request_full_table(), &chain);
            self.send_to(&dest, &payload).await;
        }
    }

    /// Feed the subnets of the configured interfaces into the table.
    pub async fn sync_connected(&self, cfg: &Config) {
        let routes = self.transport.local().connected(cfg.interfaces.keys());
        let ops = self.adjacency.sync_connected(&routes, now());
        kernel::apply(&*self.kernel, ops).await;
    }

    /// Adjacency aging; returns whether a triggered update is due.
    pub async fn age_routes(&self, cfg: &Config) -> bool {
        let ops = self.adjacency.age(&cfg.timers, now());
        kernel::apply(&*self.kernel, ops).await;
        self.adjacency.has_changes()
    }

    pub fn age_neighbors(&self) {
        let (down, removed) = self.neighbors.age(now());
        for ip in down {
            tracing::info!(neighbor = %ip, "neighbor down");
        }
        for ip in removed {
            tracing::info!(neighbor = %ip, "neighbor removed");
        }
    }

    pub fn dump_adjacency(&self) {
        let snapshot = self.adjacency.snapshot();
        tracing::info!("adjacency table: {} entries", snapshot.len());
        for (key, e) in snapshot {
            tracing::info!("  {} {}", key, e);
        }
    }

    pub fn dump_neighbors(&self) {
        let snapshot = self.neighbors.snapshot();
        tracing::info!("neighbor table: {} entries", snapshot.len());
        for (ip, n) in snapshot {
            tracing::info!("  {} {}", ip, n);
        }
    }
}

fn log_drop(src: SocketAddrV4, e: &Error) {
    match e {
        Error::Source(_) => tracing::trace!(src = %src, "ignoring packet from unexpected source"),
        Error::Auth(_) => tracing::warn!(src = %src, error = %e, "authentication failed"),
        _ => tracing::debug!(src = %src, error = %e, "dropping packet"),
    }
}
