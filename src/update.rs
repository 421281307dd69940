// src/update.rs
//! Outbound update generation.
//!
//! Updates are built per destination from a table snapshot: entries are
//! selected by mode, filtered by split-horizon, spread over as many PDUs
//! as the size limit requires and finally authenticated with the
//! destination's key chain.

use std::fmt;
use std::net::Ipv4Addr;

use crate::auth::{self, KeyChain};
use crate::config::Config;
use crate::entry::RouteEntry;
use crate::packet::Pdu;
use crate::routing::{AdjEntry, RouteKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Every entry, active and killed.
    Regular,
    /// Only entries whose dirty bit is set.
    Changed,
}

/// Where an update goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Multicast on a non-passive interface.
    Interface(String),
    /// Unicast to a configured neighbor.
    Neighbor(Ipv4Addr),
}

impl Destination {
    /// Split-horizon: never advertise a route back where it came from.
    fn suppresses(&self, e: &AdjEntry) -> bool {
        match self {
            Destination::Interface(name) => e.iface == *name,
            Destination::Neighbor(ip) => e.next_hop == *ip,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Interface(name) => write!(f, "dev {}", name),
            Destination::Neighbor(ip) => write!(f, "neighbor {}", ip),
        }
    }
}

/// Every destination of a broadcast with the key chain to sign for it:
/// configured neighbors first, then non-passive interfaces.
pub fn destinations(cfg: &Config) -> Vec<(Destination, KeyChain)> {
    let neighbors = cfg
        .neighbors
        .iter()
        .map(|(ip, n)| (Destination::Neighbor(*ip), n.key_chain.clone()));
    let interfaces = cfg
        .active_interfaces()
        .map(|(name, i)| (Destination::Interface(name.clone()), i.key_chain.clone()));
    neighbors.chain(interfaces).collect()
}

/// Entries of `snapshot` to advertise towards `dest`.
pub fn select(
    snapshot: &[(RouteKey, AdjEntry)],
    mode: UpdateMode,
    dest: &Destination,
) -> Vec<RouteEntry> {
    snapshot
        .iter()
        .filter(|(_, e)| mode == UpdateMode::Regular || e.changed)
        .filter(|(_, e)| !dest.suppresses(e))
        .map(|(k, e)| e.to_route_entry(k))
        .collect()
}

/// Spread entries round-robin over the fewest RESPONSE PDUs that keep
/// each one within `limit` entries.
pub fn fragment(entries: Vec<RouteEntry>, limit: usize) -> Vec<Pdu> {
    if entries.is_empty() {
        return Vec::new();
    }
    let limit = limit.max(1);
    let count = entries.len().div_ceil(limit);
    let mut pdus = vec![Pdu::response(Vec::with_capacity(limit)); count];
    for (i, e) in entries.into_iter().enumerate() {
        pdus[i % count].entries.push(e);
    }
    pdus
}

/// Cut entries into consecutive RESPONSE PDUs of at most `limit`
/// entries, keeping their order.
pub fn chunk(entries: Vec<RouteEntry>, limit: usize) -> Vec<Pdu> {
    entries
        .chunks(limit.max(1))
        .map(|part| Pdu::response(part.to_vec()))
        .collect()
}

fn capacity(chain: &KeyChain, max_entries: usize) -> usize {
    max_entries.saturating_sub(chain.auth_type.overhead())
}

fn sign_all(pdus: Vec<Pdu>, chain: &KeyChain) -> Vec<Vec<u8>> {
    pdus.into_iter().map(|pdu| auth::sign(pdu, chain)).collect()
}

/// Authenticated datagrams carrying `entries` for a destination signed
/// with `chain`.
pub fn encode(entries: Vec<RouteEntry>, chain: &KeyChain, max_entries: usize) -> Vec<Vec<u8>> {
    sign_all(fragment(entries, capacity(chain, max_entries)), chain)
}

/// Like [`encode`], but the entries keep the order they were asked in.
/// Used for answers to specific requests.
pub fn encode_reply(
    entries: Vec<RouteEntry>,
    chain: &KeyChain,
    max_entries: usize,
) -> Vec<Vec<u8>> {
    sign_all(chunk(entries, capacity(chain, max_entries)), chain)
}

/// Datagrams of a `mode` update towards one destination.
pub fn build(
    snapshot: &[(RouteKey, AdjEntry)],
    mode: UpdateMode,
    dest: &Destination,
    chain: &KeyChain,
    max_entries: usize,
) -> Vec<Vec<u8>> {
    encode(select(snapshot, mode, dest), chain, max_entries)
}
