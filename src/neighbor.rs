// src/neighbor.rs
//! Neighbor tracking for a RIP router.
//!
//! This module handles:
//! - Seeding statically configured neighbors
//! - Refreshing neighbors on every authenticated packet
//! - Marking silent neighbors down and purging dynamic ones
//!
//! The table owns its lock; every read-modify-write happens in one
//! critical section.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// Silence after which a neighbor is marked down.
pub const DOWN_AFTER: Duration = Duration::from_secs(600);
/// Silence after which a dynamic neighbor is forgotten.
pub const PURGE_AFTER: Duration = Duration::from_secs(3600);

pub const FLAG_UP: u8 = 1 << 0;
pub const FLAG_STATIC: u8 = 1 << 1;
pub const FLAG_AUTH: u8 = 1 << 2;

/// Representation of a RIP neighbor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    /// Bitset of `FLAG_UP`, `FLAG_STATIC`, `FLAG_AUTH`.
    pub flags: u8,
    /// Time of the last accepted packet (or of seeding).
    pub last_seen: Instant,
    /// Interface the last packet arrived on.
    pub iface: Option<String>,
}

impl Neighbor {
    pub fn new(flags: u8, now: Instant) -> Self {
        Neighbor {
            flags,
            last_seen: now,
            iface: None,
        }
    }

    pub fn is_up(&self) -> bool {
        self.flags & FLAG_UP != 0
    }

    pub fn is_static(&self) -> bool {
        self.flags & FLAG_STATIC != 0
    }

    pub fn is_authenticated(&self) -> bool {
        self.flags & FLAG_AUTH != 0
    }

    /// Called for every packet from this neighbor that passed authentication.
    pub fn note_packet(&mut self, iface: &str, authenticated: bool, now: Instant) {
        self.flags |= FLAG_UP;
        if authenticated {
            self.flags |= FLAG_AUTH;
        } else {
            self.flags &= !FLAG_AUTH;
        }
        self.last_seen = now;
        self.iface = Some(iface.to_string());
    }

    fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }
}

impl fmt::Display for Neighbor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{} last seen {}s ago on {}",
            if self.is_up() { "up" } else { "down" },
            if self.is_static() { " static" } else { "" },
            if self.is_authenticated() { " auth" } else { "" },
            self.silence(Instant::now()).as_secs(),
            self.iface.as_deref().unwrap_or("-"),
        )
    }
}

/// Table of all known neighbors.
#[derive(Debug, Default)]
pub struct NeighborTable {
    neighbors: Mutex<HashMap<Ipv4Addr, Neighbor>>,
}

impl NeighborTable {
    pub fn new() -> Self {
        NeighborTable {
            neighbors: Mutex::new(HashMap::new()),
        }
    }

    /// Table seeded with statically configured neighbors (initially down).
    pub fn with_static<I>(addrs: I, now: Instant) -> Self
    where
        I: IntoIterator<Item = Ipv4Addr>,
    {
        let tbl = NeighborTable::new();
        tbl.set_static(addrs, now);
        tbl
    }

    /// Make exactly `addrs` static, seeding the unknown ones down.
    pub fn set_static<I>(&self, addrs: I, now: Instant)
    where
        I: IntoIterator<Item = Ipv4Addr>,
    {
        let addrs: HashSet<Ipv4Addr> = addrs.into_iter().collect();
        let mut neighbors = self.neighbors.lock();
        for n in neighbors.values_mut() {
            n.flags &= !FLAG_STATIC;
        }
        for ip in addrs {
            neighbors
                .entry(ip)
                .or_insert_with(|| Neighbor::new(0, now))
                .flags |= FLAG_STATIC;
        }
    }

    pub fn get(&self, addr: Ipv4Addr) -> Option<Neighbor> {
        self.neighbors.lock().get(&addr).cloned()
    }

    pub fn len(&self) -> usize {
        self.neighbors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refresh a neighbor after an accepted packet. Returns true if the
    /// neighbor was unknown or down before.
    pub fn update(&self, addr: Ipv4Addr, iface: &str, authenticated: bool, now: Instant) -> bool {
        let mut neighbors = self.neighbors.lock();
        let n = neighbors
            .entry(addr)
            .or_insert_with(|| Neighbor::new(0, now));
        let came_up = !n.is_up();
        n.note_packet(iface, authenticated, now);
        came_up
    }

    /// Mark silent dynamic neighbors down and purge them once they stayed
    /// silent long enough. Static neighbors keep their state.
    /// Returns the addresses that went down and the ones removed.
    pub fn age(&self, now: Instant) -> (Vec<Ipv4Addr>, Vec<Ipv4Addr>) {
        let mut down = Vec::new();
        let mut removed = Vec::new();
        self.neighbors.lock().retain(|addr, n| {
            let silence = n.silence(now);
            if n.is_static() {
                return true;
            }
            if n.is_up() && silence > DOWN_AFTER {
                n.flags &= !FLAG_UP;
                down.push(*addr);
            }
            if !n.is_up() && silence > PURGE_AFTER {
                removed.push(*addr);
                return false;
            }
            true
        });
        (down, removed)
    }

    /// Copy of the table, sorted by address.
    pub fn snapshot(&self) -> Vec<(Ipv4Addr, Neighbor)> {
        let mut all: Vec<_> = self
            .neighbors
            .lock()
            .iter()
            .map(|(a, n)| (*a, n.clone()))
            .collect();
        all.sort_by_key(|(a, _)| *a);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Ipv4Addr {
        Ipv4Addr::new(192, 0, 2, 10)
    }

    #[test]
    fn packet_updates_neighbor() {
        let tbl = NeighborTable::new();
        let now = Instant::now();

        assert!(tbl.update(addr(), "eth0", true, now));
        let n = tbl.get(addr()).unwrap();
        assert!(n.is_up());
        assert!(n.is_authenticated());
        assert!(!n.is_static());
        assert_eq!(n.iface.as_deref(), Some("eth0"));

        assert!(!tbl.update(addr(), "eth0", false, now));
        assert!(!tbl.get(addr()).unwrap().is_authenticated());
    }

    #[test]
    fn static_neighbors_are_seeded_down() {
        let now = Instant::now();
        let tbl = NeighborTable::with_static([addr()], now);
        let n = tbl.get(addr()).unwrap();
        assert!(n.is_static());
        assert!(!n.is_up());

        tbl.update(addr(), "eth1", false, now);
        let n = tbl.get(addr()).unwrap();
        assert!(n.is_static());
        assert!(n.is_up());
    }

    #[test]
    fn silent_neighbor_goes_down_then_away() {
        let tbl = NeighborTable::new();
        let now = Instant::now();
        tbl.update(addr(), "eth0", false, now);

        let (down, removed) = tbl.age(now + Duration::from_secs(601));
        assert_eq!(down, vec![addr()]);
        assert!(removed.is_empty());
        assert!(!tbl.get(addr()).unwrap().is_up());

        let (down, removed) = tbl.age(now + Duration::from_secs(3601));
        assert!(down.is_empty());
        assert_eq!(removed, vec![addr()]);
        assert!(tbl.is_empty());
    }

    #[test]
    fn static_neighbor_is_never_removed() {
        let now = Instant::now();
        let tbl = NeighborTable::with_static([addr()], now);
        tbl.update(addr(), "eth0", false, now);

        let (down, _) = tbl.age(now + Duration::from_secs(700));
        assert!(down.is_empty());
        assert!(tbl.get(addr()).unwrap().is_up());
        let (_, removed) = tbl.age(now + Duration::from_secs(100_000));
        assert!(removed.is_empty());
        assert_eq!(tbl.len(), 1);
    }

    #[test]
    fn reload_moves_static_flag() {
        let now = Instant::now();
        let other = Ipv4Addr::new(192, 0, 2, 20);
        let tbl = NeighborTable::with_static([addr()], now);
        tbl.set_static([other], now);

        assert!(!tbl.get(addr()).unwrap().is_static());
        assert!(tbl.get(other).unwrap().is_static());
        assert!(!tbl.get(other).unwrap().is_up());

        // The former static neighbor now ages like any other.
        let (_, removed) = tbl.age(now + Duration::from_secs(3601));
        assert_eq!(removed, vec![addr()]);
    }

    #[test]
    fn active_neighbor_is_kept() {
        let tbl = NeighborTable::new();
        let now = Instant::now();
        tbl.update(addr(), "eth0", false, now);
        let (down, removed) = tbl.age(now + Duration::from_secs(30));
        assert!(down.is_empty() && removed.is_empty());
        assert!(tbl.get(addr()).unwrap().is_up());
    }
}
