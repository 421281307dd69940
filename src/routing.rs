// src/routing.rs
//! Adjacency table: the distance-vector core of the daemon.
//!
//! One entry per destination (network, mask). Each entry is either
//! active (metric < 16) or killed (metric 16, waiting for garbage
//! collection). Accepted RESPONSE entries move entries between those
//! states; the aging sweep kills entries that were not refreshed within
//! the timeout and deletes killed ones once the garbage interval passed.
//!
//! Every mutation returns the kernel operations it implies so that the
//! caller can apply them after the table lock is released.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Instant;

use crate::config::Timers;
use crate::entry::{AFI_INET, INFINITY, RouteEntry};
use crate::kernel::KernelOp;
use crate::packet::{Command, Pdu};

/// Key identifying a destination: network address and subnet mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey {
    pub network: Ipv4Addr,
    pub mask: Ipv4Addr,
}

impl RouteKey {
    pub fn new(network: Ipv4Addr, mask: Ipv4Addr) -> Self {
        RouteKey { network, mask }
    }

    pub fn prefix_len(&self) -> u8 {
        u32::from(self.mask).count_ones() as u8
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len())
    }
}

/// Best known route to one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjEntry {
    pub next_hop: Ipv4Addr,
    /// Interface the route was learned on.
    pub iface: String,
    pub metric: u32,
    pub tag: u16,
    /// Last refresh.
    pub updated: Instant,
    pub killed: bool,
    /// Dirty bit for triggered updates.
    pub changed: bool,
}

impl AdjEntry {
    fn new(e: &RouteEntry, next_hop: Ipv4Addr, iface: &str, metric: u32, now: Instant) -> Self {
        AdjEntry {
            next_hop,
            iface: iface.to_string(),
            metric,
            tag: e.tag,
            updated: now,
            killed: metric >= INFINITY,
            changed: true,
        }
    }

    /// The entry as advertised to others: we are the next hop.
    pub fn to_route_entry(&self, key: &RouteKey) -> RouteEntry {
        RouteEntry {
            tag: self.tag,
            ..RouteEntry::new(key.network, key.mask, self.metric)
        }
    }
}

impl fmt::Display for AdjEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "via {} dev {} metric {} age {}s{}{}",
            self.next_hop,
            self.iface,
            self.metric,
            Instant::now().saturating_duration_since(self.updated).as_secs(),
            if self.killed { " killed" } else { "" },
            if self.changed { " changed" } else { "" },
        )
    }
}

/// What a REQUEST asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestReply {
    /// The whole table, as a regular update to the requester.
    FullTable,
    /// The requested entries with our metrics filled in.
    Entries(Vec<RouteEntry>),
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<RouteKey, AdjEntry>,
    changed: bool,
}

/// In-memory adjacency table guarded by a single exclusive lock.
#[derive(Debug, Default)]
pub struct AdjacencyTable {
    inner: Mutex<Inner>,
}

impl AdjacencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &RouteKey) -> Option<AdjEntry> {
        self.inner.lock().entries.get(key).cloned()
    }

    /// Metric of a destination, infinity when unknown.
    pub fn metric(&self, key: &RouteKey) -> u32 {
        self.inner
            .lock()
            .entries
            .get(key)
            .map(|e| e.metric)
            .unwrap_or(INFINITY)
    }

    /// Whether any entry changed since the last triggered update.
    pub fn has_changes(&self) -> bool {
        self.inner.lock().changed
    }

    /// Clear every dirty bit in one pass.
    pub fn clear_changed(&self) {
        let mut inner = self.inner.lock();
        for e in inner.entries.values_mut() {
            e.changed = false;
        }
        inner.changed = false;
    }

    /// Copy of the table, sorted by key.
    pub fn snapshot(&self) -> Vec<(RouteKey, AdjEntry)> {
        let mut all: Vec<_> = self
            .inner
            .lock()
            .entries
            .iter()
            .map(|(k, e)| (*k, e.clone()))
            .collect();
        all.sort_by_key(|(k, _)| *k);
        all
    }

    /// Run every route entry of a validated RESPONSE through the
    /// distance-vector update rules.
    pub fn response_process(
        &self,
        pdu: &Pdu,
        src: Ipv4Addr,
        iface: &str,
        now: Instant,
    ) -> Vec<KernelOp> {
        let mut ops = Vec::new();
        if pdu.command != Command::Response {
            return ops;
        }
        let mut inner = self.inner.lock();
        for e in pdu.entries.iter().filter(|e| e.afi == AFI_INET) {
            inner.apply(e, src, iface, now, &mut ops);
        }
        ops
    }

    /// Feed directly connected subnets into the table as metric-0
    /// advertisements from the loopback address.
    pub fn sync_connected(&self, routes: &[(RouteKey, String)], now: Instant) -> Vec<KernelOp> {
        let mut ops = Vec::new();
        let mut inner = self.inner.lock();
        for (key, iface) in routes {
            let e = RouteEntry::new(key.network, key.mask, 0);
            inner.apply(&e, Ipv4Addr::LOCALHOST, iface, now, &mut ops);
        }
        ops
    }

    /// Answer a REQUEST. Specific requests get our metric for every
    /// requested destination (infinity when unknown).
    pub fn request_process(&self, pdu: &Pdu) -> RequestReply {
        if pdu.is_full_table_request() {
            return RequestReply::FullTable;
        }
        let inner = self.inner.lock();
        let entries = pdu
            .entries
            .iter()
            .map(|e| {
                let key = RouteKey::new(e.network, e.mask);
                let metric = inner
                    .entries
                    .get(&key)
                    .map(|a| a.metric)
                    .unwrap_or(INFINITY);
                RouteEntry { metric, ..*e }
            })
            .collect();
        RequestReply::Entries(entries)
    }

    /// Kill entries not refreshed within the timeout and delete killed
    /// entries whose garbage interval elapsed.
    pub fn age(&self, timers: &Timers, now: Instant) -> Vec<KernelOp> {
        let timeout = timers.timeout_interval();
        let garbage = timeout + timers.garbage_interval();
        let mut ops = Vec::new();
        let mut killed_any = false;

        let mut inner = self.inner.lock();
        inner.entries.retain(|key, e| {
            let age = now.saturating_duration_since(e.updated);
            if !e.killed && age > timeout {
                e.metric = INFINITY;
                e.killed = true;
                e.changed = true;
                killed_any = true;
            } else if e.killed && age > garbage {
                ops.push(KernelOp::Delete {
                    key: *key,
                    next_hop: e.next_hop,
                });
                return false;
            }
            true
        });
        inner.changed |= killed_any;
        ops
    }
}

impl Inner {
    fn apply(
        &mut self,
        e: &RouteEntry,
        src: Ipv4Addr,
        iface: &str,
        now: Instant,
        ops: &mut Vec<KernelOp>,
    ) {
        let key = RouteKey::new(e.network, e.mask);
        let metric = e.metric.saturating_add(1).min(INFINITY);
        let next_hop = if e.next_hop.is_unspecified() {
            src
        } else {
            e.next_hop
        };

        let Some(cur) = self.entries.get_mut(&key) else {
            if metric < INFINITY {
                self.entries
                    .insert(key, AdjEntry::new(e, next_hop, iface, metric, now));
                self.changed = true;
                ops.push(KernelOp::Add { key, next_hop });
            }
            return;
        };

        if cur.next_hop == next_hop {
            if metric == INFINITY && !cur.killed {
                cur.metric = INFINITY;
                cur.killed = true;
                cur.changed = true;
                cur.updated = now;
                self.changed = true;
            } else if metric != cur.metric {
                // The incumbent's word is authoritative, better or worse.
                cur.metric = metric;
                cur.tag = e.tag;
                cur.updated = now;
                cur.killed = false;
                cur.changed = true;
                self.changed = true;
            } else {
                cur.updated = now;
            }
            return;
        }

        let wins = metric < cur.metric || (metric == cur.metric && cur.killed);
        if wins {
            *cur = AdjEntry::new(e, next_hop, iface, metric, now);
            self.changed = true;
            ops.push(KernelOp::Replace { key, next_hop });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ip(a: u8, b: u8, c: u8, d: u8) -> Ipv4Addr {
        Ipv4Addr::new(a, b, c, d)
    }

    fn key() -> RouteKey {
        RouteKey::new(ip(10, 0, 0, 0), ip(255, 255, 255, 0))
    }

    fn advert(metric: u32) -> Pdu {
        Pdu::response(vec![RouteEntry::new(key().network, key().mask, metric)])
    }

    const A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
    const B: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 3);

    #[test]
    fn new_route_is_added() {
        let tbl = AdjacencyTable::new();
        let now = Instant::now();
        let ops = tbl.response_process(&advert(1), A, "eth0", now);

        let e = tbl.get(&key()).unwrap();
        assert_eq!(e.metric, 2);
        assert_eq!(e.next_hop, A);
        assert!(!e.killed);
        assert!(e.changed);
        assert!(tbl.has_changes());
        assert_eq!(ops, vec![KernelOp::Add { key: key(), next_hop: A }]);
    }

    #[test]
    fn unreachable_route_is_not_created() {
        let tbl = AdjacencyTable::new();
        let ops = tbl.response_process(&advert(15), A, "eth0", Instant::now());
        assert!(ops.is_empty());
        assert!(tbl.is_empty());
    }

    #[test]
    fn metric_never_exceeds_infinity() {
        let tbl = AdjacencyTable::new();
        let now = Instant::now();
        tbl.response_process(&advert(3), A, "eth0", now);
        for m in [u32::MAX, 16, 15, 200] {
            tbl.response_process(&advert(m), A, "eth0", now);
            assert!(tbl.get(&key()).unwrap().metric <= INFINITY);
        }
    }

    #[test]
    fn identical_advert_only_refreshes() {
        let tbl = AdjacencyTable::new();
        let now = Instant::now();
        tbl.response_process(&advert(1), A, "eth0", now);
        tbl.clear_changed();

        let later = now + Duration::from_secs(30);
        let ops = tbl.response_process(&advert(1), A, "eth0", later);
        let e = tbl.get(&key()).unwrap();
        assert!(ops.is_empty());
        assert!(!e.changed);
        assert!(!tbl.has_changes());
        assert_eq!(e.metric, 2);
        assert_eq!(e.next_hop, A);
        assert_eq!(e.updated, later);
    }

    #[test]
    fn incumbent_withdrawal_kills_without_kernel_call() {
        let tbl = AdjacencyTable::new();
        let now = Instant::now();
        tbl.response_process(&advert(1), A, "eth0", now);
        tbl.clear_changed();

        let ops = tbl.response_process(&advert(16), A, "eth0", now);
        let e = tbl.get(&key()).unwrap();
        assert!(ops.is_empty());
        assert!(e.killed);
        assert_eq!(e.metric, INFINITY);
        assert!(e.changed);
    }

    #[test]
    fn killed_route_is_collected() {
        let tbl = AdjacencyTable::new();
        let timers = Timers::default();
        let now = Instant::now();
        tbl.response_process(&advert(1), A, "eth0", now);
        tbl.response_process(&advert(16), A, "eth0", now);

        let just_before = now + timers.timeout_interval() + timers.garbage_interval();
        assert!(tbl.age(&timers, just_before).is_empty());
        assert_eq!(tbl.len(), 1);

        let after = just_before + Duration::from_secs(1);
        let ops = tbl.age(&timers, after);
        assert_eq!(ops, vec![KernelOp::Delete { key: key(), next_hop: A }]);
        assert!(tbl.is_empty());
    }

    #[test]
    fn repeated_withdrawal_keeps_killed_route_alive() {
        let tbl = AdjacencyTable::new();
        let timers = Timers::default();
        let now = Instant::now();
        tbl.response_process(&advert(1), A, "eth0", now);
        tbl.response_process(&advert(16), A, "eth0", now);
        tbl.clear_changed();

        let later = now + Duration::from_secs(60);
        let ops = tbl.response_process(&advert(16), A, "eth0", later);
        let e = tbl.get(&key()).unwrap();
        assert!(ops.is_empty());
        assert!(e.killed);
        assert!(!e.changed);
        assert!(!tbl.has_changes());
        assert_eq!(e.metric, INFINITY);
        assert_eq!(e.updated, later);

        // Collection now counts from the last withdrawal.
        let deadline = later + timers.timeout_interval() + timers.garbage_interval();
        assert!(tbl.age(&timers, deadline).is_empty());
        assert_eq!(tbl.len(), 1);
        assert_eq!(tbl.age(&timers, deadline + Duration::from_secs(1)).len(), 1);
        assert!(tbl.is_empty());
    }

    #[test]
    fn incumbent_revives_its_killed_route() {
        let tbl = AdjacencyTable::new();
        let now = Instant::now();
        tbl.response_process(&advert(1), A, "eth0", now);
        tbl.response_process(&advert(16), A, "eth0", now);
        tbl.clear_changed();

        let later = now + Duration::from_secs(10);
        let ops = tbl.response_process(&advert(3), A, "eth0", later);
        let e = tbl.get(&key()).unwrap();
        assert!(ops.is_empty());
        assert!(!e.killed);
        assert!(e.changed);
        assert!(tbl.has_changes());
        assert_eq!(e.metric, 4);
        assert_eq!(e.next_hop, A);
        assert_eq!(e.updated, later);
    }

    #[test]
    fn silent_route_times_out_then_is_collected() {
        let tbl = AdjacencyTable::new();
        let timers = Timers::default();
        let now = Instant::now();
        tbl.response_process(&advert(1), A, "eth0", now);
        tbl.clear_changed();

        let t1 = now + timers.timeout_interval() + Duration::from_secs(1);
        assert!(tbl.age(&timers, t1).is_empty());
        let e = tbl.get(&key()).unwrap();
        assert!(e.killed && e.changed);
        assert_eq!(e.metric, INFINITY);
        assert!(tbl.has_changes());

        let t2 = t1 + timers.garbage_interval();
        assert_eq!(tbl.age(&timers, t2).len(), 1);
        assert!(tbl.is_empty());
    }

    #[test]
    fn better_alternate_replaces() {
        let tbl = AdjacencyTable::new();
        let now = Instant::now();
        tbl.response_process(&advert(5), A, "eth0", now);
        let ops = tbl.response_process(&advert(2), B, "eth1", now);

        let e = tbl.get(&key()).unwrap();
        assert_eq!(e.next_hop, B);
        assert_eq!(e.iface, "eth1");
        assert_eq!(e.metric, 3);
        assert_eq!(ops, vec![KernelOp::Replace { key: key(), next_hop: B }]);
    }

    #[test]
    fn equal_or_worse_alternate_is_ignored() {
        let tbl = AdjacencyTable::new();
        let now = Instant::now();
        tbl.response_process(&advert(2), A, "eth0", now);
        tbl.clear_changed();
        assert!(tbl.response_process(&advert(2), B, "eth1", now).is_empty());
        assert!(tbl.response_process(&advert(7), B, "eth1", now).is_empty());
        assert_eq!(tbl.get(&key()).unwrap().next_hop, A);
        assert!(!tbl.has_changes());
    }

    #[test]
    fn alternate_wins_tie_against_killed_incumbent() {
        let tbl = AdjacencyTable::new();
        let now = Instant::now();
        tbl.response_process(&advert(2), A, "eth0", now);
        tbl.response_process(&advert(16), A, "eth0", now);

        let ops = tbl.response_process(&advert(16), B, "eth1", now);
        assert_eq!(ops, vec![KernelOp::Replace { key: key(), next_hop: B }]);
        let e = tbl.get(&key()).unwrap();
        assert_eq!(e.next_hop, B);
        assert!(e.killed);
    }

    #[test]
    fn alternate_revives_killed_route() {
        let tbl = AdjacencyTable::new();
        let now = Instant::now();
        tbl.response_process(&advert(2), A, "eth0", now);
        tbl.response_process(&advert(16), A, "eth0", now);
        tbl.response_process(&advert(4), B, "eth1", now);

        let e = tbl.get(&key()).unwrap();
        assert_eq!(e.next_hop, B);
        assert_eq!(e.metric, 5);
        assert!(!e.killed);
    }

    #[test]
    fn incumbent_metric_changes_are_adopted() {
        let tbl = AdjacencyTable::new();
        let now = Instant::now();
        tbl.response_process(&advert(2), A, "eth0", now);
        tbl.response_process(&advert(6), A, "eth0", now);
        assert_eq!(tbl.get(&key()).unwrap().metric, 7);
        tbl.response_process(&advert(1), A, "eth0", now);
        assert_eq!(tbl.get(&key()).unwrap().metric, 2);
    }

    #[test]
    fn explicit_next_hop_is_used() {
        let tbl = AdjacencyTable::new();
        let mut pdu = advert(1);
        pdu.entries[0].next_hop = B;
        tbl.response_process(&pdu, A, "eth0", Instant::now());
        assert_eq!(tbl.get(&key()).unwrap().next_hop, B);
    }

    #[test]
    fn requests_are_not_ingested() {
        let tbl = AdjacencyTable::new();
        let mut pdu = advert(1);
        pdu.command = Command::Request;
        assert!(tbl.response_process(&pdu, A, "eth0", Instant::now()).is_empty());
        assert!(tbl.is_empty());
    }

    #[test]
    fn connected_routes_use_loopback_next_hop() {
        let tbl = AdjacencyTable::new();
        let now = Instant::now();
        let ops = tbl.sync_connected(&[(key(), "eth0".to_string())], now);
        let e = tbl.get(&key()).unwrap();
        assert_eq!(e.metric, 1);
        assert_eq!(e.next_hop, Ipv4Addr::LOCALHOST);
        assert!(ops.iter().all(|op| op.is_local()));

        // A neighbor cannot beat a connected route.
        assert!(tbl.response_process(&advert(0), A, "eth0", now).is_empty());
    }

    #[test]
    fn specific_request_echoes_metrics() {
        let tbl = AdjacencyTable::new();
        tbl.response_process(&advert(3), A, "eth0", Instant::now());

        let unknown = RouteEntry::new(ip(172, 16, 0, 0), ip(255, 240, 0, 0), 0);
        let mut req = advert(0);
        req.command = Command::Request;
        req.entries.push(unknown);

        match tbl.request_process(&req) {
            RequestReply::Entries(entries) => {
                assert_eq!(entries[0].metric, 4);
                assert_eq!(entries[1].metric, INFINITY);
                assert_eq!(entries[1].network, unknown.network);
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(
            tbl.request_process(&Pdu::request_full_table()),
            RequestReply::FullTable
        );
    }

    #[test]
    fn clear_changed_resets_all_entries() {
        let tbl = AdjacencyTable::new();
        let now = Instant::now();
        tbl.response_process(&advert(1), A, "eth0", now);
        tbl.response_process(
            &Pdu::response(vec![RouteEntry::new(ip(10, 9, 0, 0), ip(255, 255, 0, 0), 1)]),
            A,
            "eth0",
            now,
        );
        tbl.clear_changed();
        assert!(tbl.snapshot().iter().all(|(_, e)| !e.changed));
        assert!(!tbl.has_changes());
    }

    #[test]
    fn route_key_display() {
        assert_eq!(key().to_string(), "10.0.0.0/24");
    }
}
