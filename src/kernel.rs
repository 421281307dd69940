//! Kernel forwarding-table contract.
//!
//! The adjacency table never touches the kernel while it holds its lock;
//! it returns [`KernelOp`]s which the caller applies afterwards.

use async_trait::async_trait;
use std::net::Ipv4Addr;

use crate::error::Result;
use crate::routing::RouteKey;

/// A change the kernel forwarding table must follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelOp {
    Add { key: RouteKey, next_hop: Ipv4Addr },
    Replace { key: RouteKey, next_hop: Ipv4Addr },
    Delete { key: RouteKey, next_hop: Ipv4Addr },
}

impl KernelOp {
    pub fn key(&self) -> RouteKey {
        match *self {
            KernelOp::Add { key, .. } | KernelOp::Replace { key, .. } | KernelOp::Delete { key, .. } => {
                key
            }
        }
    }

    fn next_hop(&self) -> Ipv4Addr {
        match *self {
            KernelOp::Add { next_hop, .. }
            | KernelOp::Replace { next_hop, .. }
            | KernelOp::Delete { next_hop, .. } => next_hop,
        }
    }

    /// Connected routes are owned by the kernel already.
    pub fn is_local(&self) -> bool {
        self.next_hop().is_loopback() || self.next_hop().is_unspecified()
    }
}

/// Kernel route table operations used by the daemon.
#[async_trait]
pub trait KernelRoutes: Send + Sync + 'static {
    async fn add(&self, key: RouteKey, next_hop: Ipv4Addr) -> Result<()>;

    async fn replace(&self, key: RouteKey, next_hop: Ipv4Addr) -> Result<()>;

    async fn delete(&self, key: RouteKey) -> Result<()>;

    /// Remove every route this daemon installed.
    async fn flush(&self) -> Result<()>;
}

/// Apply table changes to the kernel. Failures are logged and dropped;
/// the next state transition of the entry retries implicitly.
pub async fn apply<K: KernelRoutes + ?Sized>(kernel: &K, ops: Vec<KernelOp>) {
    for op in ops {
        if op.is_local() {
            continue;
        }
        let result = match op {
            KernelOp::Add { key, next_hop } => kernel.add(key, next_hop).await,
            KernelOp::Replace { key, next_hop } => kernel.replace(key, next_hop).await,
            KernelOp::Delete { key, .. } => kernel.delete(key).await,
        };
        if let Err(e) = result {
            tracing::warn!(route = %op.key(), error = %e, "kernel route update failed");
        }
    }
}

/// Kernel backend that only records the calls in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingRoutes;

#[async_trait]
impl KernelRoutes for LoggingRoutes {
    async fn add(&self, key: RouteKey, next_hop: Ipv4Addr) -> Result<()> {
        tracing::info!(route = %key, next_hop = %next_hop, "route add");
        Ok(())
    }

    async fn replace(&self, key: RouteKey, next_hop: Ipv4Addr) -> Result<()> {
        tracing::info!(route = %key, next_hop = %next_hop, "route replace");
        Ok(())
    }

    async fn delete(&self, key: RouteKey) -> Result<()> {
        tracing::info!(route = %key, "route delete");
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        tracing::info!("route flush");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Error;
    use parking_lot::Mutex;

    /// Records every call; fails the ones whose network matches `fail`.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingRoutes {
        pub calls: Mutex<Vec<String>>,
        pub fail: Option<Ipv4Addr>,
    }

    impl RecordingRoutes {
        fn record(&self, key: RouteKey, call: String) -> Result<()> {
            self.calls.lock().push(call);
            if self.fail == Some(key.network) {
                return Err(Error::Route(format!("refused {}", key)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl KernelRoutes for RecordingRoutes {
        async fn add(&self, key: RouteKey, next_hop: Ipv4Addr) -> Result<()> {
            self.record(key, format!("add {} {} {}", key.network, key.mask, next_hop))
        }

        async fn replace(&self, key: RouteKey, next_hop: Ipv4Addr) -> Result<()> {
            self.record(key, format!("replace {} {} {}", key.network, key.mask, next_hop))
        }

        async fn delete(&self, key: RouteKey) -> Result<()> {
            self.record(key, format!("delete {} {}", key.network, key.mask))
        }

        async fn flush(&self) -> Result<()> {
            self.calls.lock().push("flush".to_string());
            Ok(())
        }
    }

    fn key(a: u8) -> RouteKey {
        RouteKey::new(Ipv4Addr::new(10, a, 0, 0), Ipv4Addr::new(255, 255, 0, 0))
    }

    #[tokio::test]
    async fn apply_skips_local_routes() {
        let kernel = RecordingRoutes::default();
        apply(
            &kernel,
            vec![
                KernelOp::Add {
                    key: key(1),
                    next_hop: Ipv4Addr::LOCALHOST,
                },
                KernelOp::Add {
                    key: key(2),
                    next_hop: Ipv4Addr::new(192, 0, 2, 1),
                },
            ],
        )
        .await;
        assert_eq!(
            *kernel.calls.lock(),
            vec!["add 10.2.0.0 255.255.0.0 192.0.2.1".to_string()]
        );
    }

    #[tokio::test]
    async fn apply_continues_after_failure() {
        let kernel = RecordingRoutes {
            fail: Some(Ipv4Addr::new(10, 1, 0, 0)),
            ..Default::default()
        };
        let gw = Ipv4Addr::new(192, 0, 2, 1);
        apply(
            &kernel,
            vec![
                KernelOp::Replace { key: key(1), next_hop: gw },
                KernelOp::Delete { key: key(2), next_hop: gw },
            ],
        )
        .await;
        assert_eq!(kernel.calls.lock().len(), 2);
    }
}
