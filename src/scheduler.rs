//! Timer-driven control loops.
//!
//! Each table gets one long-lived loop. The adjacency loop ages routes
//! and sends triggered updates on the fast tick, sends regular updates on
//! the slow tick, and runs under a supervisor that tears it down and
//! starts it again with fresh configuration on reset or reload. The
//! neighbor loop only ages and dumps the neighbor table.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::event::{Control, Event};
use crate::node::Router;
use crate::update::UpdateMode;

/// Aging cadence of both tables.
pub const FAST_TICK: Duration = Duration::from_secs(5);
/// Upper bound of the random delay added to every regular update.
pub const MAX_JITTER: Duration = Duration::from_secs(5);

const CONTROL_QUEUE: usize = 16;

fn jitter() -> Duration {
    let ms = rand::rng().random_range(0..=MAX_JITTER.as_millis() as u64);
    Duration::from_millis(ms)
}

/// Handles to the running loops.
pub struct Scheduler {
    adjacency: mpsc::Sender<Control>,
    neighbors: mpsc::Sender<Control>,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn spawn(router: Arc<Router>) -> Self {
        let (adj_tx, adj_rx) = mpsc::channel(CONTROL_QUEUE);
        let (nbr_tx, nbr_rx) = mpsc::channel(CONTROL_QUEUE);
        let tasks = vec![
            tokio::spawn(supervise_adjacency(router.clone(), adj_rx)),
            tokio::spawn(neighbor_loop(router, nbr_rx)),
        ];
        Scheduler {
            adjacency: adj_tx,
            neighbors: nbr_tx,
            tasks,
        }
    }

    /// Deliver a control signal to the loop that owns it.
    pub async fn send(&self, control: Control) {
        let to_adjacency = control != Control::DumpNeighbors;
        let to_neighbors = matches!(control, Control::DumpNeighbors | Control::Stop);
        let targets = [(to_adjacency, &self.adjacency), (to_neighbors, &self.neighbors)];
        for (_, tx) in targets.iter().filter(|(wanted, _)| *wanted) {
            if tx.send(control).await.is_err() {
                tracing::debug!(control = %control, "scheduler already stopped");
            }
        }
    }

    /// Wait for every loop to finish.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "scheduler task failed");
            }
        }
    }
}

/// Run the adjacency loop, relaunching it on reset and reload. Both
/// re-read the configuration file. A failed reload keeps the running loop,
/// a reset relaunches it regardless.
async fn supervise_adjacency(router: Arc<Router>, mut control: mpsc::Receiver<Control>) {
    loop {
        let cfg = router.config();
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(CONTROL_QUEUE);
        let task = tokio::spawn(adjacency_loop(router.clone(), cfg, rx, cancel.clone()));

        let relaunch = loop {
            match control.recv().await {
                None | Some(Control::Stop) => break false,
                Some(Control::Reset) => {
                    if let Err(e) = router.reload() {
                        tracing::warn!(error = %e, "reload failed, resetting with current configuration");
                    }
                    break true;
                }
                Some(Control::Reload) => match router.reload() {
                    Ok(_) => break true,
                    Err(e) => tracing::warn!(error = %e, "reload failed, keeping configuration"),
                },
                Some(other) => {
                    if tx.send(other).await.is_err() {
                        tracing::warn!(control = %other, "adjacency loop is gone");
                    }
                }
            }
        };

        cancel.cancel();
        if let Err(e) = task.await {
            tracing::error!(error = %e, "adjacency loop failed");
        }
        if !relaunch {
            tracing::info!("adjacency scheduler stopped");
            return;
        }
        tracing::info!("adjacency scheduler reset");
    }
}

async fn adjacency_loop(
    router: Arc<Router>,
    cfg: Arc<Config>,
    mut control: mpsc::Receiver<Control>,
    cancel: CancellationToken,
) {
    router.request_tables(&cfg).await;
    router.sync_connected(&cfg).await;

    let update = cfg.timers.update_interval();
    let mut fast = interval_at(Instant::now() + FAST_TICK, FAST_TICK);
    fast.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let slow = sleep(update + jitter());
    tokio::pin!(slow);

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = fast.tick() => Event::FastTick,
            _ = &mut slow => Event::SlowTick,
            Some(c) = control.recv() => Event::Control(c),
        };

        match event {
            Event::FastTick => {
                if router.age_routes(&cfg).await {
                    router.send_updates(&cfg, UpdateMode::Changed).await;
                }
            }
            Event::SlowTick => {
                slow.as_mut().reset(Instant::now() + update + jitter());
                router.sync_connected(&cfg).await;
                router.send_updates(&cfg, UpdateMode::Regular).await;
            }
            Event::Control(Control::DumpAdjacency) => router.dump_adjacency(),
            Event::Control(Control::Stop) => break,
            Event::Control(other) => tracing::debug!(control = %other, "ignored by adjacency loop"),
        }
    }
}

async fn neighbor_loop(router: Arc<Router>, mut control: mpsc::Receiver<Control>) {
    let mut tick = interval_at(Instant::now() + FAST_TICK, FAST_TICK);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let event = tokio::select! {
            _ = tick.tick() => Event::FastTick,
            c = control.recv() => match c {
                Some(c) => Event::Control(c),
                None => break,
            },
        };

        match event {
            Event::FastTick => router.age_neighbors(),
            Event::Control(Control::DumpNeighbors) => router.dump_neighbors(),
            Event::Control(Control::Stop) => break,
            Event::SlowTick | Event::Control(_) => {}
        }
    }
    tracing::info!("neighbor scheduler stopped");
}
