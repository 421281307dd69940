// src/main.rs
// RIPv2 routing daemon

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};

use rip_rs::config::{DEFAULT_CONFIG_PATH, log_warnings};
use rip_rs::kernel::KernelRoutes;
use rip_rs::transport::{Transport, UdpTransport};
use rip_rs::{Config, Control, Router, Scheduler};

/// RIPv2 routing daemon
#[derive(Parser, Debug)]
#[command(name = "ripd")]
#[command(about = "Exchange IPv4 routes with RIPv2 neighbors")]
struct Args {
    /// Configuration file
    #[arg(short = 'f', long = "config", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let (config, warnings) = Config::read(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    // RUST_LOG wins over the configured level.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.global.log_level));
    tracing_subscriber::fmt().compact().with_env_filter(filter).init();
    log_warnings(&warnings);

    let socket = UdpTransport::bind(&config).context("opening the RIP socket")?;
    tracing::debug!(addr = %socket.local_addr()?, "listening");
    let transport: Arc<dyn Transport> = Arc::new(socket);
    let kernel = kernel_backend()?;
    if let Err(e) = kernel.flush().await {
        tracing::warn!(error = %e, "initial kernel flush failed");
    }

    let router = Arc::new(Router::new(
        config,
        Some(args.config.clone()),
        transport,
        kernel.clone(),
    ));
    let receiver = tokio::spawn(router.clone().run_receiver());
    let scheduler = Scheduler::spawn(router);
    tracing::info!(config = %args.config.display(), "ripd started");

    let mut hup = signal(SignalKind::hangup())?;
    let mut int = signal(SignalKind::interrupt())?;
    let mut term = signal(SignalKind::terminate())?;
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;

    loop {
        let control = tokio::select! {
            _ = hup.recv() => Control::Reload,
            _ = usr1.recv() => Control::DumpAdjacency,
            _ = usr2.recv() => Control::DumpNeighbors,
            _ = int.recv() => Control::Stop,
            _ = term.recv() => Control::Stop,
        };
        tracing::debug!(control = %control, "signal received");
        scheduler.send(control).await;
        if control == Control::Stop {
            break;
        }
    }

    tracing::info!("shutting down");
    scheduler.join().await;
    receiver.abort();
    if let Err(e) = kernel.flush().await {
        tracing::warn!(error = %e, "kernel flush on exit failed");
    }
    Ok(())
}

#[cfg(feature = "netlink")]
fn kernel_backend() -> anyhow::Result<Arc<dyn KernelRoutes>> {
    let routes = rip_rs::netlink::NetlinkRoutes::new().context("opening netlink")?;
    Ok(Arc::new(routes))
}

#[cfg(not(feature = "netlink"))]
fn kernel_backend() -> anyhow::Result<Arc<dyn KernelRoutes>> {
    Ok(Arc::new(rip_rs::kernel::LoggingRoutes))
}
