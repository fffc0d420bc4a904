//! VisitorControl real-time monitor.
//!
//! Connects the hub set for a given role/permission set and tails what the
//! subsystem sees: connection health on an interval, plus every notification
//! the handlers emit. Useful for diagnosing permission gaps and flaky hubs
//! without a browser in the loop.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vc_common::AppConfig;
use vc_realtime::{RealtimeClient, UserContext};

#[derive(Parser, Debug)]
#[command(name = "vc-monitor", about = "Tail VisitorControl real-time hubs")]
struct Args {
    /// Role to connect as (operator, receptionist, administrator, ...)
    #[arg(long, default_value = "operator")]
    role: String,

    /// Permission tokens, repeatable (e.g. --permission Invitation.Read)
    #[arg(long = "permission")]
    permissions: Vec<String>,

    /// Seconds between health lines
    #[arg(long, default_value_t = 10)]
    health_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cfg = AppConfig::load().context("failed to load configuration")?;
    info!(hub_base = %cfg.realtime.hub_base_url, "starting monitor");

    let (client, mut notifications) = RealtimeClient::connect_with(&cfg);
    let ctx = UserContext::new(args.role.clone(), args.permissions.clone());

    client
        .initialize(&ctx)
        .await
        .context("real-time initialization failed")?;

    let health = client.health();
    info!(
        connected = ?health.connected,
        disconnected = health.disconnected.len(),
        "initialization pass complete"
    );
    if !client.all_healthy() {
        warn!("not every required hub came up; see the health lines below");
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(args.health_interval.max(1)));

    loop {
        tokio::select! {
            notice = notifications.recv() => {
                let Some(n) = notice else { break };
                println!(
                    "[{:?}/{:?}] {} — {}",
                    n.kind, n.priority, n.title, n.message
                );
            }
            _ = ticker.tick() => {
                let health = client.health();
                println!(
                    "health: healthy={} connected={:?} down={:?}",
                    health.healthy,
                    health.connected,
                    health
                        .disconnected
                        .iter()
                        .map(|d| (d.hub, d.attempts))
                        .collect::<Vec<_>>()
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                client.teardown().await;
                break;
            }
        }
    }

    Ok(())
}
