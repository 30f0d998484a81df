//! P2P Link ping-pong demo
//!
//! Start two copies on the same LAN (or on one host with different ports and
//! each pointing its medium at the other). They pair, the First side sends a
//! counter every second and the Second side answers inside the acknowledgment.
//!
//! Environment variables:
//! - P2P_BIND_ADDR: UDP bind address (default 0.0.0.0:47000)
//! - P2P_MEDIUM: comma separated broadcast targets (default 255.255.255.255:47000)
//! - P2P_MODE_ID: mode identifier character (default 'g')
//! - P2P_LINK_ADDR: link address, aa:bb:cc:dd:ee:ff (default random)
//! - RUST_LOG: log filter (default info)

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use p2p_link::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:47000";
const DEFAULT_MEDIUM: &str = "255.255.255.255:47000";
const PING_INTERVAL: Duration = Duration::from_secs(1);

struct Settings {
    bind_addr: SocketAddr,
    medium: Vec<SocketAddr>,
    mode_id: u8,
    link_addr: MacAddr,
}

impl Settings {
    fn from_env() -> Result<Self> {
        let bind_addr = env::var("P2P_BIND_ADDR")
            .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .context("invalid P2P_BIND_ADDR")?;

        let medium = env::var("P2P_MEDIUM")
            .unwrap_or_else(|_| DEFAULT_MEDIUM.to_string())
            .split(',')
            .map(|s| s.trim().parse::<SocketAddr>())
            .collect::<Result<Vec<_>, _>>()
            .context("invalid P2P_MEDIUM")?;

        let mode_id = match env::var("P2P_MODE_ID") {
            Ok(s) => *s.as_bytes().first().context("empty P2P_MODE_ID")?,
            Err(_) => b'g',
        };

        let link_addr = match env::var("P2P_LINK_ADDR") {
            Ok(s) => s.parse().context("invalid P2P_LINK_ADDR")?,
            Err(_) => MacAddr::random(),
        };

        Ok(Self {
            bind_addr,
            medium,
            mode_id,
            link_addr,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env()?;

    let mut builder = LinkSocketBuilder::new().broadcast(true);
    for target in &settings.medium {
        builder = builder.medium(*target);
    }
    let socket = builder
        .bind(settings.bind_addr, settings.link_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;

    let config = SessionConfig::builder(settings.mode_id).build()?;
    let session = Session::new(config, settings.link_addr)?;
    let (_task, handle, mut events) = SessionDriver::spawn(session, socket);

    info!(link_addr = %settings.link_addr, bind = %settings.bind_addr, "looking for a peer");
    handle.begin_connecting().await?;

    let mut role = Role::Unassigned;
    let mut counter: u32 = 0;
    let mut ticker = tokio::time::interval(PING_INTERVAL);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    SessionEvent::Connection(ConnectionEvent::Connected(r)) => {
                        role = r;
                        info!(%role, "paired");
                        if role == Role::Second {
                            handle.set_reply_payload(pong(0)).await?;
                        }
                    }
                    SessionEvent::Connection(ConnectionEvent::Lost) => {
                        role = Role::Unassigned;
                        warn!("peer lost, searching again");
                    }
                    SessionEvent::Connection(_) => {}
                    SessionEvent::MessageReceived(payload) => {
                        let n = decode_counter(&payload);
                        info!(n, "ping");
                        handle.set_reply_payload(pong(n.wrapping_add(1))).await?;
                    }
                    SessionEvent::MessageResult { status: MessageStatus::Acked(reply), .. } => {
                        let reply = reply.map(|r| String::from_utf8_lossy(&r).into_owned());
                        info!(counter, reply = ?reply, "acked");
                        counter = counter.wrapping_add(1);
                    }
                    SessionEvent::MessageResult { status: MessageStatus::Failed, .. } => {
                        warn!(counter, "ping lost");
                    }
                }
            }
            _ = ticker.tick() => {
                if role == Role::First {
                    if let Err(e) = handle.send_message(counter.to_be_bytes().to_vec()).await {
                        warn!(error = %e, "ping not sent");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                handle.close().await?;
                break;
            }
        }
    }

    info!("bye");
    Ok(())
}

fn pong(n: u32) -> Vec<u8> {
    format!("pong #{n}").into_bytes()
}

fn decode_counter(payload: &[u8]) -> u32 {
    payload
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_be_bytes)
        .unwrap_or_default()
}
