//! Listener Application
//!
//! Subscribes to a broadcaster and plays the received stream.
//!
//! Usage: listen [target-address] [channel] [ssm-source]
//! With no target address, the first discovered station on the channel
//! is used.

use anyhow::{anyhow, Result};
use std::net::Ipv6Addr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meshradio::{
    channels::ChannelRegistry,
    config::StreamConfig,
    constants::{DEFAULT_AUDIO_PORT, DEFAULT_CALLSIGN},
    discovery::{self, BrowseOptions},
    listener::{Listener, ListenerConfig, ListenerEvent},
    overlay,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let target_arg = std::env::args().nth(1);
    let channel_name = std::env::args().nth(2).unwrap_or_else(|| "test".into());
    let ssm_source: Option<Ipv6Addr> = std::env::args()
        .nth(3)
        .map(|s| s.parse())
        .transpose()
        .map_err(|_| anyhow!("invalid SSM source address"))?;

    let callsign =
        std::env::var("MESHRADIO_CALLSIGN").unwrap_or_else(|_| DEFAULT_CALLSIGN.into());
    let local_address = overlay::local_address();

    let target_port = ChannelRegistry::new()
        .get(&channel_name)
        .map(|c| c.port)
        .unwrap_or(DEFAULT_AUDIO_PORT);

    let target_address: Ipv6Addr = match target_arg {
        Some(addr) => addr.parse().map_err(|_| anyhow!("invalid target address"))?,
        None => {
            tracing::info!(channel = %channel_name, "browsing for stations");
            let stations = discovery::browse(BrowseOptions {
                channel: Some(channel_name.clone()),
                ..Default::default()
            })?;
            let station = stations
                .iter()
                .find(|s| s.address.is_some())
                .ok_or_else(|| anyhow!("no station found on channel '{}'", channel_name))?;
            tracing::info!(
                name = %station.name,
                callsign = %station.callsign,
                priority = %station.priority,
                "found station"
            );
            station.address.unwrap()
        }
    };

    let listener = Listener::new(ListenerConfig {
        callsign,
        local_address,
        local_port: 0,
        target_address,
        target_port,
        group: channel_name.clone(),
        ssm_source,
        audio: StreamConfig::music(),
    })?;
    listener.start()?;
    tracing::info!(
        target = %target_address,
        port = target_port,
        "listening - press Ctrl+C to stop"
    );

    // Surface host events (priority changes, station identity, metadata)
    let events = listener.events();
    let event_task = std::thread::spawn(move || {
        while let Ok(event) = events.recv() {
            match event {
                ListenerEvent::PriorityChange {
                    from,
                    to,
                    callsign,
                    source,
                    group,
                } => {
                    tracing::warn!(
                        %from, %to, %callsign, %source, %group,
                        "PRIORITY CHANGE on stream"
                    );
                }
                ListenerEvent::StationIdentified { callsign } => {
                    tracing::info!(%callsign, "station identified");
                }
                ListenerEvent::Metadata { callsign, text } => {
                    tracing::info!(%callsign, %text, "metadata");
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!(
        packets = listener.packets_received(),
        "shutting down"
    );

    listener.stop();
    // Dropping the listener closes the event channel and ends the task
    drop(listener);
    let _ = event_task.join();
    Ok(())
}
