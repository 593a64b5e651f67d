//! Broadcast Station Application
//!
//! Streams microphone or file audio to subscribed listeners on a named
//! channel over the overlay network.
//!
//! Usage: broadcast [channel] [audio-file]

use anyhow::Result;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meshradio::{
    audio::AudioSource,
    broadcaster::{Broadcaster, BroadcasterConfig},
    channels::ChannelRegistry,
    config::StreamConfig,
    constants::{DEFAULT_AUDIO_PORT, DEFAULT_CALLSIGN},
    discovery::{Advertiser, ServiceRecord},
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

    let channel_name = std::env::args().nth(1).unwrap_or_else(|| "test".into());
    let file_path = std::env::args().nth(2);
    let callsign =
        std::env::var("MESHRADIO_CALLSIGN").unwrap_or_else(|_| DEFAULT_CALLSIGN.into());

    let address = overlay::local_address();
    tracing::info!(%address, "local overlay address");

    let registry = ChannelRegistry::new();
    let port = match registry.get(&channel_name) {
        Some(channel) => {
            tracing::info!(
                channel = channel.name,
                port = channel.port,
                priority = %channel.priority,
                "{}",
                channel.description
            );
            channel.port
        }
        None => {
            tracing::warn!(
                channel = %channel_name,
                "unknown channel, broadcasting at normal priority on port {}",
                DEFAULT_AUDIO_PORT
            );
            DEFAULT_AUDIO_PORT
        }
    };

    // Music settings for file playout, voice settings for the microphone
    let audio = if file_path.is_some() {
        StreamConfig::music()
    } else {
        StreamConfig::voice()
    };

    let source = match &file_path {
        Some(path) => {
            tracing::info!(path, "using file source");
            Some(AudioSource::file(path, audio)?)
        }
        None => None,
    };

    let broadcaster = Broadcaster::new(BroadcasterConfig {
        callsign: callsign.clone(),
        address,
        port,
        group: channel_name.clone(),
        audio,
        source,
    })?;
    broadcaster.start()?;
    tracing::info!(port, group = %channel_name, "broadcasting - press Ctrl+C to stop");

    let advertiser = match Advertiser::new(
        ServiceRecord {
            name: callsign.clone(),
            address: Some(address),
            port,
            group: channel_name.clone(),
            channel: channel_name.clone(),
            callsign,
            priority: broadcaster.priority(),
            codec: "opus".into(),
            bitrate: audio.bitrate / 1000,
        },
        address,
    ) {
        Ok(a) => Some(a),
        Err(e) => {
            tracing::warn!("station will not be discoverable: {}", e);
            None
        }
    };

    // Periodic stats until Ctrl+C
    let stats = tokio::spawn({
        let manager = broadcaster.manager();
        async move {
            loop {
                tokio::time::sleep(Duration::from_secs(10)).await;
                let s = manager.stats();
                tracing::info!(
                    groups = s.group_count,
                    subscribers = s.total_subscribers,
                    "station stats"
                );
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    stats.abort();
    broadcaster.stop();
    if let Some(advertiser) = advertiser {
        advertiser.shutdown();
    }
    Ok(())
}
