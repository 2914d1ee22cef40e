//! Shard fleet management.
//!
//! `GatewayClient` owns the shard set: it asks the API how many shards
//! to run, launches them in concurrency-sized waves, and fans their
//! events through the cache to the consumer.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chord_http::DiscordApi;
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::cache::Cache;
use crate::flags::{denied_intents, ApplicationFlags, CacheFlags, Intents};
use crate::payload::PlayingStatus;
use crate::shard::{Shard, ShardEvent, ShardSnapshot};
use crate::GatewayResult;

/// Default gateway endpoint, used when the API is not consulted.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";

/// Launcher poll cadence while waiting for a shard's session.
const READY_POLL: Duration = Duration::from_millis(500);

/// Gateway client configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bot token, without the "Bot " prefix.
    pub token: String,

    /// Gateway intents to identify with.
    pub intents: Intents,

    /// Which event data the cache retains, and in what fidelity.
    pub cache_flags: CacheFlags,

    /// Ask the API for the recommended shard count.
    pub automatic_shards: bool,

    /// Total shard count. `None` with `automatic_shards` means use the
    /// API's recommendation; a count of 1 disables sharding entirely.
    pub shard_count: Option<u32>,

    /// Which shard IDs this process runs. Empty means all of them.
    pub shard_ids: Vec<u32>,

    /// Override for the identify concurrency bucket size.
    pub max_concurrency: Option<u32>,

    /// WebSocket endpoint.
    pub gateway_url: String,

    /// Gateway protocol version.
    pub api_version: u8,

    /// Presence sent with IDENTIFY.
    pub playing_status: Option<PlayingStatus>,

    /// Pause between identify waves.
    pub identify_cooldown: Duration,
}

impl GatewayConfig {
    #[must_use]
    pub fn new(token: impl Into<String>, intents: Intents) -> Self {
        Self {
            token: token.into(),
            intents,
            cache_flags: CacheFlags::empty(),
            automatic_shards: true,
            shard_count: None,
            shard_ids: Vec::new(),
            max_concurrency: None,
            gateway_url: DEFAULT_GATEWAY_URL.to_owned(),
            api_version: 10,
            playing_status: None,
            identify_cooldown: Duration::from_secs(5),
        }
    }
}

/// Split shard IDs into identify waves of at most `max_concurrency`.
#[must_use]
pub fn partition_shards(shard_ids: &[u32], max_concurrency: u32) -> Vec<Vec<u32>> {
    let size = max_concurrency.max(1) as usize;
    shard_ids.chunks(size).map(<[u32]>::to_vec).collect()
}

/// The shard a guild's events arrive on.
#[must_use]
pub const fn shard_by_guild_id(guild_id: u64, shard_count: u32) -> u32 {
    ((guild_id >> 22) % shard_count as u64) as u32
}

/// Manages the full shard fleet for one bot.
pub struct GatewayClient {
    api: Arc<DiscordApi>,
    config: Arc<GatewayConfig>,
    cache: Arc<Cache>,
    shards: RwLock<BTreeMap<u32, Arc<Shard>>>,
    /// Fleet-wide shard count negotiated at launch. Guild routing uses
    /// this, never the local map size, so subset fleets route correctly.
    shard_count: RwLock<Option<u32>>,
    events_tx: mpsc::Sender<ShardEvent>,
    events_rx: parking_lot::Mutex<Option<mpsc::Receiver<ShardEvent>>>,
    fleet_ready_tx: watch::Sender<bool>,
    fleet_ready_rx: watch::Receiver<bool>,
    dispatcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
    launcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl GatewayClient {
    #[must_use]
    pub fn new(api: Arc<DiscordApi>, config: GatewayConfig) -> Self {
        let cache = Arc::new(Cache::new(config.cache_flags));
        let (events_tx, events_rx) = mpsc::channel(256);
        let (fleet_ready_tx, fleet_ready_rx) = watch::channel(false);
        Self {
            api,
            config: Arc::new(config),
            cache,
            shards: RwLock::new(BTreeMap::new()),
            shard_count: RwLock::new(None),
            events_tx,
            events_rx: parking_lot::Mutex::new(Some(events_rx)),
            fleet_ready_tx,
            fleet_ready_rx,
            dispatcher: parking_lot::Mutex::new(None),
            launcher: parking_lot::Mutex::new(None),
        }
    }

    /// The shared event cache.
    #[must_use]
    pub fn cache(&self) -> Arc<Cache> {
        Arc::clone(&self.cache)
    }

    /// Negotiate the fleet shape, schedule the launch, and return the
    /// stream of dispatched events.
    ///
    /// Returns as soon as the launch task is running; identify waves and
    /// their cooldowns happen in the background. Use
    /// [`wait_until_ready`](Self::wait_until_ready) to block on the whole
    /// fleet holding sessions. Events pass through the cache before
    /// reaching the receiver.
    #[instrument(skip_all)]
    pub async fn start(&self) -> GatewayResult<mpsc::Receiver<ShardEvent>> {
        let gateway = self.api.get_gateway_bot().await?;

        let shard_count = if self.config.automatic_shards {
            self.config.shard_count.unwrap_or(gateway.shards)
        } else {
            self.config.shard_count.unwrap_or(1)
        };
        let max_concurrency = self
            .config
            .max_concurrency
            .unwrap_or(gateway.session_start_limit.max_concurrency);

        self.warn_denied_intents().await;
        *self.shard_count.write() = Some(shard_count);

        let shard_ids: Vec<u32> = if self.config.shard_ids.is_empty() {
            (0..shard_count).collect()
        } else {
            self.config.shard_ids.clone()
        };

        // Per-shard dispatch is useless with one connection.
        let shard_field = (shard_count > 1).then_some(shard_count);
        let mut shard_config = (*self.config).clone();
        shard_config.gateway_url = gateway.url.clone();
        shard_config.shard_count = shard_field;
        let shard_config = Arc::new(shard_config);

        info!(
            shard_count,
            max_concurrency,
            remaining_starts = gateway.session_start_limit.remaining,
            "launching shard fleet"
        );

        let (forward_tx, forward_rx) = mpsc::channel(256);
        self.spawn_dispatcher(forward_tx);

        // Every shard exists before the launch task runs, so lookups and
        // snapshots work while waves are still identifying.
        let mut waves: Vec<Vec<Arc<Shard>>> = Vec::new();
        for wave_ids in partition_shards(&shard_ids, max_concurrency) {
            let mut wave = Vec::with_capacity(wave_ids.len());
            for shard_id in wave_ids {
                let shard = Arc::new(Shard::new(
                    shard_id,
                    Arc::clone(&shard_config),
                    self.events_tx.clone(),
                ));
                self.shards.write().insert(shard_id, Arc::clone(&shard));
                wave.push(shard);
            }
            waves.push(wave);
        }
        let all_shards: Vec<Arc<Shard>> = waves.iter().flatten().cloned().collect();

        let cooldown = self.config.identify_cooldown;
        let launcher = tokio::spawn(async move {
            let last_wave = waves.len().saturating_sub(1);
            for (index, wave) in waves.into_iter().enumerate() {
                let mut launches = Vec::with_capacity(wave.len());
                for shard in wave {
                    launches.push(tokio::spawn(async move {
                        launch_shard(&shard).await;
                    }));
                }
                for launch in launches {
                    let _ = launch.await;
                }
                if index != last_wave {
                    debug!(wave = index, "identify wave complete, cooling down");
                    tokio::time::sleep(cooldown).await;
                }
            }
        });
        *self.launcher.lock() = Some(launcher);

        let ready_tx = self.fleet_ready_tx.clone();
        tokio::spawn(async move {
            for shard in all_shards {
                shard.wait_until_ready().await;
            }
            info!("all shards ready");
            let _ = ready_tx.send(true);
        });

        Ok(forward_rx)
    }

    /// Block until every launched shard reported ready.
    pub async fn wait_until_ready(&self) {
        let mut rx = self.fleet_ready_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    #[must_use]
    pub fn get_shard(&self, shard_id: u32) -> Option<Arc<Shard>> {
        self.shards.read().get(&shard_id).cloned()
    }

    /// The shard responsible for a guild, if it is running here.
    ///
    /// Routing uses the negotiated fleet-wide shard count; a process
    /// running a subset of shard IDs returns `None` for guilds homed on
    /// shards it does not hold.
    #[must_use]
    pub fn shard_for_guild(&self, guild_id: u64) -> Option<Arc<Shard>> {
        let count = (*self.shard_count.read())?;
        self.get_shard(shard_by_guild_id(guild_id, count))
    }

    /// Update presence on every shard.
    pub fn change_presence(&self, status: &PlayingStatus) {
        for shard in self.shards.read().values() {
            shard.change_presence(status);
        }
    }

    /// Health snapshots for all shards, ordered by shard ID.
    #[must_use]
    pub fn snapshots(&self) -> Vec<ShardSnapshot> {
        self.shards.read().values().map(|s| s.snapshot()).collect()
    }

    /// Shut down every shard, the launch task, and the dispatcher.
    pub fn close(&self) {
        if let Some(handle) = self.launcher.lock().take() {
            handle.abort();
        }
        for shard in self.shards.read().values() {
            shard.close(1000, true);
        }
        self.shards.write().clear();
        *self.shard_count.write() = None;
        if let Some(handle) = self.dispatcher.lock().take() {
            handle.abort();
        }
        let _ = self.fleet_ready_tx.send(false);
    }

    /// Flag intents the application is not approved for. Discord closes
    /// the connection with 4014 when these are requested anyway.
    async fn warn_denied_intents(&self) {
        match self.api.me().await {
            Ok(app) => {
                let flags = ApplicationFlags::from_bits_truncate(app.flags);
                let denied = denied_intents(flags, self.config.intents);
                if !denied.is_empty() {
                    warn!(
                        denied = ?denied,
                        "requested privileged intents the application lacks"
                    );
                }
            }
            Err(e) => debug!(error = %e, "could not fetch application flags"),
        }
    }

    fn spawn_dispatcher(&self, forward_tx: mpsc::Sender<ShardEvent>) {
        let Some(mut events_rx) = self.events_rx.lock().take() else {
            return;
        };
        let cache = Arc::clone(&self.cache);
        let handle = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                cache.apply(&event);
                if forward_tx.send(event).await.is_err() {
                    debug!("event consumer dropped, stopping dispatcher");
                    break;
                }
            }
        });
        *self.dispatcher.lock() = Some(handle);
    }
}

/// Start one shard and poll until its session exists.
async fn launch_shard(shard: &Shard) {
    shard.start();
    while shard.session_id().is_none() {
        tokio::time::sleep(READY_POLL).await;
    }
    debug!(shard_id = shard.id, "shard holds a session");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_respect_concurrency() {
        let ids: Vec<u32> = (0..7).collect();
        let waves = partition_shards(&ids, 3);
        assert_eq!(waves, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
    }

    #[test]
    fn partition_handles_zero_concurrency() {
        let waves = partition_shards(&[0, 1], 0);
        assert_eq!(waves, vec![vec![0], vec![1]]);
    }

    #[test]
    fn single_wave_when_concurrency_covers_all() {
        let waves = partition_shards(&[0, 1, 2], 16);
        assert_eq!(waves, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn guild_routing_is_stable() {
        // guild_id >> 22 is the timestamp part of the snowflake.
        let guild_id = 81_384_788_765_712_384_u64;
        assert_eq!(shard_by_guild_id(guild_id, 1), 0);
        let shard = shard_by_guild_id(guild_id, 4);
        assert!(shard < 4);
        assert_eq!(shard, shard_by_guild_id(guild_id, 4));
    }
}
