use crate::addressbook::{AddressesRegistry, HumansManager};
use crate::blockchain::{Blockchain, UtxosRegistry};
use crate::config::{Config, ProtocolSettings};
use crate::error::ChainError;
use crate::mempool::TransactionsPool;
use crate::sync::{Neighborhood, SenderFactory};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinSet;
use tracing::{error, info};

/// Wall clock, in nanoseconds since the Unix epoch.
pub trait Watch: Send + Sync {
    fn now(&self) -> i64;
}

pub struct SystemWatch;

impl Watch for SystemWatch {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or_default()
    }
}

/// Runs a job on wall-clock aligned ticks.
///
/// Each period of `timer` starts on a multiple of `timer` and is divided into
/// `occurrences` ticks, the first `skipped` of which are left out.
pub struct TickEngine {
    timer: i64,
    occurrences: u32,
    skipped: u32,
    watch: Arc<dyn Watch>,
}

impl TickEngine {
    pub fn new(timer: Duration, occurrences: u32, skipped: u32, watch: Arc<dyn Watch>) -> Self {
        let timer = i64::try_from(timer.as_nanos()).unwrap_or(i64::MAX).max(1);
        TickEngine {
            timer,
            occurrences: occurrences.max(1),
            skipped,
            watch,
        }
    }

    /// First period start strictly after `now`.
    pub fn next_start(&self, now: i64) -> i64 {
        (now.div_euclid(self.timer) + 1).saturating_mul(self.timer)
    }

    /// Tick timestamps of the period starting at `start`.
    pub fn period_timestamps(&self, start: i64) -> Vec<i64> {
        let sub_timer = self.timer / i64::from(self.occurrences);
        (self.skipped..self.occurrences)
            .map(|i| start + i64::from(i) * sub_timer)
            .collect()
    }

    pub async fn run<F, Fut>(&self, mut job: F)
    where
        F: FnMut(i64) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut start = self.next_start(self.watch.now());
        loop {
            for timestamp in self.period_timestamps(start) {
                let delay = timestamp.saturating_sub(self.watch.now());
                if delay > 0 {
                    tokio::time::sleep(Duration::from_nanos(delay as u64)).await;
                }
                job(timestamp).await;
            }
            start = start.saturating_add(self.timer);
        }
    }
}

/// A validator node: the ledger components and the engines driving them.
pub struct Node {
    pub config: Config,
    pub addresses: Arc<AddressesRegistry>,
    pub blockchain: Arc<Blockchain>,
    pub neighborhood: Arc<Neighborhood>,
    pub pool: Arc<TransactionsPool>,
    pub settings: Arc<ProtocolSettings>,
    pub utxos: Arc<UtxosRegistry>,
    watch: Arc<dyn Watch>,
}

impl Node {
    pub fn new(
        config: Config,
        humans_manager: Arc<dyn HumansManager>,
        sender_factory: Arc<dyn SenderFactory>,
        watch: Arc<dyn Watch>,
    ) -> Self {
        let settings = Arc::new(config.protocol_settings());
        let utxos = Arc::new(UtxosRegistry::new(settings.clone()));
        let addresses = Arc::new(AddressesRegistry::new(humans_manager));
        let neighborhood = Arc::new(Neighborhood::new(
            config.host.target(),
            config.network.seeds.clone(),
            config.network.max_outbounds_count,
            sender_factory,
        ));
        let blockchain = Arc::new(Blockchain::new(
            addresses.clone(),
            settings.clone(),
            neighborhood.clone(),
            utxos.clone(),
        ));
        let pool = Arc::new(TransactionsPool::new(
            blockchain.clone(),
            settings.clone(),
            neighborhood.clone(),
            utxos.clone(),
            config.validator.address.clone(),
        ));
        Node {
            config,
            addresses,
            blockchain,
            neighborhood,
            pool,
            settings,
            utxos,
            watch,
        }
    }

    /// Starts the synchronisation, validation and verification engines.
    /// Only returns if one of them stops.
    pub async fn run(self: Arc<Self>) -> Result<(), ChainError> {
        info!("Starting DecayChain node on {}", self.config.host.target());
        self.neighborhood.synchronize(self.watch.now());

        let mut engines = JoinSet::new();

        let neighborhood = self.neighborhood.clone();
        let engine = self.engine(Duration::from_secs(self.config.network.synchronization_timer_secs), 1, 0);
        engines.spawn(async move {
            engine
                .run(|timestamp| {
                    neighborhood.synchronize(timestamp);
                    async {}
                })
                .await
        });

        let pool = self.pool.clone();
        let engine = self.engine(self.settings.validation_timer, 1, 0);
        engines.spawn(async move {
            engine
                .run(|timestamp| {
                    pool.validate(timestamp);
                    async {}
                })
                .await
        });

        let blockchain = self.blockchain.clone();
        let engine = self.engine(
            self.settings.validation_timer,
            self.settings.verifications_count_per_validation,
            1,
        );
        engines.spawn(async move {
            engine
                .run(|timestamp| {
                    let blockchain = blockchain.clone();
                    async move { blockchain.update(timestamp).await }
                })
                .await
        });

        let addresses = self.addresses.clone();
        let engine = self.engine(Duration::from_secs(self.config.registry.synchronization_timer_secs), 1, 0);
        engines.spawn(async move {
            engine
                .run(|timestamp| {
                    addresses.synchronize(timestamp);
                    async {}
                })
                .await
        });

        info!("Node is running");
        match engines.join_next().await {
            Some(Err(e)) => {
                error!("engine task failed: {}", e);
                Err(ChainError::Io(e.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn engine(&self, timer: Duration, occurrences: u32, skipped: u32) -> TickEngine {
        TickEngine::new(timer, occurrences, skipped, self.watch.clone())
    }
}
