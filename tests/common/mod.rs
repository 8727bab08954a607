//! Shared doubles for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use decaychain::addressbook::{AddressesRegistry, HumansManager};
use decaychain::blockchain::{Block, Blockchain, Sha256Hash, UtxosRegistry};
use decaychain::config::ProtocolSettings;
use decaychain::error::ChainError;
use decaychain::sync::{Sender, SendersManager};
use decaychain::transaction::Transaction;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

pub const BLOCKCHAIN_REPLACED: &str = "verification done: blockchain replaced";
pub const BLOCKCHAIN_KEPT: &str = "verification done: blockchain kept";

/// Log lines written by the subscriber installed with [`capture_logs`].
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    pub fn assert_logged(&self, message: &str) {
        let contents = self.contents();
        assert!(
            contents.contains(message),
            "\"{}\" is not logged, logs are:\n{}",
            message,
            contents
        );
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Captures the debug logs of the current thread until the guard is dropped.
pub fn capture_logs() -> (LogBuffer, DefaultGuard) {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (buffer, guard)
}

pub struct EveryoneIsHuman;

impl HumansManager for EveryoneIsHuman {
    fn is_registered(&self, _address: &str) -> Result<bool, ChainError> {
        Ok(true)
    }
}

/// A neighbor always answering the same blocks, possibly late or not at all.
pub struct FakeNeighbor {
    pub target: String,
    pub response: Result<Vec<u8>, ChainError>,
    pub delay: Duration,
}

impl FakeNeighbor {
    pub fn with_blocks(blocks: &[Arc<Block>]) -> Arc<dyn Sender> {
        Arc::new(FakeNeighbor {
            target: "neighbor".to_string(),
            response: Ok(bincode::serialize(blocks).unwrap()),
            delay: Duration::ZERO,
        })
    }
}

#[async_trait]
impl Sender for FakeNeighbor {
    async fn get_blocks(&self, _start_height: u64) -> Result<Vec<u8>, ChainError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.response.clone()
    }

    async fn add_transaction(&self, _request: Vec<u8>) -> Result<(), ChainError> {
        Ok(())
    }

    async fn send_targets(&self, _targets: Vec<String>) -> Result<(), ChainError> {
        Ok(())
    }

    fn target(&self) -> String {
        self.target.clone()
    }
}

pub struct StaticSenders(pub Vec<Arc<dyn Sender>>);

impl SendersManager for StaticSenders {
    fn add_targets(&self, _targets: &[String]) {}

    fn incentive(&self, _target: &str) {}

    fn host_target(&self) -> String {
        "host".to_string()
    }

    fn senders(&self) -> Vec<Arc<dyn Sender>> {
        self.0.clone()
    }
}

pub struct TestChain {
    pub blockchain: Arc<Blockchain>,
    pub settings: Arc<ProtocolSettings>,
    pub utxos: Arc<UtxosRegistry>,
    pub addresses: Arc<AddressesRegistry>,
}

pub fn settings(validation_timestamp: i64) -> ProtocolSettings {
    ProtocolSettings {
        blocks_count_limit: 100,
        minimal_transaction_fee: 0,
        validation_timestamp,
        validation_timeout: Duration::from_secs(1),
        ..ProtocolSettings::default()
    }
}

pub fn test_chain(settings: ProtocolSettings, senders: Vec<Arc<dyn Sender>>) -> TestChain {
    let settings = Arc::new(settings);
    let utxos = Arc::new(UtxosRegistry::new(settings.clone()));
    let addresses = Arc::new(AddressesRegistry::new(Arc::new(EveryoneIsHuman)));
    let blockchain = Arc::new(Blockchain::new(
        addresses.clone(),
        settings.clone(),
        Arc::new(StaticSenders(senders)),
        utxos.clone(),
    ));
    TestChain {
        blockchain,
        settings,
        utxos,
        addresses,
    }
}

pub fn reward(address: &str, timestamp: i64) -> Transaction {
    Transaction::new_reward(address, false, timestamp, 0).unwrap()
}

/// A block holding a single zero-value reward for `validator`.
pub fn rewarded_block(previous_hash: Sha256Hash, timestamp: i64, validator: &str) -> Arc<Block> {
    Arc::new(Block::new(
        previous_hash,
        vec![],
        vec![],
        timestamp,
        vec![reward(validator, timestamp)],
    ))
}
