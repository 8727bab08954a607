//! Neighborhood management for DecayChain
//!
//! This module provides the outbound side of the peer-to-peer layer:
//! - The `Sender` abstraction over a remote node
//! - Target bookkeeping with a per-target incentive score
//! - Periodic selection of the best-scored outbound senders
//!
//! Wire transports implement `Sender` and `SenderFactory`; they are not part of this crate.

use crate::error::ChainError;
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A remote node this node sends requests to.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Encoded `Vec<Block>` starting at `start_height`.
    async fn get_blocks(&self, start_height: u64) -> Result<Vec<u8>, ChainError>;
    /// Relays an encoded `TransactionRequest`.
    async fn add_transaction(&self, request: Vec<u8>) -> Result<(), ChainError>;
    async fn send_targets(&self, targets: Vec<String>) -> Result<(), ChainError>;
    fn target(&self) -> String;
}

pub trait SenderFactory: Send + Sync {
    fn create_sender(&self, target: &str) -> Result<Arc<dyn Sender>, ChainError>;
}

pub trait SendersManager: Send + Sync {
    fn add_targets(&self, targets: &[String]);
    /// Rewards `target` for a useful contribution.
    fn incentive(&self, target: &str);
    fn host_target(&self) -> String;
    fn senders(&self) -> Vec<Arc<dyn Sender>>;
}

/// The known targets and the outbound senders selected among them.
pub struct Neighborhood {
    host_target: String,
    seeds: Vec<String>,
    max_outbounds_count: usize,
    sender_factory: Arc<dyn SenderFactory>,
    scores_by_target: RwLock<HashMap<String, u64>>,
    senders: RwLock<Vec<Arc<dyn Sender>>>,
}

impl Neighborhood {
    pub fn new(
        host_target: impl Into<String>,
        seeds: Vec<String>,
        max_outbounds_count: usize,
        sender_factory: Arc<dyn SenderFactory>,
    ) -> Self {
        Neighborhood {
            host_target: host_target.into(),
            seeds,
            max_outbounds_count,
            sender_factory,
            scores_by_target: RwLock::new(HashMap::new()),
            senders: RwLock::new(Vec::new()),
        }
    }

    /// Replaces the outbound senders by the best-scored known targets and
    /// announces the known targets to each of them.
    ///
    /// Scores start over afterwards; falls back to the seeds when no target is known.
    pub fn synchronize(&self, timestamp: i64) {
        let scores_by_target: HashMap<String, u64> = {
            let mut scores = self.scores_by_target.write();
            if scores.is_empty() {
                self.seeds.iter().map(|seed| (seed.clone(), 0)).collect()
            } else {
                std::mem::take(&mut *scores)
            }
        };

        let mut targets = vec![self.host_target.clone()];
        let mut candidates: Vec<(u64, Arc<dyn Sender>)> = Vec::new();
        let mut scored_targets: Vec<(&String, &u64)> = scores_by_target.iter().collect();
        scored_targets.sort();
        for (target, score) in scored_targets {
            if *target == self.host_target {
                continue;
            }
            match self.sender_factory.create_sender(target) {
                Ok(sender) => {
                    candidates.push((*score, sender));
                    targets.push(target.clone());
                }
                Err(e) => debug!("failed to create sender for target {}: {}", target, e),
            }
        }

        let mut rng = StdRng::seed_from_u64(timestamp as u64);
        candidates.shuffle(&mut rng);
        candidates.sort_by(|(left, _), (right, _)| right.cmp(left));
        candidates.truncate(self.max_outbounds_count);
        let outbounds: Vec<Arc<dyn Sender>> =
            candidates.into_iter().map(|(_, sender)| sender).collect();
        *self.senders.write() = outbounds.clone();

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                debug!("unable to announce targets: {}", e);
                return;
            }
        };
        for sender in outbounds {
            let sender_target = sender.target();
            let sender_targets: Vec<String> = targets
                .iter()
                .filter(|target| **target != sender_target)
                .cloned()
                .collect();
            runtime.spawn(async move {
                let _ = sender.send_targets(sender_targets).await;
            });
        }
    }
}

impl SendersManager for Neighborhood {
    fn add_targets(&self, targets: &[String]) {
        let mut scores = self.scores_by_target.write();
        for target in targets {
            if *target != self.host_target {
                scores.entry(target.clone()).or_insert(0);
            }
        }
    }

    fn incentive(&self, target: &str) {
        *self
            .scores_by_target
            .write()
            .entry(target.to_string())
            .or_insert(0) += 1;
    }

    fn host_target(&self) -> String {
        self.host_target.clone()
    }

    fn senders(&self) -> Vec<Arc<dyn Sender>> {
        self.senders.read().clone()
    }
}
