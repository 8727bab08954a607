//! Selection of the canonical chain among the verified candidates.

use crate::blockchain::core::chain::{Block, Sha256Hash};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

/// A full chain offered by `target`.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub target: String,
    pub blocks: Vec<Arc<Block>>,
}

impl Candidate {
    pub fn new(target: impl Into<String>, blocks: Vec<Arc<Block>>) -> Self {
        Candidate {
            target: target.into(),
            blocks,
        }
    }
}

/// Picks a chain among `candidates`, visited in order.
///
/// Candidates disagreeing with the strict majority at the shortest common
/// height are dropped, then the longest ones are kept, then the one whose tip
/// validator is the oldest wins.
pub fn select(host_length: usize, candidates: Vec<Candidate>) -> Option<Vec<Arc<Block>>> {
    if candidates.is_empty() {
        return None;
    }
    let min_length = candidates
        .iter()
        .map(|candidate| candidate.blocks.len())
        .fold(host_length, usize::min);
    let max_length = candidates
        .iter()
        .map(|candidate| candidate.blocks.len())
        .fold(host_length, usize::max);
    if min_length == 0 {
        return None;
    }

    let candidates = retain_majority(candidates, min_length - 1);
    candidates
        .into_iter()
        .filter(|candidate| candidate.blocks.len() == max_length)
        .fold((0, None), |(max_age, selected), candidate| {
            let age = validator_age(&candidate.blocks);
            if age > max_age {
                (age, Some(candidate.blocks))
            } else {
                (max_age, selected)
            }
        })
        .1
}

/// Whether `selected` should replace `host_blocks`.
pub fn is_replacement(host_blocks: &[Arc<Block>], selected: &[Arc<Block>]) -> bool {
    if host_blocks.len() < selected.len() {
        return true;
    }
    if selected.len() < 2 {
        return false;
    }
    let (Some(host_tip), Some(selected_tip)) = (host_blocks.last(), selected.last()) else {
        return false;
    };
    match (host_tip.hash(), selected_tip.hash()) {
        (Ok(host_hash), Ok(selected_hash)) => host_hash != selected_hash,
        (_, Err(e)) => {
            error!("failed to calculate selected blockchain last block hash: {}", e);
            false
        }
        (Err(e), _) => {
            error!("failed to calculate host blockchain last block hash: {}", e);
            true
        }
    }
}

fn retain_majority(candidates: Vec<Candidate>, height: usize) -> Vec<Candidate> {
    let previous_hash =
        |candidate: &Candidate| -> Option<Sha256Hash> { candidate.blocks.get(height).map(|block| block.previous_hash) };
    let mut counts: HashMap<Option<Sha256Hash>, usize> = HashMap::new();
    for candidate in &candidates {
        *counts.entry(previous_hash(candidate)).or_insert(0) += 1;
    }
    let candidates_count = candidates.len();
    candidates
        .into_iter()
        .filter(|candidate| {
            let count = counts.get(&previous_hash(candidate)).copied().unwrap_or(0);
            2 * count > candidates_count
        })
        .collect()
}

/// Number of blocks walked back from the one preceding the tip until the tip
/// validator is met again, that block included. Unrewarded blocks are skipped.
fn validator_age(blocks: &[Arc<Block>]) -> usize {
    let Some((tip, preceding)) = blocks.split_last() else {
        return 0;
    };
    let tip_validator = tip.validator_address();
    let mut age = 0;
    for block in preceding.iter().rev() {
        let Some(validator) = block.validator_address() else {
            continue;
        };
        age += 1;
        if Some(validator) == tip_validator {
            break;
        }
    }
    age
}
