//! Economics: unspent outputs and their value over time.
//!
//! Capital decays exponentially with a configured half-life. An output enrolled
//! in the universal income converges toward the income limit instead: below it
//! the value grows along an income curve calibrated so that an empty output
//! earns exactly the income base after one half-life; above it the excess decays.

use crate::crypto::Address;
use crate::transaction::{InputInfo, Output};
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_2;

/// An unspent transaction output, materialised when its transaction is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub input_info: InputInfo,
    pub output: Output,
    pub creation_timestamp: i64,
}

impl Utxo {
    pub fn new(input_info: InputInfo, output: Output, creation_timestamp: i64) -> Self {
        Utxo {
            input_info,
            output,
            creation_timestamp,
        }
    }

    pub fn address(&self) -> &Address {
        &self.output.address
    }

    pub fn is_yielding(&self) -> bool {
        self.output.is_yielding
    }

    pub fn initial_value(&self) -> u64 {
        self.output.initial_value
    }

    pub fn output_index(&self) -> u16 {
        self.input_info.output_index
    }

    pub fn transaction_id(&self) -> &str {
        &self.input_info.transaction_id
    }

    /// Spendable value at `timestamp` (nanoseconds).
    pub fn value(
        &self,
        timestamp: i64,
        half_life_in_nanoseconds: f64,
        income_base: u64,
        income_limit: u64,
    ) -> u64 {
        decayed_value(
            self.initial_value(),
            self.is_yielding(),
            timestamp - self.creation_timestamp,
            half_life_in_nanoseconds,
            income_base,
            income_limit,
        )
    }
}

/// Value of `initial_value` after `elapsed` nanoseconds.
pub fn decayed_value(
    initial_value: u64,
    is_yielding: bool,
    elapsed: i64,
    half_life_in_nanoseconds: f64,
    income_base: u64,
    income_limit: u64,
) -> u64 {
    if elapsed <= 0 || half_life_in_nanoseconds <= 0. {
        return initial_value;
    }
    let x = elapsed as f64;
    let h = half_life_in_nanoseconds;
    let y = initial_value as f64;
    if !is_yielding {
        return (y * (-x * LN_2 / h).exp()).floor() as u64;
    }
    let l = income_limit as f64;
    if initial_value < income_limit {
        let b = income_base as f64;
        let (k1, k2) = if income_limit > income_base {
            let k1 = 3. - 2. * (2. * b).ln() / l.ln();
            let k2 = LN_2 / (-(1. - b / l).ln()).powf(1. / k1);
            (k1, k2)
        } else {
            (1., 1.)
        };
        let exponent = (x * LN_2 / (k2 * h) + (-((l - y) / l).ln()).powf(1. / k1)).powf(k1);
        let income = (-l * (-exponent).exp()).floor() + l;
        income.max(0.) as u64
    } else if initial_value > income_limit {
        ((y - l) * (-x * LN_2 / h).exp()).floor() as u64 + income_limit
    } else {
        income_limit
    }
}
