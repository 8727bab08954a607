//! Configuration management for DecayChain

use crate::error::ChainError;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

const NANOSECONDS_PER_SECOND: i64 = 1_000_000_000;
const NANOSECONDS_PER_HOUR: f64 = 3_600. * 1e9;

/// Protocol parameters consumed by the ledger components.
pub trait SettingsProvider: Send + Sync {
    fn blocks_count_limit(&self) -> u64;
    fn genesis_amount(&self) -> u64;
    fn half_life_in_nanoseconds(&self) -> f64;
    fn income_base(&self) -> u64;
    fn income_limit(&self) -> u64;
    fn minimal_transaction_fee(&self) -> u64;
    /// Interval between two consecutive block timestamps, in nanoseconds.
    fn validation_timestamp(&self) -> i64;
    /// How long a neighbor fetch may take.
    fn validation_timeout(&self) -> Duration;
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub protocol: ProtocolSettingsDto,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            port: default_port(),
        }
    }
}

impl HostConfig {
    /// The target other nodes reach this one at.
    pub fn target(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub seeds: Vec<String>,
    #[serde(default = "default_max_outbounds_count")]
    pub max_outbounds_count: usize,
    #[serde(default = "default_synchronization_timer_secs")]
    pub synchronization_timer_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            max_outbounds_count: default_max_outbounds_count(),
            synchronization_timer_secs: default_synchronization_timer_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorConfig {
    #[serde(default = "default_validator_address")]
    pub address: String,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            address: default_validator_address(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_synchronization_timer_secs")]
    pub synchronization_timer_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            synchronization_timer_secs: default_synchronization_timer_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// The `[protocol]` section as written in the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolSettingsDto {
    #[serde(default = "default_blocks_count_limit")]
    pub blocks_count_limit: u64,
    #[serde(default = "default_genesis_amount")]
    pub genesis_amount: u64,
    #[serde(default = "default_half_life_in_days")]
    pub half_life_in_days: f64,
    #[serde(default = "default_income_base")]
    pub income_base: u64,
    #[serde(default = "default_income_limit")]
    pub income_limit: u64,
    #[serde(default = "default_minimal_transaction_fee")]
    pub minimal_transaction_fee: u64,
    #[serde(default = "default_validation_interval_in_seconds")]
    pub validation_interval_in_seconds: u64,
    #[serde(default = "default_validation_timeout_in_seconds")]
    pub validation_timeout_in_seconds: u64,
    #[serde(default = "default_verifications_count_per_validation")]
    pub verifications_count_per_validation: u32,
}

impl Default for ProtocolSettingsDto {
    fn default() -> Self {
        Self {
            blocks_count_limit: default_blocks_count_limit(),
            genesis_amount: default_genesis_amount(),
            half_life_in_days: default_half_life_in_days(),
            income_base: default_income_base(),
            income_limit: default_income_limit(),
            minimal_transaction_fee: default_minimal_transaction_fee(),
            validation_interval_in_seconds: default_validation_interval_in_seconds(),
            validation_timeout_in_seconds: default_validation_timeout_in_seconds(),
            verifications_count_per_validation: default_verifications_count_per_validation(),
        }
    }
}

/// Protocol parameters in the units the ledger works with.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolSettings {
    pub blocks_count_limit: u64,
    pub genesis_amount: u64,
    pub half_life_in_nanoseconds: f64,
    pub income_base: u64,
    pub income_limit: u64,
    pub minimal_transaction_fee: u64,
    pub validation_timestamp: i64,
    pub validation_timer: Duration,
    pub validation_timeout: Duration,
    pub verifications_count_per_validation: u32,
}

impl From<ProtocolSettingsDto> for ProtocolSettings {
    fn from(dto: ProtocolSettingsDto) -> Self {
        let interval = dto.validation_interval_in_seconds;
        ProtocolSettings {
            blocks_count_limit: dto.blocks_count_limit,
            genesis_amount: dto.genesis_amount,
            half_life_in_nanoseconds: dto.half_life_in_days * 24. * NANOSECONDS_PER_HOUR,
            income_base: dto.income_base,
            income_limit: dto.income_limit,
            minimal_transaction_fee: dto.minimal_transaction_fee,
            validation_timestamp: (interval as i64).saturating_mul(NANOSECONDS_PER_SECOND),
            validation_timer: Duration::from_secs(interval),
            validation_timeout: Duration::from_secs(dto.validation_timeout_in_seconds),
            verifications_count_per_validation: dto.verifications_count_per_validation,
        }
    }
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        ProtocolSettingsDto::default().into()
    }
}

impl SettingsProvider for ProtocolSettings {
    fn blocks_count_limit(&self) -> u64 {
        self.blocks_count_limit
    }

    fn genesis_amount(&self) -> u64 {
        self.genesis_amount
    }

    fn half_life_in_nanoseconds(&self) -> f64 {
        self.half_life_in_nanoseconds
    }

    fn income_base(&self) -> u64 {
        self.income_base
    }

    fn income_limit(&self) -> u64 {
        self.income_limit
    }

    fn minimal_transaction_fee(&self) -> u64 {
        self.minimal_transaction_fee
    }

    fn validation_timestamp(&self) -> i64 {
        self.validation_timestamp
    }

    fn validation_timeout(&self) -> Duration {
        self.validation_timeout
    }
}

impl Config {
    pub fn protocol_settings(&self) -> ProtocolSettings {
        self.protocol.clone().into()
    }

    fn validate(&self) -> Result<(), ChainError> {
        if self.protocol.validation_interval_in_seconds == 0 {
            return Err(ChainError::Config(
                "protocol.validation_interval_in_seconds must be greater than 0".to_string(),
            ));
        }
        if self.protocol.verifications_count_per_validation == 0 {
            return Err(ChainError::Config(
                "protocol.verifications_count_per_validation must be greater than 0".to_string(),
            ));
        }
        if self.validator.address.is_empty() {
            return Err(ChainError::Config(
                "validator.address must be set in config.toml".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::str::FromStr for Config {
    type Err = ChainError;

    fn from_str(config_str: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }
}

/// Loads the configuration at `path`, falling back to defaults when the file is absent.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ChainError> {
    let config_str = match fs::read_to_string(path.as_ref()) {
        Ok(config_str) => config_str,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    config_str.parse()
}

fn default_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8106
}

fn default_max_outbounds_count() -> usize {
    8
}

fn default_synchronization_timer_secs() -> u64 {
    10
}

fn default_validator_address() -> String {
    "0".repeat(64)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_blocks_count_limit() -> u64 {
    1440
}

fn default_genesis_amount() -> u64 {
    100_000_000_000_000
}

fn default_half_life_in_days() -> f64 {
    373.59
}

fn default_income_base() -> u64 {
    10_000_000_000
}

fn default_income_limit() -> u64 {
    50_000_000_000
}

fn default_minimal_transaction_fee() -> u64 {
    1_000
}

fn default_validation_interval_in_seconds() -> u64 {
    60
}

fn default_validation_timeout_in_seconds() -> u64 {
    5
}

fn default_verifications_count_per_validation() -> u32 {
    6
}
