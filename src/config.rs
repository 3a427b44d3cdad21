use crate::domain::decimal::MAX_SCALE;
use crate::domain::Address;
use crate::engine::{DecimalScales, DEFAULT_DECIMALS};
use crate::orchestration::SchedulerConfig;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub rpc_url: String,
    /// Per-request deadline for ledger queries.
    pub rpc_timeout: Duration,
    /// Watched contracts and the ABI file describing each.
    pub contract_abis: Vec<(Address, PathBuf)>,
    pub start_block: u64,
    pub batch_size: u64,
    pub poll_interval: Duration,
    pub retry_interval: Duration,
    pub default_decimals: u32,
    pub asset_decimals: Vec<(Address, u32)>,
    pub indexer_id: String,
    pub price_feed: Option<Address>,
    pub price_decimals: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or(&env_map, "PORT", 8080u16, "must be a valid u16")?;

        let database_path = required(&env_map, "DATABASE_PATH")?;
        let rpc_url = required(&env_map, "RPC_URL")?;
        let rpc_timeout = Duration::from_millis(parse_or(
            &env_map,
            "RPC_TIMEOUT_MS",
            30_000u64,
            "must be a valid u64",
        )?);
        if rpc_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "RPC_TIMEOUT_MS".to_string(),
                "must be greater than 0".to_string(),
            ));
        }

        let contract_abis = parse_contract_abis(&required(&env_map, "CONTRACT_ABIS")?)?;

        let start_block = parse_or(&env_map, "START_BLOCK", 0u64, "must be a valid u64")?;

        let batch_size = parse_or(&env_map, "BATCH_SIZE", 500u64, "must be a valid u64")?;
        if batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "BATCH_SIZE".to_string(),
                "must be greater than 0".to_string(),
            ));
        }

        let poll_interval = Duration::from_millis(parse_or(
            &env_map,
            "POLL_INTERVAL_MS",
            10_000u64,
            "must be a valid u64",
        )?);
        let retry_interval = Duration::from_millis(parse_or(
            &env_map,
            "RETRY_INTERVAL_MS",
            5_000u64,
            "must be a valid u64",
        )?);

        let default_decimals = parse_decimals(&env_map, "DEFAULT_DECIMALS")?;

        let asset_decimals = match env_map.get("ASSET_DECIMALS") {
            Some(value) => parse_pairs(value, "ASSET_DECIMALS")?
                .into_iter()
                .map(|(asset, raw)| Ok((asset, check_decimals("ASSET_DECIMALS", &raw)?)))
                .collect::<Result<Vec<_>, ConfigError>>()?,
            None => Vec::new(),
        };

        let indexer_id = env_map
            .get("INDEXER_ID")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "trove-indexer".to_string());

        let price_feed = env_map
            .get("PRICE_FEED_ADDRESS")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                Address::from_str(s).map_err(|e| {
                    ConfigError::InvalidValue("PRICE_FEED_ADDRESS".to_string(), e.to_string())
                })
            })
            .transpose()?;

        let price_decimals = parse_decimals(&env_map, "PRICE_DECIMALS")?;

        Ok(Config {
            port,
            database_path,
            rpc_url,
            rpc_timeout,
            contract_abis,
            start_block,
            batch_size,
            poll_interval,
            retry_interval,
            default_decimals,
            asset_decimals,
            indexer_id,
            price_feed,
            price_decimals,
        })
    }

    pub fn watched_contracts(&self) -> Vec<Address> {
        self.contract_abis.iter().map(|(a, _)| a.clone()).collect()
    }

    pub fn decimal_scales(&self) -> DecimalScales {
        self.asset_decimals
            .iter()
            .fold(DecimalScales::new(self.default_decimals), |scales, (asset, decimals)| {
                scales.with_asset(asset.clone(), *decimals)
            })
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            indexer_id: self.indexer_id.clone(),
            start_block: self.start_block,
            batch_size: self.batch_size,
            poll_interval: self.poll_interval,
            retry_interval: self.retry_interval,
        }
    }
}

/// Parse a `CONTRACT_ABIS` value: `0xaddr=path/to/abi.json,...`, at least
/// one pair.
pub fn parse_contract_abis(raw: &str) -> Result<Vec<(Address, PathBuf)>, ConfigError> {
    let contract_abis = parse_pairs(raw, "CONTRACT_ABIS")?
        .into_iter()
        .map(|(addr, path)| (addr, PathBuf::from(path)))
        .collect::<Vec<_>>();
    if contract_abis.is_empty() {
        return Err(ConfigError::InvalidValue(
            "CONTRACT_ABIS".to_string(),
            "must list at least one address=path pair".to_string(),
        ));
    }
    Ok(contract_abis)
}

fn required(env_map: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    env_map
        .get(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
    expectation: &str,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), expectation.to_string())),
        None => Ok(default),
    }
}

fn parse_decimals(env_map: &HashMap<String, String>, key: &str) -> Result<u32, ConfigError> {
    match env_map.get(key) {
        Some(raw) => check_decimals(key, raw),
        None => Ok(DEFAULT_DECIMALS),
    }
}

fn check_decimals(key: &str, raw: &str) -> Result<u32, ConfigError> {
    let decimals = raw.trim().parse::<u32>().map_err(|_| {
        ConfigError::InvalidValue(key.to_string(), format!("{:?} is not a valid u32", raw))
    })?;
    if decimals > MAX_SCALE {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("{} exceeds the maximum scale of {}", decimals, MAX_SCALE),
        ));
    }
    Ok(decimals)
}

/// Parse `0xaddr=value,0xaddr=value`.
fn parse_pairs(raw: &str, key: &str) -> Result<Vec<(Address, String)>, ConfigError> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (addr, value) = pair.split_once('=').ok_or_else(|| {
                ConfigError::InvalidValue(key.to_string(), format!("{:?} is not address=value", pair))
            })?;
            let addr = Address::from_str(addr)
                .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))?;
            let value = value.trim();
            if value.is_empty() {
                return Err(ConfigError::InvalidValue(
                    key.to_string(),
                    format!("empty value for {}", addr),
                ));
            }
            Ok((addr, value.to_string()))
        })
        .collect()
}
