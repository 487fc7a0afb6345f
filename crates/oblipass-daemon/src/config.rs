use std::net::SocketAddr;
use std::path::Path;

use clap::{Parser, ValueEnum};
use thiserror::Error;

use oblipass_core::derive::MASTER_KEY_BYTES;

pub const MASTER_KEY_ENV: &str = "OBLIPASS_MASTER_KEY_HEX";
pub const MASTER_KEY_FILE: &str = "master.key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    Master,
    Evaluator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DerivationStrategy {
    /// HMAC-SHA256 over the bound identity; aux carries a client email.
    Hmac,
    /// AES-256-CTR keystream; aux carries a decimal key-version request.
    Stream,
}

#[derive(Debug, Parser)]
#[command(name = "oblipass-daemon")]
#[command(about = "Oblivious password-hardening evaluation daemon")]
pub struct Args {
    #[arg(long, default_value = "127.0.0.1:50000")]
    pub listen: String,

    /// Process role: a master fans requests out to its evaluator pool and
    /// resolves the trusted answer; an evaluator answers directly.
    #[arg(long, value_enum, default_value_t = Role::Evaluator)]
    pub role: Role,

    /// Evaluator pool size (master only). The roster defaults to the listen
    /// host at listen-port + 1..=N; pool members are supervised externally.
    #[arg(long, default_value_t = 0)]
    pub pool_size: usize,

    /// Explicit evaluator endpoint URL (repeatable); overrides --pool-size.
    #[arg(long = "evaluator")]
    pub evaluators: Vec<String>,

    #[arg(long, default_value = "./data")]
    pub data_dir: String,

    /// Secret-derivation strategy for this deployment.
    #[arg(long, value_enum, default_value_t = DerivationStrategy::Hmac)]
    pub strategy: DerivationStrategy,

    /// Bounded wait for evaluator votes, in milliseconds. 0 waits
    /// indefinitely for the full subset to answer.
    #[arg(long, default_value_t = 0)]
    pub collect_timeout_ms: u64,

    #[arg(long, default_value = "info")]
    pub log: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid listen address `{0}`: {1}")]
    InvalidListen(String, String),

    #[error("master role requires --pool-size or --evaluator endpoints")]
    EmptyRoster,

    #[error("master key material is invalid: {0}")]
    InvalidMasterKey(String),

    #[error("master key could not be loaded: {0}")]
    KeyIo(String),
}

impl Args {
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen
            .parse()
            .map_err(|err: std::net::AddrParseError| {
                ConfigError::InvalidListen(self.listen.clone(), err.to_string())
            })
    }

    /// The addressable evaluator roster for a master, in 1-based pool order.
    pub fn roster(&self) -> Result<Vec<String>, ConfigError> {
        if !self.evaluators.is_empty() {
            return Ok(self.evaluators.clone());
        }
        if self.pool_size == 0 {
            return Err(ConfigError::EmptyRoster);
        }
        let listen = self.listen_addr()?;
        Ok((1..=self.pool_size)
            .map(|member| format!("http://{}:{}", listen.ip(), listen.port() + member as u16))
            .collect())
    }
}

/// Loads the shared master key: the env override first, then the data-dir
/// key file, else a fresh key is generated and persisted so a restart keeps
/// answering identically. Every pool member must hold the same key.
pub fn load_or_create_master_key(
    data_dir: &Path,
) -> Result<[u8; MASTER_KEY_BYTES], ConfigError> {
    if let Ok(value) = std::env::var(MASTER_KEY_ENV) {
        return decode_master_key(value.trim());
    }

    let path = data_dir.join(MASTER_KEY_FILE);
    if path.exists() {
        let value =
            std::fs::read_to_string(&path).map_err(|err| ConfigError::KeyIo(err.to_string()))?;
        return decode_master_key(value.trim());
    }

    let mut key = [0u8; MASTER_KEY_BYTES];
    getrandom::getrandom(&mut key).map_err(|err| ConfigError::KeyIo(err.to_string()))?;
    std::fs::write(&path, hex::encode(key)).map_err(|err| ConfigError::KeyIo(err.to_string()))?;
    tracing::info!(path = %path.display(), "generated new master key");
    Ok(key)
}

fn decode_master_key(value: &str) -> Result<[u8; MASTER_KEY_BYTES], ConfigError> {
    let bytes =
        hex::decode(value).map_err(|err| ConfigError::InvalidMasterKey(err.to_string()))?;
    let key: [u8; MASTER_KEY_BYTES] = bytes.try_into().map_err(|bytes: Vec<u8>| {
        ConfigError::InvalidMasterKey(format!(
            "expected {MASTER_KEY_BYTES} bytes, got {}",
            bytes.len()
        ))
    })?;
    Ok(key)
}
