use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    pub reservation: ReservationRules,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
}

/// Seat hold and reservation windows. The two TTLs are tuned independently.
#[derive(Debug, Deserialize, Clone)]
pub struct ReservationRules {
    pub hold_ttl_seconds: u64,
    pub reserved_ttl_seconds: u64,
    #[serde(default = "default_max_seats")]
    pub max_seats_per_hold: usize,
}

fn default_max_seats() -> usize { 10 }

impl ReservationRules {
    pub fn hold_ttl(&self) -> Duration {
        Duration::from_secs(self.hold_ttl_seconds)
    }

    pub fn reserved_ttl(&self) -> Duration {
        Duration::from_secs(self.reserved_ttl_seconds)
    }
}

impl Default for ReservationRules {
    fn default() -> Self {
        Self {
            hold_ttl_seconds: 600,
            reserved_ttl_seconds: 3600,
            max_seats_per_hold: default_max_seats(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconciliationConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_grace")]
    pub orphan_grace_seconds: u64,
}

fn default_enabled() -> bool { true }
fn default_interval() -> u64 { 60 }
fn default_grace() -> u64 { 300 }

impl ReconciliationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }

    pub fn orphan_grace(&self) -> Duration {
        Duration::from_secs(self.orphan_grace_seconds)
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_seconds: default_interval(),
            orphan_grace_seconds: default_grace(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides are optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. `CINEBOOK__RESERVATION__HOLD_TTL_SECONDS=300`
            .add_source(config::Environment::with_prefix("CINEBOOK").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
