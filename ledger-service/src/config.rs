use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::service::ServiceConfig;

#[derive(Debug, Clone, Parser)]
#[command(name = "ledger-service")]
pub struct Args {
    /// Postgres connection string. Without one the ledger lives in memory.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "PORT", default_value = "3003")]
    pub port: u16,

    #[arg(long, env = "KAFKA_BROKERS")]
    pub kafka_brokers: Option<String>,

    #[arg(long, default_value = "ledger-service-commands")]
    pub command_topic: String,

    #[arg(long, default_value = "ledger-replies")]
    pub reply_topic: String,

    /// How long a write waits for a contended row before giving up.
    #[arg(long, env = "LOCK_TIMEOUT_MS", default_value = "5000")]
    pub lock_timeout_ms: u64,

    #[arg(long, env = "RESERVATION_TTL_SECS", default_value = "86400")]
    pub reservation_ttl_secs: i64,

    /// 0 disables the expiry sweeper.
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value = "0")]
    pub sweep_interval_secs: u64,

    /// JSON catalog seed for the in-memory backend.
    #[arg(long, env = "CATALOG_FILE")]
    pub catalog_file: Option<PathBuf>,
}

impl Args {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            reservation_ttl: chrono::Duration::seconds(self.reservation_ttl_secs.max(1)),
            ..ServiceConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_select_memory_backend_without_sweeper() {
        let args = Args::try_parse_from(["ledger-service"]).unwrap();
        if std::env::var_os("DATABASE_URL").is_none() {
            assert!(args.database_url.is_none());
        }
        if std::env::var_os("SWEEP_INTERVAL_SECS").is_none() {
            assert!(args.sweep_interval().is_none());
        }
    }

    #[test]
    fn flags_override_durations() {
        let args = Args::try_parse_from([
            "ledger-service",
            "--lock-timeout-ms",
            "250",
            "--reservation-ttl-secs",
            "60",
            "--sweep-interval-secs",
            "5",
        ])
        .unwrap();
        assert_eq!(args.lock_timeout(), Duration::from_millis(250));
        assert_eq!(args.sweep_interval(), Some(Duration::from_secs(5)));
        assert_eq!(args.service_config().reservation_ttl, chrono::Duration::seconds(60));
    }
}
