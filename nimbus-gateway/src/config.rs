//! Gateway configuration, read once from the environment at startup.

use std::path::PathBuf;
use std::time::Duration;

use nimbus_executor::config::{DEFAULT_SAMPLE_INTERVAL, DEFAULT_STOP_TIMEOUT};
use nimbus_executor::WorkerConfig;

use crate::error::GatewayError;

pub const LISTEN_ADDR_ENV: &str = "NIMBUS_LISTEN_ADDR";
pub const STORAGE_ROOT_ENV: &str = "NIMBUS_STORAGE_ROOT";
pub const CDN_ROOT_ENV: &str = "NIMBUS_CDN_ROOT";
pub const WORKER_BIN_ENV: &str = "NIMBUS_WORKER_BIN";
pub const SAMPLE_INTERVAL_ENV: &str = nimbus_executor::config::SAMPLE_INTERVAL_ENV;
pub const STOP_TIMEOUT_ENV: &str = "NIMBUS_STOP_TIMEOUT_MS";

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_STORAGE_ROOT: &str = "storage";
const DEFAULT_CDN_ROOT: &str = "cdn_storage";
const WORKER_BIN_NAME: &str = "nimbus-worker";

/// Everything the gateway binary needs to start.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen_addr: String,
    pub storage_root: PathBuf,
    pub cdn_root: PathBuf,
    pub worker: WorkerConfig,
}

impl GatewayConfig {
    /// Read the configuration from process environment variables.
    ///
    /// # Errors
    /// Returns [`GatewayError::Config`] if a duration is not a whole number
    /// of milliseconds.
    pub fn from_env() -> Result<Self, GatewayError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// # Errors
    /// Returns [`GatewayError::Config`] if a duration is not a whole number
    /// of milliseconds.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GatewayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let program = lookup(WORKER_BIN_ENV).map_or_else(default_worker_bin, PathBuf::from);
        let sample_interval =
            parse_millis(&lookup, SAMPLE_INTERVAL_ENV)?.unwrap_or(DEFAULT_SAMPLE_INTERVAL);
        let stop_timeout = parse_millis(&lookup, STOP_TIMEOUT_ENV)?.unwrap_or(DEFAULT_STOP_TIMEOUT);

        Ok(Self {
            listen_addr: lookup(LISTEN_ADDR_ENV).unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_owned()),
            storage_root: lookup(STORAGE_ROOT_ENV)
                .map_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT), PathBuf::from),
            cdn_root: lookup(CDN_ROOT_ENV)
                .map_or_else(|| PathBuf::from(DEFAULT_CDN_ROOT), PathBuf::from),
            worker: WorkerConfig::new(program)
                .with_sample_interval(sample_interval)
                .with_stop_timeout(stop_timeout),
        })
    }
}

fn parse_millis<F>(lookup: &F, key: &str) -> Result<Option<Duration>, GatewayError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(|ms| Some(Duration::from_millis(ms)))
        .map_err(|e| GatewayError::Config(format!("{key}={raw:?}: {e}")))
}

/// `nimbus-worker` next to the running binary, or on `PATH` as a fallback.
fn default_worker_bin() -> PathBuf {
    std::env::current_exe()
        .map(|exe| exe.with_file_name(WORKER_BIN_NAME))
        .unwrap_or_else(|_| PathBuf::from(WORKER_BIN_NAME))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = match GatewayConfig::from_lookup(lookup_from(&[])) {
            Ok(c) => c,
            Err(e) => panic!("config failed: {e}"),
        };
        assert_eq!(config.listen_addr, "127.0.0.1:5000");
        assert_eq!(config.storage_root, PathBuf::from("storage"));
        assert_eq!(config.cdn_root, PathBuf::from("cdn_storage"));
        assert_eq!(config.worker.sample_interval, Duration::from_secs(5));
        assert_eq!(config.worker.stop_timeout, Duration::from_secs(5));
        assert!(config.worker.program.ends_with(WORKER_BIN_NAME));
    }

    #[test]
    fn overrides_are_honoured() {
        let config = match GatewayConfig::from_lookup(lookup_from(&[
            (LISTEN_ADDR_ENV, "0.0.0.0:8080"),
            (WORKER_BIN_ENV, "/opt/nimbus/worker"),
            (SAMPLE_INTERVAL_ENV, "250"),
            (STOP_TIMEOUT_ENV, " 1500 "),
        ])) {
            Ok(c) => c,
            Err(e) => panic!("config failed: {e}"),
        };
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.worker.program, PathBuf::from("/opt/nimbus/worker"));
        assert_eq!(config.worker.sample_interval, Duration::from_millis(250));
        assert_eq!(config.worker.stop_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn malformed_duration_is_rejected() {
        let result = GatewayConfig::from_lookup(lookup_from(&[(STOP_TIMEOUT_ENV, "soon")]));
        assert!(
            matches!(result, Err(GatewayError::Config(ref msg)) if msg.contains(STOP_TIMEOUT_ENV)),
            "bad duration must name the variable"
        );
    }
}
