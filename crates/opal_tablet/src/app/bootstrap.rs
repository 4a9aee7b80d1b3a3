use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use opal_core::{ControllerConfig, QueueConfig, DEFAULT_QUEUE_WARN_DEPTH};
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const BIND_PORT_ENV_VAR: &str = "OPAL_BIND_PORT";
const TPS_ENV_VAR: &str = "OPAL_TPS";
const ASSET_ROOT_ENV_VAR: &str = "OPAL_ASSET_ROOT";
const QUEUE_WARN_DEPTH_ENV_VAR: &str = "OPAL_QUEUE_WARN_DEPTH";
const LINK_DIAG_ENV_VAR: &str = "OPAL_LINK_DIAG";

const DEFAULT_BIND_PORT: u16 = 9090;
const DEFAULT_TPS: u32 = 60;
const DEFAULT_ASSET_ROOT: &str = "./assets";

#[derive(Debug, Error)]
pub(crate) enum StartupError {
    #[error("failed to bind command link on 127.0.0.1:{port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn {name} thread: {source}")]
    SpawnThread {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LoopConfig {
    pub(crate) target_tps: u32,
    pub(crate) max_ticks_per_frame: u32,
    pub(crate) max_frame_delta: Duration,
    pub(crate) metrics_log_interval: Duration,
    pub(crate) controller: ControllerConfig,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            target_tps: DEFAULT_TPS,
            max_ticks_per_frame: 5,
            max_frame_delta: Duration::from_millis(250),
            metrics_log_interval: Duration::from_secs(5),
            controller: ControllerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TabletConfig {
    pub(crate) bind_port: u16,
    pub(crate) asset_root: PathBuf,
    pub(crate) queue: QueueConfig,
    pub(crate) link_diag: bool,
    pub(crate) loop_config: LoopConfig,
}

impl TabletConfig {
    pub(crate) fn from_env() -> Self {
        let bind_port = parse_or_default(
            BIND_PORT_ENV_VAR,
            std::env::var(BIND_PORT_ENV_VAR).ok().as_deref(),
            DEFAULT_BIND_PORT,
        );
        let target_tps = parse_or_default(
            TPS_ENV_VAR,
            std::env::var(TPS_ENV_VAR).ok().as_deref(),
            DEFAULT_TPS,
        );
        let target_tps = if target_tps == 0 {
            warn!(fallback = DEFAULT_TPS, "config_zero_tps_using_default");
            DEFAULT_TPS
        } else {
            target_tps
        };
        let warn_depth = parse_or_default(
            QUEUE_WARN_DEPTH_ENV_VAR,
            std::env::var(QUEUE_WARN_DEPTH_ENV_VAR).ok().as_deref(),
            DEFAULT_QUEUE_WARN_DEPTH,
        );
        let asset_root = std::env::var(ASSET_ROOT_ENV_VAR)
            .ok()
            .filter(|raw| !raw.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ASSET_ROOT));

        Self {
            bind_port,
            asset_root,
            queue: QueueConfig { warn_depth },
            link_diag: parse_enabled_flag(std::env::var(LINK_DIAG_ENV_VAR).ok().as_deref()),
            loop_config: LoopConfig {
                target_tps,
                ..LoopConfig::default()
            },
        }
    }
}

pub(crate) fn build_config() -> TabletConfig {
    init_tracing();
    info!("=== Opal Tablet Startup ===");

    let config = TabletConfig::from_env();
    if !config.asset_root.is_dir() {
        warn!(
            asset_root = %config.asset_root.display(),
            "asset_root_missing_sprites_will_report_not_found"
        );
    }
    info!(
        port = config.bind_port,
        tps = config.loop_config.target_tps,
        asset_root = %config.asset_root.display(),
        queue_warn_depth = config.queue.warn_depth,
        "tablet_config_loaded"
    );
    config
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

fn parse_or_default<T>(var: &'static str, raw: Option<&str>, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match raw {
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(var, value, fallback = %default, "config_invalid_value_using_default");
                default
            }
        },
        None => default,
    }
}

fn parse_enabled_flag(raw: Option<&str>) -> bool {
    matches!(raw, Some("1"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_values_fall_back_on_garbage() {
        assert_eq!(parse_or_default("X", None, DEFAULT_BIND_PORT), 9090);
        assert_eq!(parse_or_default("X", Some("9191"), DEFAULT_BIND_PORT), 9191);
        assert_eq!(parse_or_default("X", Some(" 30 "), DEFAULT_TPS), 30);
        assert_eq!(parse_or_default("X", Some("not-a-port"), DEFAULT_BIND_PORT), 9090);
        assert_eq!(parse_or_default("X", Some("70000"), DEFAULT_BIND_PORT), 9090);
        assert_eq!(parse_or_default("X", Some("-1"), DEFAULT_QUEUE_WARN_DEPTH), 1024);
    }

    #[test]
    fn diag_flag_requires_exact_one() {
        assert!(!parse_enabled_flag(None));
        assert!(!parse_enabled_flag(Some("0")));
        assert!(!parse_enabled_flag(Some("true")));
        assert!(parse_enabled_flag(Some("1")));
    }

    #[test]
    fn loop_config_defaults_to_sixty_ticks_and_playground() {
        let config = LoopConfig::default();
        assert_eq!(config.target_tps, 60);
        let background = config
            .controller
            .default_background
            .expect("default background");
        assert_eq!(background.name, "playground");
    }
}
