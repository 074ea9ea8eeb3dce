use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::MeridianConfig;

pub const DEFAULT_CONFIG_PATHS: &[&str] = &["meridian.toml", "config/meridian.toml"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to parse yaml config at {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("config file already exists at {0}")]
    AlreadyExists(PathBuf),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Io { .. } => "config_io",
            ConfigError::Parse { .. } | ConfigError::ParseYaml { .. } => "config_parse",
            ConfigError::AlreadyExists(_) => "config_exists",
        }
    }
}

pub fn load_config(path: Option<PathBuf>) -> Result<MeridianConfig, ConfigError> {
    let candidate_paths = match path {
        Some(p) => vec![p],
        None => DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .collect::<Vec<PathBuf>>(),
    };

    for candidate in candidate_paths {
        if let Some(config) = try_load_file(&candidate)? {
            return Ok(config);
        }
    }

    Ok(MeridianConfig::default())
}

fn try_load_file(path: &Path) -> Result<Option<MeridianConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

    let config: MeridianConfig = if is_yaml {
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    };

    Ok(Some(config))
}

/// `meridian init` 写出的配置模板。
pub const CONFIG_TEMPLATE: &str = r#"# meridian 配置模板，未写出的字段使用默认值。

[logging]
level = "info"
json = false

[metrics]
# prometheus_listen = "0.0.0.0:9898"

[catalog]
chains = ["ethereum", "polygon", "arbitrum", "optimism", "avalanche"]
min_tvl_usd = 100000
min_apy = 1.0
source_timeout_ms = 15000
registry_limit = 50

[catalog.defillama]
enable = true
base_url = "https://yields.llama.fi"

[catalog.yearn]
enable = true
base_url = "https://api.yearn.finance/v1"

[catalog.beefy]
enable = true
base_url = "https://api.beefy.finance"

[yield]
cache_ttl_secs = 300
risk_free_rate = 2.0
risk_penalty_per_point = 0.1
max_venues = 5
max_weight_pct = 40.0
history_days = 30
min_history_samples = 7

[risk]
max_risk_score = 8
max_concentration_pct = 50.0
percentage_tolerance = 0.01

[planner]
migration_hurdle_pct = 2.0
probe_concurrency = 5
batched_cost_factor = 1.5
bridge_floor_secs = 300
amount_tolerance = 0.01

[chains.ethereum]
gas_cost_usd = 12
confirmation_secs = 180

[chains.arbitrum]
gas_cost_usd = 0.5
confirmation_secs = 30

[chains.polygon]
gas_cost_usd = 0.1
confirmation_secs = 60

[bridge]
base_fee_usd = 5
fee_bps = 5
duration_secs = 600

[executor]
call_timeout_ms = 20000

[retry]
max_attempts = 3
base_delay_ms = 500
max_delay_ms = 10000
jitter = true

[advisory]
# endpoint = "http://localhost:8000"
timeout_ms = 30000
max_requests_per_minute = 20

[orchestrator]
min_improvement_pct = 0.5
# deadline_ms = 60000

[portfolio]
data_dir = "data/portfolios"
"#;

/// 写出配置模板，目标已存在时拒绝覆盖。
pub fn write_template(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        return Err(ConfigError::AlreadyExists(path.to_path_buf()));
    }
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, CONFIG_TEMPLATE).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
