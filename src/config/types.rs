use std::collections::BTreeMap;
use std::path::PathBuf;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::venue::VenueCategory;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MeridianConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default, rename = "yield")]
    pub yields: YieldConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    /// `[chains.<id>]`：各链的 gas 成本与确认时长。
    #[serde(default = "super::default_chain_costs")]
    pub chains: BTreeMap<String, ChainCostConfig>,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub advisory: AdvisoryConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub portfolio: PortfolioConfig,
}

impl Default for MeridianConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            catalog: CatalogConfig::default(),
            yields: YieldConfig::default(),
            risk: RiskConfig::default(),
            planner: PlannerConfig::default(),
            chains: super::default_chain_costs(),
            bridge: BridgeConfig::default(),
            executor: ExecutorConfig::default(),
            retry: RetryConfig::default(),
            advisory: AdvisoryConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            portfolio: PortfolioConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "super::default_logging_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: super::default_logging_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// 设置后启动 Prometheus exporter，例如 `0.0.0.0:9898`。
    #[serde(default)]
    pub prometheus_listen: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    #[serde(default = "super::default_chains")]
    pub chains: Vec<String>,
    #[serde(default = "super::default_min_tvl_usd")]
    pub min_tvl_usd: Decimal,
    #[serde(default = "super::default_min_apy")]
    pub min_apy: f64,
    #[serde(default = "super::default_source_timeout_ms")]
    pub source_timeout_ms: u64,
    #[serde(default = "super::default_registry_limit")]
    pub registry_limit: usize,
    #[serde(default = "super::default_defillama_endpoint")]
    pub defillama: SourceEndpointConfig,
    #[serde(default = "super::default_yearn_endpoint")]
    pub yearn: SourceEndpointConfig,
    #[serde(default = "super::default_beefy_endpoint")]
    pub beefy: SourceEndpointConfig,
    #[serde(default = "super::default_static_venues")]
    pub static_venues: Vec<StaticVenueConfig>,
    #[serde(default = "super::default_protocols")]
    pub protocols: Vec<ProtocolProfileConfig>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            chains: super::default_chains(),
            min_tvl_usd: super::default_min_tvl_usd(),
            min_apy: super::default_min_apy(),
            source_timeout_ms: super::default_source_timeout_ms(),
            registry_limit: super::default_registry_limit(),
            defillama: super::default_defillama_endpoint(),
            yearn: super::default_yearn_endpoint(),
            beefy: super::default_beefy_endpoint(),
            static_venues: super::default_static_venues(),
            protocols: super::default_protocols(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceEndpointConfig {
    #[serde(default = "super::default_true")]
    pub enable: bool,
    pub base_url: String,
}

/// `[[catalog.static_venues]]`：不依赖网络的固定场所，例如原生质押。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticVenueConfig {
    pub protocol: String,
    pub chain: String,
    pub token: String,
    pub symbol: String,
    pub apy: f64,
    pub tvl_usd: Decimal,
    #[serde(default)]
    pub category: Option<VenueCategory>,
    #[serde(default)]
    pub audited: Option<bool>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub launched_at: Option<OffsetDateTime>,
}

/// `[[catalog.protocols]]`：协议族的审计与费率档案。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtocolProfileConfig {
    pub name: String,
    #[serde(default)]
    pub audited: bool,
    #[serde(default)]
    pub auditors: Vec<String>,
    #[serde(default)]
    pub deposit_fee_bps: u32,
    #[serde(default)]
    pub withdrawal_fee_bps: u32,
    #[serde(default)]
    pub performance_fee_pct: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct YieldConfig {
    #[serde(default = "super::default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "super::default_risk_free_rate")]
    pub risk_free_rate: f64,
    #[serde(default = "super::default_risk_penalty_per_point")]
    pub risk_penalty_per_point: f64,
    #[serde(default = "super::default_max_venues")]
    pub max_venues: usize,
    #[serde(default = "super::default_max_weight_pct")]
    pub max_weight_pct: f64,
    #[serde(default = "super::default_history_days")]
    pub history_days: usize,
    #[serde(default = "super::default_min_history_samples")]
    pub min_history_samples: usize,
}

impl Default for YieldConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: super::default_cache_ttl_secs(),
            risk_free_rate: super::default_risk_free_rate(),
            risk_penalty_per_point: super::default_risk_penalty_per_point(),
            max_venues: super::default_max_venues(),
            max_weight_pct: super::default_max_weight_pct(),
            history_days: super::default_history_days(),
            min_history_samples: super::default_min_history_samples(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RiskConfig {
    #[serde(default = "super::default_max_risk_score")]
    pub max_risk_score: u8,
    #[serde(default = "super::default_max_concentration_pct")]
    pub max_concentration_pct: f64,
    #[serde(default = "super::default_percentage_tolerance")]
    pub percentage_tolerance: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_risk_score: super::default_max_risk_score(),
            max_concentration_pct: super::default_max_concentration_pct(),
            percentage_tolerance: super::default_percentage_tolerance(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlannerConfig {
    #[serde(default = "super::default_migration_hurdle_pct")]
    pub migration_hurdle_pct: f64,
    #[serde(default = "super::default_probe_concurrency")]
    pub probe_concurrency: usize,
    #[serde(default = "super::default_batched_cost_factor")]
    pub batched_cost_factor: Decimal,
    #[serde(default = "super::default_bridge_floor_secs")]
    pub bridge_floor_secs: u64,
    #[serde(default = "super::default_amount_tolerance")]
    pub amount_tolerance: Decimal,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            migration_hurdle_pct: super::default_migration_hurdle_pct(),
            probe_concurrency: super::default_probe_concurrency(),
            batched_cost_factor: super::default_batched_cost_factor(),
            bridge_floor_secs: super::default_bridge_floor_secs(),
            amount_tolerance: super::default_amount_tolerance(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ChainCostConfig {
    pub gas_cost_usd: Decimal,
    #[serde(default = "super::default_confirmation_secs")]
    pub confirmation_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default = "super::default_bridge_base_fee_usd")]
    pub base_fee_usd: Decimal,
    #[serde(default = "super::default_bridge_fee_bps")]
    pub fee_bps: u32,
    #[serde(default = "super::default_bridge_duration_secs")]
    pub duration_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_fee_usd: super::default_bridge_base_fee_usd(),
            fee_bps: super::default_bridge_fee_bps(),
            duration_secs: super::default_bridge_duration_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorConfig {
    #[serde(default = "super::default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: super::default_call_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "super::default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "super::default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "super::default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "super::default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: super::default_max_attempts(),
            base_delay_ms: super::default_base_delay_ms(),
            max_delay_ms: super::default_max_delay_ms(),
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdvisoryConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "super::default_advisory_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "super::default_max_requests_per_minute")]
    pub max_requests_per_minute: usize,
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: super::default_advisory_timeout_ms(),
            max_requests_per_minute: super::default_max_requests_per_minute(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    #[serde(default = "super::default_min_improvement_pct")]
    pub min_improvement_pct: f64,
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            min_improvement_pct: super::default_min_improvement_pct(),
            deadline_ms: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortfolioConfig {
    #[serde(default = "super::default_portfolio_dir")]
    pub data_dir: PathBuf,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            data_dir: super::default_portfolio_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: MeridianConfig = toml::from_str("").expect("parse toml");
        assert_eq!(config.catalog.min_tvl_usd, Decimal::from(100_000));
        assert_eq!(config.yields.cache_ttl_secs, 300);
        assert_eq!(config.yields.max_venues, 5);
        assert_eq!(config.risk.max_risk_score, 8);
        assert_eq!(config.planner.migration_hurdle_pct, 2.0);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.advisory.max_requests_per_minute, 20);
        assert!(config.chains.contains_key("ethereum"));
        assert_eq!(config.catalog.static_venues.len(), 2);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let raw = r#"
            [yield]
            risk_free_rate = 3.5

            [chains.base]
            gas_cost_usd = "0.2"

            [[catalog.static_venues]]
            protocol = "lido"
            chain = "ethereum"
            token = "0xae7ab96520de3a18e5e111b5eaab095312d7fe84"
            symbol = "stETH"
            apy = 3.2
            tvl_usd = "30000000000"
            audited = true
        "#;
        let config: MeridianConfig = toml::from_str(raw).expect("parse toml");
        assert_eq!(config.yields.risk_free_rate, 3.5);
        assert_eq!(config.yields.history_days, 30);
        assert_eq!(config.chains.len(), 1);
        assert_eq!(config.chains["base"].confirmation_secs, 60);
        assert_eq!(config.catalog.static_venues.len(), 1);
        assert_eq!(config.catalog.static_venues[0].audited, Some(true));
    }

    #[test]
    fn parses_yaml_documents() {
        let yaml = "planner:\n  probe_concurrency: 8\nadvisory:\n  endpoint: http://localhost:8000\n";
        let config: MeridianConfig = serde_yaml::from_str(yaml).expect("parse yaml");
        assert_eq!(config.planner.probe_concurrency, 8);
        assert_eq!(config.advisory.endpoint.as_deref(), Some("http://localhost:8000"));
    }
}
