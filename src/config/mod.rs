use std::collections::BTreeMap;
use std::path::PathBuf;

use rust_decimal::Decimal;

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;

use self::types as cfg;

pub(crate) fn default_true() -> bool {
    true
}

pub(crate) fn default_logging_level() -> String {
    "info".to_string()
}

pub(crate) fn default_chains() -> Vec<String> {
    ["ethereum", "polygon", "arbitrum", "optimism", "avalanche"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

pub(crate) fn default_min_tvl_usd() -> Decimal {
    Decimal::from(100_000)
}

pub(crate) fn default_min_apy() -> f64 {
    1.0
}

pub(crate) fn default_source_timeout_ms() -> u64 {
    15_000
}

pub(crate) fn default_registry_limit() -> usize {
    50
}

pub(crate) fn default_defillama_endpoint() -> cfg::SourceEndpointConfig {
    cfg::SourceEndpointConfig {
        enable: true,
        base_url: crate::api::defillama::DEFAULT_BASE_URL.to_string(),
    }
}

pub(crate) fn default_yearn_endpoint() -> cfg::SourceEndpointConfig {
    cfg::SourceEndpointConfig {
        enable: true,
        base_url: crate::api::yearn::DEFAULT_BASE_URL.to_string(),
    }
}

pub(crate) fn default_beefy_endpoint() -> cfg::SourceEndpointConfig {
    cfg::SourceEndpointConfig {
        enable: true,
        base_url: crate::api::beefy::DEFAULT_BASE_URL.to_string(),
    }
}

/// 原生质押场所：ETH 与 MATIC。
pub(crate) fn default_static_venues() -> Vec<cfg::StaticVenueConfig> {
    vec![
        cfg::StaticVenueConfig {
            protocol: "eth-staking".to_string(),
            chain: "ethereum".to_string(),
            token: "0x0000000000000000000000000000000000000000".to_string(),
            symbol: "ETH".to_string(),
            apy: 4.0,
            tvl_usd: Decimal::from(50_000_000_000u64),
            category: Some(crate::venue::VenueCategory::Other),
            audited: Some(true),
            launched_at: None,
        },
        cfg::StaticVenueConfig {
            protocol: "matic-staking".to_string(),
            chain: "polygon".to_string(),
            token: "0x0000000000000000000000000000000000001010".to_string(),
            symbol: "MATIC".to_string(),
            apy: 5.0,
            tvl_usd: Decimal::from(3_000_000_000u64),
            category: Some(crate::venue::VenueCategory::Other),
            audited: Some(true),
            launched_at: None,
        },
    ]
}

pub(crate) fn default_protocols() -> Vec<cfg::ProtocolProfileConfig> {
    let profile = |name: &str, auditors: &[&str], withdrawal_fee_bps: u32, performance_fee_pct: f64| {
        cfg::ProtocolProfileConfig {
            name: name.to_string(),
            audited: true,
            auditors: auditors.iter().map(|auditor| auditor.to_string()).collect(),
            deposit_fee_bps: 0,
            withdrawal_fee_bps,
            performance_fee_pct,
        }
    };
    vec![
        profile("aave", &["OpenZeppelin", "Trail of Bits", "Certora"], 0, 0.0),
        profile("compound", &["OpenZeppelin", "ChainSecurity"], 0, 0.0),
        profile("curve", &["Trail of Bits", "MixBytes"], 0, 0.0),
        profile("yearn", &["MixBytes", "yAcademy"], 0, 10.0),
        profile("beefy", &["Certik"], 10, 4.5),
        profile("uniswap", &["Trail of Bits", "ABDK"], 0, 0.0),
    ]
}

pub(crate) fn default_cache_ttl_secs() -> u64 {
    300
}

pub(crate) fn default_risk_free_rate() -> f64 {
    2.0
}

pub(crate) fn default_risk_penalty_per_point() -> f64 {
    0.1
}

pub(crate) fn default_max_venues() -> usize {
    5
}

pub(crate) fn default_max_weight_pct() -> f64 {
    40.0
}

pub(crate) fn default_history_days() -> usize {
    30
}

pub(crate) fn default_min_history_samples() -> usize {
    7
}

pub(crate) fn default_max_risk_score() -> u8 {
    8
}

pub(crate) fn default_max_concentration_pct() -> f64 {
    50.0
}

pub(crate) fn default_percentage_tolerance() -> f64 {
    0.01
}

pub(crate) fn default_migration_hurdle_pct() -> f64 {
    2.0
}

pub(crate) fn default_probe_concurrency() -> usize {
    5
}

pub(crate) fn default_batched_cost_factor() -> Decimal {
    Decimal::new(15, 1)
}

pub(crate) fn default_bridge_floor_secs() -> u64 {
    300
}

pub(crate) fn default_amount_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

pub(crate) fn default_confirmation_secs() -> u64 {
    60
}

/// 默认 gas 成本表（美元）与确认时长（秒）。
pub(crate) fn default_chain_costs() -> BTreeMap<String, cfg::ChainCostConfig> {
    [
        ("ethereum", Decimal::from(12), 180),
        ("polygon", Decimal::new(10, 2), 60),
        ("arbitrum", Decimal::new(50, 2), 30),
        ("optimism", Decimal::new(40, 2), 30),
        ("avalanche", Decimal::new(30, 2), 30),
        ("base", Decimal::new(20, 2), 30),
    ]
    .into_iter()
    .map(|(chain, gas_cost_usd, confirmation_secs)| {
        (
            chain.to_string(),
            cfg::ChainCostConfig {
                gas_cost_usd,
                confirmation_secs,
            },
        )
    })
    .collect()
}

pub(crate) fn default_bridge_base_fee_usd() -> Decimal {
    Decimal::from(5)
}

pub(crate) fn default_bridge_fee_bps() -> u32 {
    5
}

pub(crate) fn default_bridge_duration_secs() -> u64 {
    600
}

pub(crate) fn default_call_timeout_ms() -> u64 {
    20_000
}

pub(crate) fn default_max_attempts() -> usize {
    3
}

pub(crate) fn default_base_delay_ms() -> u64 {
    500
}

pub(crate) fn default_max_delay_ms() -> u64 {
    10_000
}

pub(crate) fn default_advisory_timeout_ms() -> u64 {
    30_000
}

pub(crate) fn default_max_requests_per_minute() -> usize {
    20
}

pub(crate) fn default_min_improvement_pct() -> f64 {
    0.5
}

pub(crate) fn default_portfolio_dir() -> PathBuf {
    PathBuf::from("data/portfolios")
}
