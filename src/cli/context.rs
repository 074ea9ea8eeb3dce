use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use time::macros::format_description;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{EnvFilter, fmt};

use crate::advisory::{AdvisoryGateway, RateLimiter};
use crate::api::{BeefySource, DefiLlamaClient, HttpAdvisoryClient, YearnSource};
use crate::chain::{ChainExecutor, CostModelExecutor, TimeoutExecutor};
use crate::config::{ConfigError, LoggingConfig, MeridianConfig, load_config};
use crate::portfolio::JsonPortfolioStore;
use crate::rebalance::{
    OperationPlanner, OrchestratorSettings, PlannerSettings, RebalanceOrchestrator, RiskLimits,
    RiskValidator,
};
use crate::retry::RetryPolicy;
use crate::venue::{
    CatalogSettings, ProtocolProfiles, StaticSource, VenueCatalog, VenueDirectory, VenueSource,
};
use crate::yields::{CatalogMarketData, YieldAggregator, YieldSettings};

/// 初始化 tracing，兼顾 JSON 与文本输出模式。
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let mut filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    const QUIET_TARGETS: &[(&str, &str)] = &[
        ("hyper", "warn"),
        ("hyper_util::client::legacy", "warn"),
        ("reqwest", "info"),
    ];
    for (module, level) in QUIET_TARGETS {
        if !config.level.contains(module) {
            if let Ok(directive) = format!("{module}={level}").parse() {
                filter = filter.add_directive(directive);
            }
        }
    }

    let timer = UtcTime::new(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    ));
    let base = fmt()
        .with_timer(timer)
        .with_file(false)
        .with_line_number(false)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr);

    if config.json {
        base.json()
            .with_current_span(false)
            .with_span_list(false)
            .with_env_filter(filter)
            .try_init()
            .map_err(|err| anyhow!(err.to_string()))?;
    } else {
        base.with_env_filter(filter)
            .event_format(fmt::format().compact())
            .try_init()
            .map_err(|err| anyhow!(err.to_string()))?;
    }
    Ok(())
}

/// 加载主配置；用于 `meridian --config` 的入口。
pub fn load_configuration(path: Option<PathBuf>) -> Result<MeridianConfig, ConfigError> {
    load_config(path)
}

/// 按配置装配好的全部组件。
pub struct AppContext {
    pub catalog: Arc<VenueCatalog>,
    pub aggregator: Arc<YieldAggregator>,
    pub executor: Arc<dyn ChainExecutor>,
    pub orchestrator: RebalanceOrchestrator,
}

impl AppContext {
    pub fn build(config: &MeridianConfig) -> Result<Self> {
        let retry = RetryPolicy::from_config(&config.retry);
        let http = reqwest::Client::builder()
            .user_agent(concat!("meridian/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| anyhow!("构建 HTTP 客户端失败: {err}"))?;
        let source_timeout = Duration::from_millis(config.catalog.source_timeout_ms);

        let mut sources: Vec<Arc<dyn VenueSource>> = Vec::new();
        let mut history = None;
        if config.catalog.defillama.enable {
            let client = DefiLlamaClient::new(
                http.clone(),
                &config.catalog.defillama.base_url,
                source_timeout,
                config.catalog.registry_limit,
            )?;
            history = Some(client.clone());
            sources.push(Arc::new(client));
        }
        if config.catalog.yearn.enable {
            sources.push(Arc::new(YearnSource::new(
                http.clone(),
                &config.catalog.yearn.base_url,
                source_timeout,
            )?));
        }
        if config.catalog.beefy.enable {
            sources.push(Arc::new(BeefySource::new(
                http.clone(),
                &config.catalog.beefy.base_url,
                source_timeout,
            )?));
        }
        if !config.catalog.static_venues.is_empty() {
            sources.push(Arc::new(StaticSource::from_config(
                &config.catalog.static_venues,
            )));
        }
        if sources.is_empty() {
            warn!(target: "cli", "未启用任何场所数据源，扫描结果将为空");
        }

        let snapshot_ttl = Duration::from_secs(config.yields.cache_ttl_secs);
        let catalog = Arc::new(VenueCatalog::new(
            sources,
            ProtocolProfiles::from_config(&config.catalog.protocols),
            CatalogSettings::from_config(&config.catalog, retry, snapshot_ttl),
        ));
        info!(
            target: "cli",
            sources = ?catalog.source_names(),
            "场所目录已就绪"
        );
        let directory: Arc<dyn VenueDirectory> = catalog.clone();

        let market = Arc::new(CatalogMarketData::new(directory.clone(), history, retry));
        let aggregator = Arc::new(YieldAggregator::new(
            directory.clone(),
            market,
            YieldSettings::from_config(&config.yields),
        ));

        let executor: Arc<dyn ChainExecutor> = Arc::new(TimeoutExecutor::new(
            CostModelExecutor::from_config(&config.chains, &config.bridge),
            Duration::from_millis(config.executor.call_timeout_ms),
        ));
        let planner = OperationPlanner::new(
            executor.clone(),
            directory.clone(),
            PlannerSettings::from_config(&config.planner, &config.risk, &config.chains, retry),
        );

        let portfolio = Arc::new(JsonPortfolioStore::new(&config.portfolio.data_dir));
        let mut orchestrator = RebalanceOrchestrator::new(
            portfolio,
            directory,
            aggregator.clone(),
            planner,
            RiskValidator::new(RiskLimits::from_config(&config.risk)),
            OrchestratorSettings::from_config(&config.orchestrator, &config.planner),
        );
        if let Some(endpoint) = config.advisory.endpoint.as_deref() {
            let client = HttpAdvisoryClient::new(
                http,
                endpoint,
                Duration::from_millis(config.advisory.timeout_ms),
            )?;
            let gateway = AdvisoryGateway::new(
                Arc::new(client),
                RateLimiter::per_minute(config.advisory.max_requests_per_minute),
            );
            orchestrator = orchestrator.with_advisory(Arc::new(gateway));
        }

        Ok(Self {
            catalog,
            aggregator,
            executor,
            orchestrator,
        })
    }
}
