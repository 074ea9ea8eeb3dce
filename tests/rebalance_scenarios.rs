use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use meridian::advisory::{
    AdvisoryContext, AdvisoryGateway, AdvisoryResult, AdvisoryService, RateLimiter,
};
use meridian::chain::{ChainExecutor, CostModelExecutor};
use meridian::config::MeridianConfig;
use meridian::portfolio::{MemoryPortfolioStore, PortfolioError, PortfolioResult, PortfolioStore};
use meridian::rebalance::{
    Allocation, NoActionReason, OperationAction, OperationPlanner, OrchestratorSettings,
    PlannerSettings, RebalanceOrchestrator, RebalanceOutcome, RebalancePlan, RebalanceRequest,
    RejectionReason, ResponseStatus, RiskLimits, RiskValidator, TargetSource, TargetWeight,
};
use meridian::retry::RetryPolicy;
use meridian::venue::{
    CatalogSettings, ChainId, ProtocolProfiles, RawVenue, ScanFilter, SourceError, SourceResult,
    Venue, VenueCatalog, VenueCategory, VenueDirectory, VenueKey, VenueSource, supports_batching,
};
use meridian::yields::{CatalogMarketData, YieldAggregator, YieldSettings};

const PORTFOLIO: &str = "alice";

struct FixedDirectory {
    venues: Vec<Venue>,
}

#[async_trait]
impl VenueDirectory for FixedDirectory {
    async fn scan(&self, _chains: Option<&[ChainId]>) -> Vec<Venue> {
        self.venues.clone()
    }

    async fn venue(&self, key: &VenueKey) -> Option<Venue> {
        self.venues.iter().find(|venue| &venue.key == key).cloned()
    }

    async fn equivalents(&self, venue: &Venue) -> Vec<Venue> {
        self.venues
            .iter()
            .filter(|candidate| venue.is_equivalent_to(candidate))
            .cloned()
            .collect()
    }
}

fn venue(protocol: &str, chain: &str, symbol: &str, apy: f64, risk_score: u8) -> Venue {
    Venue {
        key: VenueKey::new(protocol, chain, "0xa0b8"),
        symbol: symbol.to_string(),
        current_apy: apy,
        tvl: Decimal::from(250_000_000),
        risk_score,
        category: VenueCategory::Lending,
        audited: true,
        launched_at: None,
        supports_batching: supports_batching(protocol),
        source: "fixture".to_string(),
        source_ref: None,
    }
}

fn key(protocol: &str, chain: &str) -> VenueKey {
    VenueKey::new(protocol, chain, "0xa0b8")
}

struct Harness {
    orchestrator: RebalanceOrchestrator,
    store: Arc<MemoryPortfolioStore>,
    executor: Arc<CostModelExecutor>,
}

fn harness(venues: Vec<Venue>, current: Allocation, limits: RiskLimits) -> Harness {
    let store = Arc::new(MemoryPortfolioStore::new().with_allocation(PORTFOLIO, current));
    let (orchestrator, executor) = orchestrator(venues, store.clone(), limits);
    Harness {
        orchestrator,
        store,
        executor,
    }
}

fn orchestrator(
    venues: Vec<Venue>,
    store: Arc<dyn PortfolioStore>,
    limits: RiskLimits,
) -> (RebalanceOrchestrator, Arc<CostModelExecutor>) {
    let config = MeridianConfig::default();
    let directory: Arc<dyn VenueDirectory> = Arc::new(FixedDirectory { venues });
    let executor = Arc::new(CostModelExecutor::from_config(&config.chains, &config.bridge));

    let market = Arc::new(CatalogMarketData::new(directory.clone(), None, RetryPolicy::none()));
    let aggregator = Arc::new(YieldAggregator::new(
        directory.clone(),
        market,
        YieldSettings::from_config(&config.yields),
    ));
    let planner_executor: Arc<dyn ChainExecutor> = executor.clone();
    let planner = OperationPlanner::new(
        planner_executor,
        directory.clone(),
        PlannerSettings::from_config(&config.planner, &config.risk, &config.chains, RetryPolicy::none()),
    );
    let orchestrator = RebalanceOrchestrator::new(
        store,
        directory,
        aggregator,
        planner,
        RiskValidator::new(limits),
        OrchestratorSettings::from_config(&config.orchestrator, &config.planner),
    );
    (orchestrator, executor)
}

fn supplied(weights: &[(VenueKey, f64)]) -> RebalanceRequest {
    let mut request = RebalanceRequest::new(PORTFOLIO, 8);
    request.target = TargetSource::Supplied(
        weights
            .iter()
            .map(|(venue, pct)| TargetWeight::new(venue.clone(), *pct))
            .collect(),
    );
    request
}

fn loose_limits() -> RiskLimits {
    RiskLimits {
        max_concentration_pct: 100.0,
        ..RiskLimits::default()
    }
}

#[tokio::test]
async fn identical_target_is_no_action_needed() {
    let a = key("aave-v3", "ethereum");
    let current = Allocation::from_percentages(Decimal::from(10_000), [(a.clone(), 100.0)]);
    let harness = harness(
        vec![venue("aave-v3", "ethereum", "USDC", 4.0, 3)],
        current,
        RiskLimits::default(),
    );

    let outcome = harness
        .orchestrator
        .run(&supplied(&[(a, 100.0)]))
        .await
        .expect("outcome");
    match outcome {
        RebalanceOutcome::NoActionNeeded { reason, plan } => {
            assert_eq!(reason, NoActionReason::AlreadyBalanced);
            assert!(plan.is_empty());
        }
        other => panic!("expected no action, got {other:?}"),
    }
    assert!(harness.store.plans(PORTFOLIO).is_empty());
}

#[tokio::test]
async fn simple_rebalance_withdraws_before_depositing() {
    let a = key("aave-v3", "ethereum");
    let b = key("curve", "ethereum");
    let current = Allocation::from_percentages(Decimal::from(10_000), [(a.clone(), 100.0)]);
    let harness = harness(
        vec![
            venue("aave-v3", "ethereum", "USDC", 4.0, 3),
            venue("curve", "ethereum", "3CRV", 6.0, 4),
        ],
        current,
        RiskLimits {
            max_concentration_pct: 60.0,
            ..RiskLimits::default()
        },
    );
    let mut request = supplied(&[(a.clone(), 60.0), (b.clone(), 40.0)]);
    request.force_rebalance = true;

    let outcome = harness.orchestrator.run(&request).await.expect("outcome");
    let RebalanceOutcome::PlanReady(plan) = outcome else {
        panic!("expected plan, got {outcome:?}");
    };
    let ops = plan.operations();
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[0].action, OperationAction::Withdraw);
    assert_eq!(ops[0].venue, a);
    assert_eq!(ops[0].amount, Decimal::from(4_000));
    assert_eq!(ops[0].priority, 1);
    assert_eq!(ops[1].action, OperationAction::Deposit);
    assert_eq!(ops[1].venue, b);
    assert_eq!(ops[1].amount, Decimal::from(4_000));
    assert_eq!(ops[1].priority, 2);

    // 以太坊默认 gas 12 美元，两笔操作
    assert_eq!(plan.estimated_cost(), Decimal::from(24));
    // 4000 从 4% 挪到 6%：10000 上提升 0.8 个百分点
    assert!((plan.estimated_improvement_percent() - 0.8).abs() < 1e-9);

    let deposits: Decimal = ops
        .iter()
        .filter(|op| op.action == OperationAction::Deposit)
        .map(|op| op.amount)
        .sum();
    let withdrawals: Decimal = ops
        .iter()
        .filter(|op| op.action == OperationAction::Withdraw)
        .map(|op| op.amount)
        .sum();
    assert_eq!(deposits - withdrawals, Decimal::ZERO);

    let recorded = harness.store.plans(PORTFOLIO);
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].id(), plan.id());
}

async fn migrations_with_alternative(alternative_apy: f64) -> usize {
    let home = key("aave-v3", "ethereum");
    let other = key("compound-v3", "ethereum");
    let harness = harness(
        vec![
            venue("aave-v3", "ethereum", "USDC", 5.0, 3),
            venue("aave-v3", "arbitrum", "USDC", alternative_apy, 3),
            venue("compound-v3", "ethereum", "USDT", 3.0, 3),
        ],
        Allocation::empty(Decimal::from(10_000)),
        RiskLimits::default(),
    );
    let mut request = supplied(&[(home, 50.0), (other, 50.0)]);
    request.force_rebalance = true;

    let outcome = harness.orchestrator.run(&request).await.expect("outcome");
    let RebalanceOutcome::PlanReady(plan) = outcome else {
        panic!("expected plan, got {outcome:?}");
    };
    plan.operations()
        .iter()
        .filter(|op| op.action == OperationAction::Migrate)
        .count()
}

#[tokio::test]
async fn migration_requires_two_point_hurdle_after_bridge_cost() {
    // 默认桥费 5 + 5bps，5000 上约 0.15 个百分点
    assert_eq!(migrations_with_alternative(6.5).await, 0);
    assert_eq!(migrations_with_alternative(7.5).await, 1);
}

#[tokio::test]
async fn migration_is_last_and_counts_towards_improvement() {
    let home = key("aave-v3", "ethereum");
    let other = key("compound-v3", "ethereum");
    let harness = harness(
        vec![
            venue("aave-v3", "ethereum", "USDC", 5.0, 3),
            venue("aave-v3", "arbitrum", "USDC", 9.0, 3),
            venue("compound-v3", "ethereum", "USDT", 3.0, 3),
        ],
        Allocation::empty(Decimal::from(10_000)),
        RiskLimits::default(),
    );
    let outcome = harness
        .orchestrator
        .run(&supplied(&[(home, 50.0), (other, 50.0)]))
        .await
        .expect("outcome");
    let RebalanceOutcome::PlanReady(plan) = outcome else {
        panic!("expected plan, got {outcome:?}");
    };
    let last = plan.operations().last().expect("operations");
    assert_eq!(last.action, OperationAction::Migrate);
    assert_eq!(last.target_chain, Some(ChainId::new("arbitrum")));
    // 迁移后 5000×9% + 5000×3%，分母 10000
    assert!((plan.estimated_improvement_percent() - 6.0).abs() < 1e-9);
    assert!(plan.estimated_duration_secs() >= 300);
}

#[tokio::test]
async fn concentrated_target_is_rejected_not_failed() {
    let a = key("aave-v3", "ethereum");
    let b = key("compound-v3", "ethereum");
    let current = Allocation::from_percentages(Decimal::from(10_000), [(b.clone(), 100.0)]);
    let harness = harness(
        vec![
            venue("aave-v3", "ethereum", "USDC", 4.0, 3),
            venue("compound-v3", "ethereum", "USDC", 3.0, 3),
        ],
        current,
        RiskLimits::default(),
    );

    let outcome = harness
        .orchestrator
        .run(&supplied(&[(a.clone(), 70.0), (b, 30.0)]))
        .await
        .expect("outcome");
    assert!(matches!(
        outcome,
        RebalanceOutcome::Rejected(RejectionReason::Concentration { ref venue, .. }) if *venue == a
    ));
    assert!(harness.store.plans(PORTFOLIO).is_empty());
}

#[tokio::test]
async fn risky_venue_is_rejected_even_with_high_tolerance() {
    let safe = key("aave-v3", "ethereum");
    let risky = key("degen", "ethereum");
    let harness = harness(
        vec![
            venue("aave-v3", "ethereum", "USDC", 4.0, 3),
            venue("degen", "ethereum", "USDC", 40.0, 9),
        ],
        Allocation::empty(Decimal::from(10_000)),
        loose_limits(),
    );
    let mut request = supplied(&[(safe, 50.0), (risky, 50.0)]);
    request.risk_tolerance = 10;

    let outcome = harness.orchestrator.run(&request).await.expect("outcome");
    assert!(matches!(
        outcome,
        RebalanceOutcome::Rejected(RejectionReason::RiskTooHigh { risk_score: 9, .. })
    ));
}

#[tokio::test]
async fn reserve_exceeding_capital_fails_with_code() {
    let a = key("aave-v3", "ethereum");
    let harness = harness(
        vec![venue("aave-v3", "ethereum", "USDC", 4.0, 3)],
        Allocation::empty(Decimal::from(1_000)),
        loose_limits(),
    );
    let mut request = supplied(&[(a, 100.0)]);
    request.liquidity_reserve = Decimal::from(1_000);

    let response = harness.orchestrator.run_traced(&request).await;
    assert_eq!(response.status, ResponseStatus::Failed);
    assert_eq!(response.code, Some("insufficient_capital"));
    assert!(response.plan.is_none());
}

#[tokio::test]
async fn advisory_target_without_gateway_fails_closed() {
    let harness = harness(
        vec![venue("aave-v3", "ethereum", "USDC", 4.0, 3)],
        Allocation::empty(Decimal::from(1_000)),
        loose_limits(),
    );
    let mut request = RebalanceRequest::new(PORTFOLIO, 5);
    request.target = TargetSource::Advisory;

    let err = harness.orchestrator.run(&request).await.unwrap_err();
    assert_eq!(err.code(), "advisory_not_configured");
}

#[tokio::test]
async fn optimizer_target_deploys_capital_after_reserve() {
    let harness = harness(
        vec![
            venue("aave-v3", "ethereum", "USDC", 6.0, 3),
            venue("compound-v3", "ethereum", "USDT", 5.0, 3),
            venue("curve", "ethereum", "3CRV", 4.5, 4),
            venue("degen", "ethereum", "USDC", 50.0, 9),
        ],
        Allocation::empty(Decimal::from(10_000)),
        RiskLimits::default(),
    );
    let mut request = RebalanceRequest::new(PORTFOLIO, 5);
    request.liquidity_reserve = Decimal::from(1_000);

    let outcome = harness.orchestrator.run(&request).await.expect("outcome");
    let RebalanceOutcome::PlanReady(plan) = outcome else {
        panic!("expected plan, got {outcome:?}");
    };
    assert!(plan
        .operations()
        .iter()
        .all(|op| op.action == OperationAction::Deposit));
    assert!(plan.operations().iter().all(|op| op.venue.protocol != "degen"));
    let deployed: Decimal = plan.operations().iter().map(|op| op.amount).sum();
    assert_eq!(deployed, Decimal::from(9_000));
}

#[tokio::test]
async fn missing_portfolio_is_failure_not_no_action() {
    let harness = harness(Vec::new(), Allocation::empty(Decimal::ZERO), loose_limits());
    let request = RebalanceRequest::new("bob", 5);
    let response = harness.orchestrator.run_traced(&request).await;
    assert_eq!(response.status, ResponseStatus::Failed);
    assert_eq!(response.code, Some("portfolio_not_found"));
}

#[tokio::test]
async fn executing_ready_plan_runs_every_operation() {
    let a = key("aave-v3", "ethereum");
    let b = key("curve", "ethereum");
    let current = Allocation::from_percentages(Decimal::from(10_000), [(a.clone(), 100.0)]);
    let harness = harness(
        vec![
            venue("aave-v3", "ethereum", "USDC", 4.0, 3),
            venue("curve", "ethereum", "3CRV", 6.0, 4),
        ],
        current,
        RiskLimits::default(),
    );
    let request = supplied(&[(a, 50.0), (b, 50.0)]);

    let executed = harness
        .orchestrator
        .run_with_executor(&request, harness.executor.as_ref())
        .await
        .expect("executed");
    let report = executed.execution.expect("report");
    assert_eq!(report.executed(), 2);
    assert!(report.is_success());
}

#[tokio::test(start_paused = true)]
async fn deadline_expiry_cancels_run() {
    struct SlowDirectory;

    #[async_trait]
    impl VenueDirectory for SlowDirectory {
        async fn scan(&self, _chains: Option<&[ChainId]>) -> Vec<Venue> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Vec::new()
        }

        async fn venue(&self, _key: &VenueKey) -> Option<Venue> {
            None
        }

        async fn equivalents(&self, _venue: &Venue) -> Vec<Venue> {
            Vec::new()
        }
    }

    let config = MeridianConfig::default();
    let directory: Arc<dyn VenueDirectory> = Arc::new(SlowDirectory);
    let store = Arc::new(
        MemoryPortfolioStore::new().with_allocation(PORTFOLIO, Allocation::empty(Decimal::from(100))),
    );
    let executor: Arc<dyn ChainExecutor> =
        Arc::new(CostModelExecutor::from_config(&config.chains, &config.bridge));
    let market = Arc::new(CatalogMarketData::new(directory.clone(), None, RetryPolicy::none()));
    let aggregator = Arc::new(YieldAggregator::new(
        directory.clone(),
        market,
        YieldSettings::default(),
    ));
    let planner = OperationPlanner::new(executor, directory.clone(), PlannerSettings::default());
    let orchestrator = RebalanceOrchestrator::new(
        store,
        directory,
        aggregator,
        planner,
        RiskValidator::default(),
        OrchestratorSettings {
            deadline: Some(Duration::from_secs(5)),
            ..OrchestratorSettings::default()
        },
    );

    let err = orchestrator
        .run(&RebalanceRequest::new(PORTFOLIO, 5))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "cancelled");
    assert!(err.to_string().contains("awaiting_target"));
}

struct ListSource {
    name: &'static str,
    venues: Vec<RawVenue>,
}

#[async_trait]
impl VenueSource for ListSource {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch(&self, filter: &ScanFilter) -> SourceResult<Vec<RawVenue>> {
        Ok(self.venues.iter().filter(|raw| filter.admits(raw)).cloned().collect())
    }
}

struct DownSource {
    calls: AtomicUsize,
}

#[async_trait]
impl VenueSource for DownSource {
    fn name(&self) -> &str {
        "down"
    }

    async fn fetch(&self, _filter: &ScanFilter) -> SourceResult<Vec<RawVenue>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Err(SourceError::Unavailable {
            source_name: "down".to_string(),
            reason: "503".to_string(),
        })
    }
}

fn raw(protocol: &str, chain: &str, apy: f64, tvl: i64) -> RawVenue {
    RawVenue {
        key: key(protocol, chain),
        symbol: "USDC".to_string(),
        apy,
        tvl: Decimal::from(tvl),
        category: VenueCategory::Lending,
        audited: Some(true),
        launched_at: None,
        source_ref: None,
    }
}

#[tokio::test]
async fn scan_survives_one_failing_source_out_of_three() {
    let down = Arc::new(DownSource {
        calls: AtomicUsize::new(0),
    });
    let sources: Vec<Arc<dyn VenueSource>> = vec![
        Arc::new(ListSource {
            name: "registry",
            venues: vec![raw("aave-v3", "ethereum", 4.0, 900_000_000)],
        }),
        down.clone(),
        Arc::new(ListSource {
            name: "probe",
            venues: vec![raw("yearn", "ethereum", 7.0, 50_000_000)],
        }),
    ];
    let catalog = VenueCatalog::new(
        sources,
        ProtocolProfiles::default(),
        CatalogSettings {
            default_chains: vec![ChainId::new("ethereum")],
            retry: RetryPolicy::none(),
            ..CatalogSettings::default()
        },
    );

    let report = catalog.scan_report(None).await;
    assert_eq!(report.venues.len(), 2);
    assert_eq!(report.venues[0].key.protocol, "aave-v3");
    assert!(report.is_degraded());
    assert_eq!(report.failed_sources.len(), 1);
    assert_eq!(down.calls.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn small_gain_is_held_back_unless_forced() {
    let a = key("aave-v3", "ethereum");
    let b = key("curve", "ethereum");
    let current = Allocation::from_percentages(Decimal::from(10_000), [(a.clone(), 100.0)]);
    let harness = harness(
        vec![
            venue("aave-v3", "ethereum", "USDC", 4.0, 3),
            venue("curve", "ethereum", "3CRV", 6.0, 4),
        ],
        current,
        loose_limits(),
    );
    // 1000 从 4% 挪到 6%：只提升 0.2 个百分点，低于默认 0.5
    let mut request = supplied(&[(a, 90.0), (b, 10.0)]);

    let outcome = harness.orchestrator.run(&request).await.expect("outcome");
    match outcome {
        RebalanceOutcome::NoActionNeeded { reason, plan } => {
            assert_eq!(reason, NoActionReason::BelowImprovementThreshold);
            assert_eq!(plan.operations().len(), 2);
            assert!((plan.estimated_improvement_percent() - 0.2).abs() < 1e-9);
        }
        other => panic!("expected no action, got {other:?}"),
    }
    assert!(harness.store.plans(PORTFOLIO).is_empty());

    request.force_rebalance = true;
    let outcome = harness.orchestrator.run(&request).await.expect("outcome");
    assert!(matches!(outcome, RebalanceOutcome::PlanReady(ref plan) if !plan.is_empty()));
    assert_eq!(harness.store.plans(PORTFOLIO).len(), 1);
}

struct CannedAdvisor {
    reply: String,
    calls: AtomicUsize,
}

#[async_trait]
impl AdvisoryService for CannedAdvisor {
    async fn propose(&self, _context: &AdvisoryContext) -> AdvisoryResult<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.reply.clone())
    }
}

async fn advisory_outcome(
    venues: Vec<Venue>,
    limits: RiskLimits,
    proposal: &[(VenueKey, f64)],
) -> (RebalanceOutcome, Harness, Arc<CannedAdvisor>) {
    let allocations: Vec<String> = proposal
        .iter()
        .map(|(venue, pct)| format!(r#"{{"venue": "{venue}", "percentage": {pct}}}"#))
        .collect();
    let advisor = Arc::new(CannedAdvisor {
        reply: format!(
            "Suggested split below.\n{{\"allocations\": [{}], \"confidence\": 0.7}}",
            allocations.join(", ")
        ),
        calls: AtomicUsize::new(0),
    });
    let mut harness = harness(venues, Allocation::empty(Decimal::from(10_000)), limits);
    let gateway = AdvisoryGateway::new(advisor.clone(), RateLimiter::per_minute(10));
    harness.orchestrator = harness.orchestrator.with_advisory(Arc::new(gateway));

    let mut request = RebalanceRequest::new(PORTFOLIO, 10);
    request.target = TargetSource::Advisory;
    let outcome = harness.orchestrator.run(&request).await.expect("outcome");
    (outcome, harness, advisor)
}

#[tokio::test]
async fn concentrated_advisory_proposal_is_rejected() {
    let a = key("aave-v3", "ethereum");
    let b = key("compound-v3", "ethereum");
    let (outcome, harness, advisor) = advisory_outcome(
        vec![
            venue("aave-v3", "ethereum", "USDC", 4.0, 3),
            venue("compound-v3", "ethereum", "USDC", 3.0, 3),
        ],
        RiskLimits::default(),
        &[(a.clone(), 70.0), (b, 30.0)],
    )
    .await;

    assert_eq!(advisor.calls.load(Ordering::Relaxed), 1);
    assert!(matches!(
        outcome,
        RebalanceOutcome::Rejected(RejectionReason::Concentration { ref venue, .. }) if *venue == a
    ));
    assert!(harness.store.plans(PORTFOLIO).is_empty());
}

#[tokio::test]
async fn risky_advisory_proposal_is_rejected() {
    let safe = key("aave-v3", "ethereum");
    let risky = key("degen", "ethereum");
    let (outcome, harness, _) = advisory_outcome(
        vec![
            venue("aave-v3", "ethereum", "USDC", 4.0, 3),
            venue("degen", "ethereum", "USDC", 40.0, 9),
        ],
        loose_limits(),
        &[(safe, 50.0), (risky.clone(), 50.0)],
    )
    .await;

    assert!(matches!(
        outcome,
        RebalanceOutcome::Rejected(RejectionReason::RiskTooHigh { ref venue, risk_score: 9, .. })
            if *venue == risky
    ));
    assert!(harness.store.plans(PORTFOLIO).is_empty());
}

#[tokio::test]
async fn accepted_advisory_proposal_becomes_plan() {
    let a = key("aave-v3", "ethereum");
    let b = key("compound-v3", "ethereum");
    let (outcome, harness, _) = advisory_outcome(
        vec![
            venue("aave-v3", "ethereum", "USDC", 4.0, 3),
            venue("compound-v3", "ethereum", "USDT", 3.0, 3),
        ],
        RiskLimits::default(),
        &[(a, 50.0), (b, 50.0)],
    )
    .await;

    let RebalanceOutcome::PlanReady(plan) = outcome else {
        panic!("expected plan, got {outcome:?}");
    };
    assert_eq!(plan.operations().len(), 2);
    assert_eq!(harness.store.plans(PORTFOLIO).len(), 1);
}

/// 读取正常、记录计划总是失败的组合存储。
struct ReadOnlyStore {
    inner: MemoryPortfolioStore,
    record_attempts: AtomicUsize,
}

#[async_trait]
impl PortfolioStore for ReadOnlyStore {
    async fn current_allocation(&self, portfolio_id: &str) -> PortfolioResult<Allocation> {
        self.inner.current_allocation(portfolio_id).await
    }

    async fn record_plan(&self, _portfolio_id: &str, _plan: &RebalancePlan) -> PortfolioResult<()> {
        self.record_attempts.fetch_add(1, Ordering::Relaxed);
        Err(PortfolioError::Io {
            path: "plans.jsonl".into(),
            source: std::io::Error::other("read-only file system"),
        })
    }
}

#[tokio::test]
async fn plan_is_returned_when_recording_fails() {
    let a = key("aave-v3", "ethereum");
    let b = key("curve", "ethereum");
    let store = Arc::new(ReadOnlyStore {
        inner: MemoryPortfolioStore::new().with_allocation(
            PORTFOLIO,
            Allocation::from_percentages(Decimal::from(10_000), [(a.clone(), 100.0)]),
        ),
        record_attempts: AtomicUsize::new(0),
    });
    let (orchestrator, _) = orchestrator(
        vec![
            venue("aave-v3", "ethereum", "USDC", 4.0, 3),
            venue("curve", "ethereum", "3CRV", 6.0, 4),
        ],
        store.clone(),
        RiskLimits::default(),
    );

    let response = orchestrator.run_traced(&supplied(&[(a, 50.0), (b, 50.0)])).await;
    assert_eq!(response.status, ResponseStatus::PlanReady);
    assert_eq!(response.plan.expect("plan").operations().len(), 2);
    assert_eq!(store.record_attempts.load(Ordering::Relaxed), 1);
}
