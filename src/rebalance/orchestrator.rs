use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::advisory::{AdvisoryContext, AdvisoryError, AdvisoryGateway};
use crate::chain::ChainExecutor;
use crate::config::{OrchestratorConfig, PlannerConfig};
use crate::monitoring::events;
use crate::portfolio::PortfolioStore;
use crate::venue::{Venue, VenueDirectory, VenueKey};
use crate::yields::YieldAggregator;

use super::diff::DiffEngine;
use super::error::{RebalanceError, RebalanceResult};
use super::execution::{ExecutionReport, execute_plan};
use super::planner::OperationPlanner;
use super::risk::{RejectionReason, RiskValidator};
use super::types::{Allocation, OperationAction, RebalanceOperation, RebalancePlan};

/// 调仓状态机的阶段。终态为 PlanReady / Rejected / Failed。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceState {
    Idle,
    FetchingState,
    AwaitingTarget,
    Validating,
    Diffing,
    Planning,
    PlanReady,
    Rejected,
    Failed,
}

impl RebalanceState {
    pub fn as_str(self) -> &'static str {
        match self {
            RebalanceState::Idle => "idle",
            RebalanceState::FetchingState => "fetching_state",
            RebalanceState::AwaitingTarget => "awaiting_target",
            RebalanceState::Validating => "validating",
            RebalanceState::Diffing => "diffing",
            RebalanceState::Planning => "planning",
            RebalanceState::PlanReady => "plan_ready",
            RebalanceState::Rejected => "rejected",
            RebalanceState::Failed => "failed",
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetWeight {
    #[serde_as(as = "DisplayFromStr")]
    pub venue: VenueKey,
    pub percentage: f64,
}

impl TargetWeight {
    pub fn new(venue: VenueKey, percentage: f64) -> Self {
        Self { venue, percentage }
    }
}

/// 目标配置的来源。无论来源如何，都要经过风控校验。
#[derive(Debug, Clone, PartialEq)]
pub enum TargetSource {
    Optimizer,
    Advisory,
    Supplied(Vec<TargetWeight>),
}

#[derive(Debug, Clone)]
pub struct RebalanceRequest {
    pub portfolio_id: String,
    pub user_id: String,
    pub risk_tolerance: u8,
    pub liquidity_reserve: Decimal,
    pub force_rebalance: bool,
    pub target: TargetSource,
    /// 覆盖配置中的整体截止时间。
    pub deadline: Option<Duration>,
}

impl RebalanceRequest {
    pub fn new(portfolio_id: impl Into<String>, risk_tolerance: u8) -> Self {
        let portfolio_id = portfolio_id.into();
        Self {
            user_id: portfolio_id.clone(),
            portfolio_id,
            risk_tolerance,
            liquidity_reserve: Decimal::ZERO,
            force_rebalance: false,
            target: TargetSource::Optimizer,
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoActionReason {
    AlreadyBalanced,
    BelowImprovementThreshold,
}

impl NoActionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            NoActionReason::AlreadyBalanced => "already_balanced",
            NoActionReason::BelowImprovementThreshold => "below_improvement_threshold",
        }
    }
}

/// 状态机的正常结局。失败走 `Err(RebalanceError)`，与这里的三种结局严格区分。
#[derive(Debug, Clone, PartialEq)]
pub enum RebalanceOutcome {
    NoActionNeeded {
        reason: NoActionReason,
        plan: RebalancePlan,
    },
    PlanReady(RebalancePlan),
    Rejected(RejectionReason),
}

impl RebalanceOutcome {
    pub fn plan(&self) -> Option<&RebalancePlan> {
        match self {
            RebalanceOutcome::NoActionNeeded { plan, .. } | RebalanceOutcome::PlanReady(plan) => {
                Some(plan)
            }
            RebalanceOutcome::Rejected(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    NoActionNeeded,
    PlanReady,
    Rejected,
    Failed,
}

/// 对外的响应形状：`{status, plan?, reason?}`。
#[derive(Debug, Clone, Serialize)]
pub struct RebalanceResponse {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<RebalancePlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl RebalanceResponse {
    pub fn from_result(result: RebalanceResult<RebalanceOutcome>) -> Self {
        match result {
            Ok(RebalanceOutcome::NoActionNeeded { reason, plan }) => Self {
                status: ResponseStatus::NoActionNeeded,
                plan: Some(plan),
                reason: Some(reason.as_str().to_string()),
                code: Some(reason.as_str()),
            },
            Ok(RebalanceOutcome::PlanReady(plan)) => Self {
                status: ResponseStatus::PlanReady,
                plan: Some(plan),
                reason: None,
                code: None,
            },
            Ok(RebalanceOutcome::Rejected(reason)) => Self {
                status: ResponseStatus::Rejected,
                plan: None,
                reason: Some(reason.to_string()),
                code: Some(reason.code()),
            },
            Err(err) => Self {
                status: ResponseStatus::Failed,
                plan: None,
                reason: Some(err.to_string()),
                code: Some(err.code()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub min_improvement_pct: f64,
    pub deadline: Option<Duration>,
    pub diff_tolerance: Decimal,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            min_improvement_pct: 0.5,
            deadline: None,
            diff_tolerance: Decimal::new(1, 2),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(orchestrator: &OrchestratorConfig, planner: &PlannerConfig) -> Self {
        Self {
            min_improvement_pct: orchestrator.min_improvement_pct,
            deadline: orchestrator.deadline_ms.map(Duration::from_millis),
            diff_tolerance: planner.amount_tolerance,
        }
    }
}

/// 执行回调后的结果：执行报告只在 PlanReady 且计划非空时存在。
#[derive(Debug, Clone)]
pub struct ExecutedRebalance {
    pub outcome: RebalanceOutcome,
    pub execution: Option<ExecutionReport>,
}

pub struct RebalanceOrchestrator {
    portfolio: Arc<dyn PortfolioStore>,
    directory: Arc<dyn VenueDirectory>,
    aggregator: Arc<YieldAggregator>,
    advisory: Option<Arc<AdvisoryGateway>>,
    validator: RiskValidator,
    diff: DiffEngine,
    planner: OperationPlanner,
    settings: OrchestratorSettings,
}

impl RebalanceOrchestrator {
    pub fn new(
        portfolio: Arc<dyn PortfolioStore>,
        directory: Arc<dyn VenueDirectory>,
        aggregator: Arc<YieldAggregator>,
        planner: OperationPlanner,
        validator: RiskValidator,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            portfolio,
            directory,
            aggregator,
            advisory: None,
            validator,
            diff: DiffEngine::new(settings.diff_tolerance),
            planner,
            settings,
        }
    }

    pub fn with_advisory(mut self, gateway: Arc<AdvisoryGateway>) -> Self {
        self.advisory = Some(gateway);
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// 跑完整个状态机并上报终态。超过截止时间记为在当前阶段取消。
    pub async fn run(&self, request: &RebalanceRequest) -> RebalanceResult<RebalanceOutcome> {
        let stage = Mutex::new(RebalanceState::Idle);
        let deadline = request.deadline.or(self.settings.deadline);
        let drive = self.drive(request, &stage);
        let result = match deadline {
            Some(limit) => match timeout(limit, drive).await {
                Ok(result) => result,
                Err(_) => Err(RebalanceError::Cancelled {
                    stage: stage.lock().as_str(),
                }),
            },
            None => drive.await,
        };
        self.report(request, &result);
        result
    }

    /// 与 [`run`](Self::run) 相同，额外返回终态对应的外部响应。
    pub async fn run_traced(&self, request: &RebalanceRequest) -> RebalanceResponse {
        RebalanceResponse::from_result(self.run(request).await)
    }

    /// 计划就绪后交给执行器逐笔执行。
    pub async fn run_with_executor(
        &self,
        request: &RebalanceRequest,
        executor: &dyn ChainExecutor,
    ) -> RebalanceResult<ExecutedRebalance> {
        let outcome = self.run(request).await?;
        let execution = match &outcome {
            RebalanceOutcome::PlanReady(plan) if !plan.is_empty() => {
                Some(execute_plan(plan, executor).await)
            }
            _ => None,
        };
        Ok(ExecutedRebalance { outcome, execution })
    }

    async fn drive(
        &self,
        request: &RebalanceRequest,
        stage: &Mutex<RebalanceState>,
    ) -> RebalanceResult<RebalanceOutcome> {
        self.enter(request, stage, RebalanceState::FetchingState);
        let current = self
            .portfolio
            .current_allocation(&request.portfolio_id)
            .await?;

        self.enter(request, stage, RebalanceState::AwaitingTarget);
        let target = self.target(request, &current).await?;

        if self.diff.is_noop(&current, &target) {
            return Ok(RebalanceOutcome::NoActionNeeded {
                reason: NoActionReason::AlreadyBalanced,
                plan: RebalancePlan::empty(),
            });
        }

        self.enter(request, stage, RebalanceState::Validating);
        let venues = self
            .lookup_venues(target.entries.iter().map(|entry| &entry.venue))
            .await;
        let validated = match self
            .validator
            .validate(target, |key| venues.get(key).map(|venue| venue.risk_score))
        {
            Ok(validated) => validated,
            Err(reason) => {
                self.enter(request, stage, RebalanceState::Rejected);
                return Ok(RebalanceOutcome::Rejected(reason));
            }
        };

        self.enter(request, stage, RebalanceState::Diffing);
        let operations = self.diff.diff(&current, validated.allocation());

        self.enter(request, stage, RebalanceState::Planning);
        let draft = self.planner.plan(operations, &validated).await?;

        let improvement = self
            .improvement(&current, validated.allocation(), &draft.operations, venues)
            .await;
        let plan = RebalancePlan::new(
            draft.operations,
            draft.estimated_cost,
            draft.estimated_duration_secs,
            improvement,
        );

        if plan.is_empty() {
            return Ok(RebalanceOutcome::NoActionNeeded {
                reason: NoActionReason::AlreadyBalanced,
                plan,
            });
        }
        if !request.force_rebalance && improvement < self.settings.min_improvement_pct {
            return Ok(RebalanceOutcome::NoActionNeeded {
                reason: NoActionReason::BelowImprovementThreshold,
                plan,
            });
        }

        self.enter(request, stage, RebalanceState::PlanReady);
        if let Err(err) = self
            .portfolio
            .record_plan(&request.portfolio_id, &plan)
            .await
        {
            warn!(
                target: "rebalance::orchestrator",
                portfolio = %request.portfolio_id,
                plan_id = %plan.id(),
                error = %err,
                "计划记录失败，仍返回计划"
            );
        }
        Ok(RebalanceOutcome::PlanReady(plan))
    }

    fn enter(&self, request: &RebalanceRequest, stage: &Mutex<RebalanceState>, next: RebalanceState) {
        let previous = std::mem::replace(&mut *stage.lock(), next);
        debug!(
            target: "rebalance::orchestrator",
            portfolio = %request.portfolio_id,
            from = previous.as_str(),
            to = next.as_str(),
            "状态切换"
        );
    }

    async fn target(
        &self,
        request: &RebalanceRequest,
        current: &Allocation,
    ) -> RebalanceResult<Allocation> {
        let total = current.total_capital;
        match &request.target {
            TargetSource::Optimizer => Ok(self
                .aggregator
                .optimal_allocation(total, request.risk_tolerance, request.liquidity_reserve)
                .await?),
            TargetSource::Supplied(weights) => {
                weights_to_allocation(total, request.liquidity_reserve, weights)
            }
            TargetSource::Advisory => {
                let gateway = self
                    .advisory
                    .as_ref()
                    .ok_or(RebalanceError::Advisory(AdvisoryError::NotConfigured))?;
                let candidates: Vec<Venue> = self
                    .directory
                    .scan(None)
                    .await
                    .into_iter()
                    .filter(|venue| venue.risk_score <= request.risk_tolerance)
                    .collect();
                let context = AdvisoryContext {
                    portfolio_id: request.portfolio_id.clone(),
                    user_id: request.user_id.clone(),
                    risk_tolerance: request.risk_tolerance,
                    liquidity_reserve: request.liquidity_reserve,
                    current: current.clone(),
                    candidates,
                };
                let proposal = gateway.proposal(&context).await?;
                let weights: Vec<TargetWeight> = proposal
                    .entries
                    .into_iter()
                    .map(|entry| TargetWeight::new(entry.venue, entry.percentage))
                    .collect();
                weights_to_allocation(total, request.liquidity_reserve, &weights)
            }
        }
    }

    async fn lookup_venues<'a, I>(&self, keys: I) -> HashMap<VenueKey, Venue>
    where
        I: IntoIterator<Item = &'a VenueKey>,
    {
        let lookups = keys.into_iter().map(|key| self.directory.venue(key));
        join_all(lookups)
            .await
            .into_iter()
            .flatten()
            .map(|venue| (venue.key.clone(), venue))
            .collect()
    }

    /// 迁移生效后的目标加权 APY 减去当前加权 APY，分母都是当前总资金。
    async fn improvement(
        &self,
        current: &Allocation,
        target: &Allocation,
        operations: &[RebalanceOperation],
        mut venues: HashMap<VenueKey, Venue>,
    ) -> f64 {
        let migrations: HashMap<&VenueKey, &VenueKey> = operations
            .iter()
            .filter(|op| op.action == OperationAction::Migrate)
            .filter_map(|op| Some((&op.venue, op.target_venue.as_ref()?)))
            .collect();

        let missing: Vec<&VenueKey> = current
            .entries
            .iter()
            .map(|entry| &entry.venue)
            .chain(migrations.values().copied())
            .filter(|key| !venues.contains_key(*key))
            .collect();
        venues.extend(self.lookup_venues(missing).await);

        let apy_of = |key: &VenueKey| venues.get(key).map(|venue| venue.current_apy);
        let current_apy = current.weighted_apy(apy_of);

        let denominator = if current.total_capital > Decimal::ZERO {
            current.total_capital
        } else {
            target.total_capital
        };
        let Some(denominator) = denominator.to_f64().filter(|value| *value > 0.0) else {
            return 0.0;
        };
        let target_yield: f64 = target
            .entries
            .iter()
            .filter_map(|entry| {
                let key = migrations.get(&entry.venue).copied().unwrap_or(&entry.venue);
                let apy = apy_of(key)?;
                Some(entry.amount.to_f64().unwrap_or(0.0) * apy)
            })
            .sum();
        target_yield / denominator - current_apy
    }

    fn report(&self, request: &RebalanceRequest, result: &RebalanceResult<RebalanceOutcome>) {
        let portfolio = request.portfolio_id.as_str();
        match result {
            Ok(RebalanceOutcome::PlanReady(plan)) => events::plan_ready(portfolio, plan),
            Ok(RebalanceOutcome::NoActionNeeded { reason, .. }) => {
                events::rebalance_no_action(portfolio, reason.as_str())
            }
            Ok(RebalanceOutcome::Rejected(reason)) => {
                events::rebalance_rejected(portfolio, reason.code(), &reason.to_string())
            }
            Err(err) => events::rebalance_failed(portfolio, err.code(), &err.to_string()),
        }
    }
}

/// 百分比按 `total - reserve` 折算为金额；数值不合法直接失败，不做修正。
fn weights_to_allocation(
    total: Decimal,
    reserve: Decimal,
    weights: &[TargetWeight],
) -> RebalanceResult<Allocation> {
    let deployable = total - reserve;
    if deployable <= Decimal::ZERO {
        return Err(RebalanceError::InsufficientCapital { deployable });
    }
    if let Some(bad) = weights
        .iter()
        .find(|weight| !weight.percentage.is_finite() || weight.percentage < 0.0)
    {
        return Err(RebalanceError::MalformedInput(format!(
            "invalid percentage {} for {}",
            bad.percentage, bad.venue
        )));
    }
    Ok(Allocation::from_percentages(
        deployable,
        weights
            .iter()
            .map(|weight| (weight.venue.clone(), weight.percentage)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> VenueKey {
        VenueKey::new(name, "ethereum", "0x1")
    }

    #[test]
    fn supplied_weights_scale_over_deployable_capital() {
        let allocation = weights_to_allocation(
            Decimal::from(10_000),
            Decimal::from(2_000),
            &[TargetWeight::new(key("a"), 50.0), TargetWeight::new(key("b"), 50.0)],
        )
        .expect("allocation");
        assert_eq!(allocation.total_capital, Decimal::from(8_000));
        assert_eq!(allocation.entries[0].amount, Decimal::from(4_000));
    }

    #[test]
    fn reserve_covering_everything_is_insufficient_capital() {
        let err = weights_to_allocation(
            Decimal::from(1_000),
            Decimal::from(1_000),
            &[TargetWeight::new(key("a"), 100.0)],
        )
        .unwrap_err();
        assert_eq!(err.code(), "insufficient_capital");
    }

    #[test]
    fn nan_percentage_is_malformed_input() {
        let err = weights_to_allocation(
            Decimal::from(1_000),
            Decimal::ZERO,
            &[TargetWeight::new(key("a"), f64::NAN)],
        )
        .unwrap_err();
        assert_eq!(err.code(), "malformed_input");
    }

    #[test]
    fn response_shape_distinguishes_no_action_from_failure() {
        let ok = RebalanceResponse::from_result(Ok(RebalanceOutcome::NoActionNeeded {
            reason: NoActionReason::AlreadyBalanced,
            plan: RebalancePlan::empty(),
        }));
        let failed = RebalanceResponse::from_result(Err(RebalanceError::PlanningFailure(
            "no gas".to_string(),
        )));

        let ok = serde_json::to_value(&ok).expect("json");
        let failed = serde_json::to_value(&failed).expect("json");
        assert_eq!(ok["status"], "no_action_needed");
        assert_eq!(failed["status"], "failed");
        assert_eq!(failed["code"], "planning_failure");
        assert!(failed.get("plan").is_none());
    }
}
