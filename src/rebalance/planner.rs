use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, warn};

use crate::chain::{BridgeQuote, ChainExecutor, GasEstimate};
use crate::config::{ChainCostConfig, PlannerConfig, RiskConfig};
use crate::retry::{RetryPolicy, retry_async};
use crate::venue::{ChainId, Venue, VenueDirectory, VenueKey, supports_batching};

use super::error::{RebalanceError, RebalanceResult};
use super::risk::{RiskLimits, ValidatedAllocation};
use super::types::{Allocation, AllocationEntry, OperationAction, RebalanceOperation, percent_of};

#[derive(Debug, Clone)]
pub struct PlannerSettings {
    pub migration_hurdle_pct: f64,
    pub probe_concurrency: usize,
    /// 批量净额操作相对单笔操作的成本倍数，需小于被合并的操作数才值得合并。
    pub batched_cost_factor: Decimal,
    pub bridge_floor_secs: u64,
    pub amount_tolerance: Decimal,
    /// 迁移去向同样受风险分与集中度上限约束。
    pub limits: RiskLimits,
    /// 实时估算失败时使用的 gas 成本表。
    pub fallback_costs: HashMap<ChainId, GasEstimate>,
    pub retry: RetryPolicy,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            migration_hurdle_pct: 2.0,
            probe_concurrency: 5,
            batched_cost_factor: Decimal::new(15, 1),
            bridge_floor_secs: 300,
            amount_tolerance: Decimal::new(1, 2),
            limits: RiskLimits::default(),
            fallback_costs: HashMap::new(),
            retry: RetryPolicy::default(),
        }
    }
}

impl PlannerSettings {
    pub fn from_config(
        planner: &PlannerConfig,
        risk: &RiskConfig,
        chains: &BTreeMap<String, ChainCostConfig>,
        retry: RetryPolicy,
    ) -> Self {
        let fallback_costs = chains
            .iter()
            .map(|(chain, cost)| {
                let chain = ChainId::new(chain);
                (
                    chain.clone(),
                    GasEstimate {
                        chain,
                        cost_usd: cost.gas_cost_usd,
                        confirmation_secs: cost.confirmation_secs,
                    },
                )
            })
            .collect();
        Self {
            migration_hurdle_pct: planner.migration_hurdle_pct,
            probe_concurrency: planner.probe_concurrency.max(1),
            batched_cost_factor: planner.batched_cost_factor,
            bridge_floor_secs: planner.bridge_floor_secs,
            amount_tolerance: planner.amount_tolerance,
            limits: RiskLimits::from_config(risk),
            fallback_costs,
            retry,
        }
    }
}

/// 规划结果：有序操作与总成本、总时长。
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDraft {
    pub operations: Vec<RebalanceOperation>,
    pub estimated_cost: Decimal,
    pub estimated_duration_secs: u64,
}

#[derive(Debug, Clone)]
struct PlannedOp {
    op: RebalanceOperation,
    batched: bool,
    bridge: Option<BridgeQuote>,
}

/// 某个目标条目的一个可行迁移去向，净收益已超过门槛。
#[derive(Debug, Clone)]
struct MigrationCandidate {
    entry: AllocationEntry,
    destination: Venue,
    quote: BridgeQuote,
    net_apy: f64,
}

impl PlannedOp {
    fn single(op: RebalanceOperation) -> Self {
        Self {
            op,
            batched: false,
            bridge: None,
        }
    }
}

/// 操作规划器：同场所净额合并、跨链迁移探测、成本与时长汇总。
/// 任一探测失败都回退为未合并或不迁移，不中断规划。
pub struct OperationPlanner {
    executor: Arc<dyn ChainExecutor>,
    directory: Arc<dyn VenueDirectory>,
    settings: PlannerSettings,
}

impl OperationPlanner {
    pub fn new(
        executor: Arc<dyn ChainExecutor>,
        directory: Arc<dyn VenueDirectory>,
        settings: PlannerSettings,
    ) -> Self {
        Self {
            executor,
            directory,
            settings,
        }
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    pub async fn plan(
        &self,
        operations: Vec<RebalanceOperation>,
        target: &ValidatedAllocation,
    ) -> RebalanceResult<PlanDraft> {
        let chains: BTreeSet<ChainId> = operations.iter().map(|op| op.chain.clone()).collect();
        let mut live_gas = self.probe_gas(chains).await;

        let mut planned = self.batch(operations, &live_gas);
        let candidates = self.probe_migrations(&target.allocation().entries).await;

        let extra: BTreeSet<ChainId> = candidates
            .iter()
            .flatten()
            .flat_map(|candidate| [candidate.entry.chain.clone(), candidate.destination.chain().clone()])
            .filter(|chain| !live_gas.contains_key(chain))
            .collect();
        if !extra.is_empty() {
            live_gas.extend(self.probe_gas(extra).await);
        }
        planned.extend(self.select_migrations(candidates, target.allocation(), &live_gas));

        planned.sort_by(|a, b| {
            (a.op.priority, &a.op.chain, &a.op.venue).cmp(&(b.op.priority, &b.op.chain, &b.op.venue))
        });

        let (estimated_cost, estimated_duration_secs) = self.estimate(&planned, &live_gas)?;
        debug!(
            target: "rebalance::planner",
            operations = planned.len(),
            batched = planned.iter().filter(|p| p.batched).count(),
            migrations = planned.iter().filter(|p| p.bridge.is_some()).count(),
            estimated_cost = %estimated_cost,
            estimated_duration_secs,
            "规划完成"
        );

        Ok(PlanDraft {
            operations: planned.into_iter().map(|planned| planned.op).collect(),
            estimated_cost,
            estimated_duration_secs,
        })
    }

    /// 并发探测各链 gas，失败的链不出现在结果里。
    async fn probe_gas(&self, chains: BTreeSet<ChainId>) -> HashMap<ChainId, GasEstimate> {
        stream::iter(chains)
            .map(|chain| async move {
                let estimate = retry_async(&self.settings.retry, "estimate_cost", |_| {
                    self.executor.estimate_cost(&chain)
                })
                .await;
                (chain, estimate)
            })
            .buffer_unordered(self.settings.probe_concurrency.max(1))
            .filter_map(|(chain, estimate)| async move {
                match estimate {
                    Ok(estimate) => Some((chain, estimate)),
                    Err(err) => {
                        warn!(
                            target: "rebalance::planner",
                            chain = %chain,
                            error = %err,
                            "gas 估算失败"
                        );
                        None
                    }
                }
            })
            .collect()
            .await
    }

    fn batch(
        &self,
        operations: Vec<RebalanceOperation>,
        live_gas: &HashMap<ChainId, GasEstimate>,
    ) -> Vec<PlannedOp> {
        let mut grouped: BTreeMap<ChainId, BTreeMap<VenueKey, Vec<RebalanceOperation>>> =
            BTreeMap::new();
        let mut planned = Vec::new();
        for op in operations {
            if op.action == OperationAction::Migrate {
                planned.push(PlannedOp::single(op));
                continue;
            }
            grouped
                .entry(op.chain.clone())
                .or_default()
                .entry(op.venue.clone())
                .or_default()
                .push(op);
        }

        for (chain, venues) in grouped {
            for (venue, ops) in venues {
                let has_withdraw = ops.iter().any(|op| op.action == OperationAction::Withdraw);
                let has_deposit = ops.iter().any(|op| op.action == OperationAction::Deposit);
                let mergeable = has_withdraw
                    && has_deposit
                    && supports_batching(&venue.protocol)
                    && self.settings.batched_cost_factor < Decimal::from(ops.len() as u64);
                if !mergeable {
                    planned.extend(ops.into_iter().map(PlannedOp::single));
                    continue;
                }
                if !live_gas.contains_key(&chain) {
                    debug!(
                        target: "rebalance::planner",
                        venue = %venue,
                        chain = %chain,
                        "缺少实时 gas 估算，保留逐笔操作"
                    );
                    planned.extend(ops.into_iter().map(PlannedOp::single));
                    continue;
                }

                let net: Decimal = ops
                    .iter()
                    .map(|op| match op.action {
                        OperationAction::Deposit => op.amount,
                        _ => -op.amount,
                    })
                    .sum();
                if net.abs() <= self.settings.amount_tolerance {
                    debug!(
                        target: "rebalance::planner",
                        venue = %venue,
                        merged = ops.len(),
                        "取出与存入相互抵消"
                    );
                    continue;
                }
                let mut op = if net > Decimal::ZERO {
                    RebalanceOperation::deposit(venue.clone(), net)
                } else {
                    RebalanceOperation::withdraw(venue.clone(), -net)
                };
                op.chain = chain.clone();
                planned.push(PlannedOp {
                    op,
                    batched: true,
                    bridge: None,
                });
            }
        }
        planned
    }

    /// 每个目标条目的候选按净收益从高到低排列，条目之间按场所排序。
    async fn probe_migrations(&self, entries: &[AllocationEntry]) -> Vec<Vec<MigrationCandidate>> {
        let mut found: Vec<Vec<MigrationCandidate>> = stream::iter(entries.iter().cloned())
            .map(|entry| async move { self.probe_migration(entry).await })
            .buffer_unordered(self.settings.probe_concurrency.max(1))
            .filter_map(|candidates| async move { (!candidates.is_empty()).then_some(candidates) })
            .collect()
            .await;
        found.sort_by(|a, b| a[0].entry.venue.cmp(&b[0].entry.venue));
        found
    }

    /// 对单个目标条目寻找其他链上的等价场所，返回净收益超过门槛的全部去向。
    async fn probe_migration(&self, entry: AllocationEntry) -> Vec<MigrationCandidate> {
        if entry.amount <= Decimal::ZERO {
            return Vec::new();
        }
        let Some(current) = self.directory.venue(&entry.venue).await else {
            debug!(
                target: "rebalance::planner",
                venue = %entry.venue,
                "目标场所不在目录中，跳过迁移探测"
            );
            return Vec::new();
        };
        let alternatives: Vec<Venue> = self
            .directory
            .equivalents(&current)
            .await
            .into_iter()
            .filter(|alt| {
                alt.chain() != &entry.chain && alt.risk_score <= self.settings.limits.max_risk_score
            })
            .collect();
        let Some(amount_f64) = entry.amount.to_f64() else {
            return Vec::new();
        };

        let threshold = current.current_apy + self.settings.migration_hurdle_pct;
        let mut candidates = Vec::new();
        for alt in alternatives {
            let quote = match retry_async(&self.settings.retry, "estimate_bridge_cost", |_| {
                self.executor
                    .estimate_bridge_cost(&entry.chain, alt.chain(), entry.amount)
            })
            .await
            {
                Ok(quote) => quote,
                Err(err) => {
                    warn!(
                        target: "rebalance::planner",
                        from = %entry.chain,
                        to = %alt.chain(),
                        error = %err,
                        "跨链成本估算失败，跳过该候选"
                    );
                    continue;
                }
            };
            let fee = quote.fee_usd.to_f64().unwrap_or(f64::INFINITY);
            let net_apy = alt.current_apy - fee / amount_f64 * 100.0;
            if net_apy > threshold {
                candidates.push(MigrationCandidate {
                    entry: entry.clone(),
                    destination: alt,
                    quote,
                    net_apy,
                });
            }
        }
        candidates.sort_by(|a, b| b.net_apy.total_cmp(&a.net_apy));
        candidates
    }

    /// 逐个条目选取第一个两端 gas 可估、且迁入后不超过集中度上限的去向。
    /// 已选中的迁移计入后续条目的集中度。
    fn select_migrations(
        &self,
        candidates: Vec<Vec<MigrationCandidate>>,
        target: &Allocation,
        live_gas: &HashMap<ChainId, GasEstimate>,
    ) -> Vec<PlannedOp> {
        let cap = percent_of(target.allocated_amount(), self.settings.limits.max_concentration_pct);
        let mut projected: HashMap<VenueKey, Decimal> = HashMap::new();
        for entry in &target.entries {
            *projected.entry(entry.venue.clone()).or_default() += entry.amount;
        }

        let mut selected = Vec::new();
        for options in candidates {
            for candidate in options {
                let from = &candidate.entry.chain;
                let to = candidate.destination.chain();
                if let Some(missing) = [from, to]
                    .into_iter()
                    .find(|chain| self.gas_for(chain, live_gas).is_err())
                {
                    warn!(
                        target: "rebalance::planner",
                        from = %from,
                        to = %to,
                        missing = %missing,
                        "缺少 gas 估算，跳过该迁移候选"
                    );
                    continue;
                }

                let amount = candidate.entry.amount;
                let landed = projected
                    .get(&candidate.destination.key)
                    .copied()
                    .unwrap_or_default()
                    + amount;
                if landed > cap {
                    debug!(
                        target: "rebalance::planner",
                        to = %candidate.destination.key,
                        landed = %landed,
                        cap = %cap,
                        "迁入后超出集中度上限，跳过该候选"
                    );
                    continue;
                }
                *projected.entry(candidate.entry.venue.clone()).or_default() -= amount;
                projected.insert(candidate.destination.key.clone(), landed);

                debug!(
                    target: "rebalance::planner",
                    from = %candidate.entry.venue,
                    to = %candidate.destination.key,
                    net_apy = candidate.net_apy,
                    "发现跨链迁移机会"
                );
                selected.push(PlannedOp {
                    op: RebalanceOperation::migrate(
                        candidate.entry.venue,
                        candidate.destination.key,
                        amount,
                    ),
                    batched: false,
                    bridge: Some(candidate.quote),
                });
                break;
            }
        }
        selected
    }

    fn gas_for<'a>(
        &'a self,
        chain: &ChainId,
        live_gas: &'a HashMap<ChainId, GasEstimate>,
    ) -> RebalanceResult<&'a GasEstimate> {
        live_gas
            .get(chain)
            .or_else(|| self.settings.fallback_costs.get(chain))
            .ok_or_else(|| RebalanceError::PlanningFailure(format!("no gas estimate for chain {chain}")))
    }

    /// 成本为各操作之和；时长按链累加，取各链关键路径的最大值。
    fn estimate(
        &self,
        planned: &[PlannedOp],
        live_gas: &HashMap<ChainId, GasEstimate>,
    ) -> RebalanceResult<(Decimal, u64)> {
        let mut cost = Decimal::ZERO;
        let mut per_chain: BTreeMap<&ChainId, u64> = BTreeMap::new();

        for planned in planned {
            let op = &planned.op;
            let source = self.gas_for(&op.chain, live_gas)?;
            match (&planned.bridge, &op.target_chain) {
                (Some(bridge), Some(target_chain)) => {
                    let destination = self.gas_for(target_chain, live_gas)?;
                    cost += bridge.fee_usd + source.cost_usd + destination.cost_usd;
                    let bridge_secs = bridge.duration_secs.max(self.settings.bridge_floor_secs);
                    *per_chain.entry(&op.chain).or_default() +=
                        source.confirmation_secs + bridge_secs + destination.confirmation_secs;
                }
                _ => {
                    cost += if planned.batched {
                        source.cost_usd * self.settings.batched_cost_factor
                    } else {
                        source.cost_usd
                    };
                    *per_chain.entry(&op.chain).or_default() += source.confirmation_secs;
                }
            }
        }

        let duration = per_chain.values().copied().max().unwrap_or(0);
        Ok((cost.round_dp(2), duration))
    }
}
