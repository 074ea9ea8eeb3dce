use serde::Serialize;
use tracing::{info, warn};

use crate::chain::{ChainExecutor, ExecutionReceipt};
use crate::monitoring::events;

use super::types::{RebalanceOperation, RebalancePlan};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationOutcome {
    Executed { receipt: ExecutionReceipt },
    Failed { code: &'static str, message: String },
    /// 更早优先级的操作失败后，后续优先级不再执行。
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationReport {
    pub operation: RebalanceOperation,
    #[serde(flatten)]
    pub outcome: OperationOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub plan_id: String,
    pub operations: Vec<OperationReport>,
}

impl ExecutionReport {
    pub fn executed(&self) -> usize {
        self.count(|outcome| matches!(outcome, OperationOutcome::Executed { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, OperationOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, OperationOutcome::Skipped))
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.skipped() == 0
    }

    fn count(&self, predicate: impl Fn(&OperationOutcome) -> bool) -> usize {
        self.operations
            .iter()
            .filter(|report| predicate(&report.outcome))
            .count()
    }
}

/// 按计划顺序逐笔执行。同一优先级内的失败不影响同级其余操作，
/// 但更高优先级数值（更晚执行）的操作全部跳过。
pub async fn execute_plan(plan: &RebalancePlan, executor: &dyn ChainExecutor) -> ExecutionReport {
    let plan_id = plan.id().to_string();
    let mut failed_priority: Option<u8> = None;
    let mut reports = Vec::with_capacity(plan.operations().len());

    for operation in plan.operations() {
        if failed_priority.is_some_and(|priority| operation.priority > priority) {
            reports.push(OperationReport {
                operation: operation.clone(),
                outcome: OperationOutcome::Skipped,
            });
            continue;
        }

        let outcome = match executor.execute(operation).await {
            Ok(receipt) => {
                info!(
                    target: "rebalance::execution",
                    plan_id = %plan_id,
                    venue = %operation.venue,
                    action = %operation.action,
                    tx_ref = %receipt.tx_ref,
                    "操作已提交"
                );
                OperationOutcome::Executed { receipt }
            }
            Err(err) => {
                warn!(
                    target: "rebalance::execution",
                    plan_id = %plan_id,
                    venue = %operation.venue,
                    action = %operation.action,
                    error = %err,
                    "操作执行失败，后续优先级将跳过"
                );
                failed_priority.get_or_insert(operation.priority);
                OperationOutcome::Failed {
                    code: err.code(),
                    message: err.to_string(),
                }
            }
        };
        reports.push(OperationReport {
            operation: operation.clone(),
            outcome,
        });
    }

    let report = ExecutionReport {
        plan_id,
        operations: reports,
    };
    events::execution_finished(
        &report.plan_id,
        report.executed(),
        report.failed(),
        report.skipped(),
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use crate::chain::{
        BridgeQuote, ChainError, ChainResult, CostModelExecutor, ExecutionStatus, GasEstimate,
    };
    use crate::config::BridgeConfig;
    use crate::venue::{ChainId, VenueKey};

    struct FailingOn {
        venue: VenueKey,
    }

    #[async_trait]
    impl ChainExecutor for FailingOn {
        async fn estimate_cost(&self, chain: &ChainId) -> ChainResult<GasEstimate> {
            Err(ChainError::UnsupportedChain(chain.clone()))
        }

        async fn estimate_bridge_cost(
            &self,
            from: &ChainId,
            _to: &ChainId,
            _amount: Decimal,
        ) -> ChainResult<BridgeQuote> {
            Err(ChainError::UnsupportedChain(from.clone()))
        }

        async fn execute(&self, operation: &RebalanceOperation) -> ChainResult<ExecutionReceipt> {
            if operation.venue == self.venue {
                return Err(ChainError::Rejected {
                    chain: operation.chain.clone(),
                    reason: "insufficient liquidity".to_string(),
                });
            }
            Ok(ExecutionReceipt {
                tx_ref: format!("tx-{}", operation.venue),
                status: ExecutionStatus::Submitted,
            })
        }
    }

    fn key(name: &str) -> VenueKey {
        VenueKey::new(name, "ethereum", "0x1")
    }

    fn plan() -> RebalancePlan {
        RebalancePlan::new(
            vec![
                RebalanceOperation::withdraw(key("a"), Decimal::from(100)),
                RebalanceOperation::withdraw(key("b"), Decimal::from(100)),
                RebalanceOperation::deposit(key("c"), Decimal::from(200)),
            ],
            Decimal::ZERO,
            0,
            0.0,
        )
    }

    #[tokio::test]
    async fn dry_run_executes_every_operation() {
        let executor = CostModelExecutor::new(Default::default(), BridgeConfig::default());
        let report = execute_plan(&plan(), &executor).await;
        assert_eq!(report.executed(), 3);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn failure_skips_later_priorities_only() {
        let executor = FailingOn { venue: key("a") };
        let report = execute_plan(&plan(), &executor).await;

        assert!(matches!(report.operations[0].outcome, OperationOutcome::Failed { code: "chain_rejected", .. }));
        assert!(matches!(report.operations[1].outcome, OperationOutcome::Executed { .. }));
        assert_eq!(report.operations[2].outcome, OperationOutcome::Skipped);
        assert_eq!((report.executed(), report.failed(), report.skipped()), (1, 1, 1));
    }
}
