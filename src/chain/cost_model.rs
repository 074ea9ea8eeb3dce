use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use crate::config::{BridgeConfig, ChainCostConfig};
use crate::rebalance::RebalanceOperation;
use crate::venue::ChainId;

use super::{
    BridgeQuote, ChainError, ChainExecutor, ChainResult, ExecutionReceipt, ExecutionStatus,
    GasEstimate,
};

/// 按配置表估算成本的执行器；`execute` 只生成演练回执，不触达链上。
#[derive(Debug, Clone)]
pub struct CostModelExecutor {
    chains: HashMap<ChainId, ChainCostConfig>,
    bridge: BridgeConfig,
}

impl CostModelExecutor {
    pub fn new(chains: HashMap<ChainId, ChainCostConfig>, bridge: BridgeConfig) -> Self {
        Self { chains, bridge }
    }

    pub fn from_config<'a, I>(chains: I, bridge: &BridgeConfig) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a ChainCostConfig)>,
    {
        let chains = chains
            .into_iter()
            .map(|(chain, cost)| (ChainId::new(chain), cost.clone()))
            .collect();
        Self::new(chains, bridge.clone())
    }

    fn chain_cost(&self, chain: &ChainId) -> ChainResult<&ChainCostConfig> {
        self.chains
            .get(chain)
            .ok_or_else(|| ChainError::UnsupportedChain(chain.clone()))
    }
}

#[async_trait]
impl ChainExecutor for CostModelExecutor {
    async fn estimate_cost(&self, chain: &ChainId) -> ChainResult<GasEstimate> {
        let cost = self.chain_cost(chain)?;
        Ok(GasEstimate {
            chain: chain.clone(),
            cost_usd: cost.gas_cost_usd,
            confirmation_secs: cost.confirmation_secs,
        })
    }

    async fn estimate_bridge_cost(
        &self,
        from: &ChainId,
        to: &ChainId,
        amount: Decimal,
    ) -> ChainResult<BridgeQuote> {
        self.chain_cost(from)?;
        self.chain_cost(to)?;
        if from == to {
            return Ok(BridgeQuote {
                from: from.clone(),
                to: to.clone(),
                amount,
                fee_usd: Decimal::ZERO,
                duration_secs: 0,
            });
        }
        let proportional = amount * Decimal::from(self.bridge.fee_bps) / Decimal::from(10_000);
        Ok(BridgeQuote {
            from: from.clone(),
            to: to.clone(),
            amount,
            fee_usd: (self.bridge.base_fee_usd + proportional).round_dp(2),
            duration_secs: self.bridge.duration_secs,
        })
    }

    async fn execute(&self, operation: &RebalanceOperation) -> ChainResult<ExecutionReceipt> {
        self.chain_cost(&operation.chain)?;
        if let Some(target) = &operation.target_chain {
            self.chain_cost(target)?;
        }
        let tx_ref = format!("dry-run-{}", Uuid::new_v4());
        debug!(
            target: "chain::cost_model",
            venue = %operation.venue,
            action = %operation.action,
            amount = %operation.amount,
            tx_ref = %tx_ref,
            "演练执行"
        );
        Ok(ExecutionReceipt {
            tx_ref,
            status: ExecutionStatus::DryRun,
        })
    }
}
