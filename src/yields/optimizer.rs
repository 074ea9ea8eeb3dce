use std::cmp::Ordering;

use rust_decimal::Decimal;
use tracing::debug;

use crate::config::YieldConfig;
use crate::rebalance::{Allocation, AllocationEntry};
use crate::venue::Venue;

use super::{YieldError, YieldResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerSettings {
    pub risk_free_rate: f64,
    pub risk_penalty_per_point: f64,
    pub max_venues: usize,
    pub max_weight_pct: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            risk_free_rate: 2.0,
            risk_penalty_per_point: 0.1,
            max_venues: 5,
            max_weight_pct: 40.0,
        }
    }
}

impl OptimizerSettings {
    pub fn from_config(config: &YieldConfig) -> Self {
        Self {
            risk_free_rate: config.risk_free_rate,
            risk_penalty_per_point: config.risk_penalty_per_point,
            max_venues: config.max_venues.max(1),
            max_weight_pct: config.max_weight_pct.clamp(0.0, 100.0),
        }
    }

    /// 风险调整收益：`(apy - 无风险利率) / (1 + 惩罚系数 × 风险分)`。
    pub fn risk_adjusted_score(&self, apy: f64, risk_score: u8) -> f64 {
        (apy - self.risk_free_rate) / (1.0 + self.risk_penalty_per_point * f64::from(risk_score))
    }
}

/// 在 `deployable` 上生成候选配置。
///
/// 过滤风险分不超过 `risk_tolerance` 的场所，按风险调整收益取前 `max_venues` 个，
/// 按分数比例分配权重；单个场所不超过 `max_weight_pct`，超出部分依次分给其余
/// 场所，仍分不出去的归入排名第一的场所。
pub fn allocate(
    venues: &[Venue],
    deployable: Decimal,
    risk_tolerance: u8,
    settings: &OptimizerSettings,
) -> YieldResult<Allocation> {
    if deployable <= Decimal::ZERO {
        return Err(YieldError::InsufficientCapital { deployable });
    }

    let mut ranked: Vec<(&Venue, f64)> = venues
        .iter()
        .filter(|venue| venue.risk_score <= risk_tolerance && venue.current_apy.is_finite())
        .map(|venue| (venue, settings.risk_adjusted_score(venue.current_apy, venue.risk_score)))
        .collect();
    if ranked.is_empty() {
        return Err(YieldError::InsufficientVenues { risk_tolerance });
    }
    ranked.sort_by(|(a, score_a), (b, score_b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.tvl.cmp(&a.tvl))
            .then_with(|| a.key.cmp(&b.key))
    });
    ranked.truncate(settings.max_venues.max(1));

    let raw: Vec<f64> = if ranked.iter().any(|(_, score)| *score > 0.0) {
        ranked.iter().map(|(_, score)| score.max(0.0)).collect()
    } else {
        vec![1.0; ranked.len()]
    };
    let weights = water_fill(&raw, settings.max_weight_pct / 100.0);

    let mut entries: Vec<AllocationEntry> = ranked
        .iter()
        .zip(&weights)
        .filter(|(_, weight)| **weight > 0.0)
        .map(|((venue, _), weight)| {
            let percentage = weight * 100.0;
            AllocationEntry::new(
                venue.key.clone(),
                crate::rebalance::percent_of(deployable, percentage),
                percentage,
            )
        })
        .collect();

    // 舍入误差记到排名第一的场所上，保证金额合计等于可部署资金
    let placed: Decimal = entries.iter().map(|entry| entry.amount).sum();
    if let Some(top) = entries.first_mut() {
        top.amount += deployable - placed;
    }

    debug!(
        target: "yields::optimizer",
        candidates = venues.len(),
        selected = entries.len(),
        deployable = %deployable,
        risk_tolerance,
        "候选配置生成完成"
    );

    Ok(Allocation::new(deployable, entries))
}

/// 按比例分配并封顶，返回合计为 1 的权重。
fn water_fill(raw: &[f64], cap: f64) -> Vec<f64> {
    let mut weights = vec![0.0; raw.len()];
    if raw.is_empty() {
        return weights;
    }
    let mut active: Vec<usize> = (0..raw.len()).filter(|&i| raw[i] > 0.0).collect();
    let mut remaining = 1.0;

    while !active.is_empty() && remaining > 1e-12 {
        let total: f64 = active.iter().map(|&i| raw[i]).sum();
        if total <= 0.0 {
            break;
        }
        let mut capped = Vec::new();
        for &i in &active {
            let share = remaining * raw[i] / total;
            if weights[i] + share > cap {
                capped.push(i);
            }
        }
        if capped.is_empty() {
            for &i in &active {
                weights[i] += remaining * raw[i] / total;
            }
            remaining = 0.0;
            break;
        }
        for &i in &capped {
            remaining -= cap - weights[i];
            weights[i] = cap;
        }
        active.retain(|i| !capped.contains(i));
    }

    if remaining > 1e-12 {
        weights[0] += remaining;
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::{VenueCategory, VenueKey};

    fn venue(name: &str, apy: f64, risk: u8) -> Venue {
        Venue {
            key: VenueKey::new(name, "ethereum", "0x1"),
            symbol: "USDC".to_string(),
            current_apy: apy,
            tvl: Decimal::from(50_000_000),
            risk_score: risk,
            category: VenueCategory::Lending,
            audited: true,
            launched_at: None,
            supports_batching: true,
            source: "test".to_string(),
            source_ref: None,
        }
    }

    fn sum_pct(allocation: &Allocation) -> f64 {
        allocation.percentage_sum()
    }

    #[test]
    fn filters_by_tolerance_and_caps_weights() {
        let venues = vec![
            venue("a", 12.0, 3),
            venue("b", 9.0, 4),
            venue("c", 7.0, 2),
            venue("d", 6.0, 3),
            venue("risky", 40.0, 9),
        ];
        let allocation =
            allocate(&venues, Decimal::from(10_000), 5, &OptimizerSettings::default()).unwrap();
        assert!(allocation.entry(&VenueKey::new("risky", "ethereum", "0x1")).is_none());
        assert!((sum_pct(&allocation) - 100.0).abs() < 1e-6);
        assert!(allocation.entries.iter().all(|entry| entry.percentage <= 40.0 + 1e-9));
        assert_eq!(allocation.allocated_amount(), Decimal::from(10_000));
    }

    #[test]
    fn limits_to_max_venues() {
        let venues: Vec<Venue> = (0..8).map(|i| venue(&format!("v{i}"), 5.0 + i as f64, 2)).collect();
        let allocation =
            allocate(&venues, Decimal::from(1_000), 10, &OptimizerSettings::default()).unwrap();
        assert_eq!(allocation.entries.len(), 5);
        assert_eq!(allocation.entries[0].venue.protocol, "v7");
    }

    #[test]
    fn remainder_goes_to_top_ranked_when_caps_bind() {
        let venues = vec![venue("a", 10.0, 1), venue("b", 8.0, 1)];
        let allocation =
            allocate(&venues, Decimal::from(1_000), 5, &OptimizerSettings::default()).unwrap();
        assert_eq!(allocation.entries.len(), 2);
        assert!((allocation.entries[0].percentage - 60.0).abs() < 1e-9);
        assert!((allocation.entries[1].percentage - 40.0).abs() < 1e-9);
    }

    #[test]
    fn non_positive_scores_share_equally() {
        let venues = vec![venue("a", 1.5, 1), venue("b", 1.0, 1), venue("c", 0.5, 1)];
        let allocation =
            allocate(&venues, Decimal::from(900), 5, &OptimizerSettings::default()).unwrap();
        for entry in &allocation.entries {
            assert!((entry.percentage - 100.0 / 3.0).abs() < 1e-9);
        }
        assert_eq!(allocation.allocated_amount(), Decimal::from(900));
    }

    #[test]
    fn reports_insufficient_venues_and_capital() {
        let venues = vec![venue("a", 10.0, 9)];
        assert!(matches!(
            allocate(&venues, Decimal::from(100), 5, &OptimizerSettings::default()),
            Err(YieldError::InsufficientVenues { risk_tolerance: 5 })
        ));
        assert!(matches!(
            allocate(&venues, Decimal::ZERO, 10, &OptimizerSettings::default()),
            Err(YieldError::InsufficientCapital { .. })
        ));
    }
}
