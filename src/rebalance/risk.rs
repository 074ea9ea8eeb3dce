use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::config::RiskConfig;
use crate::venue::VenueKey;

use super::types::{Allocation, PERCENTAGE_TOLERANCE};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskLimits {
    pub max_risk_score: u8,
    pub max_concentration_pct: f64,
    pub percentage_tolerance: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_risk_score: 8,
            max_concentration_pct: 50.0,
            percentage_tolerance: PERCENTAGE_TOLERANCE,
        }
    }
}

impl RiskLimits {
    pub fn from_config(config: &RiskConfig) -> Self {
        Self {
            max_risk_score: config.max_risk_score,
            max_concentration_pct: config.max_concentration_pct,
            percentage_tolerance: config.percentage_tolerance,
        }
    }
}

/// 目标配置被拒的原因。拒绝是状态机的正常结局，不是错误。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum RejectionReason {
    EmptyAllocation,
    PercentageSum { sum: f64 },
    UnknownVenue { venue: VenueKey },
    RiskTooHigh { venue: VenueKey, risk_score: u8, max: u8 },
    Concentration { venue: VenueKey, percentage: f64, max: f64 },
}

impl RejectionReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::EmptyAllocation => "empty_allocation",
            RejectionReason::PercentageSum { .. } => "percentage_sum",
            RejectionReason::UnknownVenue { .. } => "unknown_venue",
            RejectionReason::RiskTooHigh { .. } => "risk_too_high",
            RejectionReason::Concentration { .. } => "concentration",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::EmptyAllocation => f.write_str("allocation is empty"),
            RejectionReason::PercentageSum { sum } => {
                write!(f, "percentages sum to {sum:.4}, expected 100")
            }
            RejectionReason::UnknownVenue { venue } => write!(f, "venue {venue} is unknown"),
            RejectionReason::RiskTooHigh {
                venue,
                risk_score,
                max,
            } => write!(f, "venue {venue} risk score {risk_score} exceeds {max}"),
            RejectionReason::Concentration {
                venue,
                percentage,
                max,
            } => write!(f, "venue {venue} holds {percentage:.2}% (max {max}%)"),
        }
    }
}

/// 通过风控校验的配置。只能由 [`RiskValidator::validate`] 构造，
/// 规划阶段只接受这个类型。
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedAllocation {
    allocation: Allocation,
}

impl ValidatedAllocation {
    pub fn allocation(&self) -> &Allocation {
        &self.allocation
    }

    pub fn into_inner(self) -> Allocation {
        self.allocation
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RiskValidator {
    limits: RiskLimits,
}

impl RiskValidator {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// 依次检查：非空、百分比合计、风险分上限、单场所集中度，遇到第一个失败即返回。
    /// `risk_of` 返回场所的风险分，未知场所返回 `None`。
    pub fn validate<F>(
        &self,
        allocation: Allocation,
        risk_of: F,
    ) -> Result<ValidatedAllocation, RejectionReason>
    where
        F: Fn(&VenueKey) -> Option<u8>,
    {
        if allocation.is_empty() {
            return Err(RejectionReason::EmptyAllocation);
        }

        let sum = allocation.percentage_sum();
        if !sum.is_finite() || (sum - 100.0).abs() > self.limits.percentage_tolerance {
            return Err(RejectionReason::PercentageSum { sum });
        }

        for entry in &allocation.entries {
            let Some(risk_score) = risk_of(&entry.venue) else {
                return Err(RejectionReason::UnknownVenue {
                    venue: entry.venue.clone(),
                });
            };
            if risk_score > self.limits.max_risk_score {
                return Err(RejectionReason::RiskTooHigh {
                    venue: entry.venue.clone(),
                    risk_score,
                    max: self.limits.max_risk_score,
                });
            }
        }

        let mut per_venue: BTreeMap<&VenueKey, f64> = BTreeMap::new();
        for entry in &allocation.entries {
            *per_venue.entry(&entry.venue).or_insert(0.0) += entry.percentage;
        }
        if let Some((venue, percentage)) = per_venue
            .into_iter()
            .find(|(_, percentage)| *percentage > self.limits.max_concentration_pct)
        {
            return Err(RejectionReason::Concentration {
                venue: venue.clone(),
                percentage,
                max: self.limits.max_concentration_pct,
            });
        }

        Ok(ValidatedAllocation { allocation })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn key(name: &str) -> VenueKey {
        VenueKey::new(name, "ethereum", "0x1")
    }

    fn allocation(weights: &[(&str, f64)]) -> Allocation {
        Allocation::from_percentages(
            Decimal::from(10_000),
            weights.iter().map(|(name, pct)| (key(name), *pct)),
        )
    }

    fn risk(score: u8) -> impl Fn(&VenueKey) -> Option<u8> {
        move |_| Some(score)
    }

    #[test]
    fn accepts_balanced_low_risk_allocation() {
        let validated = RiskValidator::default()
            .validate(allocation(&[("a", 50.0), ("b", 30.0), ("c", 20.0)]), risk(4))
            .expect("valid");
        assert_eq!(validated.allocation().entries.len(), 3);
    }

    #[test]
    fn rejects_empty_allocation_first() {
        let empty = Allocation::empty(Decimal::from(10));
        assert_eq!(
            RiskValidator::default().validate(empty, risk(9)),
            Err(RejectionReason::EmptyAllocation)
        );
    }

    #[test]
    fn rejects_percentages_not_summing_to_100() {
        let reason = RiskValidator::default()
            .validate(allocation(&[("a", 40.0), ("b", 40.0)]), risk(3))
            .unwrap_err();
        assert_eq!(reason.code(), "percentage_sum");
    }

    #[test]
    fn tolerates_rounding_within_a_hundredth() {
        let result = RiskValidator::default()
            .validate(allocation(&[("a", 50.0), ("b", 49.995)]), risk(3));
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_risk_above_hard_ceiling_regardless_of_weights() {
        let reason = RiskValidator::default()
            .validate(allocation(&[("a", 50.0), ("b", 50.0)]), |venue| {
                Some(if venue.protocol == "b" { 9 } else { 2 })
            })
            .unwrap_err();
        assert!(matches!(reason, RejectionReason::RiskTooHigh { risk_score: 9, .. }));
    }

    #[test]
    fn rejects_unknown_venue() {
        let reason = RiskValidator::default()
            .validate(allocation(&[("a", 50.0), ("b", 50.0)]), |_| None)
            .unwrap_err();
        assert_eq!(reason.code(), "unknown_venue");
    }

    #[test]
    fn rejects_concentration_above_half() {
        let reason = RiskValidator::default()
            .validate(allocation(&[("a", 60.0), ("b", 40.0)]), risk(3))
            .unwrap_err();
        assert!(matches!(reason, RejectionReason::Concentration { .. }));
    }

    #[test]
    fn risk_check_precedes_concentration_check() {
        let reason = RiskValidator::default()
            .validate(allocation(&[("a", 100.0)]), risk(10))
            .unwrap_err();
        assert_eq!(reason.code(), "risk_too_high");
    }
}
