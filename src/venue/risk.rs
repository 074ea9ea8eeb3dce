use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;

pub const BASE_RISK_SCORE: i32 = 5;
pub const MIN_RISK_SCORE: u8 = 1;
pub const MAX_RISK_SCORE: u8 = 10;

/// TVL 低于 1000 万美元视为小体量。
pub const SMALL_TVL_USD: i64 = 10_000_000;
/// TVL 高于 10 亿美元视为大体量。
pub const LARGE_TVL_USD: i64 = 1_000_000_000;
pub const YOUNG_VENUE_DAYS: i64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactor {
    SmallTvl,
    LargeTvl,
    YoungVenue,
    UnknownAge,
    Audited,
}

impl RiskFactor {
    pub fn delta(self) -> i32 {
        match self {
            RiskFactor::SmallTvl => 2,
            RiskFactor::YoungVenue => 2,
            RiskFactor::UnknownAge => 1,
            RiskFactor::LargeTvl => -1,
            RiskFactor::Audited => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskBreakdown {
    pub base: i32,
    pub factors: Vec<RiskFactor>,
    pub score: u8,
}

/// 风险评分只取决于 TVL 档位、审计状态与上线天数，结果截断在 [1, 10]。
pub fn assess(tvl: Decimal, audited: bool, launched_at: Option<OffsetDateTime>, now: OffsetDateTime) -> RiskBreakdown {
    let mut factors = Vec::new();

    if tvl < Decimal::from(SMALL_TVL_USD) {
        factors.push(RiskFactor::SmallTvl);
    } else if tvl > Decimal::from(LARGE_TVL_USD) {
        factors.push(RiskFactor::LargeTvl);
    }

    match launched_at {
        Some(launched) => {
            if (now - launched).whole_days() < YOUNG_VENUE_DAYS {
                factors.push(RiskFactor::YoungVenue);
            }
        }
        None => factors.push(RiskFactor::UnknownAge),
    }

    if audited {
        factors.push(RiskFactor::Audited);
    }

    let raw = BASE_RISK_SCORE + factors.iter().map(|factor| factor.delta()).sum::<i32>();
    let score = raw.clamp(i32::from(MIN_RISK_SCORE), i32::from(MAX_RISK_SCORE)) as u8;

    RiskBreakdown {
        base: BASE_RISK_SCORE,
        factors,
        score,
    }
}

pub fn risk_score(tvl: Decimal, audited: bool, launched_at: Option<OffsetDateTime>, now: OffsetDateTime) -> u8 {
    assess(tvl, audited, launched_at, now).score
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-06-01 00:00 UTC);

    #[test]
    fn blue_chip_scores_low() {
        let launched = NOW - Duration::days(900);
        let breakdown = assess(Decimal::from(5_000_000_000i64), true, Some(launched), NOW);
        assert_eq!(breakdown.factors, vec![RiskFactor::LargeTvl, RiskFactor::Audited]);
        assert_eq!(breakdown.score, 3);
    }

    #[test]
    fn young_small_unaudited_scores_high() {
        let launched = NOW - Duration::days(10);
        let score = risk_score(Decimal::from(2_000_000), false, Some(launched), NOW);
        assert_eq!(score, 9);
    }

    #[test]
    fn unknown_age_adds_partial_risk() {
        let score = risk_score(Decimal::from(50_000_000), false, None, NOW);
        assert_eq!(score, 6);
    }

    #[test]
    fn boundaries_are_exclusive() {
        let launched = NOW - Duration::days(YOUNG_VENUE_DAYS);
        let score = risk_score(Decimal::from(SMALL_TVL_USD), false, Some(launched), NOW);
        assert_eq!(score, BASE_RISK_SCORE as u8);
    }
}
