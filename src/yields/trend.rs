/// 预测值下限（百分比）。
pub const MIN_PROJECTED_APY: f64 = 0.1;

/// 预测值上限相对当前 APY 的倍数。
pub const MAX_PROJECTION_MULTIPLE: f64 = 2.0;

/// 最小二乘拟合 `y = intercept + slope * x`，x 为样本序号。
fn linear_fit(samples: &[f64]) -> Option<(f64, f64)> {
    let n = samples.len() as f64;
    if samples.len() < 2 {
        return None;
    }
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = samples.iter().sum::<f64>() / n;
    let mut covariance = 0.0;
    let mut variance = 0.0;
    for (index, value) in samples.iter().enumerate() {
        let dx = index as f64 - mean_x;
        covariance += dx * (value - mean_y);
        variance += dx * dx;
    }
    if variance == 0.0 {
        return None;
    }
    let slope = covariance / variance;
    Some((mean_y - slope * mean_x, slope))
}

/// 以历史日序列做线性趋势外推 `horizon_days` 天。
///
/// 样本不足 `min_samples` 或拟合失败时直接返回当前 APY；外推结果限制在
/// `[0.1, 2 × current]` 内。
pub fn project(history: &[f64], current_apy: f64, horizon_days: u32, min_samples: usize) -> f64 {
    let samples: Vec<f64> = history.iter().copied().filter(|v| v.is_finite()).collect();
    if samples.len() < min_samples.max(2) {
        return current_apy;
    }
    let Some((intercept, slope)) = linear_fit(&samples) else {
        return current_apy;
    };
    let x = (samples.len() - 1) as f64 + f64::from(horizon_days);
    let projected = intercept + slope * x;
    let upper = (current_apy * MAX_PROJECTION_MULTIPLE).max(MIN_PROJECTED_APY);
    if !projected.is_finite() {
        return current_apy;
    }
    projected.clamp(MIN_PROJECTED_APY, upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_history_falls_back_to_current() {
        let history = [5.0, 5.1, 5.2, 5.3, 5.4, 5.5];
        assert_eq!(project(&history, 5.5, 30, 7), 5.5);
    }

    #[test]
    fn rising_trend_extrapolates_forward() {
        let history: Vec<f64> = (0..10).map(|day| 4.0 + 0.1 * day as f64).collect();
        let projected = project(&history, 4.9, 5, 7);
        assert!((projected - 5.4).abs() < 1e-9);
    }

    #[test]
    fn runaway_growth_is_capped_at_twice_current() {
        let history: Vec<f64> = (0..10).map(|day| 2.0 + 3.0 * day as f64).collect();
        assert_eq!(project(&history, 10.0, 365, 7), 20.0);
    }

    #[test]
    fn collapsing_trend_is_floored() {
        let history: Vec<f64> = (0..10).map(|day| 10.0 - day as f64).collect();
        assert_eq!(project(&history, 1.0, 90, 7), MIN_PROJECTED_APY);
    }

    #[test]
    fn flat_history_projects_flat() {
        let history = [3.0; 14];
        assert!((project(&history, 3.0, 30, 7) - 3.0).abs() < 1e-9);
    }
}
