use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::types::{
    ClosedTrade, DrawdownMetrics, EquityPoint, Metrics, MonthlyMetrics, ReturnMetrics,
    RiskAdjustedMetrics, TradeMetrics,
};

const TRADING_DAYS: f64 = 252.0;
const DAYS_PER_YEAR: f64 = 365.25;

/// Pure metrics over an equity curve and closed trades. No IO, no state
/// beyond the inputs.
pub struct PerformanceCalculator<'a> {
    curve: &'a [EquityPoint],
    trades: &'a [ClosedTrade],
    initial_capital: f64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    risk_free_rate: f64,
}

impl<'a> PerformanceCalculator<'a> {
    pub fn new(
        curve: &'a [EquityPoint],
        trades: &'a [ClosedTrade],
        initial_capital: f64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        risk_free_rate: f64,
    ) -> Self {
        Self {
            curve,
            trades,
            initial_capital,
            start,
            end,
            risk_free_rate,
        }
    }

    pub fn calculate(&self) -> Metrics {
        if self.curve.len() < 2 || self.initial_capital <= 0.0 {
            warn!(points = self.curve.len(), "insufficient equity data; empty metrics");
            return Metrics::empty();
        }

        let returns = period_returns(self.curve);
        let drawdown = drawdown(self.curve);
        let metrics = Metrics {
            returns: self.returns(&returns),
            risk_adjusted: self.risk_adjusted(&returns, drawdown.max_drawdown_pct),
            drawdown,
            trades: trade_stats(self.trades),
            monthly: monthly(self.curve),
        };

        info!(
            points = self.curve.len(),
            trades = metrics.trades.total_trades,
            total_return_pct = metrics.returns.total_return_pct,
            sharpe = metrics.risk_adjusted.sharpe_ratio,
            max_dd_pct = metrics.drawdown.max_drawdown_pct,
            "metrics calculated"
        );
        metrics
    }

    fn years(&self) -> f64 {
        (self.end - self.start).num_days() as f64 / DAYS_PER_YEAR
    }

    fn final_value(&self) -> f64 {
        self.curve.last().map(|p| p.1).unwrap_or(self.initial_capital)
    }

    // ========================================================================
    // Returns
    // ========================================================================

    fn cagr(&self) -> f64 {
        let years = self.years();
        if years <= 0.0 {
            return 0.0;
        }
        let ratio = self.final_value() / self.initial_capital;
        if ratio <= 0.0 {
            -1.0
        } else {
            ratio.powf(1.0 / years) - 1.0
        }
    }

    fn returns(&self, period: &[f64]) -> ReturnMetrics {
        let total_return = self.final_value() - self.initial_capital;
        ReturnMetrics {
            total_return,
            total_return_pct: total_return / self.initial_capital,
            cagr: self.cagr(),
            annualized_return: mean(period).map_or(0.0, |m| m * TRADING_DAYS),
        }
    }

    // ========================================================================
    // Risk-adjusted
    // ========================================================================

    fn risk_adjusted(&self, period: &[f64], max_dd_pct: f64) -> RiskAdjustedMetrics {
        if period.len() < 2 {
            return RiskAdjustedMetrics::default();
        }

        let daily_rf = self.risk_free_rate / TRADING_DAYS;
        let excess: Vec<f64> = period.iter().map(|r| r - daily_rf).collect();
        let downside: Vec<f64> = excess.iter().copied().filter(|r| *r < 0.0).collect();
        let excess_mean = mean(&excess).unwrap_or(0.0);

        let sharpe = match sample_std(&excess) {
            Some(sd) if sd > 0.0 => excess_mean / sd * TRADING_DAYS.sqrt(),
            _ => 0.0,
        };
        let sortino = match sample_std(&downside) {
            Some(sd) if sd > 0.0 => excess_mean / sd * TRADING_DAYS.sqrt(),
            _ => 0.0,
        };
        let calmar = if self.years() > 0.0 && max_dd_pct != 0.0 {
            self.cagr() / max_dd_pct.abs()
        } else {
            0.0
        };

        RiskAdjustedMetrics {
            sharpe_ratio: sharpe,
            sortino_ratio: sortino,
            calmar_ratio: calmar,
            volatility: sample_std(period).map_or(0.0, |sd| sd * TRADING_DAYS.sqrt()),
        }
    }
}

// ============================================================================
// Drawdown
// ============================================================================

/// Running-max drawdown. Duration runs from the deepest point to the first
/// later point back at the running peak, or to the last point if never.
fn drawdown(curve: &[EquityPoint]) -> DrawdownMetrics {
    let mut peak = f64::MIN;
    let mut peaks = Vec::with_capacity(curve.len());
    let mut pcts = Vec::with_capacity(curve.len());
    let mut max_dd = 0.0_f64;

    for &(_, v) in curve {
        peak = peak.max(v);
        peaks.push(peak);
        max_dd = max_dd.min(v - peak);
        pcts.push(if peak > 0.0 { (v - peak) / peak } else { 0.0 });
    }

    // first index of the minimum pct
    let (trough, max_dd_pct) = pcts
        .iter()
        .enumerate()
        .fold((0usize, 0.0_f64), |(bi, bv), (i, &v)| if v < bv { (i, v) } else { (bi, bv) });

    let negatives: Vec<f64> = pcts.iter().copied().filter(|p| *p < 0.0).collect();
    let avg_drawdown = mean(&negatives).unwrap_or(0.0);

    let duration = if max_dd_pct < 0.0 {
        let target = peaks[trough];
        let recovered = curve[trough..].iter().find(|(_, v)| *v >= target).map(|p| p.0);
        let last = curve[curve.len() - 1].0;
        (recovered.unwrap_or(last) - curve[trough].0).num_days()
    } else {
        0
    };

    DrawdownMetrics {
        max_drawdown: max_dd,
        max_drawdown_pct: max_dd_pct,
        avg_drawdown,
        max_dd_duration_days: duration,
    }
}

// ============================================================================
// Trades
// ============================================================================

fn trade_stats(trades: &[ClosedTrade]) -> TradeMetrics {
    if trades.is_empty() {
        return TradeMetrics::default();
    }

    let winners: Vec<f64> = trades.iter().map(|t| t.pnl_realized).filter(|p| *p > 0.0).collect();
    let losers: Vec<f64> = trades.iter().map(|t| t.pnl_realized).filter(|p| *p < 0.0).collect();

    let total = trades.len();
    let win_rate = winners.len() as f64 / total as f64;
    let avg_win = mean(&winners).unwrap_or(0.0);
    let avg_loss = mean(&losers).unwrap_or(0.0);

    let gross_win: f64 = winners.iter().sum();
    let gross_loss: f64 = losers.iter().sum::<f64>().abs();
    let profit_factor = if gross_loss > 0.0 {
        gross_win / gross_loss
    } else if gross_win > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let durations: Vec<f64> = trades
        .iter()
        .filter_map(|t| t.exit_time.map(|x| (x - t.entry_time).num_seconds() as f64 / 3600.0))
        .collect();

    TradeMetrics {
        total_trades: total,
        winning_trades: winners.len(),
        losing_trades: losers.len(),
        win_rate,
        profit_factor,
        expectancy: win_rate * avg_win - (1.0 - win_rate) * avg_loss.abs(),
        avg_win,
        avg_loss,
        max_win: winners.iter().copied().fold(0.0, f64::max),
        max_loss: losers.iter().copied().fold(0.0, f64::min),
        avg_trade_duration_hours: mean(&durations).unwrap_or(0.0),
    }
}

// ============================================================================
// Monthly: UTC month bucketing, last equity per month
// ============================================================================

fn monthly(curve: &[EquityPoint]) -> MonthlyMetrics {
    let mut month_end: BTreeMap<String, f64> = BTreeMap::new();
    for (ts, v) in curve {
        month_end.insert(ts.format("%Y-%m").to_string(), *v);
    }

    let months: Vec<(&String, &f64)> = month_end.iter().collect();
    let mut monthly_returns = BTreeMap::new();
    for w in months.windows(2) {
        let (prev, cur) = (*w[0].1, *w[1].1);
        if prev > 0.0 {
            monthly_returns.insert(w[1].0.clone(), cur / prev - 1.0);
        }
    }

    let values: Vec<f64> = monthly_returns.values().copied().collect();
    if values.is_empty() {
        return MonthlyMetrics::default();
    }

    let positive = values.iter().filter(|r| **r > 0.0).count();
    MonthlyMetrics {
        best_month: values.iter().copied().fold(f64::MIN, f64::max),
        worst_month: values.iter().copied().fold(f64::MAX, f64::min),
        avg_month: mean(&values).unwrap_or(0.0),
        positive_months_pct: positive as f64 / values.len() as f64,
        monthly_returns,
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Successive point-to-point returns; points after a non-positive value are skipped.
fn period_returns(curve: &[EquityPoint]) -> Vec<f64> {
    curve
        .windows(2)
        .filter(|w| w[0].1 > 0.0)
        .map(|w| w[1].1 / w[0].1 - 1.0)
        .collect()
}

fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        None
    } else {
        Some(xs.iter().sum::<f64>() / xs.len() as f64)
    }
}

/// Sample (n-1) standard deviation; `None` below two samples.
fn sample_std(xs: &[f64]) -> Option<f64> {
    if xs.len() < 2 {
        return None;
    }
    let m = mean(xs)?;
    let var = xs.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / (xs.len() - 1) as f64;
    Some(var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn sample_std_uses_n_minus_one() {
        let sd = sample_std(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!((sd - (5.0_f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(sample_std(&[1.0]), None);
    }

    #[test]
    fn unrecovered_drawdown_runs_to_series_end() {
        let curve = vec![(day(1), 100.0), (day(2), 80.0), (day(5), 90.0)];
        let dd = drawdown(&curve);
        assert!((dd.max_drawdown_pct + 0.2).abs() < 1e-12);
        assert_eq!(dd.max_drawdown, -20.0);
        assert_eq!(dd.max_dd_duration_days, 3);
        assert!((dd.avg_drawdown + 0.15).abs() < 1e-12);
    }

    #[test]
    fn monotone_curve_has_no_drawdown() {
        let curve = vec![(day(1), 100.0), (day(2), 101.0), (day(3), 102.0)];
        assert_eq!(drawdown(&curve), DrawdownMetrics::default());
    }

    #[test]
    fn monthly_uses_last_point_of_each_month() {
        let feb = Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap();
        let feb_end = Utc.with_ymd_and_hms(2024, 2, 28, 0, 0, 0).unwrap();
        let curve = vec![(day(1), 100.0), (day(31), 110.0), (feb, 90.0), (feb_end, 121.0)];
        let m = monthly(&curve);
        assert_eq!(m.monthly_returns.len(), 1);
        assert!((m.monthly_returns["2024-02"] - 0.1).abs() < 1e-12);
        assert_eq!(m.positive_months_pct, 1.0);
    }
}
