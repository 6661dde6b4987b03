use qs_config::SlippageSettings;
use qs_events::{Bar, Order, OrderSide};
use serde::Serialize;

/// Adverse price adjustment for simulated fills.
///
/// ```text
/// volume_pct     = order_notional / max(bar_volume * close, order_notional)
/// volatility_pct = (high - low) / close * volatility_factor
/// slippage       = min(base_pct + volume_pct * volume_impact_factor + volatility_pct, max_pct) * base_price
/// ```
/// A zero-volume bar contributes no volume impact; a non-positive close
/// contributes no volatility impact.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SlippageModel {
    pub base_pct: f64,
    pub volume_impact_factor: f64,
    pub volatility_factor: f64,
    pub max_pct: f64,
}

impl Default for SlippageModel {
    fn default() -> Self {
        Self::from(&SlippageSettings::default())
    }
}

impl From<&SlippageSettings> for SlippageModel {
    fn from(s: &SlippageSettings) -> Self {
        Self {
            base_pct: s.base_pct,
            volume_impact_factor: s.volume_impact_factor,
            volatility_factor: s.volatility_factor,
            max_pct: s.max_pct,
        }
    }
}

impl SlippageModel {
    /// Worst intrabar price for the side: BUY at high, SELL at low.
    pub fn base_price(side: OrderSide, bar: &Bar) -> f64 {
        match side {
            OrderSide::Buy => bar.high,
            OrderSide::Sell => bar.low,
        }
    }

    /// Slippage as a fraction of base price, capped at `max_pct`.
    pub fn slippage_pct(&self, quantity: f64, base_price: f64, bar: &Bar) -> f64 {
        let order_notional = quantity * base_price;

        let volume_pct = if bar.volume > 0.0 {
            let bar_notional = bar.volume * bar.close;
            let denom = bar_notional.max(order_notional);
            if denom > 0.0 {
                order_notional / denom
            } else {
                0.0
            }
        } else {
            0.0
        };

        let volatility_pct = if bar.close > 0.0 {
            (bar.high - bar.low) / bar.close * self.volatility_factor
        } else {
            0.0
        };

        let total = self.base_pct + volume_pct * self.volume_impact_factor + volatility_pct;
        total.max(0.0).min(self.max_pct)
    }

    /// Currency slippage per unit for `order` priced on `bar`.
    pub fn slippage(&self, order: &Order, bar: &Bar) -> f64 {
        let base = Self::base_price(order.side, bar);
        self.slippage_pct(order.quantity, base, bar) * base
    }

    /// Base price moved against the trader by the slippage amount.
    pub fn fill_price(&self, side: OrderSide, quantity: f64, bar: &Bar) -> f64 {
        let base = Self::base_price(side, bar);
        let slip = self.slippage_pct(quantity, base, bar) * base;
        match side {
            OrderSide::Buy => base + slip,
            OrderSide::Sell => (base - slip).max(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_add_up() {
        let m = SlippageModel::default();
        // range 2% of close -> 1% volatility impact; tiny order vs bar volume
        let bar = Bar::new(100.0, 101.0, 99.0, 100.0, 1_000_000.0);
        let pct = m.slippage_pct(1.0, 101.0, &bar);
        let volume_pct = 101.0 / (1_000_000.0 * 100.0);
        let expected = 0.001 + volume_pct * 0.00001 + 0.01;
        assert!((pct - expected).abs() < 1e-12);
    }

    #[test]
    fn zero_volume_has_no_volume_impact() {
        let m = SlippageModel {
            volatility_factor: 0.0,
            ..SlippageModel::default()
        };
        let bar = Bar::new(10.0, 10.0, 10.0, 10.0, 0.0);
        assert!((m.slippage_pct(1e6, 10.0, &bar) - 0.001).abs() < 1e-15);
    }

    #[test]
    fn capped_at_max_pct() {
        let m = SlippageModel::default();
        // 20% range -> 10% volatility impact, capped to 2%
        let bar = Bar::new(100.0, 110.0, 90.0, 100.0, 10.0);
        assert_eq!(m.slippage_pct(1.0, 110.0, &bar), 0.02);
        let ts = chrono::Utc::now();
        let order = Order::market("O", ts, "X", OrderSide::Buy, 1.0);
        assert!((m.slippage(&order, &bar) - 2.2).abs() < 1e-9);
        assert!((m.fill_price(OrderSide::Sell, 1.0, &bar) - 88.2).abs() < 1e-9);
    }
}
