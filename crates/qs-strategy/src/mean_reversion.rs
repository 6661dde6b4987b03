use std::collections::BTreeMap;

use qs_config::StrategySettings;
use qs_events::{Direction, MarketData, PositionSide, PositionStatus, PositionUpdate, Signal};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::indicators::{bollinger, zscore, Bands, RollingWindow, Rsi};
use crate::types::Strategy;

pub const MEAN_REVERSION: &str = "mean_reversion";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeanReversionParams {
    pub bb_window: usize,
    pub bb_std: f64,
    pub zscore_window: usize,
    pub zscore_threshold: f64,
    pub rsi_window: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub volume_window: usize,
    /// Bar volume must exceed this multiple of the rolling average.
    pub volume_factor: f64,
    pub stop_loss_pct: f64,
    /// Target = this multiple of the distance to the middle band.
    pub take_profit_ratio: f64,
    pub exit_on_middle_band: bool,
    /// 0 leaves sizing to the host default.
    pub position_size: f64,
}

impl Default for MeanReversionParams {
    fn default() -> Self {
        Self {
            bb_window: 20,
            bb_std: 2.0,
            zscore_window: 20,
            zscore_threshold: 2.0,
            rsi_window: 14,
            rsi_oversold: 40.0,
            rsi_overbought: 60.0,
            volume_window: 20,
            volume_factor: 1.2,
            stop_loss_pct: 0.02,
            take_profit_ratio: 1.5,
            exit_on_middle_band: true,
            position_size: 0.0,
        }
    }
}

impl MeanReversionParams {
    pub fn from_value(v: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(v.clone())
    }
}

#[derive(Clone, Copy, Debug)]
struct Held {
    side: PositionSide,
    entry_price: f64,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
}

struct SymbolState {
    closes: RollingWindow,
    z_closes: RollingWindow,
    volumes: RollingWindow,
    rsi: Rsi,
    last_rsi: Option<f64>,
    /// protection from the last entry signal, applied when the position opens
    pending: Option<(Option<f64>, Option<f64>)>,
    held: Option<Held>,
}

impl SymbolState {
    fn new(p: &MeanReversionParams) -> Self {
        Self {
            closes: RollingWindow::new(p.bb_window),
            z_closes: RollingWindow::new(p.zscore_window),
            volumes: RollingWindow::new(p.volume_window),
            rsi: Rsi::new(p.rsi_window),
            last_rsi: None,
            pending: None,
            held: None,
        }
    }
}

/// Snapshot of indicator values for the current bar.
#[derive(Clone, Copy, Debug)]
struct Reading {
    price: f64,
    bands: Bands,
    z: f64,
    rsi: f64,
    volume_ok: bool,
}

/// Bollinger / z-score / RSI mean reversion.
///
/// Entry LONG: close < lower band, z < -threshold, RSI < oversold, volume
/// confirmation. SHORT mirrors. Exits on return to the middle band, stop or
/// target (target wins over stop, stop over middle band).
pub struct MeanReversion {
    id: String,
    symbols: Vec<String>,
    params: MeanReversionParams,
    state: BTreeMap<String, SymbolState>,
}

impl MeanReversion {
    pub fn new(symbols: Vec<String>, params: MeanReversionParams) -> Self {
        info!(
            bb_window = params.bb_window,
            bb_std = params.bb_std,
            zscore_window = params.zscore_window,
            zscore_threshold = params.zscore_threshold,
            rsi_window = params.rsi_window,
            "mean reversion initialised"
        );
        let state = symbols
            .iter()
            .map(|s| (s.clone(), SymbolState::new(&params)))
            .collect();
        Self {
            id: MEAN_REVERSION.to_string(),
            symbols,
            params,
            state,
        }
    }

    pub fn from_settings(
        settings: &StrategySettings,
        symbols: Vec<String>,
    ) -> Result<Self, serde_json::Error> {
        let params = MeanReversionParams::from_value(&settings.parameters)?;
        Ok(Self::new(symbols, params))
    }

    pub fn params(&self) -> &MeanReversionParams {
        &self.params
    }

    fn entry(&self, md: &MarketData, r: &Reading) -> Option<Signal> {
        let p = &self.params;
        let confidence = (r.z.abs() / 3.0).min(1.0);

        let long = r.price < r.bands.lower
            && r.z < -p.zscore_threshold
            && r.rsi < p.rsi_oversold
            && r.volume_ok;
        let short = r.price > r.bands.upper
            && r.z > p.zscore_threshold
            && r.rsi > p.rsi_overbought
            && r.volume_ok;

        let (direction, stop, target) = if long {
            let stop = r.price * (1.0 - p.stop_loss_pct);
            let target = r.price + (r.bands.middle - r.price) * p.take_profit_ratio;
            (Direction::Long, stop, target)
        } else if short {
            let stop = r.price * (1.0 + p.stop_loss_pct);
            let target = r.price - (r.price - r.bands.middle) * p.take_profit_ratio;
            (Direction::Short, stop, target)
        } else {
            return None;
        };

        info!(
            symbol = %md.symbol,
            direction = direction.as_str(),
            price = r.price,
            lower = r.bands.lower,
            middle = r.bands.middle,
            upper = r.bands.upper,
            z = r.z,
            rsi = r.rsi,
            "entry signal"
        );
        Some(
            Signal::new(md.timestamp, md.symbol.clone(), direction, r.price)
                .with_asset_class(md.asset_class)
                .with_confidence(confidence)
                .with_size(p.position_size)
                .with_stop(stop)
                .with_target(target),
        )
    }

    fn exit(&self, md: &MarketData, held: &Held, r: &Reading) -> Option<Signal> {
        let price = r.price;
        let long = held.side == PositionSide::Long;

        let mut reason = None;
        if self.params.exit_on_middle_band
            && ((long && price >= r.bands.middle) || (!long && price <= r.bands.middle))
        {
            reason = Some("price_at_middle_band");
        }
        if let Some(stop) = held.stop_loss {
            if (long && price <= stop) || (!long && price >= stop) {
                reason = Some("stop_loss");
            }
        }
        if let Some(target) = held.take_profit {
            if (long && price >= target) || (!long && price <= target) {
                reason = Some("take_profit");
            }
        }
        let reason = reason?;

        let pnl_pct = if held.entry_price > 0.0 {
            held.side.sign() * (price - held.entry_price) / held.entry_price * 100.0
        } else {
            0.0
        };
        info!(symbol = %md.symbol, reason, entry = held.entry_price, price, pnl_pct, "exit signal");
        Some(
            Signal::new(md.timestamp, md.symbol.clone(), Direction::Close, price)
                .with_asset_class(md.asset_class),
        )
    }
}

impl Strategy for MeanReversion {
    fn id(&self) -> &str {
        &self.id
    }

    fn symbols(&self) -> &[String] {
        &self.symbols
    }

    fn on_market_data(&mut self, md: &MarketData) -> Option<Signal> {
        let st = self.state.get_mut(&md.symbol)?;
        let price = md.close();
        st.closes.push(price);
        st.z_closes.push(price);
        st.volumes.push(md.bar.volume);
        if let Some(v) = st.rsi.update(price) {
            st.last_rsi = Some(v);
        }

        let reading = (|| {
            Some(Reading {
                price,
                bands: bollinger(&st.closes, self.params.bb_std)?,
                z: zscore(&st.z_closes, price)?,
                rsi: st.last_rsi?,
                volume_ok: md.bar.volume > st.volumes.mean()? * self.params.volume_factor,
            })
        })();
        let Some(reading) = reading else {
            debug!(symbol = %md.symbol, "warming up");
            return None;
        };
        let held = st.held;

        match held {
            Some(h) => self.exit(md, &h, &reading),
            None => {
                let signal = self.entry(md, &reading)?;
                if let Some(st) = self.state.get_mut(&md.symbol) {
                    st.pending = Some((signal.stop_loss, signal.take_profit));
                }
                Some(signal)
            }
        }
    }

    fn on_position_update(&mut self, u: &PositionUpdate) {
        let Some(st) = self.state.get_mut(&u.symbol) else {
            return;
        };
        match u.status {
            PositionStatus::Open => {
                let (stop_loss, take_profit) = st.pending.take().unwrap_or((None, None));
                let prev = st.held.replace(Held {
                    side: u.side,
                    entry_price: u.entry_price,
                    stop_loss,
                    take_profit,
                });
                // an add keeps the original protection
                if let Some(p) = prev {
                    if let Some(h) = st.held.as_mut() {
                        h.stop_loss = h.stop_loss.or(p.stop_loss);
                        h.take_profit = h.take_profit.or(p.take_profit);
                    }
                }
            }
            PositionStatus::Closed => {
                st.held = None;
                st.pending = None;
            }
        }
    }
}
