use qs_config::CommissionSettings;
use qs_events::{AssetClass, OrderSide};
use serde::Serialize;

/// Per-asset-class fee schedule.
///
/// - Crypto: taker fee on notional, both sides
/// - Stock/ETF: free to buy; sells pay an SEC fee on notional plus a per-unit FINRA TAF
/// - Other: no commission
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CommissionSchedule {
    pub crypto_taker_fee: f64,
    pub stock_sec_fee: f64,
    pub stock_finra_taf: f64,
}

impl Default for CommissionSchedule {
    fn default() -> Self {
        Self::from(&CommissionSettings::default())
    }
}

impl From<&CommissionSettings> for CommissionSchedule {
    fn from(s: &CommissionSettings) -> Self {
        Self {
            crypto_taker_fee: s.crypto_taker_fee,
            stock_sec_fee: s.stock_sec_fee,
            stock_finra_taf: s.stock_finra_taf,
        }
    }
}

impl CommissionSchedule {
    pub fn commission(&self, side: OrderSide, quantity: f64, price: f64, asset_class: AssetClass) -> f64 {
        let notional = quantity * price;
        let fee = match (asset_class, side) {
            (AssetClass::Crypto, _) => notional * self.crypto_taker_fee,
            (AssetClass::Stock | AssetClass::Etf, OrderSide::Buy) => 0.0,
            (AssetClass::Stock | AssetClass::Etf, OrderSide::Sell) => {
                notional * self.stock_sec_fee + quantity * self.stock_finra_taf
            }
            (AssetClass::Other, _) => 0.0,
        };
        fee.max(0.0)
    }
}
