use std::collections::VecDeque;

/// Fixed-length window over the most recent values.
#[derive(Clone, Debug)]
pub struct RollingWindow {
    cap: usize,
    values: VecDeque<f64>,
}

impl RollingWindow {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            values: VecDeque::with_capacity(cap),
        }
    }

    pub fn push(&mut self, v: f64) {
        if self.values.len() == self.cap {
            self.values.pop_front();
        }
        self.values.push_back(v);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.cap
    }

    pub fn last(&self) -> Option<f64> {
        self.values.back().copied()
    }

    /// Mean of the full window; `None` until full.
    pub fn mean(&self) -> Option<f64> {
        if !self.is_full() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.cap as f64)
    }

    /// Sample (n-1) standard deviation of the full window.
    pub fn std(&self) -> Option<f64> {
        self.std_ddof(1)
    }

    /// Population standard deviation of the full window.
    pub fn std_population(&self) -> Option<f64> {
        self.std_ddof(0)
    }

    fn std_ddof(&self, ddof: usize) -> Option<f64> {
        let m = self.mean()?;
        if self.cap <= ddof {
            return None;
        }
        let ss: f64 = self.values.iter().map(|v| (v - m) * (v - m)).sum();
        Some((ss / (self.cap - ddof) as f64).sqrt())
    }
}

/// (value - mean) / sample std over the window; `None` when undefined.
pub fn zscore(window: &RollingWindow, value: f64) -> Option<f64> {
    let m = window.mean()?;
    let sd = window.std()?;
    if sd > 0.0 {
        Some((value - m) / sd)
    } else {
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Bollinger bands: mean +/- k population standard deviations.
pub fn bollinger(window: &RollingWindow, k: f64) -> Option<Bands> {
    let middle = window.mean()?;
    let sd = window.std_population()?;
    Some(Bands {
        upper: middle + k * sd,
        middle,
        lower: middle - k * sd,
    })
}

/// Wilder RSI. Seeded with the simple average of the first `period`
/// changes, then smoothed with alpha = 1/period.
#[derive(Clone, Debug)]
pub struct Rsi {
    period: usize,
    prev: Option<f64>,
    seed_gain: f64,
    seed_loss: f64,
    seeded: usize,
    avg_gain: f64,
    avg_loss: f64,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            prev: None,
            seed_gain: 0.0,
            seed_loss: 0.0,
            seeded: 0,
            avg_gain: 0.0,
            avg_loss: 0.0,
        }
    }

    /// Feed a close; returns the RSI once `period` changes have been seen.
    pub fn update(&mut self, close: f64) -> Option<f64> {
        let prev = self.prev.replace(close)?;
        let change = close - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        let n = self.period as f64;

        if self.seeded < self.period {
            self.seed_gain += gain;
            self.seed_loss += loss;
            self.seeded += 1;
            if self.seeded < self.period {
                return None;
            }
            self.avg_gain = self.seed_gain / n;
            self.avg_loss = self.seed_loss / n;
        } else {
            self.avg_gain = (self.avg_gain * (n - 1.0) + gain) / n;
            self.avg_loss = (self.avg_loss * (n - 1.0) + loss) / n;
        }
        Some(self.value())
    }

    pub fn value(&self) -> f64 {
        if self.avg_loss == 0.0 {
            if self.avg_gain == 0.0 {
                50.0
            } else {
                100.0
            }
        } else {
            100.0 - 100.0 / (1.0 + self.avg_gain / self.avg_loss)
        }
    }
}
