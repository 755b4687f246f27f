//! Technical indicators over candle and close series
//!
//! Pure computation, no I/O. Every function degrades to `None`/empty on
//! insufficient data instead of erroring, so callers can fail soft.
//!
//! - Moving averages: EMA (SMA-seeded)
//! - Oscillators: RSI and ADX/DI with Wilder smoothing, MACD
//! - Volatility: true range, ATR series, percentile rank
//! - Statistics: simple returns, Pearson correlation, VWAP

use super::candle::Candle;

/// Exponential Moving Average.
///
/// Multiplier `k = 2 / (period + 1)`, seeded with the SMA of the first
/// `period` values. Output index `j` corresponds to input index
/// `j + period - 1`. Empty on insufficient data.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let k = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    let mut prev = seed;
    for &v in &values[period..] {
        prev = v * k + prev * (1.0 - k);
        out.push(prev);
    }
    out
}

/// Latest EMA value
pub fn ema_last(values: &[f64], period: usize) -> Option<f64> {
    ema(values, period).last().copied()
}

/// Relative Strength Index (Wilder's smoothing).
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let p = period as f64;

    let mut avg_gain = changes[..period].iter().map(|c| c.max(0.0)).sum::<f64>() / p;
    let mut avg_loss = changes[..period].iter().map(|c| (-c).max(0.0)).sum::<f64>() / p;

    for &c in &changes[period..] {
        avg_gain = (avg_gain * (p - 1.0) + c.max(0.0)) / p;
        avg_loss = (avg_loss * (p - 1.0) + (-c).max(0.0)) / p;
    }

    if avg_loss <= f64::EPSILON {
        return Some(if avg_gain <= f64::EPSILON { 50.0 } else { 100.0 });
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// MACD snapshot at the last bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
    /// Histogram one bar earlier, for crossover detection
    pub prev_histogram: f64,
}

impl Macd {
    pub fn crossed_up(&self) -> bool {
        self.prev_histogram <= 0.0 && self.histogram > 0.0
    }

    pub fn crossed_down(&self) -> bool {
        self.prev_histogram >= 0.0 && self.histogram < 0.0
    }
}

/// Moving Average Convergence Divergence
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if fast == 0 || fast >= slow || closes.len() < slow + signal {
        return None;
    }

    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    let offset = slow - fast;
    let line: Vec<f64> = (0..slow_ema.len())
        .map(|i| fast_ema[i + offset] - slow_ema[i])
        .collect();

    let signal_ema = ema(&line, signal);
    if signal_ema.len() < 2 {
        return None;
    }

    let n = line.len();
    let m = signal_ema.len();
    let histogram = line[n - 1] - signal_ema[m - 1];
    let prev_histogram = line[n - 2] - signal_ema[m - 2];

    Some(Macd {
        line: line[n - 1],
        signal: signal_ema[m - 1],
        histogram,
        prev_histogram,
    })
}

/// True range per bar starting at index 1
pub fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    candles
        .windows(2)
        .map(|w| {
            let (prev, cur) = (&w[0], &w[1]);
            let hl = cur.high - cur.low;
            let hc = (cur.high - prev.close).abs();
            let lc = (cur.low - prev.close).abs();
            hl.max(hc).max(lc)
        })
        .collect()
}

/// Average True Range series (Wilder). One value per bar from `period` on.
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<f64> {
    let trs = true_ranges(candles);
    if period == 0 || trs.len() < period {
        return Vec::new();
    }

    let p = period as f64;
    let mut out = Vec::with_capacity(trs.len() - period + 1);
    let mut atr = trs[..period].iter().sum::<f64>() / p;
    out.push(atr);
    for &tr in &trs[period..] {
        atr = (atr * (p - 1.0) + tr) / p;
        out.push(atr);
    }
    out
}

/// Latest ATR value
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    atr_series(candles, period).last().copied()
}

/// Average Directional Index with directional indicators
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adx {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

/// ADX (Wilder). Needs `2 * period + 1` candles.
pub fn adx(candles: &[Candle], period: usize) -> Option<Adx> {
    if period == 0 || candles.len() < 2 * period + 1 {
        return None;
    }

    let p = period as f64;
    let trs = true_ranges(candles);
    let (plus_dm, minus_dm): (Vec<f64>, Vec<f64>) = candles
        .windows(2)
        .map(|w| {
            let up = w[1].high - w[0].high;
            let down = w[0].low - w[1].low;
            let plus = if up > down && up > 0.0 { up } else { 0.0 };
            let minus = if down > up && down > 0.0 { down } else { 0.0 };
            (plus, minus)
        })
        .unzip();

    let mut tr_s = trs[..period].iter().sum::<f64>();
    let mut plus_s = plus_dm[..period].iter().sum::<f64>();
    let mut minus_s = minus_dm[..period].iter().sum::<f64>();

    let di = |plus_s: f64, minus_s: f64, tr_s: f64| -> (f64, f64, f64) {
        if tr_s <= f64::EPSILON {
            return (0.0, 0.0, 0.0);
        }
        let pdi = 100.0 * plus_s / tr_s;
        let mdi = 100.0 * minus_s / tr_s;
        let sum = pdi + mdi;
        let dx = if sum <= f64::EPSILON {
            0.0
        } else {
            100.0 * (pdi - mdi).abs() / sum
        };
        (pdi, mdi, dx)
    };

    let (mut pdi, mut mdi, first_dx) = di(plus_s, minus_s, tr_s);
    let mut dxs = vec![first_dx];

    for i in period..trs.len() {
        tr_s = tr_s - tr_s / p + trs[i];
        plus_s = plus_s - plus_s / p + plus_dm[i];
        minus_s = minus_s - minus_s / p + minus_dm[i];
        let (a, b, dx) = di(plus_s, minus_s, tr_s);
        pdi = a;
        mdi = b;
        dxs.push(dx);
    }

    if dxs.len() < period {
        return None;
    }
    let mut adx = dxs[..period].iter().sum::<f64>() / p;
    for &dx in &dxs[period..] {
        adx = (adx * (p - 1.0) + dx) / p;
    }

    Some(Adx {
        adx,
        plus_di: pdi,
        minus_di: mdi,
    })
}

/// Mid-rank percentile (0-100) of `current` within `window`; ties count half
pub fn percentile_rank(window: &[f64], current: f64) -> Option<f64> {
    if window.is_empty() {
        return None;
    }
    let below = window.iter().filter(|&&v| v < current).count() as f64;
    let equal = window.iter().filter(|&&v| v == current).count() as f64;
    Some(100.0 * (below + 0.5 * equal) / window.len() as f64)
}

/// Volume weighted average price over the slice (typical price)
pub fn vwap(candles: &[Candle]) -> Option<f64> {
    let volume: f64 = candles.iter().map(|c| c.volume).sum();
    if volume <= f64::EPSILON {
        return None;
    }
    let pv: f64 = candles.iter().map(|c| c.typical_price() * c.volume).sum();
    Some(pv / volume)
}

/// Simple close-to-close returns
pub fn returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|w| w[0].abs() > f64::EPSILON)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Pearson correlation of two equally long series
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    let ma = mean(a)?;
    let mb = mean(b)?;
    let (mut cov, mut va, mut vb) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        let dx = x - ma;
        let dy = y - mb;
        cov += dx * dy;
        va += dx * dx;
        vb += dy * dy;
    }
    if va <= f64::EPSILON || vb <= f64::EPSILON {
        return None;
    }
    Some(cov / (va.sqrt() * vb.sqrt()))
}
