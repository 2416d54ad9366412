//! Market data arrays
//!
//! The harness consumes two persisted arrays loaded once at startup: a
//! feature tensor (one fixed-shape window per time step) and a bundled
//! target array carrying the trend series plus volatility and price-range
//! channels. Both are read-only for the core; each loop iteration derives
//! a borrowed [`EpisodeWindow`] from them.

use ndarray::{Array1, Array3, ArrayView1, ArrayView3, Axis, s};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::error::{FxrlError, Result};

/// Immutable market data loaded at startup.
///
/// `features` has shape `[steps, window_len, feature_dim]`; every other
/// channel is a flat series aligned on the first axis.
#[derive(Debug, Clone)]
pub struct MarketDataset {
    features: Array3<f32>,
    trend: Array1<f32>,
    atr: Array1<f32>,
    scale_atr: Array1<f32>,
    high: Array1<f32>,
    low: Array1<f32>,
}

/// Borrowed per-iteration slice `[h, h + step_size)` of the market arrays.
///
/// Recomputed from the raw data each loop iteration; no persistent
/// identity.
#[derive(Debug, Clone, Copy)]
pub struct EpisodeWindow<'a> {
    /// One feature window per step: `[step_size, window_len, feature_dim]`
    pub states: ArrayView3<'a, f32>,
    pub trend: ArrayView1<'a, f32>,
    pub atr: ArrayView1<'a, f32>,
    pub scale_atr: ArrayView1<'a, f32>,
    pub high: ArrayView1<'a, f32>,
    pub low: ArrayView1<'a, f32>,
}

impl MarketDataset {
    /// Assemble a dataset from pre-loaded arrays.
    ///
    /// All flat channels must match the first axis of `features`; a
    /// mismatch is fatal and surfaces immediately.
    pub fn new(
        features: Array3<f32>,
        trend: Array1<f32>,
        atr: Array1<f32>,
        scale_atr: Array1<f32>,
        high: Array1<f32>,
        low: Array1<f32>,
    ) -> Result<Self> {
        let n = features.len_of(Axis(0));
        for (name, len) in [
            ("trend", trend.len()),
            ("atr", atr.len()),
            ("scale_atr", scale_atr.len()),
            ("high", high.len()),
            ("low", low.len()),
        ] {
            if len != n {
                return Err(FxrlError::shape((name, n), (name, len)));
            }
        }
        Ok(Self {
            features,
            trend,
            atr,
            scale_atr,
            high,
            low,
        })
    }

    /// Number of time steps in the dataset.
    pub fn len(&self) -> usize {
        self.features.len_of(Axis(0))
    }

    /// True when the dataset holds no steps.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shape of a single feature window `(window_len, feature_dim)`.
    pub fn window_shape(&self) -> (usize, usize) {
        let shape = self.features.shape();
        (shape[1], shape[2])
    }

    /// Mean of the ATR channel, used to seed the engine's loss-cut level.
    pub fn mean_atr(&self) -> f32 {
        if self.atr.is_empty() {
            0.0
        } else {
            self.atr.sum() / self.atr.len() as f32
        }
    }

    /// Slice the episode window `[start, start + step_size)`.
    pub fn window(&self, start: usize, step_size: usize) -> Result<EpisodeWindow<'_>> {
        let end = start + step_size;
        if end > self.len() {
            return Err(FxrlError::shape(("window end", self.len()), ("window end", end)));
        }
        Ok(EpisodeWindow {
            states: self.features.slice(s![start..end, .., ..]),
            trend: self.trend.slice(s![start..end]),
            atr: self.atr.slice(s![start..end]),
            scale_atr: self.scale_atr.slice(s![start..end]),
            high: self.high.slice(s![start..end]),
            low: self.low.slice(s![start..end]),
        })
    }

    /// Start of the held-out evaluation tail (last fifth of the data).
    pub fn holdout_start(&self) -> usize {
        self.len() - self.len() / 5
    }
}

impl<'a> EpisodeWindow<'a> {
    /// Number of steps in the window.
    pub fn len(&self) -> usize {
        self.trend.len()
    }

    /// True when the window holds no steps.
    pub fn is_empty(&self) -> bool {
        self.trend.is_empty()
    }
}

/// Generate a deterministic synthetic dataset for tests and demos.
///
/// A geometric random walk with ATR derived from the rolling absolute
/// return; feature windows carry lagged normalized returns.
pub fn generate_sample_data<R: Rng>(
    rng: &mut R,
    steps: usize,
    window_len: usize,
    feature_dim: usize,
    volatility: f32,
) -> MarketDataset {
    let mut price = 1.0f32;
    let mut prices = Vec::with_capacity(steps + window_len);
    for _ in 0..steps + window_len {
        let z: f32 = StandardNormal.sample(rng);
        price *= 1.0 + volatility * z;
        prices.push(price);
    }

    let mut features = Array3::zeros((steps, window_len, feature_dim));
    let mut trend = Array1::zeros(steps);
    let mut atr = Array1::zeros(steps);
    let mut high = Array1::zeros(steps);
    let mut low = Array1::zeros(steps);

    for t in 0..steps {
        let window = &prices[t..t + window_len];
        for (w, pair) in window.windows(2).enumerate() {
            let ret = (pair[1] / pair[0]).ln();
            for f in 0..feature_dim {
                // Lagged copies of the return series fill the channels
                features[[t, w, f]] = ret * (f + 1) as f32;
            }
        }
        let last = window[window_len - 1];
        trend[t] = last;
        high[t] = last * (1.0 + volatility);
        low[t] = last * (1.0 - volatility);
        atr[t] = (high[t] - low[t]).abs();
    }
    let scale_atr = atr.mapv(|v| v * 0.1);

    MarketDataset::new(features, trend, atr, scale_atr, high, low)
        .expect("generated arrays are aligned by construction")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn window_slices_all_channels() {
        let mut rng = StdRng::seed_from_u64(7);
        let data = generate_sample_data(&mut rng, 200, 10, 4, 0.01);
        let window = data.window(50, 96).unwrap();

        assert_eq!(window.len(), 96);
        assert_eq!(window.states.shape(), &[96, 10, 4]);
        assert_eq!(window.atr.len(), 96);
    }

    #[test]
    fn window_past_end_is_rejected() {
        let mut rng = StdRng::seed_from_u64(7);
        let data = generate_sample_data(&mut rng, 100, 10, 4, 0.01);
        assert!(data.window(90, 20).is_err());
    }

    #[test]
    fn misaligned_channels_are_rejected() {
        let features = Array3::zeros((10, 4, 2));
        let err = MarketDataset::new(
            features,
            Array1::zeros(10),
            Array1::zeros(9), // short ATR channel
            Array1::zeros(10),
            Array1::zeros(10),
            Array1::zeros(10),
        );
        assert!(matches!(err, Err(FxrlError::ShapeMismatch { .. })));
    }

    #[test]
    fn holdout_tail_is_last_fifth() {
        let mut rng = StdRng::seed_from_u64(7);
        let data = generate_sample_data(&mut rng, 1000, 10, 4, 0.01);
        assert_eq!(data.holdout_start(), 800);
    }
}
