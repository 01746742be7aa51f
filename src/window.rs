use crate::error::{Result, StabilityError};
use rand::{thread_rng, Rng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Sentinel residue padded onto both ends of a sequence in split mode,
/// standing in for the end markers of interior windows.
pub const SENTINEL: char = 'X';

/// Truncation mode for sequences longer than the window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Truncate {
    /// Select one random window of `max_length`.
    Single,
    /// Divide the sequence into overlapping windows of `max_length`.
    Split,
}

/// Windowing configuration shared by both dataset types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSettings {
    /// Fixed window length; `None` disables truncation.
    pub max_length: Option<usize>,
    pub truncate: Option<Truncate>,
    /// Fraction of tokens shared between consecutive split windows.
    pub overlap: f64,
    /// Cap on the number of windows returned in split mode.
    pub sample_splits: Option<usize>,
    /// Softmax temperature for mutation-weighted window selection; the
    /// higher, the more weight is given to windows near mutation sites.
    pub temperature: f64,
}

impl Default for WindowSettings {
    fn default() -> Self {
        WindowSettings {
            max_length: None,
            truncate: Some(Truncate::Single),
            overlap: 0.0,
            sample_splits: None,
            temperature: 8.0,
        }
    }
}

impl WindowSettings {
    /// Checks the configuration before any windowing is attempted.
    ///
    /// # Errors
    /// * Returns `StabilityError::InvalidParameter` if `overlap` is outside
    ///   [0, 1), a truncation mode lacks `max_length`, `max_length` is
    ///   below 2, or the split stride rounds down to zero
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.overlap) {
            return Err(StabilityError::invalid_parameter(
                "overlap",
                self.overlap,
                "must be in [0, 1)",
            ));
        }
        if let Some(max_length) = self.max_length {
            if max_length < 2 {
                return Err(StabilityError::invalid_parameter(
                    "max_length",
                    max_length,
                    "must be at least 2",
                ));
            }
            if self.truncate == Some(Truncate::Split) && self.stride(max_length) == 0 {
                return Err(StabilityError::invalid_parameter(
                    "overlap",
                    self.overlap,
                    "window stride rounds down to zero",
                ));
            }
        } else if self.truncate.is_some() {
            return Err(StabilityError::invalid_parameter(
                "max_length",
                "none",
                "required when a truncation mode is set",
            ));
        }
        Ok(())
    }

    fn stride(&self, max_length: usize) -> usize {
        (max_length as f64 * (1.0 - self.overlap)) as usize
    }
}

/// One fixed-length slice of a sequence together with the coordinates
/// its symbols came from, kept for positional-embedding reconstruction.
/// Split-mode coordinates refer to the sentinel-padded sequence, so the
/// leading sentinel occupies position 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub seq: String,
    pub positions: Vec<usize>,
}

impl Window {
    fn over(seq: &str, start: usize, end: usize) -> Self {
        Window {
            seq: seq[start..end].to_string(),
            positions: (start..end).collect(),
        }
    }
}

/// Truncates a sequence into windows according to `settings`.
///
/// # Arguments
/// * `seq` - sequence of amino-acid symbols to truncate
/// * `settings` - windowing configuration; validated before use
/// * `preferred` - positions to bias window selection toward, typically
///   the record's mutation sites; an empty slice counts as absent
///
/// # Returns
/// * `Result<Vec<Window>>` - One window in single mode, the covering
///   window series in split mode (down-sampled to `sample_splits` when
///   set), or the sequence itself when no truncation is configured
///
/// # Errors
/// * Returns `StabilityError::InvalidParameter` for an invalid configuration
pub fn truncate_sequence(
    seq: &str,
    settings: &WindowSettings,
    preferred: Option<&[usize]>,
) -> Result<Vec<Window>> {
    settings.validate()?;
    let preferred = preferred.filter(|p| !p.is_empty());

    match settings.truncate {
        None => Ok(vec![Window::over(seq, 0, seq.len())]),
        Some(Truncate::Single) => single_window(seq, settings, preferred),
        Some(Truncate::Split) => split_windows(seq, settings, preferred),
    }
}

fn single_window(
    seq: &str,
    settings: &WindowSettings,
    preferred: Option<&[usize]>,
) -> Result<Vec<Window>> {
    let max_length = settings.max_length.unwrap_or(seq.len());
    if seq.len() <= max_length {
        return Ok(vec![Window::over(seq, 0, seq.len())]);
    }

    let last_start = seq.len() - max_length;
    let mut rng = thread_rng();

    let start = match preferred {
        Some(locations) => {
            // Sample the window start around a random mutation site
            let loc = locations[rng.gen_range(0..locations.len())];
            let scale = (max_length / 2) as f64;
            let mean = loc.saturating_sub(max_length / 2) as f64;
            let normal = Normal::new(mean, scale).map_err(|e| {
                StabilityError::invalid_parameter("max_length", max_length, e.to_string())
            })?;
            normal.sample(&mut rng).round().clamp(0.0, last_start as f64) as usize
        }
        None => rng.gen_range(0..=last_start),
    };

    Ok(vec![Window::over(seq, start, start + max_length)])
}

fn split_windows(
    seq: &str,
    settings: &WindowSettings,
    preferred: Option<&[usize]>,
) -> Result<Vec<Window>> {
    let max_length = settings.max_length.unwrap_or(seq.len());
    let stride = settings.stride(max_length);

    // Sentinels simulate the end markers of interior windows
    let padded = format!("{}{}{}", SENTINEL, seq, SENTINEL);
    let n_jumps = if padded.len() <= max_length {
        0
    } else {
        (padded.len() - max_length).div_ceil(stride)
    };

    let starts: Vec<usize> = (0..=n_jumps).map(|k| k * stride).collect();
    let mut windows: Vec<Window> = starts
        .iter()
        .map(|&j| Window::over(&padded, j, (j + max_length).min(padded.len())))
        .collect();

    if let Some(cap) = settings.sample_splits {
        if windows.len() > cap {
            let mut rng = thread_rng();
            let selected = match preferred {
                Some(locations) => {
                    let probs = window_probabilities(&starts, locations, settings, max_length);
                    rand::seq::index::sample_weighted(
                        &mut rng,
                        windows.len(),
                        |i| probs[i],
                        cap,
                    )
                    .map_err(|e| {
                        StabilityError::invalid_parameter("sample_splits", cap, e.to_string())
                    })?
                    .into_vec()
                }
                None => rand::seq::index::sample(&mut rng, windows.len(), cap).into_vec(),
            };
            windows = selected.into_iter().map(|i| windows[i].clone()).collect();
        }
    }

    Ok(windows)
}

/// Selection probability per window: summed Gaussian kernels centered at
/// each preferred position (shifted by half a window so the site lands
/// mid-window), through a temperature-scaled softmax.
fn window_probabilities(
    starts: &[usize],
    locations: &[usize],
    settings: &WindowSettings,
    max_length: usize,
) -> Vec<f64> {
    let scale = (max_length / 2) as f64;
    let weights: Vec<f64> = starts
        .iter()
        .map(|&j| {
            locations
                .iter()
                .map(|&loc| {
                    let center = loc as f64 - (max_length / 2) as f64;
                    (-0.5 * ((j as f64 - center) / scale).powi(2)).exp()
                })
                .sum()
        })
        .collect();
    softmax_scaled(&weights, settings.temperature)
}

fn softmax_scaled(weights: &[f64], temperature: f64) -> Vec<f64> {
    let max = weights
        .iter()
        .map(|&w| w * temperature)
        .fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = weights
        .iter()
        .map(|&w| (w * temperature - max).exp())
        .collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Estimated number of tokens the windower will produce for `seq`,
/// used as the per-record cost by the token-budget batch samplers.
pub fn window_token_count(seq: &str, settings: &WindowSettings) -> usize {
    match settings.truncate {
        Some(Truncate::Single) => settings.max_length.unwrap_or(seq.len()),
        Some(Truncate::Split) => {
            let Some(max_length) = settings.max_length else {
                return seq.len();
            };
            let stride = settings.stride(max_length).max(1);
            let n_splits = if seq.len() <= max_length {
                1
            } else {
                (seq.len() - max_length).div_ceil(stride) + 1
            };
            let n = settings
                .sample_splits
                .map_or(n_splits, |cap| n_splits.min(cap));
            n * max_length
        }
        None => seq.len(),
    }
}
