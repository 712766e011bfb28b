// --- File: src/metrics/running.rs ---

//! Utilities for tracking statistics while training.
//!
//! Averages are computed incrementally so evaluation over many batches never
//! has to keep the individual values around.

use std::collections::BTreeMap;

/// Online (optionally weighted) mean.
#[derive(Debug, Clone, Default)]
pub struct RunningMean {
    mean: f64,
    total_weight: f64,
    count: usize,
}

impl RunningMean {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value with weight 1.
    pub fn update(&mut self, value: f64) {
        self.update_weighted(value, 1.0);
    }

    /// Adds a value counted `weight` times; non-positive weights are ignored.
    pub fn update_weighted(&mut self, value: f64, weight: f64) {
        if weight <= 0.0 {
            return;
        }
        self.count += 1;
        self.total_weight += weight;
        self.mean += (value - self.mean) * weight / self.total_weight;
    }

    pub fn compute(&self) -> f64 {
        self.mean
    }

    /// Number of values added.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Per-step history of named metrics.
///
/// Values logged with [`log`](Self::log) are averaged until
/// [`end_step`](Self::end_step) records the mean under the given step.
#[derive(Debug, Clone, Default)]
pub struct MetricLogger {
    history: BTreeMap<String, Vec<(usize, f64)>>,
    current: BTreeMap<String, RunningMean>,
}

impl MetricLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, name: &str, value: f64) {
        self.current
            .entry(name.to_string())
            .or_default()
            .update(value);
    }

    /// Closes the current round of values and files their means under `step`.
    pub fn end_step(&mut self, step: usize) -> BTreeMap<String, f64> {
        let means: BTreeMap<String, f64> = std::mem::take(&mut self.current)
            .into_iter()
            .map(|(name, mean)| (name, mean.compute()))
            .collect();
        for (name, &value) in &means {
            self.history
                .entry(name.clone())
                .or_default()
                .push((step, value));
        }
        means
    }

    pub fn history(&self, name: &str) -> Option<&[(usize, f64)]> {
        self.history.get(name).map(Vec::as_slice)
    }

    pub fn last(&self, name: &str) -> Option<f64> {
        self.history
            .get(name)
            .and_then(|h| h.last())
            .map(|&(_, v)| v)
    }

    /// Lowest recorded value and its step.
    pub fn best_min(&self, name: &str) -> Option<(usize, f64)> {
        self.history.get(name).and_then(|h| {
            h.iter()
                .copied()
                .fold(None, |best: Option<(usize, f64)>, (step, v)| match best {
                    Some((_, b)) if b <= v => best,
                    _ => Some((step, v)),
                })
        })
    }

    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.history.keys().map(String::as_str)
    }

    /// `name: value` pairs recorded at `step`, sorted by name.
    pub fn format_step(&self, step: usize) -> String {
        let parts: Vec<String> = self
            .history
            .iter()
            .filter_map(|(name, h)| {
                h.iter()
                    .find(|&&(s, _)| s == step)
                    .map(|&(_, v)| format!("{}: {:.6}", name, v))
            })
            .collect();
        format!("Step {}: {}", step, parts.join(" | "))
    }
}
