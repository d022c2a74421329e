use serde::{Deserialize, Serialize};

use crate::grid::ParameterTuple;
use crate::similarity::MetricPair;

/// Metric a surrogate is trained on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Psnr,
    Ssim,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::Psnr, Metric::Ssim];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Psnr => "psnr",
            Metric::Ssim => "ssim",
        }
    }
}

/// One evaluated grid point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub params: ParameterTuple,
    pub metrics: MetricPair,
}

impl Observation {
    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Psnr => self.metrics.psnr,
            Metric::Ssim => self.metrics.ssim,
        }
    }
}

/// A grid point whose evaluation failed under the skip policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedPoint {
    pub params: ParameterTuple,
    pub kind: String,
    pub error: String,
}

/// Append-only record of evaluated points, in evaluation order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservationTable {
    rows: Vec<Observation>,
}

impl ObservationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, params: ParameterTuple, metrics: MetricPair) {
        self.rows.push(Observation { params, metrics });
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Observation> {
        self.rows.iter()
    }

    pub fn params(&self) -> Vec<ParameterTuple> {
        self.rows.iter().map(|row| row.params).collect()
    }

    pub fn features(&self) -> Vec<[f64; 4]> {
        self.rows.iter().map(|row| row.params.features()).collect()
    }

    /// Training targets for one metric.
    ///
    /// Infinite PSNR (pixel-identical images) becomes `psnr_cap`, raised above the
    /// largest finite PSNR when needed so an exact match always ranks highest.
    pub fn targets(&self, metric: Metric, psnr_cap: f64) -> Vec<f64> {
        let infinite_value = match metric {
            Metric::Psnr => self.infinite_psnr_value(psnr_cap),
            Metric::Ssim => f64::INFINITY,
        };
        self.rows
            .iter()
            .map(|row| {
                let value = row.value(metric);
                if value == f64::INFINITY {
                    infinite_value
                } else {
                    value
                }
            })
            .collect()
    }

    fn infinite_psnr_value(&self, psnr_cap: f64) -> f64 {
        let largest_finite = self
            .rows
            .iter()
            .map(|row| row.metrics.psnr)
            .filter(|psnr| psnr.is_finite())
            .fold(f64::NEG_INFINITY, f64::max);
        if largest_finite >= psnr_cap {
            largest_finite + 1.0
        } else {
            psnr_cap
        }
    }
}

impl<'a> IntoIterator for &'a ObservationTable {
    type Item = &'a Observation;
    type IntoIter = std::slice::Iter<'a, Observation>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
