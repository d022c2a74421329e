use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::SelectionScope;
use crate::error::{Result, TunerError};
use crate::grid::{GridSampler, ParameterTuple};
use crate::observation::{Metric, ObservationTable};
use crate::surrogate::{FittedSurrogates, Surrogate};

/// Highest-ranked tuple for one metric and its surrogate prediction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestPoint {
    pub params: ParameterTuple,
    pub predicted: f64,
}

/// Best tuple per metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestResult {
    pub psnr: BestPoint,
    pub ssim: BestPoint,
}

impl BestResult {
    pub fn get(&self, metric: Metric) -> &BestPoint {
        match metric {
            Metric::Psnr => &self.psnr,
            Metric::Ssim => &self.ssim,
        }
    }

    /// Flat `{param}_{metric}` mapping, e.g. `brightness_psnr`
    pub fn best_params(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        for metric in Metric::ALL {
            let params = self.get(metric).params;
            let suffix = metric.name();
            out.insert(format!("brightness_{}", suffix), params.brightness as f64);
            out.insert(format!("threshold_{}", suffix), params.threshold as f64);
            out.insert(format!("contrast_{}", suffix), params.contrast);
            out.insert(format!("morph_{}", suffix), params.morph_size as f64);
        }
        out
    }

    /// Predicted value of the best tuple, per metric name
    pub fn best_value(&self) -> BTreeMap<String, f64> {
        Metric::ALL
            .iter()
            .map(|m| (m.name().to_string(), self.get(*m).predicted))
            .collect()
    }
}

/// Stable argmax of the surrogate over `candidates`.
///
/// The first candidate reaching the maximum wins; NaN predictions never win.
pub fn select(surrogate: &dyn Surrogate, candidates: &[ParameterTuple]) -> Result<BestPoint> {
    let first = candidates.first().ok_or(TunerError::EmptyObservationTable)?;

    let mut best: Option<BestPoint> = None;
    for params in candidates {
        let predicted = surrogate.predict(&params.features())?;
        if predicted.is_nan() {
            continue;
        }
        if best.map_or(true, |b| predicted > b.predicted) {
            best = Some(BestPoint {
                params: *params,
                predicted,
            });
        }
    }

    Ok(best.unwrap_or(BestPoint {
        params: *first,
        predicted: f64::NAN,
    }))
}

/// Run [`select`] once per metric
pub fn select_best(surrogates: &FittedSurrogates, candidates: &[ParameterTuple]) -> Result<BestResult> {
    Ok(BestResult {
        psnr: select(surrogates.get(Metric::Psnr), candidates)?,
        ssim: select(surrogates.get(Metric::Ssim), candidates)?,
    })
}

/// Tuples the selector ranks for the given scope
pub fn candidates(scope: SelectionScope, table: &ObservationTable, sampler: &GridSampler) -> Vec<ParameterTuple> {
    match scope {
        SelectionScope::Observed => table.params(),
        SelectionScope::Grid => sampler.iter().collect(),
    }
}
