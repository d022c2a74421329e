use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::GridConfig;
use crate::error::{Result, TunerError};

/// One point of the search space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterTuple {
    pub brightness: i32,
    pub threshold: i32,
    pub contrast: f64,
    pub morph_size: i32,
}

impl ParameterTuple {
    pub fn new(brightness: i32, threshold: i32, contrast: f64, morph_size: i32) -> Self {
        Self {
            brightness,
            threshold,
            contrast,
            morph_size,
        }
    }

    /// Feature vector in the order brightness, threshold, contrast, morph_size
    pub fn features(&self) -> [f64; 4] {
        [
            self.brightness as f64,
            self.threshold as f64,
            self.contrast,
            self.morph_size as f64,
        ]
    }
}

impl fmt::Display for ParameterTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "brightness={}, threshold={}, contrast={}, morph_size={}",
            self.brightness, self.threshold, self.contrast, self.morph_size
        )
    }
}

/// Scalar types a [`ParameterRange`] can step over
pub trait GridValue: Copy + PartialOrd + fmt::Display {
    fn is_valid_step(step: Self) -> bool;
    fn count(start: Self, stop: Self, step: Self) -> usize;
    fn nth(start: Self, step: Self, index: usize) -> Self;
}

impl GridValue for i32 {
    fn is_valid_step(step: Self) -> bool {
        step > 0
    }

    fn count(start: Self, stop: Self, step: Self) -> usize {
        if stop <= start {
            return 0;
        }
        let span = stop as i64 - start as i64;
        ((span + step as i64 - 1) / step as i64) as usize
    }

    fn nth(start: Self, step: Self, index: usize) -> Self {
        start + step * index as i32
    }
}

impl GridValue for f64 {
    fn is_valid_step(step: Self) -> bool {
        step.is_finite() && step > 0.0
    }

    fn count(start: Self, stop: Self, step: Self) -> usize {
        if !(start.is_finite() && stop.is_finite()) || stop <= start {
            return 0;
        }
        // The quotient can land a rounding error either side of an integer
        let mut count = ((stop - start) / step).ceil() as usize;
        while count > 0 && Self::nth(start, step, count - 1) >= stop {
            count -= 1;
        }
        while Self::nth(start, step, count) < stop {
            count += 1;
        }
        count
    }

    // Multiplying instead of accumulating keeps 1.0 + 2 * 0.5 exactly 2.0
    fn nth(start: Self, step: Self, index: usize) -> Self {
        start + step * index as f64
    }
}

/// Arithmetic progression `start, start + step, ...` stopping before `stop`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterRange<T> {
    pub start: T,
    pub stop: T,
    pub step: T,
}

impl<T: GridValue> ParameterRange<T> {
    pub fn new(start: T, stop: T, step: T) -> Self {
        Self { start, stop, step }
    }

    pub fn len(&self) -> usize {
        if !T::is_valid_step(self.step) {
            return 0;
        }
        T::count(self.start, self.stop, self.step)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> Vec<T> {
        (0..self.len())
            .map(|i| T::nth(self.start, self.step, i))
            .collect()
    }

    pub fn contains(&self, value: T) -> bool {
        value >= self.start && value < self.stop
    }

    fn validate(&self, name: &'static str) -> Result<()> {
        if !T::is_valid_step(self.step) {
            return Err(TunerError::invalid(name, self.step, "range step must be positive"));
        }
        if self.is_empty() {
            return Err(TunerError::invalid(
                name,
                format!("{}..{}", self.start, self.stop),
                "range contains no values",
            ));
        }
        Ok(())
    }
}

/// Enumerates the Cartesian product of the four parameter ranges
#[derive(Debug, Clone)]
pub struct GridSampler {
    brightness: Vec<i32>,
    contrast: Vec<f64>,
    threshold: Vec<i32>,
    morph_size: Vec<i32>,
}

impl GridSampler {
    pub fn new(config: &GridConfig) -> Result<Self> {
        config.brightness.validate("brightness")?;
        config.contrast.validate("contrast")?;
        config.threshold.validate("threshold")?;
        config.morph_size.validate("morph_size")?;

        Ok(Self {
            brightness: config.brightness.values(),
            contrast: config.contrast.values(),
            threshold: config.threshold.values(),
            morph_size: config.morph_size.values(),
        })
    }

    /// Total number of grid points
    pub fn len(&self) -> usize {
        self.brightness.len() * self.contrast.len() * self.threshold.len() * self.morph_size.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fresh pass over the grid, brightness outermost and morph_size innermost
    pub fn iter(&self) -> GridIter<'_> {
        GridIter {
            sampler: self,
            index: 0,
            len: self.len(),
        }
    }
}

impl<'a> IntoIterator for &'a GridSampler {
    type Item = ParameterTuple;
    type IntoIter = GridIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct GridIter<'a> {
    sampler: &'a GridSampler,
    index: usize,
    len: usize,
}

impl Iterator for GridIter<'_> {
    type Item = ParameterTuple;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.len {
            return None;
        }
        let s = self.sampler;
        let mut rest = self.index;
        let m = rest % s.morph_size.len();
        rest /= s.morph_size.len();
        let t = rest % s.threshold.len();
        rest /= s.threshold.len();
        let c = rest % s.contrast.len();
        let b = rest / s.contrast.len();
        self.index += 1;

        Some(ParameterTuple::new(
            s.brightness[b],
            s.threshold[t],
            s.contrast[c],
            s.morph_size[m],
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for GridIter<'_> {}
