use chrono::{DateTime, Local};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::SelectionScope;
use crate::enhancement::enhance;
use crate::error::Result;
use crate::experiment::{CollectedData, RunContext};
use crate::observation::{FailedPoint, Metric, ObservationTable};
use crate::selection::BestResult;

pub const REPORT_JSON: &str = "report.json";
pub const REPORT_TEXT: &str = "report.txt";
pub const OBSERVATIONS_CSV: &str = "observations.csv";

/// Result of one complete search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub source_image: String,
    pub target_image: String,
    pub generated_at: DateTime<Local>,
    pub grid_size: usize,
    pub evaluated: usize,
    pub surrogate: String,
    pub selection_scope: SelectionScope,
    pub best: BestResult,
    pub failures: Vec<FailedPoint>,
    /// Infinite PSNR values serialize as `null`
    pub observations: ObservationTable,
}

impl ExperimentReport {
    pub fn new(ctx: &RunContext, surrogate: &str, data: CollectedData, best: BestResult) -> Self {
        Self {
            source_image: ctx.source_path.display().to_string(),
            target_image: ctx.target_path.display().to_string(),
            generated_at: Local::now(),
            grid_size: ctx.sampler.len(),
            evaluated: data.table.len(),
            surrogate: surrogate.to_string(),
            selection_scope: ctx.config.selection_scope,
            best,
            failures: data.failures,
            observations: data.table,
        }
    }
}

impl fmt::Display for ExperimentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Source image: {}", self.source_image)?;
        writeln!(f, "Target image: {}", self.target_image)?;
        writeln!(f, "Generated at: {}", self.generated_at.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "Grid points: {}", self.grid_size)?;
        writeln!(f, "Evaluated: {}", self.evaluated)?;
        writeln!(f, "Failed: {}", self.failures.len())?;
        writeln!(f, "Surrogate: {}", self.surrogate)?;
        for metric in Metric::ALL {
            let best = self.best.get(metric);
            writeln!(f, "Best {}: {:.4} at {}", metric.name(), best.predicted, best.params)?;
        }
        Ok(())
    }
}

/// Write the report as pretty JSON
pub fn save_report_json(report: &ExperimentReport, output_path: &Path) -> Result<()> {
    let file = File::create(output_path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)?;
    Ok(())
}

/// Human-readable summary in the same layout as the console output
pub fn save_report_text(report: &ExperimentReport, output_path: &Path) -> Result<()> {
    let mut file = BufWriter::new(File::create(output_path)?);

    writeln!(file, "Enhancement Parameter Search Report")?;
    writeln!(file, "===================================")?;
    writeln!(file)?;
    write!(file, "{}", report)?;

    writeln!(file, "\nBest parameters")?;
    writeln!(file, "---------------")?;
    for (name, value) in report.best.best_params() {
        writeln!(file, "{}: {}", name, value)?;
    }

    if !report.failures.is_empty() {
        writeln!(file, "\nFailed points")?;
        writeln!(file, "-------------")?;
        for failure in &report.failures {
            writeln!(file, "{} [{}]: {}", failure.params, failure.kind, failure.error)?;
        }
    }

    file.flush()?;
    Ok(())
}

/// One row per observation, in evaluation order
pub fn save_observations_csv(table: &ObservationTable, output_path: &Path) -> Result<()> {
    let mut file = BufWriter::new(File::create(output_path)?);

    writeln!(file, "brightness,threshold,contrast,morph_size,psnr,ssim")?;
    for row in table {
        let p = row.params;
        writeln!(
            file,
            "{},{},{},{},{:.6},{:.6}",
            p.brightness, p.threshold, p.contrast, p.morph_size, row.metrics.psnr, row.metrics.ssim
        )?;
    }

    file.flush()?;
    Ok(())
}

/// Save an image as `{label}_{counter}.png` in `output_dir`
pub fn save_image(image: &GrayImage, output_dir: &Path, label: &str, counter: u32) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!("{}_{}.png", label, counter));
    image.save(&path)?;
    Ok(path)
}

/// Write every report artifact, plus the best images when enabled
pub fn write_outputs(report: &ExperimentReport, ctx: &RunContext) -> Result<Vec<PathBuf>> {
    let output_dir = ctx.config.get_output_dir();
    fs::create_dir_all(&output_dir)?;

    let mut written = vec![
        output_dir.join(REPORT_JSON),
        output_dir.join(REPORT_TEXT),
        output_dir.join(OBSERVATIONS_CSV),
    ];
    save_report_json(report, &written[0])?;
    save_report_text(report, &written[1])?;
    save_observations_csv(&report.observations, &written[2])?;

    if ctx.config.save_best_images {
        for metric in Metric::ALL {
            let best = report.best.get(metric);
            let processed = enhance(&ctx.source, &best.params)?;
            let label = format!("best_{}", metric.name());
            written.push(save_image(&processed, &output_dir, &label, 0)?);
        }
    }

    log::info!("Wrote {} output file(s) to {}", written.len(), output_dir.display());
    Ok(written)
}
