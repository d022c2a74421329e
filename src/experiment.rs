use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use image::DynamicImage;
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::config::{Config, FailurePolicy};
use crate::enhancement::{enhance, invert_colors, SourceImage};
use crate::error::{Result, TunerError};
use crate::grid::{GridSampler, ParameterTuple};
use crate::observation::{FailedPoint, Observation, ObservationTable};
use crate::report::ExperimentReport;
use crate::selection::{candidates, select_best};
use crate::similarity::{load_target, score_against};
use crate::surrogate::fit_surrogates;

/// Everything a run reads but never changes
pub struct RunContext {
    pub config: Config,
    pub source_path: PathBuf,
    pub source: SourceImage,
    pub target_path: PathBuf,
    pub target: DynamicImage,
    pub sampler: GridSampler,
}

impl RunContext {
    /// Validate the configuration and load the source and target images once
    pub fn prepare(config: &Config) -> Result<Self> {
        config.validate()?;
        let sampler = GridSampler::new(&config.grid)?;

        let source_path = find_source_image(&config.get_source_dir(), config)?;
        let decoded = image::open(&source_path)?;
        let mut source = SourceImage::from_dynamic(&decoded);
        if config.invert_source {
            log::info!("Inverting source image colours before the search");
            source = invert_colors(&source, 1);
        }

        let target_path = config.get_target_path();
        let target = load_target(&target_path)?;

        let (width, height) = source.dimensions();
        println!(
            "Input image is {} ({}x{}, {} channel(s)). Processing data...",
            source_path.file_name().unwrap_or_default().to_string_lossy(),
            width,
            height,
            source.channel_count()
        );

        Ok(Self {
            config: config.clone(),
            source_path,
            source,
            target_path,
            target,
            sampler,
        })
    }

    /// Build a context from images already in memory
    pub fn from_images(config: &Config, source: &DynamicImage, target: DynamicImage) -> Result<Self> {
        config.validate()?;
        let mut source = SourceImage::from_dynamic(source);
        if config.invert_source {
            source = invert_colors(&source, 1);
        }
        Ok(Self {
            config: config.clone(),
            source_path: PathBuf::new(),
            source,
            target_path: PathBuf::new(),
            target,
            sampler: GridSampler::new(&config.grid)?,
        })
    }
}

/// Pick the first supported image in the directory, ordered by file name
pub fn find_source_image(source_dir: &Path, config: &Config) -> Result<PathBuf> {
    let entries = match fs::read_dir(source_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(TunerError::EmptyInputDirectory {
                path: source_dir.to_path_buf(),
            })
        }
        Err(e) => return Err(e.into()),
    };

    let mut image_paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_supported_image_file(path, config))
        .collect();
    image_paths.sort();

    let first = image_paths.into_iter().next().ok_or_else(|| TunerError::EmptyInputDirectory {
        path: source_dir.to_path_buf(),
    })?;
    Ok(first)
}

// Check if a file is a supported image format
fn is_supported_image_file(path: &Path, config: &Config) -> bool {
    match path.extension() {
        Some(ext) => config.is_supported_format(&ext.to_string_lossy()),
        None => false,
    }
}

/// Enhance the source with one tuple and score it against the target
pub fn evaluate_point(ctx: &RunContext, params: &ParameterTuple) -> Result<Observation> {
    let processed = enhance(&ctx.source, params)?;
    let metrics = score_against(&processed, &ctx.target, &ctx.config.similarity)?;
    Ok(Observation {
        params: *params,
        metrics,
    })
}

struct ProgressState {
    completed: usize,
    last_percent: usize,
}

/// Cosmetic `completed/total` counter shared by the workers
struct Progress {
    label: &'static str,
    total: usize,
    state: Mutex<ProgressState>,
}

impl Progress {
    fn new(label: &'static str, total: usize) -> Self {
        Self {
            label,
            total,
            state: Mutex::new(ProgressState {
                completed: 0,
                last_percent: 0,
            }),
        }
    }

    fn tick(&self) {
        let mut state = self.state.lock();
        state.completed += 1;
        let percent = state.completed * 100 / self.total.max(1);
        if percent > state.last_percent || state.completed == self.total {
            state.last_percent = percent;
            print!(
                "\r{}: {}/{} ({:.1}%)",
                self.label,
                state.completed,
                self.total,
                (state.completed as f64 / self.total.max(1) as f64) * 100.0
            );
            io::stdout().flush().ok();
        }
    }

    fn finish(&self) {
        println!();
    }
}

/// Observations plus the points skipped under [`FailurePolicy::Skip`]
#[derive(Debug, Default)]
pub struct CollectedData {
    pub table: ObservationTable,
    pub failures: Vec<FailedPoint>,
}

impl CollectedData {
    fn record(&mut self, params: ParameterTuple, outcome: Result<Observation>, policy: FailurePolicy) -> Result<()> {
        match outcome {
            Ok(observation) => {
                self.table.push(observation.params, observation.metrics);
                Ok(())
            }
            Err(e) => match policy {
                FailurePolicy::Abort => Err(TunerError::PointFailed {
                    params,
                    source: Box::new(e),
                }),
                FailurePolicy::Skip => {
                    log::warn!("Skipping {}: {}", params, e);
                    self.failures.push(FailedPoint {
                        params,
                        kind: e.kind().to_string(),
                        error: e.to_string(),
                    });
                    Ok(())
                }
            },
        }
    }
}

/// Evaluate every grid point, appending results in grid order
pub fn collect_observations(ctx: &RunContext) -> Result<CollectedData> {
    let total = ctx.sampler.len();
    let policy = ctx.config.failure_policy;
    let progress = Progress::new("Collecting data", total);
    let mut data = CollectedData {
        table: ObservationTable::with_capacity(total),
        failures: Vec::new(),
    };

    if ctx.config.use_multi_threading {
        println!("Using multi-threading with {} threads", ctx.config.thread_count);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(ctx.config.thread_count)
            .build()?;
        let tuples: Vec<ParameterTuple> = ctx.sampler.iter().collect();

        // Workers only return results; this thread is the single writer
        let outcomes: Vec<(ParameterTuple, Result<Observation>)> = pool.install(|| {
            tuples
                .par_iter()
                .map(|params| {
                    let outcome = evaluate_point(ctx, params);
                    progress.tick();
                    (*params, outcome)
                })
                .collect()
        });
        progress.finish();

        for (params, outcome) in outcomes {
            data.record(params, outcome, policy)?;
        }
    } else {
        for params in ctx.sampler.iter() {
            let outcome = evaluate_point(ctx, &params);
            progress.tick();
            if let Err(e) = data.record(params, outcome, policy) {
                progress.finish();
                return Err(e);
            }
        }
        progress.finish();
    }

    Ok(data)
}

/// Collect observations, fit the surrogates and pick the best tuple per metric
pub fn run_with_context(ctx: &RunContext) -> Result<ExperimentReport> {
    let start_time = Instant::now();
    log::info!("Evaluating {} grid points", ctx.sampler.len());

    let data = collect_observations(ctx)?;
    if !data.failures.is_empty() {
        println!("{} grid point(s) failed and were skipped", data.failures.len());
    }
    println!("Collected {} data points", data.table.len());

    let surrogates = fit_surrogates(&data.table, &ctx.config.surrogate)?;
    let ranked = candidates(ctx.config.selection_scope, &data.table, &ctx.sampler);
    let best = select_best(&surrogates, &ranked)?;

    println!("best psnr: {}, best ssim: {}", best.psnr.predicted, best.ssim.predicted);
    log::info!("Best PSNR tuple: {}", best.psnr.params);
    log::info!("Best SSIM tuple: {}", best.ssim.params);
    log::info!("Experiment finished in {:?}", start_time.elapsed());

    Ok(ExperimentReport::new(ctx, surrogates.psnr.name(), data, best))
}

/// Prepare a context from configuration and run the whole search
pub fn run_experiment(config: &Config) -> Result<ExperimentReport> {
    let ctx = RunContext::prepare(config)?;
    run_with_context(&ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridConfig;
    use crate::grid::ParameterRange;
    use image::{GrayImage, Luma};
    use tempfile::tempdir;

    fn small_grid() -> GridConfig {
        GridConfig {
            brightness: ParameterRange::new(-20, 30, 20),
            contrast: ParameterRange::new(1.0, 1.6, 0.5),
            threshold: ParameterRange::new(100, 160, 50),
            morph_size: ParameterRange::new(1, 4, 2),
        }
    }

    fn gradient() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(24, 24, |x, y| Luma([((x + y) * 5) as u8])))
    }

    #[test]
    fn test_find_source_image_picks_first_supported_by_name() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "not an image").unwrap();
        fs::write(dir.path().join("b.png"), "").unwrap();
        fs::write(dir.path().join("a.PNG"), "").unwrap();

        let config = Config::default();
        let found = find_source_image(dir.path(), &config).unwrap();
        assert_eq!(found.file_name().unwrap(), "a.PNG");
    }

    #[test]
    fn test_find_source_image_reports_empty_directory() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("readme.md"), "#").unwrap();
        let config = Config::default();

        assert!(matches!(
            find_source_image(dir.path(), &config),
            Err(TunerError::EmptyInputDirectory { .. })
        ));
        assert!(matches!(
            find_source_image(&dir.path().join("missing"), &config),
            Err(TunerError::EmptyInputDirectory { .. })
        ));
    }

    #[test]
    fn test_sequential_and_parallel_collection_agree() {
        let mut config = Config::default();
        config.grid = small_grid();
        let target = DynamicImage::ImageLuma8(GrayImage::from_pixel(24, 24, Luma([255])));

        let ctx = RunContext::from_images(&config, &gradient(), target.clone()).unwrap();
        let sequential = collect_observations(&ctx).unwrap();

        config.use_multi_threading = true;
        config.thread_count = 3;
        let ctx = RunContext::from_images(&config, &gradient(), target).unwrap();
        let parallel = collect_observations(&ctx).unwrap();

        assert_eq!(sequential.table.len(), ctx.sampler.len());
        assert_eq!(sequential.table, parallel.table);
    }

    #[test]
    fn test_abort_policy_reports_failing_tuple() {
        let mut config = Config::default();
        config.grid = small_grid();
        // Even kernel sizes are invalid
        config.grid.morph_size = ParameterRange::new(1, 5, 1);
        let target = DynamicImage::ImageLuma8(GrayImage::new(24, 24));
        let ctx = RunContext::from_images(&config, &gradient(), target).unwrap();

        match collect_observations(&ctx) {
            Err(TunerError::PointFailed { params, source }) => {
                assert_eq!(params, ParameterTuple::new(-20, 100, 1.0, 2));
                assert!(matches!(*source, TunerError::InvalidParameter { name: "morph_size", .. }));
            }
            other => panic!("expected PointFailed, got {:?}", other.map(|d| d.table.len())),
        }
    }

    #[test]
    fn test_skip_policy_records_failures_and_continues() {
        let mut config = Config::default();
        config.grid = small_grid();
        config.grid.morph_size = ParameterRange::new(1, 5, 1);
        config.failure_policy = FailurePolicy::Skip;
        let target = DynamicImage::ImageLuma8(GrayImage::new(24, 24));
        let ctx = RunContext::from_images(&config, &gradient(), target).unwrap();

        let data = collect_observations(&ctx).unwrap();
        // morph sizes 2 and 4 fail, 1 and 3 succeed
        assert_eq!(data.table.len(), ctx.sampler.len() / 2);
        assert_eq!(data.failures.len(), ctx.sampler.len() / 2);
        assert!(data.failures.iter().all(|f| f.kind == "InvalidParameter"));
        assert!(data.table.iter().all(|row| row.params.morph_size % 2 == 1));
    }

    #[test]
    fn test_run_with_context_selects_observed_tuples() {
        let mut config = Config::default();
        config.grid = small_grid();
        let target = DynamicImage::ImageLuma8(GrayImage::from_fn(24, 24, |x, y| {
            Luma([if (x + y) * 5 > 100 { 255 } else { 0 }])
        }));
        let ctx = RunContext::from_images(&config, &gradient(), target).unwrap();

        let report = run_with_context(&ctx).unwrap();
        assert_eq!(report.evaluated, ctx.sampler.len());
        assert!(report.observations.iter().any(|row| row.params == report.best.psnr.params));
        assert_eq!(report.best.psnr.params, ParameterTuple::new(0, 100, 1.0, 1));
        assert_eq!(report.best.psnr.predicted, config.surrogate.psnr_cap);
    }
}
