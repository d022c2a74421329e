use enhance_tuner::config::{load_config, Config, FailurePolicy, SelectionScope};
use enhance_tuner::enhancement::{self, SourceImage};
use enhance_tuner::experiment::{self, RunContext};
use enhance_tuner::grid::ParameterTuple;
use enhance_tuner::report;
use enhance_tuner::similarity;
use std::env;
use std::path::Path;

// Main application
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Get command line arguments
    let args: Vec<String> = env::args().collect();

    // If no arguments provided, run the search with config.json as is
    if args.len() <= 1 {
        let config = load_config()?;
        init_logging(&config.log_level);
        return run_search(&config);
    }

    // Handle different commands
    match args[1].as_str() {
        "run" => {
            let mut config = load_config()?;

            // Override input/target/output locations if provided
            if args.len() > 2 {
                config.input_directory = args[2].clone();
            }
            if args.len() > 3 {
                config.target_image = args[3].clone();
            }
            if args.len() > 4 {
                config.output_directory = args[4].clone();
            }

            init_logging(&config.log_level);
            run_search(&config)?;
        }
        "enhance" => {
            if args.len() < 7 {
                println!(
                    "Usage: enhance_tuner enhance <image> <brightness> <threshold> <contrast> <morph_size> [output]"
                );
                println!("  Applies the enhancement pipeline with one parameter tuple");
                return Ok(());
            }
            init_logging("info");

            let params = ParameterTuple::new(
                args[3].parse::<i32>()?,
                args[4].parse::<i32>()?,
                args[5].parse::<f64>()?,
                args[6].parse::<i32>()?,
            );
            let output = args.get(7).map(String::as_str).unwrap_or("enhanced.png");
            enhance_image(&args[2], &params, output)?;
        }
        "score" => {
            if args.len() < 4 {
                println!("Usage: enhance_tuner score <image> <target>");
                println!("  Prints PSNR and SSIM of an image against a target");
                return Ok(());
            }
            let config = load_config()?;
            init_logging(&config.log_level);
            score_image(&args[2], &args[3], &config)?;
        }
        "config" => {
            if args.len() < 3 {
                println!("Usage: enhance_tuner config <command> [args]");
                println!("Commands:");
                println!("  create - Create default configuration file");
                println!("  show   - Show current configuration");
                println!("  check  - Check configuration settings");
                println!("  set <key> <value> - Modify a configuration setting");
                return Ok(());
            }

            match args[2].as_str() {
                "create" => create_config()?,
                "show" => show_config()?,
                "check" => check_config()?,
                "set" => {
                    if args.len() < 5 {
                        println!("Usage: enhance_tuner config set <key> <value>");
                        return Ok(());
                    }
                    set_config(&args[3], &args[4])?;
                }
                _ => {
                    println!("Unknown config command: {}", args[2]);
                }
            }
        }
        "help" => {
            print_help();
        }
        _ => {
            println!("Unknown command: {}", args[1]);
            print_help();
        }
    }

    Ok(())
}

/// RUST_LOG wins over the configured level
fn init_logging(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    // A second init (e.g. from tests) is harmless
    let _ = env_logger::Builder::from_env(env).format_timestamp_secs().try_init();
}

/// Run the full grid search and write the report files
fn run_search(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("Input directory: {}", config.get_source_dir().display());
    println!("Target image: {}", config.get_target_path().display());

    let ctx = RunContext::prepare(config)?;
    let result = experiment::run_with_context(&ctx)?;
    let written = report::write_outputs(&result, &ctx)?;

    println!();
    print!("{}", result);
    println!("\nResults saved to {}", config.get_output_dir().display());
    for path in written {
        println!("  {}", path.display());
    }
    Ok(())
}

/// Enhance a single image and save the result
fn enhance_image(image_path: &str, params: &ParameterTuple, output: &str) -> Result<(), Box<dyn std::error::Error>> {
    let image = image::open(image_path)?;
    let processed = enhancement::enhance(&SourceImage::from_dynamic(&image), params)?;
    processed.save(output)?;
    println!("Enhanced {} with {}", image_path, params);
    println!("Saved to {}", output);
    Ok(())
}

/// Compare an image against a target and print both metrics
fn score_image(image_path: &str, target_path: &str, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("Scoring images:");
    println!("  image:  {}", image_path);
    println!("  target: {}", target_path);

    let processed = image::open(image_path)?.to_luma8();
    let metrics = similarity::score(&processed, Path::new(target_path), &config.similarity)?;

    println!("PSNR: {:.4} dB", metrics.psnr);
    println!("SSIM: {:.4}", metrics.ssim);
    Ok(())
}

/// Create default configuration file
fn create_config() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    config.save_to_file("config.json")?;
    println!("Created default configuration file: config.json");
    Ok(())
}

/// Show current configuration
fn show_config() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    println!("{:#?}", config);
    Ok(())
}

/// Check configuration settings
fn check_config() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let sampler = enhance_tuner::GridSampler::new(&config.grid)?;

    println!("Configuration check:");
    println!("  Input directory: {}", config.get_source_dir().display());
    println!("  Target image: {}", config.get_target_path().display());
    println!("  Output directory: {}", config.get_output_dir().display());
    println!("  Grid points: {}", sampler.len());
    println!("  Surrogate: {:?}", config.surrogate.kind);
    println!("  Failure policy: {:?}", config.failure_policy);
    println!("  Selection scope: {:?}", config.selection_scope);

    if !config.get_source_dir().exists() {
        println!("  Warning: input directory does not exist");
    }
    if !config.get_target_path().exists() {
        println!("  Warning: target image does not exist");
    }

    Ok(())
}

/// Set configuration setting
fn set_config(key: &str, value: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config()?;

    // Update configuration based on key
    match key {
        "input_directory" => {
            config.input_directory = value.to_string();
        }
        "target_image" => {
            config.target_image = value.to_string();
        }
        "output_directory" => {
            config.output_directory = value.to_string();
        }
        "failure_policy" => {
            config.failure_policy = match value {
                "abort" => FailurePolicy::Abort,
                "skip" => FailurePolicy::Skip,
                _ => return Err("Failure policy must be 'abort' or 'skip'".into()),
            };
        }
        "selection_scope" => {
            config.selection_scope = match value {
                "observed" => SelectionScope::Observed,
                "grid" => SelectionScope::Grid,
                _ => return Err("Selection scope must be 'observed' or 'grid'".into()),
            };
        }
        "similarity.data_range" => {
            config.similarity.data_range = value.parse::<f64>()?;
        }
        "surrogate.max_depth" => {
            config.surrogate.max_depth = match value {
                "none" => None,
                depth => Some(depth.parse::<usize>()?),
            };
        }
        "surrogate.psnr_cap" => {
            config.surrogate.psnr_cap = value.parse::<f64>()?;
        }
        "invert_source" => {
            config.invert_source = value.parse::<bool>()?;
        }
        "save_best_images" => {
            config.save_best_images = value.parse::<bool>()?;
        }
        "use_multi_threading" => {
            config.use_multi_threading = value.parse::<bool>()?;
        }
        "thread_count" => {
            config.thread_count = value.parse::<usize>()?;
        }
        "log_level" => {
            config.log_level = value.to_string();
        }
        _ => {
            return Err(format!("Unknown configuration key: {}", key).into());
        }
    }

    config.validate()?;

    // Save updated configuration
    config.save_to_file("config.json")?;
    println!("Updated configuration saved");
    Ok(())
}

/// Print help information
fn print_help() {
    println!("Enhance Tuner - Enhancement parameter search");
    println!();
    println!("Commands:");
    println!("  run [input_dir] [target_image] [output_dir]  - Search the grid and report the best tuples");
    println!("  enhance <image> <b> <t> <c> <m> [output]     - Enhance one image with a single parameter tuple");
    println!("  score <image> <target>                       - Print PSNR and SSIM of an image against a target");
    println!("  config <subcommand>                          - Manage configuration");
    println!("  help                                         - Show this help message");
    println!();
    println!("Running without arguments:");
    println!("  The search runs with the settings in config.json, created with defaults if missing");
    println!("  Set RUST_LOG to override \"log_level\"");
}
