use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::fs;
use std::path::PathBuf;

use lap_replay_rs::config::Config;
use lap_replay_rs::pipeline::{self, LapResult};
use lap_replay_rs::record;

#[derive(Parser, Debug)]
#[command(name = "lap_replay")]
#[command(about = "Reconstruct per-lap trajectories from a telemetry session and score each strategy", long_about = None)]
struct Args {
    /// Session record file (13-line header tabular format)
    session: PathBuf,

    /// Optional JSON config overlay; unset sections keep defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the noise RNG seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Only report this lap (default: all laps)
    #[arg(long)]
    lap: Option<u32>,

    /// Output directory for per-lap JSON results
    #[arg(long, default_value = "lap_replay_results")]
    output_dir: PathBuf,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => Config::default(),
    };
    if let Some(seed) = args.seed {
        config.noise.seed = Some(seed);
    }
    Ok(config)
}

fn print_lap_summary(result: &LapResult) {
    println!("\nLap {}", result.lap);
    println!(
        "  duration {:.1} s, distance {:.0} m, outliers clean/noisy {}/{}",
        result.duration,
        result.total_distance,
        result.outlier_counts.clean,
        result.outlier_counts.noisy
    );
    let m = &result.clean.metrics;
    println!("  clean path RMSE (m):");
    println!("    linear      {:8.3}", m.linear.rmse);
    println!("    spline      {:8.3}", m.spline.rmse);
    println!("    kalman_rts  {:8.3}", m.kalman_rts.rmse);
    println!("    ekf_raw     {:8.3}", m.ekf_raw.rmse);
    println!("    ekf_smooth  {:8.3}", m.ekf_smooth.rmse);
    println!(
        "    ekf_best    {:8.3}  (sigma_a={}, sigma_g={}, gps={})",
        m.ekf_best.rmse,
        result.clean.outputs.ekf_best_tuning.sigma_accel,
        result.clean.outputs.ekf_best_tuning.sigma_gyro,
        result.clean.outputs.ekf_best_tuning.gps_pos_noise
    );
    if let Some(noisy) = &result.noisy {
        println!("  noisy path RMSE (m):");
        println!("    linear      {:8.3}", noisy.metrics.linear.rmse);
        println!("    spline      {:8.3}", noisy.metrics.spline.rmse);
        println!("    kalman_rts  {:8.3}", noisy.metrics.kalman_rts.rmse);
        println!("    ekf_raw     {:8.3}", noisy.metrics.ekf_raw.rmse);
        println!("    ekf_best    {:8.3}", noisy.metrics.ekf_best.rmse);
    }
    if !result.speed_extrema.is_empty() {
        println!("  speed extrema:");
        for e in &result.speed_extrema {
            println!(
                "    {:?} at {:.0} m ({:.0}% lap): {:.1} km/h",
                e.kind,
                e.distance,
                e.lap_position * 100.0,
                e.speed_kmh
            );
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = load_config(&args)?;
    let samples = record::parse_session(&args.session)
        .with_context(|| format!("parsing session {}", args.session.display()))?;
    println!("Parsed {} samples from {}", samples.len(), args.session.display());

    let result = pipeline::process(&samples, &config)?;
    println!(
        "Processed laps {:?}, fastest lap {}",
        result.laps, result.selected_lap
    );

    fs::create_dir_all(&args.output_dir)?;
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");

    for (lap, lap_result) in &result.per_lap {
        if let Some(only) = args.lap {
            if *lap != only {
                continue;
            }
        }
        print_lap_summary(lap_result);
        let path = args.output_dir.join(format!("lap{lap:02}_{stamp}.json"));
        let json = serde_json::to_string_pretty(lap_result)?;
        fs::write(&path, json)?;
        println!("  wrote {}", path.display());
    }

    Ok(())
}
