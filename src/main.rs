//! DEETO CLI: SEEG electrode contact localization from CT.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use deeto_core::batch::{requests_from_pairing, run_batch};
use deeto_core::electrode_model::ModelTable;
use deeto_core::fiducials::{pair_fiducials, Fiducial};
use deeto_core::utils::Point3;
use deeto_core::{ElectrodeGeometry, Endpoints, TrajectoryConstructor, Volume};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "deeto")]
#[command(about = "Reconstruct SEEG electrode contacts from a post-implant CT")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconstruct one electrode; prints one coordinate per line.
    Reconstruct {
        /// Path to the CT volume (.nii or .nii.gz).
        #[arg(long)]
        ct: PathBuf,

        /// Metal intensity threshold; derived from the volume when absent.
        #[arg(long)]
        threshold: Option<f64>,

        /// Planned entry point (LPS, mm).
        #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true)]
        entry: Option<Vec<f64>>,

        /// Known head point (LPS, mm).
        #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true)]
        head: Option<Vec<f64>>,

        /// Planned target point (LPS, mm).
        #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true)]
        target: Option<Vec<f64>>,

        /// Known tail point (LPS, mm).
        #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true)]
        tail: Option<Vec<f64>>,

        /// Electrode model: contact count, contact length, contact radius, then one gap per contact pair.
        #[arg(long, num_args = 3.., value_names = ["N", "LEN", "RADIUS"], required = true)]
        model: Vec<f64>,
    },

    /// Reconstruct every electrode of a fiducial list and write a JSON report.
    Batch {
        /// Path to the CT volume (.nii or .nii.gz).
        #[arg(long)]
        ct: PathBuf,

        /// Fiducial list (JSON array of {label, position, selected, exact}), RAS.
        #[arg(long)]
        fiducials: PathBuf,

        /// Electrode model table (JSON).
        #[arg(long)]
        models: PathBuf,

        /// Metal intensity threshold; derived from the volume when absent.
        #[arg(long)]
        threshold: Option<f64>,

        /// Path to write the report; stdout when absent.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Reconstruct { ct, threshold, entry, head, target, tail, model } => {
            let endpoints = Endpoints::from_options(
                to_point(head)?,
                to_point(entry)?,
                to_point(target)?,
                to_point(tail)?,
            )?;
            run_reconstruct(&ct, threshold, &endpoints, &geometry_from_args(&model)?)
        }
        Commands::Batch { ct, fiducials, models, threshold, out } => {
            run_batch_command(&ct, &fiducials, &models, threshold, out.as_deref())
        }
    }
}

fn to_point(values: Option<Vec<f64>>) -> CliResult<Option<Point3>> {
    match values.as_deref() {
        None => Ok(None),
        Some(&[x, y, z]) => Ok(Some([x, y, z])),
        Some(other) => Err(format!("expected 3 coordinates, got {}", other.len()).into()),
    }
}

/// `N LEN RADIUS D_1 .. D_{N-1}`
fn geometry_from_args(values: &[f64]) -> CliResult<ElectrodeGeometry> {
    let n = *values.first().ok_or("empty electrode model")?;
    if n < 1.0 || n.fract() != 0.0 {
        return Err(format!("contact count must be a positive integer, got {}", n).into());
    }
    let n = n as usize;
    if values.len() != n + 2 {
        return Err(format!(
            "model with {} contacts needs {} gaps, got {}",
            n,
            n - 1,
            values.len().saturating_sub(3)
        )
        .into());
    }
    Ok(ElectrodeGeometry::new(values[1], values[2], values[3..].to_vec()))
}

fn run_reconstruct(
    ct: &Path,
    threshold: Option<f64>,
    endpoints: &Endpoints,
    geometry: &ElectrodeGeometry,
) -> CliResult<()> {
    tracing::info!("Loading CT: {}", ct.display());
    let volume = Volume::open(ct)?;
    let constructor = TrajectoryConstructor::new(&volume, threshold)?;

    let contacts = constructor.compute_electrode_trajectory(endpoints, geometry)?;
    for contact in &contacts {
        for coordinate in contact {
            println!("{}", coordinate);
        }
    }
    Ok(())
}

fn run_batch_command(
    ct: &Path,
    fiducials_path: &Path,
    models_path: &Path,
    threshold: Option<f64>,
    out: Option<&Path>,
) -> CliResult<()> {
    let models = ModelTable::from_file(models_path)?;
    let fiducials: Vec<Fiducial> = serde_json::from_str(&std::fs::read_to_string(fiducials_path)?)?;
    let pairing = pair_fiducials(&fiducials);
    tracing::info!(
        "Paired {} electrodes from {} fiducials",
        pairing.electrodes.len(),
        fiducials.len()
    );

    tracing::info!("Loading CT: {}", ct.display());
    let volume = Volume::open(ct)?;
    let requests = requests_from_pairing(&pairing, &models)?;
    let report = run_batch(&volume, &requests, &models, threshold)?;

    let json = serde_json::to_string_pretty(&report)?;
    match out {
        Some(path) => {
            std::fs::write(path, &json)?;
            tracing::info!("Report written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}
