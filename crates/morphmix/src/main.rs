use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use morphmix::pipeline::{self, PipelineConfig};
use morphmix::simulate::{self, SimulateConfig};

#[derive(Parser)]
#[command(
    name = "morphmix",
    version,
    about = "Mixed-effects regression workflow for bird morphology data"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the fit → diagnose → plot workflow on a dataset
    Fit {
        /// Input CSV with taxon, wing_length_mm and beak_height_mm columns
        #[arg(long)]
        data: PathBuf,
        /// Directory for charts and the augmented dataset
        #[arg(long, default_value = "out")]
        out_dir: PathBuf,
        /// Use the REML criterion (disables the likelihood-ratio test)
        #[arg(long)]
        reml: bool,
    },
    /// Generate a synthetic morphology dataset
    Simulate {
        /// Output CSV path
        #[arg(long)]
        out: PathBuf,
        /// RNG seed
        #[arg(long, default_value_t = 1234)]
        seed: u64,
        /// Number of taxa
        #[arg(long, default_value_t = 8)]
        taxa: usize,
        /// Baseline observations per taxon (actual counts vary)
        #[arg(long, default_value_t = 24)]
        per_taxon: usize,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Fit { data, out_dir, reml } => {
            let output = pipeline::run(&PipelineConfig { data, out_dir, reml })?;
            println!("{}", output.report);
        }
        Command::Simulate {
            out,
            seed,
            taxa,
            per_taxon,
        } => {
            simulate::run(&SimulateConfig {
                out,
                seed,
                n_taxa: taxa,
                per_taxon,
            })?;
        }
    }

    Ok(())
}
