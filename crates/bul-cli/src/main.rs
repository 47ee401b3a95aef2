//! bul command line tool
//!
//! `bul patch` applies a TOML insertion plan to compiled class files;
//! `bul inspect` dumps a class file's pool, bootstrap table and code.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod files;
mod output;

#[derive(Parser)]
#[command(name = "bul")]
#[command(about = "Build-time bytecode insertion for JVM class files", long_about = None)]
#[command(version)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply an insertion plan to class files
    Patch {
        /// Insertion plan (TOML)
        #[arg(short, long)]
        plan: PathBuf,
        /// Write patched classes here instead of in place
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
        /// Worker threads (defaults to the number of CPUs)
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Marker annotation descriptor, overriding the plan
        #[arg(long)]
        marker: Option<String>,
        /// Skip structural verification of patched classes
        #[arg(long)]
        no_verify: bool,
        /// Color output: auto, always, never
        #[arg(long, default_value = "auto")]
        color: String,
        /// Class files or directories to search for them
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Print the structure of a class file
    Inspect {
        /// Class file
        file: PathBuf,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
        /// Color output: auto, always, never
        #[arg(long, default_value = "auto")]
        color: String,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Patch {
            plan,
            out_dir,
            jobs,
            marker,
            no_verify,
            color,
            inputs,
        } => {
            let args = commands::patch::PatchArgs {
                plan,
                out_dir,
                jobs: jobs.unwrap_or_else(num_cpus::get),
                marker,
                verify: !no_verify,
                color,
                inputs,
            };
            if !commands::patch::execute(args)? {
                std::process::exit(1);
            }
        }

        Commands::Inspect { file, json, color } => {
            commands::inspect::execute(&file, json, &color)?;
        }
    }

    Ok(())
}
