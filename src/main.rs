use clap::{Parser, Subcommand};
use photobook_merge::config::{self, PackagingStrategy};
use photobook_merge::{output, pipeline};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "photobook-merge")]
#[command(about = "Merge calendar pages from several photo-book projects into one")]
#[command(long_about = "\
Merge calendar pages from several photo-book projects into one

A merge config names the source archives and picks, for each calendar slot
of the new project, which source page fills it:

  {
    \"name\": \"Family 2025\",
    \"source-mapping\": {\"A\": \"anna.prj\", \"B\": \"ben.prj\"},
    \"pages\": {
      \"Cover\":   {\"A\": \"Cover\"},
      \"January\": {\"B\": \"March\"}
    }
  }

Slots are Cover, January ... December. Unlisted slots stay empty. When two
aliases target the same slot, the one listed last wins.

The merged project is written as <name>.prj. Pictures are re-identified by
content hash and stored once; HEIC pictures are re-encoded as JPEG.

Run 'photobook-merge gen-config' to print a documented merge.toml.")]
#[command(version)]
struct Cli {
    /// Merge config (JSON)
    #[arg(long, default_value = "merge-config.json", global = true)]
    config: PathBuf,

    /// Directory the source-mapping paths are relative to
    #[arg(long, default_value = ".", global = true)]
    source_dir: PathBuf,

    /// Run settings (TOML); stock defaults apply when the file is missing
    #[arg(long, default_value = "merge.toml", global = true)]
    settings: PathBuf,

    /// Where <name>.prj is written (overrides [output] directory)
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Merge the sources and write the project archive
    Build {
        /// Packaging strategy (overrides [output] strategy)
        #[arg(long, value_enum)]
        strategy: Option<PackagingStrategy>,
    },
    /// Validate the config and sources, and show the plan without writing
    Check,
    /// Print a stock merge.toml with all options documented
    GenConfig,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            let mut source = err.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Command::Build { strategy } => {
            let merge = config::load_merge_config(&cli.config)?;
            let mut settings = config::load_settings(&cli.settings)?;
            if let Some(strategy) = strategy {
                settings.output.strategy = strategy;
            }
            let output_dir = cli
                .output_dir
                .unwrap_or_else(|| PathBuf::from(&settings.output.directory));

            println!("==> Merging {} from {}", merge.name, cli.source_dir.display());
            let report = pipeline::build(&merge, &settings, &cli.source_dir, &output_dir)?;
            output::print_check_output(&report.plan);
            println!();
            output::print_pack_output(&report.pack);
            println!("==> Build complete: {}", report.pack.archive.display());
        }
        Command::Check => {
            let merge = config::load_merge_config(&cli.config)?;
            // Settings are not needed to plan, but a broken file should fail here too
            config::load_settings(&cli.settings)?;

            println!("==> Checking {}", cli.config.display());
            let report = pipeline::check(&merge, &cli.source_dir)?;
            output::print_check_output(&report);
            println!("==> Config is valid");
        }
        Command::GenConfig => {
            print!("{}", config::stock_settings_toml());
        }
    }

    Ok(())
}
