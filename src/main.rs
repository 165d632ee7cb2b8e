//! Rigor CLI - declarative DUT test orchestration

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;

use rigor::{
    propagate_root, Compiler, Config, FixSuggestion, Runner, SearchPaths, ShellEffects,
    Status,
};

#[derive(Parser)]
#[command(name = "rigor")]
#[command(about = "Rigor - declarative test orchestration for devices under test")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct CommonArgs {
    /// Path to the main test document
    file: String,

    /// Extra document search directories, in precedence order
    #[arg(short = 'I', long = "search")]
    search: Vec<PathBuf>,

    /// Run configuration file (variants + default parameters)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Activate a variant tag (repeatable, earlier wins)
    #[arg(long = "variant")]
    variants: Vec<String>,

    /// Override a default parameter as key=value (repeatable)
    #[arg(long = "param")]
    params: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run a test document
    Run {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Compile and resolve a test document without running it
    Check {
        #[command(flatten)]
        common: CommonArgs,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { common } => run_document(&common, true),
        Commands::Check { common } => run_document(&common, false),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            if let Some(suggestion) = e.fix_suggestion() {
                eprintln!("  {} {}", "Fix:".yellow(), suggestion);
            }
            ExitCode::from(2)
        }
    }
}

fn run_document(args: &CommonArgs, execute: bool) -> Result<ExitCode, rigor::RigorError> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.apply_overrides(&args.variants, &args.params)?;

    let mut search = SearchPaths::new();
    search.push(std::env::current_dir()?);
    for dir in &args.search {
        search.push(dir.clone());
    }

    let variants = config.variant_context();
    let base = config.base_params()?;
    let compiler = Compiler::new(&search, &variants, &base);

    let mut tree = compiler.compile(&args.file, None)?;
    propagate_root(&mut tree, &base);

    if !execute {
        println!(
            "{} {} compiled: {} actions",
            "✓".green(),
            args.file.bold(),
            tree.size()
        );
        return Ok(ExitCode::SUCCESS);
    }

    let mut effects = ShellEffects;
    let status = Runner::new(&mut effects).run(&mut tree);

    match status {
        Status::Pass => {
            println!("{} {}", args.file.bold(), "Pass".green().bold());
            Ok(ExitCode::SUCCESS)
        }
        other => {
            println!("{} {}", args.file.bold(), other.to_string().red().bold());
            Ok(ExitCode::FAILURE)
        }
    }
}
