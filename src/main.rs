mod case;
mod classify;
mod compare;
mod config;
mod executor;
mod expand;
mod limiter;
mod loader;
mod parser;
mod report;
mod runner;

use clap::{Args, Parser, Subcommand};
use config::SuiteConfig;
use report::{OutputFormat, ReportOptions, Reporter};
use runner::{RunOptions, Runner};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "r2r")]
#[command(about = "Regression test runner for radare2-style command-line tools")]
#[command(version)]
struct Cli {
    /// Show progress logging and diagnostics for broken cases
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Suite config file (default: r2r.yaml, r2r.yml or r2r.toml in the current directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Default)]
struct Overrides {
    /// Subject executable to test
    #[arg(long)]
    subject: Option<String>,
    /// Maximum number of concurrent subject processes
    #[arg(short, long)]
    jobs: Option<usize>,
    /// Pass commands inline with -c instead of through a script file
    #[arg(short = 'c', long)]
    inline: bool,
    /// Fuzz timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

impl Overrides {
    fn apply(&self, config: &mut SuiteConfig) {
        if let Some(subject) = &self.subject {
            config.subject = subject.clone();
        }
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
        if self.inline {
            config.use_script = false;
        }
        if let Some(timeout) = self.timeout {
            config.fuzz_timeout = timeout;
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run test database documents
    Run {
        /// Document or directory of documents
        #[arg(default_value = "db")]
        path: PathBuf,
        /// Output format
        #[arg(short, long, default_value = "human")]
        output: OutputFormat,
        /// Only run cases whose name contains this substring
        #[arg(short, long)]
        filter: Option<String>,
        /// List the selected cases without running them
        #[arg(short, long)]
        list: bool,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Load every file in a directory with a hard timeout
    Fuzz {
        /// Directory of fuzzed input files
        dir: PathBuf,
        /// Output format
        #[arg(short, long, default_value = "human")]
        output: OutputFormat,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Parse documents without running them
    Validate {
        /// Document or directory of documents
        #[arg(default_value = "db")]
        path: PathBuf,
    },
    /// Scaffold a suite config file
    Init {
        /// Output path for the new config file
        #[arg(default_value = "r2r.yaml")]
        path: PathBuf,
    },
    /// Output the suite config schema
    Schema,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        std::env::var("RUST_LOG").unwrap_or_else(|_| "r2r=info".to_string())
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| "r2r=warn".to_string())
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Run {
            path,
            output,
            filter,
            list,
            overrides,
        } => {
            let config = suite_config(cli.config.as_deref(), &overrides);
            let documents = match runner::collect_documents(&path) {
                Ok(documents) => documents,
                Err(e) => {
                    eprintln!("Error finding documents in {}: {e}", path.display());
                    std::process::exit(1);
                }
            };
            if documents.is_empty() {
                eprintln!("No documents found at: {}", path.display());
                std::process::exit(1);
            }

            let runner = Runner::new(&config);
            let mut reporter =
                Reporter::new(ReportOptions::from_env(output, &config.subject, cli.verbose));
            let options = RunOptions { filter, list };
            let result = runner
                .run_documents(&documents, &options, &mut reporter)
                .await;
            if list {
                return;
            }
            reporter.finish(&result.total);
            if !result.success() {
                std::process::exit(1);
            }
        }
        Command::Fuzz {
            dir,
            output,
            overrides,
        } => {
            let config = suite_config(cli.config.as_deref(), &overrides);
            let runner = Runner::new(&config);
            let cases = match runner.fuzz_cases(&dir) {
                Ok(cases) => cases,
                Err(e) => {
                    eprintln!("Error: {e}");
                    std::process::exit(1);
                }
            };
            let mut reporter =
                Reporter::new(ReportOptions::from_env(output, &config.subject, cli.verbose));
            let summary = runner.run_cases(cases, &mut reporter).await;
            let origin = dir.display().to_string();
            reporter.document_finished(&origin, &summary);
            reporter.finish(&summary);
            if summary.failed > 0 {
                std::process::exit(1);
            }
        }
        Command::Validate { path } => {
            let config = suite_config(cli.config.as_deref(), &Overrides::default());
            let documents = match runner::collect_documents(&path) {
                Ok(documents) => documents,
                Err(e) => {
                    eprintln!("Error finding documents in {}: {e}", path.display());
                    std::process::exit(1);
                }
            };
            if documents.is_empty() {
                eprintln!("No documents found at: {}", path.display());
                std::process::exit(1);
            }

            let runner = Runner::new(&config);
            let mut errors = 0;
            for (doc, origin) in &documents {
                match runner.load_document(doc, origin) {
                    Ok(cases) => println!("✓ {origin} ({} cases)", cases.len()),
                    Err(e) => {
                        eprintln!("✗ {origin}: {e}");
                        errors += 1;
                    }
                }
            }

            if errors > 0 {
                eprintln!("\n{errors} document(s) failed validation");
                std::process::exit(1);
            }
            println!("\nAll {} document(s) valid", documents.len());
        }
        Command::Init { path } => {
            let template = r#"version: 1

# Executable under test.
subject: radare2

# Maximum number of concurrent subject processes.
jobs: 8

# Pass commands through a script file (-i) instead of inline (-c).
use_script: true

# Timeout in seconds for `r2r fuzz`.
fuzz_timeout: 60

# Sample files every structural-output (json) command runs against.
json_samples:
  - bins/elf/crackme0x00b
  - bins/pe/version_std.exe
  - bins/mach0/hello-objc-osx

# Variables set to 1 to keep the subject from loading plugins.
plugin_env:
  - R2_NOPLUGINS
  - RABIN2_NOPLUGINS
  - RASM2_NOPLUGINS
"#;
            if path.exists() {
                eprintln!("Error: file already exists: {}", path.display());
                std::process::exit(1);
            }
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
                && let Err(e) = fs::create_dir_all(parent)
            {
                eprintln!("Error creating directory: {e}");
                std::process::exit(1);
            }
            if let Err(e) = fs::write(&path, template) {
                eprintln!("Error writing file: {e}");
                std::process::exit(1);
            }
            println!("Created: {}", path.display());
        }
        Command::Schema => {
            let schema = config::generate_schema();
            match serde_json::to_string_pretty(&schema) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error serializing schema: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}

/// Load the suite config, falling back to defaults, and apply CLI overrides.
fn suite_config(explicit: Option<&Path>, overrides: &Overrides) -> SuiteConfig {
    let loaded = match explicit {
        Some(path) => loader::load_config(path).map(Some),
        None => loader::find_config(Path::new(".")),
    };
    let mut config = match loaded {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            eprintln!("Error loading suite config: {e}");
            std::process::exit(1);
        }
    };
    if config.root.is_none() {
        config.root = std::env::current_dir().ok();
    }
    overrides.apply(&mut config);
    config
}
