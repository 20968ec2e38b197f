//! xtask: Development tasks for shmframe
//!
//! Run with: `cargo xtask <command>`

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use xshell::{cmd, Shell};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Development tasks for shmframe")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all tests (workspace + fuzz harnesses)
    Test,
    /// Run fuzz tests with bolero
    Fuzz {
        /// Target to fuzz (currently only "handoff").
        /// If not specified, runs all fuzz harnesses in test mode (quick smoke test)
        target: Option<String>,
    },
    /// Run clippy on all code
    Clippy {
        /// Also lint the Windows backend by checking against a Windows target
        #[arg(long)]
        windows: bool,
    },
    /// Check formatting
    Fmt {
        /// Fix formatting issues instead of just checking
        #[arg(long)]
        fix: bool,
    },
}

const WINDOWS_TARGET: &str = "x86_64-pc-windows-gnu";

fn main() -> ExitCode {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    let workspace_root = workspace_root()?;
    sh.change_dir(&workspace_root);

    match cli.command {
        Commands::Test => {
            println!("=== Running workspace tests ===");

            // Try nextest first, fall back to cargo test
            if cmd!(sh, "cargo nextest --version").quiet().run().is_ok() {
                println!("Using cargo-nextest");
                cmd!(sh, "cargo nextest run --workspace").run()?;
                // nextest does not run doctests
                cmd!(sh, "cargo test --workspace --doc").run()?;
            } else {
                println!("cargo-nextest not found, using cargo test");
                cmd!(sh, "cargo test --workspace").run()?;
            }

            println!("\n=== Running fuzz harnesses (test mode) ===");
            sh.change_dir(workspace_root.join("fuzz"));
            cmd!(sh, "cargo test").run()?;

            println!("\n=== All tests passed ===");
        }
        Commands::Fuzz { target } => {
            sh.change_dir(workspace_root.join("fuzz"));

            if let Some(t) = target {
                println!("=== Fuzzing target: {t} ===");
                println!("Press Ctrl+C to stop.\n");

                if cmd!(sh, "cargo bolero --version").quiet().run().is_err() {
                    eprintln!("cargo-bolero not found. Install with:");
                    eprintln!("  cargo install cargo-bolero");
                    return Err("cargo-bolero not installed".into());
                }

                cmd!(sh, "cargo bolero test {t}").run()?;
            } else {
                println!("=== Running all fuzz harnesses in test mode ===");
                println!("(For real fuzzing, specify a target: cargo xtask fuzz handoff)\n");
                println!("Available targets:");
                println!("  - handoff   (model vs. real channel and reader)\n");

                cmd!(sh, "cargo test").run()?;
            }
        }
        Commands::Clippy { windows } => {
            println!("=== Running clippy ===");
            cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;

            if windows {
                println!("\n=== Clippy for {WINDOWS_TARGET} ===");
                cmd!(
                    sh,
                    "cargo clippy -p shmframe --target {WINDOWS_TARGET} -- -D warnings"
                )
                .run()?;
            }

            println!("\n=== Clippy on fuzz crate ===");
            sh.change_dir(workspace_root.join("fuzz"));
            cmd!(sh, "cargo clippy -- -D warnings").run()?;
        }
        Commands::Fmt { fix } => {
            if fix {
                println!("=== Fixing formatting ===");
                cmd!(sh, "cargo fmt --all").run()?;
                sh.change_dir(workspace_root.join("fuzz"));
                cmd!(sh, "cargo fmt").run()?;
            } else {
                println!("=== Checking formatting ===");
                cmd!(sh, "cargo fmt --all -- --check").run()?;
                sh.change_dir(workspace_root.join("fuzz"));
                cmd!(sh, "cargo fmt -- --check").run()?;
            }
        }
    }

    Ok(())
}

/// The directory holding the `[workspace]` Cargo.toml.
fn workspace_root() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let manifest_dir = match std::env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => std::env::current_dir()?.join("xtask"),
    };
    let root = manifest_dir
        .parent()
        .ok_or("xtask manifest has no parent directory")?;
    Ok(root.to_path_buf())
}
