use std::path::Path;
use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the dispatch matching workspace",
    long_about = "A unified CLI for running tests, benchmarks, fleet replays,\n\
                  and CI checks in the dispatch matching workspace."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the workspace test suite
    Test,
    /// Run Criterion benchmarks
    Bench,
    /// Compare benchmarks: stash changes, create baseline, restore, compare
    BenchCompare,
    /// Replay a fleet feed and request batch through the engine
    Replay {
        /// JSON-lines fleet feed
        #[arg(long, env = "DISPATCH_FLEET")]
        fleet: String,
        /// JSON array of trip requests
        #[arg(long, env = "DISPATCH_REQUESTS")]
        requests: String,
        /// Optional matching config file
        #[arg(long)]
        config: Option<String>,
        /// Worker threads
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Run CI checks (fmt, clippy, tests, benchmarks)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Run benchmarks
    Bench,
    /// Run check + bench
    All,
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn spawn(program: &str, args: &[&str]) -> ExitStatus {
    eprintln!("+ {program} {}", args.join(" "));
    match Command::new(program).args(args).status() {
        Ok(status) => status,
        Err(err) => {
            eprintln!("failed to execute {program}: {err}");
            exit(1);
        }
    }
}

fn run(program: &str, args: &[&str]) {
    let status = spawn(program, args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn run_cargo(args: &[&str]) {
    run("cargo", args);
}

fn run_git(args: &[&str]) {
    run("git", args);
}

const BENCH_ARGS: [&str; 5] = ["bench", "--package", "dispatch_core", "--bench", "matching"];

fn bench_with(extra: &[&str]) {
    let mut args = BENCH_ARGS.to_vec();
    if !extra.is_empty() {
        args.push("--");
        args.extend_from_slice(extra);
    }
    run_cargo(&args);
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    step("Test dispatch_core");
    run_cargo(&["test", "-p", "dispatch_core"]);

    step("Test dispatch_replay");
    run_cargo(&["test", "-p", "dispatch_replay"]);
}

fn ci_bench() {
    step("Run benchmarks");
    bench_with(&[]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Test => {
            run_cargo(&["test", "--workspace"]);
        }
        Commands::Bench => bench_with(&[]),
        Commands::BenchCompare => {
            let baseline_dir = Path::new("target/criterion");
            if baseline_dir.exists() {
                step("Removing existing benchmark data");
                if let Err(err) = std::fs::remove_dir_all(baseline_dir) {
                    eprintln!("failed to remove target/criterion: {err}");
                    exit(1);
                }
            }

            step("Stashing current changes");
            run_git(&["stash", "push", "-m", "Temporary stash for benchmark comparison"]);

            step("Running benchmark to create baseline");
            bench_with(&["--save-baseline", "main"]);

            step("Reapplying changes");
            run_git(&["stash", "pop"]);

            step("Running benchmark comparing against baseline");
            bench_with(&["--baseline", "main"]);

            eprintln!("\nDone! Check the output above to see performance comparison.");
        }
        Commands::Replay {
            fleet,
            requests,
            config,
            threads,
        } => {
            let threads = threads.map(|t| t.to_string());
            let mut args = vec![
                "run",
                "-p",
                "dispatch_replay",
                "--release",
                "--",
                "--fleet",
                &fleet,
                "--requests",
                &requests,
            ];
            if let Some(config) = &config {
                args.extend(["--config", config.as_str()]);
            }
            if let Some(threads) = &threads {
                args.extend(["--threads", threads.as_str()]);
            }
            run_cargo(&args);
        }
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::Bench => ci_bench(),
                CiJob::All => {
                    ci_check();
                    ci_bench();
                }
            }
            eprintln!("\nCI job passed.");
        }
    }
}
