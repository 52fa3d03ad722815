use clap::{Parser, Subcommand};
use r2sync::types::DEFAULT_WORKERS;
use r2sync::{
    clean_workspace_dirs, load_connection_params, normalize_workers, pull_workspace,
    push_workspace, workspace_root, ProcessEnv, ProgressBarSink, R2Store, StatusSink,
    SyncOptions, TracingSink,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "r2sync")]
#[command(about = "Sync .codex/.vscode-server workspace directories with Cloudflare R2", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Concurrent transfers (values below 1 are treated as 1)
    #[arg(
        short,
        long,
        global = true,
        env = "AF_R2_WORKSPACE_WORKERS",
        allow_negative_numbers = true
    )]
    workers: Option<i64>,

    /// Workspace root (defaults to $AF_WORKSPACE_ROOT or the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Suppress console logging (useful with --log-file)
    #[arg(long, global = true, requires = "log_file")]
    no_stdout: bool,

    /// Never draw a progress bar, even on a terminal
    #[arg(long, global = true)]
    no_progress: bool,

    /// Exit with status 0 even when some transfers failed
    #[arg(long, global = true)]
    allow_failures: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload local workspace changes to R2
    Push {
        /// Upload even when the remote copy looks up to date
        #[arg(long)]
        overwrite: bool,
    },
    /// Restore the workspace from R2
    Pull {
        /// Download even when the local file looks up to date
        #[arg(long)]
        overwrite: bool,

        /// Delete the existing workspace directories before restoring
        #[arg(long)]
        clean: bool,
    },
}

fn init_logging(verbose: bool, log_file: Option<&Path>, no_stdout: bool) -> anyhow::Result<()> {
    let log_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("r2sync={}", log_level)));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        }
        None => None,
    };
    let console_layer = if no_stdout { None } else { Some(fmt::layer()) };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.log_file.as_deref(), args.no_stdout)?;

    let (label, overwrite) = match args.command {
        Command::Push { overwrite } => ("sync", overwrite),
        Command::Pull { overwrite, .. } => ("restore", overwrite),
    };

    let env = ProcessEnv;
    let root = args.root.clone().unwrap_or_else(|| workspace_root(&env));
    let params = match load_connection_params(&env, &root) {
        Ok(params) => params,
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    };

    let workers = normalize_workers(args.workers.unwrap_or(DEFAULT_WORKERS as i64));
    let options = SyncOptions {
        workspace_root: root,
        workers,
        overwrite,
        ..SyncOptions::default()
    };

    info!("🚀 R2Sync - workspace {}", label);
    info!("Using {} worker(s) for workspace {}.", workers, label);
    info!("Workspace root: {:?}", options.workspace_root);
    info!("Prefix: {}", params.key_prefix);

    let interactive = !args.no_progress && !args.no_stdout && atty::is(atty::Stream::Stderr);
    let sink: Box<dyn StatusSink> = if interactive {
        Box::new(ProgressBarSink::new(&format!("📦 Workspace {}", label)))
    } else {
        Box::new(TracingSink)
    };

    let store = Arc::new(R2Store::connect(&params).await);
    let result = match args.command {
        Command::Push { .. } => {
            push_workspace(store, &params.key_prefix, &options, sink.as_ref()).await
        }
        Command::Pull { clean, .. } => {
            if clean {
                info!(
                    "Cleaning existing {} before restore.",
                    options.workspace_dirs.join("/")
                );
                if let Err(e) =
                    clean_workspace_dirs(&options.workspace_root, &options.workspace_dirs).await
                {
                    eprintln!("❌ Error: cannot clean workspace: {}", e);
                    std::process::exit(1);
                }
            }
            pull_workspace(store, &params.key_prefix, &options, sink.as_ref()).await
        }
    };

    match result {
        Ok(summary) => {
            info!(
                "✅ Workspace {} completed: {} {}, {} skipped, {} failed in {}.",
                label,
                summary.transferred,
                summary.direction.past_tense(),
                summary.skipped,
                summary.failed,
                humantime::format_duration(std::time::Duration::from_secs(
                    summary.elapsed.as_secs()
                )),
            );
            if summary.has_failures() && !args.allow_failures {
                std::process::exit(2);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}
