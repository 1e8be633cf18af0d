use std::ffi::OsString;
use std::num::NonZeroU16;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueHint};
use log::LevelFilter;
use tokio::signal;
use tower_http::trace::TraceLayer;

mod cleanup;
mod error;
mod files;
mod process;
mod routes;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .filter(Some("tower_http"), LevelFilter::Debug)
        .filter(Some("fit_summary_server"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    let args = CliArgs::parse();

    log::info!(
        version = env!("CARGO_PKG_VERSION"),
        api_version = fit_summary_api::api::VERSION;
        "Initializing server"
    );

    for dir in [&args.uploads_dir, &args.processed_dir] {
        tokio::fs::create_dir_all(dir).await?;
        log::debug!(dir:debug; "directory ready");
    }

    let locks = Arc::new(files::NameLocks::default());
    cleanup::start_cleanup_task(
        vec![args.uploads_dir.clone(), args.processed_dir.clone()],
        Arc::clone(&locks),
        args.cleanup_max_age
            .map(|hours| Duration::from_secs(hours * 60 * 60)),
        args.cleanup_max_size,
    );

    let addr = format!("{}:{}", args.host, args.port);
    let router = routes::routes(args.into_state(locks)).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!(addr:display = addr; "listening to TCP");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
}

#[derive(Parser)]
struct CliArgs {
    /// The host address for the server.
    #[arg(
        long,
        value_name = "URI",
        value_hint = ValueHint::Hostname,
        default_value = "0.0.0.0",
        env = "FIT_SUMMARY_HOST",
    )]
    host: String,
    /// The host port for the server.
    #[arg(
        short,
        long,
        value_name = "PORT",
        value_hint = ValueHint::Other,
        default_value = "8080",
        env = "FIT_SUMMARY_PORT",
    )]
    port: NonZeroU16,
    /// Where uploaded files are stored, created if missing.
    #[arg(
        long,
        value_name = "DIR",
        value_hint = ValueHint::DirPath,
        default_value = "uploads",
        env = "FIT_SUMMARY_UPLOADS_DIR",
    )]
    uploads_dir: PathBuf,
    /// Where the processor writes its summaries, created if missing.
    #[arg(
        long,
        value_name = "DIR",
        value_hint = ValueHint::DirPath,
        default_value = "processed",
        env = "FIT_SUMMARY_PROCESSED_DIR",
    )]
    processed_dir: PathBuf,
    /// Static files served under `/`, including the upload page.
    #[arg(
        long,
        value_name = "DIR",
        value_hint = ValueHint::DirPath,
        default_value = "static",
        env = "FIT_SUMMARY_STATIC_DIR",
    )]
    static_dir: PathBuf,
    /// The program invoked for every upload.
    #[arg(
        long,
        value_name = "PROGRAM",
        value_hint = ValueHint::CommandName,
        default_value = "python",
        env = "FIT_SUMMARY_PROCESSOR",
    )]
    processor: OsString,
    /// First argument to the processor, usually the script. Pass an empty string for none.
    #[arg(
        long,
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        default_value = "fit_processor.py",
        env = "FIT_SUMMARY_PROCESSOR_SCRIPT",
    )]
    processor_script: OsString,
    /// Seconds after which a running processor is killed.
    #[arg(
        long,
        value_name = "SECONDS",
        default_value = "300",
        env = "FIT_SUMMARY_PROCESSOR_TIMEOUT",
    )]
    processor_timeout: u64,
    /// Maximum size of an upload request body in bytes.
    #[arg(
        long,
        value_name = "BYTES",
        default_value = "10485760",
        env = "FIT_SUMMARY_MAX_UPLOAD_SIZE",
    )]
    max_upload_size: usize,
    /// Delete uploads and summaries older than this many hours.
    #[arg(long, value_name = "HOURS", env = "FIT_SUMMARY_CLEANUP_MAX_AGE")]
    cleanup_max_age: Option<u64>,
    /// Delete the oldest files once a directory grows beyond this many bytes.
    #[arg(long, value_name = "BYTES", env = "FIT_SUMMARY_CLEANUP_MAX_SIZE")]
    cleanup_max_size: Option<usize>,
}

impl CliArgs {
    fn into_state(self, locks: Arc<files::NameLocks>) -> routes::AppState {
        let script = Some(self.processor_script).filter(|script| !script.is_empty());
        routes::AppState {
            uploads_dir: self.uploads_dir,
            processed_dir: self.processed_dir,
            static_dir: self.static_dir,
            processor: process::Processor {
                program: self.processor,
                script,
                timeout: Duration::from_secs(self.processor_timeout),
            },
            max_upload_size: self.max_upload_size,
            locks,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT (ctrl+c) handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => log::info!("received SIGINT (ctrl+c), shutting down"),
        () = terminate => log::info!("received SIGTERM, shutting down"),
    }
}
