#[macro_use]
extern crate log;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use pneumonia_classifier::{Classifier, DEFAULT_MODEL_PATH};
use pneumonia_server::DEFAULT_MAX_UPLOAD_MB;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// port to listen on
    #[arg(short, long, default_value_t = 5000)]
    port: u16,

    /// path to the ONNX weights
    #[arg(short, long, default_value = DEFAULT_MODEL_PATH)]
    model: PathBuf,

    /// largest accepted request body, in MiB
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_MB)]
    max_upload_mb: usize,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let env = env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info");
    env_logger::Builder::from_env(env).init();

    if let Err(e) = serve(args).await {
        error!("{e:#}");
        std::process::exit(1)
    }
}

async fn serve(args: Args) -> anyhow::Result<()> {
    info!("Starting pneumonia detection server v{}", env!("CARGO_PKG_VERSION"));
    // loaded before binding: nobody can reach /health with no model
    let max_upload_bytes = upload_limit(args.max_upload_mb)?;
    let classifier = Classifier::load(&args.model)?;
    let app = pneumonia_server::app(Arc::new(classifier), max_upload_bytes);

    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port)).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

fn upload_limit(max_upload_mb: usize) -> anyhow::Result<usize> {
    max_upload_mb
        .checked_mul(1 << 20)
        .with_context(|| format!("--max-upload-mb {max_upload_mb} does not fit in memory"))
}
