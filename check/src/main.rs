#[macro_use]
extern crate log;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use pneumonia_classifier::DEFAULT_MODEL_PATH;

mod steps;

use steps::{Checklist, load_classifier};

/// Verifies a pneumonia-server deployment: weights, companion files, running
/// server, inference runtime.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// path to the ONNX weights
    #[arg(short, long, default_value = DEFAULT_MODEL_PATH)]
    model: PathBuf,

    /// file the deployment needs, may be repeated
    #[arg(short, long = "require", default_value = "frontend/index.html")]
    required: Vec<PathBuf>,

    /// health endpoint of the running server
    #[arg(long, default_value = "http://localhost:5000/health")]
    health_url: String,

    /// seconds to wait for the server
    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,
}

fn main() {
    let args = Args::parse();

    let env = env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "warn");
    env_logger::Builder::from_env(env).init();

    let checklist = Checklist {
        model: args.model,
        required: args.required,
        health_url: args.health_url,
        timeout: Duration::from_secs(args.timeout_secs),
        loader: load_classifier,
    };
    match checklist.run(&mut std::io::stdout()) {
        Ok(true) => (),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{e:#}");
            std::process::exit(1)
        }
    }
}
