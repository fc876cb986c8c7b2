//! wirebridge-rpc - line-oriented JSON-RPC driver.
//!
//! Reads one request per line from a file or stdin, dispatches it against a
//! session bridge whose global bridge exports the demo services, and writes
//! one response per line to stdout. Logs go to stderr.

mod services;

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;
use wirebridge::{Bridge, JsonSerializer, ObjectRef, SerializerConfig, Value};

#[derive(Parser, Debug)]
#[command(name = "wirebridge-rpc")]
#[command(about = "Dispatch line-delimited JSON-RPC requests against demo services")]
struct Args {
    /// Serializer configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Request file, one JSON request per line (defaults to stdin)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(io::stderr)
        .compact()
        .init();

    let config = match &args.config {
        Some(path) => SerializerConfig::load(path)
            .with_context(|| format!("loading serializer config {}", path.display()))?,
        None => SerializerConfig::default(),
    };
    debug!("Serializer config: {:?}", config);

    let global = Bridge::init_global(JsonSerializer::with_default_codecs(config))?;
    services::register(&global)?;
    let session = Bridge::new_session(&global);

    let source = match &args.input {
        Some(path) => path.display().to_string(),
        None => "stdin".to_string(),
    };
    let context = [Value::Object(ObjectRef::native(
        &services::connection_type(),
        source.clone(),
    ))];

    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(io::stdin().lock()),
    };

    info!("Serving requests from {}", source);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut served = 0usize;
    for line in reader.lines() {
        let line = line.context("reading request")?;
        if line.trim().is_empty() {
            continue;
        }
        let response = session.dispatch_str(&context, &line);
        serde_json::to_writer(&mut out, &response)?;
        writeln!(out)?;
        out.flush()?;
        served += 1;
    }
    info!("Served {} requests", served);
    Ok(())
}
