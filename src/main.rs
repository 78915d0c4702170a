use std::convert::Infallible;
use std::io::{self, Write};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::{self, LocalBoxStream};
use futures_util::StreamExt;
use respbridge::config::{config_from_env, load_config, AppConfig};
use respbridge::error::ProxyError;
use respbridge::observability::init_tracing;
use respbridge::stream::{json_line_events, sse_event_stream, NormalizedStream, StreamNormalizer};
use respbridge::trace::MarkdownTraceWriter;
use serde_json::Value;

const USAGE: &str = "usage: respbridge [--config <path>] <capture>";
const REPLAY_CHUNK_SIZE: usize = 4096;

struct Args {
    config_path: Option<String>,
    capture_path: String,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut config_path = None;
    let mut capture_path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                config_path = Some(args.next().ok_or("--config needs a path")?);
            }
            "--help" | "-h" => return Err(USAGE.to_string()),
            _ if capture_path.is_none() => capture_path = Some(arg),
            _ => return Err(format!("unexpected argument: {arg}")),
        }
    }
    let capture_path = capture_path.ok_or_else(|| USAGE.to_string())?;
    Ok(Args {
        config_path,
        capture_path,
    })
}

fn main() {
    let args = parse_args(std::env::args().skip(1)).unwrap_or_else(|msg| {
        eprintln!("{msg}");
        std::process::exit(2);
    });

    let config = match args.config_path.as_deref() {
        Some(path) => load_config(path),
        None => config_from_env(),
    }
    .unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    });

    init_tracing(&config.features.log_level);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    if let Err(e) = runtime.block_on(replay(&config, &args.capture_path)) {
        eprintln!("Replay failed: {e}");
        std::process::exit(1);
    }
}

/// Whether the capture uses multi-line SSE framing rather than one JSON
/// payload per line.
fn is_sse_capture(capture: &str) -> bool {
    capture
        .lines()
        .any(|line| line.trim_start().starts_with("event:"))
}

fn capture_events(capture: &str) -> LocalBoxStream<'_, Result<Value, ProxyError>> {
    if is_sse_capture(capture) {
        let chunks: Vec<Result<Bytes, Infallible>> = capture
            .as_bytes()
            .chunks(REPLAY_CHUNK_SIZE)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        sse_event_stream(stream::iter(chunks)).boxed_local()
    } else {
        stream::iter(json_line_events(capture)).boxed_local()
    }
}

async fn replay(config: &AppConfig, capture_path: &str) -> io::Result<()> {
    let capture = std::fs::read_to_string(capture_path)?;

    let mut normalizer =
        StreamNormalizer::new().with_telemetry(config.features.tool_telemetry);
    if let Some(writer) = MarkdownTraceWriter::from_config(&config.tracing, "replay") {
        tracing::info!(dir = %writer.dir().display(), "writing replay traces");
        normalizer = normalizer.with_observer(Arc::new(writer));
    }

    let mut chunks = NormalizedStream::new(capture_events(&capture), normalizer);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    while let Some(item) = chunks.next().await {
        match item {
            Ok(chunk) => {
                serde_json::to_writer(&mut out, &chunk).map_err(io::Error::other)?;
                out.write_all(b"\n")?;
            }
            Err(e) => tracing::warn!(error = %e, "skipping capture event"),
        }
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args, String> {
        parse_args(list.iter().map(|s| (*s).to_string()))
    }

    #[test]
    fn test_parse_args() {
        let parsed = args(&["--config", "config.yaml", "capture.sse"]).unwrap();
        assert_eq!(parsed.config_path.as_deref(), Some("config.yaml"));
        assert_eq!(parsed.capture_path, "capture.sse");
        assert!(args(&[]).is_err());
        assert!(args(&["--config"]).is_err());
        assert!(args(&["a", "b"]).is_err());
    }

    #[test]
    fn test_capture_format_detection() {
        assert!(is_sse_capture("event: response.created\ndata: {}\n\n"));
        assert!(!is_sse_capture("{\"type\":\"response.created\"}\n"));
        assert!(!is_sse_capture("data: {\"choices\":[]}\n\n"));
    }
}
