use tracing_subscriber::EnvFilter;

use crate::stream::accumulator::TurnTelemetry;

/// Map a configured log level onto a tracing filter directive.
///
/// Returns `None` for `DISABLED`. `WARNING` maps to `WARN` and `CRITICAL` to
/// `ERROR`; the rest map directly.
#[must_use]
pub fn filter_directive(log_level: &str) -> Option<String> {
    let level = log_level.to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

/// Initialize the tracing subscriber with the configured log level.
///
/// Logs go to stderr so that stdout stays free for chunk output. A second
/// call is a no-op.
pub fn init_tracing(log_level: &str) {
    let Some(directive) = filter_directive(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("INFO"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

/// Log how a finished turn handled its tool items.
pub fn log_turn_telemetry(telemetry: &TurnTelemetry) {
    tracing::info!(
        target: "respbridge::telemetry",
        tool_items_seen = telemetry.tool_items_seen,
        extra_items_ignored = telemetry.extra_items_ignored,
        adopted_item_id = telemetry.adopted_item_id.as_deref().unwrap_or(""),
        adopted_output_index = ?telemetry.adopted_output_index,
        emitted = telemetry.emitted,
        "tool turn summary"
    );
}
