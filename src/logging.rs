//! # Structured Logging Module
//!
//! Environment-aware console logging using the tracing ecosystem, plus a small set
//! of domain helpers so that shard and chunk events share one field vocabulary.
//!
//! The environment is read from `DAILY_INCOME_ENV` (falling back to `APP_ENV`).
//! `RUST_LOG` overrides the environment-derived level, and
//! `DAILY_INCOME_LOG_FORMAT=json` switches the console layer to JSON lines.

use chrono::Utc;
use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::models::{RunKey, ShardIndex};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json_output = std::env::var("DAILY_INCOME_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let use_ansi = !json_output && IsTerminal::is_terminal(&std::io::stdout());

        let console_layer = if json_output {
            fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_level(true)
                .with_ansi(use_ansi)
                .with_filter(filter)
                .boxed()
        };

        // A host process may already own the global subscriber
        if tracing_subscriber::registry()
            .with(console_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
            return;
        }

        tracing::info!(
            environment = %environment,
            json_output = json_output,
            ansi_colors = use_ansi,
            "🔧 STRUCTURED LOGGING: Console logging initialized"
        );
    });
}

/// Get current environment from environment variables
pub(crate) fn get_environment() -> String {
    std::env::var("DAILY_INCOME_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for one shard's unit of work
pub fn log_shard_operation(
    operation: &str,
    run_key: RunKey,
    shard: ShardIndex,
    status: &str,
    duration_ms: Option<u64>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        run_key = %run_key,
        shard = shard.value(),
        status = %status,
        duration_ms = duration_ms,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🧮 SHARD_OPERATION"
    );
}

/// Log structured data for one consolidation chunk
pub fn log_chunk_operation(
    operation: &str,
    run_key: RunKey,
    shard: ShardIndex,
    chunk: usize,
    total_chunks: usize,
    rows: u64,
    cumulative_rows: u64,
) {
    tracing::debug!(
        operation = %operation,
        run_key = %run_key,
        shard = shard.value(),
        chunk = chunk,
        total_chunks = total_chunks,
        rows = rows,
        cumulative_rows = cumulative_rows,
        "📦 CHUNK_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
