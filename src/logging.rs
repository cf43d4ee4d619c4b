//! # Structured Logging Module
//!
//! Environment-aware structured logging that writes to the console and to a
//! JSON file per process, for debugging long-running automation sessions.

use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| get_log_level(&environment));

        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(EnvFilter::new(log_level.clone()));

        // File output is best effort; a read-only working directory only loses the file layer
        let log_dir = PathBuf::from("log");
        let file_name = format!(
            "{}.{}.{}.log",
            environment,
            process::id(),
            Utc::now().format("%Y%m%d_%H%M%S")
        );

        let file_layer = match fs::create_dir_all(&log_dir) {
            Ok(()) => {
                let file_appender = tracing_appender::rolling::never(&log_dir, &file_name);
                let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
                // Keep the writer alive for the lifetime of the process
                std::mem::forget(guard);
                Some(
                    fmt::layer()
                        .with_writer(file_writer)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_level(true)
                        .with_ansi(false)
                        .json()
                        .with_filter(EnvFilter::new(log_level)),
                )
            }
            Err(_) => None,
        };
        let file_enabled = file_layer.is_some();

        if tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized, keeping it");
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            log_file = %log_dir.join(&file_name).display(),
            file_enabled = file_enabled,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("OUTREACH_ENV")
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

/// Log structured data for runtime lock operations
pub fn log_lock_operation(
    operation: &str,
    lock_key: &str,
    owner_id: &str,
    status: &str,
    holder: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        lock_key = %lock_key,
        owner_id = %owner_id,
        status = %status,
        holder = holder,
        timestamp = %Utc::now().to_rfc3339(),
        "🔒 LOCK_OPERATION"
    );
}

/// Log structured data for proxy pool operations
pub fn log_proxy_operation(
    operation: &str,
    endpoint: Option<&str>,
    session_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        endpoint = endpoint,
        session_id = session_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🌐 PROXY_OPERATION"
    );
}

/// Log structured data for outbox delivery operations
pub fn log_delivery_operation(
    operation: &str,
    event_id: i64,
    topic: &str,
    attempts: i32,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        event_id = event_id,
        topic = %topic,
        attempts = attempts,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📬 DELIVERY_OPERATION"
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
