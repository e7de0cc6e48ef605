use crate::moderation::ModerationOutcome;
use crate::protocol::MessageEvent;
use crate::{CONSOLE_TARGET, ERROR_TARGET, MODERATION_TARGET};
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Moderation log file name
pub const MODERATION_LOG_FILE: &str = "moderation";

fn default_filter() -> EnvFilter {
    let mut filter = EnvFilter::new("info");
    // HTTP internals are noisy at info
    for directive in ["reqwest=warn", "hyper=warn", "hyper_util=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Initialize the logging system with console and file outputs
pub fn init(log_dir: &Path) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if !log_dir.exists() {
        std::fs::create_dir_all(log_dir)?;
    }

    let moderation_file = RollingFileAppender::new(Rotation::DAILY, log_dir, MODERATION_LOG_FILE);

    // Human-readable console output
    let console_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(true);

    // JSON moderation log
    let file_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(moderation_file);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    info!(log_dir = %log_dir.display(), "Logging system initialized");
    Ok(())
}

/// Log the start of a moderation decision
pub fn log_moderation_start(message: &MessageEvent) {
    info!(
        target: MODERATION_TARGET,
        room_id = %message.room_id,
        user_id = %message.sender,
        event_id = %message.event_id,
        event = "start",
        "Moderation started"
    );
}

/// Log the end of a moderation decision with its outcome
pub fn log_moderation_end(message: &MessageEvent, outcome: &ModerationOutcome, elapsed: Duration) {
    let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or_default();

    if let ModerationOutcome::Aborted(e) = outcome {
        error!(
            target: ERROR_TARGET,
            room_id = %message.room_id,
            user_id = %message.sender,
            event_id = %message.event_id,
            error = %e,
            duration_ms,
            event = "end",
            "Moderation aborted"
        );
        return;
    }

    info!(
        target: MODERATION_TARGET,
        room_id = %message.room_id,
        user_id = %message.sender,
        event_id = %message.event_id,
        outcome = %outcome,
        duration_ms,
        event = "end",
        "Moderation completed"
    );
}

pub fn log_console(message: &str) {
    info!(
        target: CONSOLE_TARGET,
        message = %message,
        event = "console",
    );
}
