use crate::error::Result;
use crate::policy::{ExpirationRule, ExpirationScale, RotationPolicy, When};
use crate::writer::RotatingFileWriter;
use std::path::Path;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::SubscriberBuilder;

/// Daily at midnight, a week of backups, nothing older than 14 days.
pub fn diagnostics_writer(dir: impl AsRef<Path>) -> Result<RotatingFileWriter> {
    let policy = RotationPolicy::builder()
        .when(When::Everyday)
        .backup_count(7)
        .expiration(ExpirationRule::new(ExpirationScale::Days, 14)?)
        .build()?;
    RotatingFileWriter::new(dir.as_ref().join("rollsmith.log"), policy)
}

/*
    @@@
    @logs_tracing();
    . Wraps the given rotating writer in a non-blocking writer.
    . Configures a tracing subscriber to log INFO-level events (no ANSI, with levels and targets) to that writer.
    . Keeps the appender alive by returning the guard.
*/
pub fn logs_tracing(writer: RotatingFileWriter) -> std::result::Result<WorkerGuard, SetGlobalDefaultError> {
    let (non_blocking, guard) = tracing_appender::non_blocking(writer);

    let subscriber = SubscriberBuilder::default()
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_writer(non_blocking)
        .with_max_level(tracing::Level::INFO)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(guard)
}
