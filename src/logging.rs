use std::io;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::filter::FilterFn;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::environment::get_env_string;

/// Installs the stdout and daily-rolling file layers.
///
/// The returned guard flushes the file writer when dropped and must be kept
/// alive for the whole run.
pub fn configure_logging(logs_dir: &Path, quiet: bool) -> WorkerGuard {
    // html5ever is chatty while readability serializes pages
    let custom_filter = FilterFn::new(|metadata| {
        !(metadata.level() == &Level::WARN && metadata.target() == "html5ever::serialize")
    });

    let stdout_directives = match get_env_string("LOG_LEVEL") {
        Some(level) => level.to_lowercase(),
        None if quiet => "warn".to_string(),
        None => "info,web_request=warn,lettre=warn".to_string(),
    };

    let stdout_log = fmt::layer()
        .with_writer(io::stdout)
        .with_filter(EnvFilter::new(stdout_directives))
        .with_filter(custom_filter);

    let file_appender = rolling::daily(logs_dir, "knowever.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_log = fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_filter(EnvFilter::new(
            "info,pipeline=debug,llm_request=debug,web_request=debug",
        ));

    tracing_subscriber::Registry::default()
        .with(stdout_log)
        .with(file_log)
        .init();

    guard
}
