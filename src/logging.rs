//! Tracing configuration, log routing, and per-run log context.
//!
//! Logs go to stdout through a compact formatter and, unless disabled, to a file. When
//! `KB_INGEST_LOG_FILE` is set, logs are appended to that path (`off` disables the file);
//! otherwise a file logger is created under `logs/kb-ingest.log`. The file writer is
//! non-blocking so per-object logging inside a run never waits on disk.
//!
//! Every orchestrated run executes inside [`run_span`], so each event it emits carries the
//! `execution_id` and `operation` of the run that produced it.
use std::path::PathBuf;
use std::sync::OnceLock;

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, filter::ParseError, fmt, prelude::*, util::TryInitError};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const DEFAULT_FILTER: &str = "info";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_FILE: &str = "kb-ingest.log";

/// Errors raised while installing the tracing subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// `RUST_LOG` holds a directive the filter cannot parse.
    #[error("Invalid log filter '{filter}': {source}")]
    Filter {
        /// Raw directive string.
        filter: String,
        /// Parser failure.
        #[source]
        source: ParseError,
    },
    /// A global subscriber was already installed.
    #[error("Tracing subscriber already installed: {0}")]
    AlreadyInstalled(#[from] TryInitError),
}

/// Where file logs are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFile {
    /// `logs/kb-ingest.log` under the working directory.
    Default,
    /// Append to an explicit path.
    Path(PathBuf),
    /// Stdout only.
    Disabled,
}

/// Subscriber settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// `EnvFilter` directives.
    pub filter: String,
    /// File routing.
    pub file: LogFile,
}

impl LogSettings {
    /// Resolve from `RUST_LOG` and `KB_INGEST_LOG_FILE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let filter = lookup("RUST_LOG")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let file = match lookup("KB_INGEST_LOG_FILE").map(|value| value.trim().to_string()) {
            None => LogFile::Default,
            Some(value) if value.is_empty() || value.eq_ignore_ascii_case("off") => {
                LogFile::Disabled
            }
            Some(value) => LogFile::Path(PathBuf::from(value)),
        };
        Self { filter, file }
    }
}

/// Install the global subscriber: stdout plus the configured file layer.
///
/// A file that cannot be opened downgrades to stdout only and is reported through the
/// installed subscriber. Calling this twice returns [`LoggingError::AlreadyInstalled`].
pub fn init_tracing(settings: &LogSettings) -> Result<(), LoggingError> {
    let env_filter = EnvFilter::try_new(&settings.filter).map_err(|source| LoggingError::Filter {
        filter: settings.filter.clone(),
        source,
    })?;
    let stdout_layer = fmt::layer().with_target(false).compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    match configure_file_writer(&settings.file) {
        Ok(Some(writer)) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .compact();
            registry.with(file_layer).try_init()?;
        }
        Ok(None) => registry.try_init()?,
        Err(error) => {
            registry.try_init()?;
            tracing::warn!(error = %error, "File logging disabled");
        }
    }
    tracing::debug!(filter = %settings.filter, file = ?settings.file, "Tracing initialised");
    Ok(())
}

/// Span wrapping one orchestrated run.
pub fn run_span(execution_id: &str, operation: &str) -> tracing::Span {
    tracing::info_span!("run", execution_id = %execution_id, operation = %operation)
}

fn configure_file_writer(file: &LogFile) -> Result<Option<NonBlocking>, std::io::Error> {
    let (non_blocking, guard) = match file {
        LogFile::Disabled => return Ok(None),
        LogFile::Path(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_appender::non_blocking(file)
        }
        LogFile::Default => {
            std::fs::create_dir_all(DEFAULT_LOG_DIR)?;
            let appender = tracing_appender::rolling::never(DEFAULT_LOG_DIR, DEFAULT_LOG_FILE);
            tracing_appender::non_blocking(appender)
        }
    };
    // A second guard would flush a writer no subscriber uses.
    if LOG_GUARD.set(guard).is_err() {
        return Ok(None);
    }
    Ok(Some(non_blocking))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(vars: &[(&str, &str)]) -> LogSettings {
        let vars: Vec<(String, String)> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        LogSettings::from_lookup(move |key| {
            vars.iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.clone())
        })
    }

    #[test]
    fn settings_default_to_info_and_the_logs_directory() {
        let resolved = settings(&[]);
        assert_eq!(resolved.filter, "info");
        assert_eq!(resolved.file, LogFile::Default);
    }

    #[test]
    fn settings_honour_overrides() {
        let resolved = settings(&[
            ("RUST_LOG", "kb_ingest=debug"),
            ("KB_INGEST_LOG_FILE", "/tmp/kb.log"),
        ]);
        assert_eq!(resolved.filter, "kb_ingest=debug");
        assert_eq!(resolved.file, LogFile::Path(PathBuf::from("/tmp/kb.log")));
        assert_eq!(
            settings(&[("KB_INGEST_LOG_FILE", "off")]).file,
            LogFile::Disabled
        );
    }

    #[test]
    fn invalid_filter_is_reported() {
        let bad = LogSettings {
            filter: "kb_ingest=loud".into(),
            file: LogFile::Disabled,
        };
        assert!(matches!(
            init_tracing(&bad),
            Err(LoggingError::Filter { .. })
        ));
    }

    #[test]
    fn second_install_is_reported() {
        let quiet = LogSettings {
            filter: "off".into(),
            file: LogFile::Disabled,
        };
        let _ = init_tracing(&quiet);
        assert!(matches!(
            init_tracing(&quiet),
            Err(LoggingError::AlreadyInstalled(_))
        ));
    }

    #[test]
    fn run_span_carries_execution_context() {
        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let span = run_span("exec-1", "create");
            let metadata = span.metadata().expect("enabled span");
            assert_eq!(metadata.name(), "run");
            assert!(metadata.fields().field("execution_id").is_some());
            assert!(metadata.fields().field("operation").is_some());
        });
    }
}
