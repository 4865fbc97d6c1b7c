use color_eyre::eyre::Result;
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::Registry,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Log filename inside the log directory.
pub const LOG_FILENAME: &str = "acctsync.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Configuration for the logging system.
pub struct LogConfig {
    /// Directory for log files; console only when `None`.
    pub log_dir: Option<PathBuf>,
    /// Default log level when RUST_LOG is not set.
    pub log_level: Level,
    /// Whether to use JSON format for logs.
    pub json_format: bool,
    /// Log rotation period.
    pub rotation: Rotation,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            log_level: Level::INFO,
            json_format: false,
            rotation: Rotation::DAILY,
        }
    }
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("acctsync={level}")))
}

/// Initialize the logging system with the given configuration.
///
/// Console output goes to stderr so that command output on stdout stays
/// clean. With a log directory, a rotating file layer is added as well.
/// `RUST_LOG` overrides the configured level.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if let Some(dir) = &config.log_dir {
        std::fs::create_dir_all(dir)?;
        let appender = RollingFileAppender::new(config.rotation.clone(), dir, LOG_FILENAME);
        let file_layer = if config.json_format {
            fmt::layer()
                .json()
                .with_writer(appender)
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_target(true)
                .with_filter(env_filter(config.log_level))
                .boxed()
        } else {
            fmt::layer()
                .with_writer(appender)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_ansi(false) // No ANSI colors in files
                .with_filter(env_filter(config.log_level))
                .boxed()
        };
        layers.push(file_layer);
    }

    let console_layer = if config.json_format {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_target(true)
            .with_filter(env_filter(config.log_level))
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(env_filter(config.log_level))
            .boxed()
    };

    layers.push(console_layer);

    tracing_subscriber::registry()
        .with(layers)
        .with(ErrorLayer::default())
        .init();

    Ok(())
}

/// Parse rotation period from string.
pub fn parse_rotation(s: &str) -> Rotation {
    match s.to_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

/// Default level for a `-v` count.
#[must_use]
pub fn level_for_verbosity(verbose: u8) -> Level {
    match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}
