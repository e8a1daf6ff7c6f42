use clap::{Args, ValueEnum};

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> tracing::level_filters::LevelFilter {
        use tracing::level_filters::LevelFilter;
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Shared logging flags for procmesh binaries. Logs go to stderr so the
/// parent process can capture them per subordinate.
#[derive(Args, Debug)]
pub struct LoggingOptions {
    /// Log output format.
    #[arg(long, value_name = "FORMAT", default_value = "text", env = "PROCMESH_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Minimum log level.
    #[arg(long, value_name = "LEVEL", default_value = "info", env = "PROCMESH_LOG_LEVEL")]
    pub log_level: LogLevel,
}

impl LoggingOptions {
    pub fn init(&self) {
        let builder = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_max_level(self.log_level.as_filter())
            .with_ansi(false)
            .with_target(false);

        match self.log_format {
            LogFormat::Text => {
                let _ = builder.try_init();
            }
            LogFormat::Json => {
                let _ = builder.json().try_init();
            }
        }
    }
}
