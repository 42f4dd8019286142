use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialize the logging façade: console always, plus a rolling file sink
/// when a log directory is configured. The returned guard must be held for
/// the process lifetime or buffered file output is lost on exit.
pub fn init(log_dir: Option<&str>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::from_default_env().add_directive("gnm=info".parse()?);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "gnm-collector.log");
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(file_writer)
                        .with_ansi(false),
                )
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
            Ok(None)
        }
    }
}
