use serde::Deserialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggerFormat {
    Pretty,
    Json,
    #[default]
    Compact,
}

pub fn init_logger(level: &str, format: LoggerFormat) {
    let filter = EnvFilter::new(level);
    let stdio_layer = match format {
        LoggerFormat::Pretty => fmt::Layer::default().pretty().boxed(),
        LoggerFormat::Json => fmt::Layer::default().json().boxed(),
        LoggerFormat::Compact => fmt::Layer::default().compact().boxed(),
    }
    .with_filter(filter);

    Registry::default().with(stdio_layer).init();
}
