use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod agent;
pub mod character;
pub mod clients;
pub mod history;
pub mod knowledge;
pub mod loaders;
pub mod stores;

pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deskbot=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
