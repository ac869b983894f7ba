use std::sync::Arc;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{reload, EnvFilter};

/// Callback that swaps the active log filter at runtime.
pub type ReloadHandle = Arc<dyn Fn(EnvFilter) -> Result<(), String> + Send + Sync>;

fn wrap_handle<S>(handle: reload::Handle<EnvFilter, S>) -> ReloadHandle
where
    S: 'static,
{
    Arc::new(move |filter| {
        handle
            .reload(filter)
            .map_err(|e| format!("reload failed: {e}"))
    })
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. The JSON and plain formats
/// produce different subscriber types, so each branch builds its own reload
/// layer and hands back a type-erased handle.
pub fn install_tracing_from_config(cfg: &paperflow_config::LoggingConfig) -> ReloadHandle {
    let directives = std::env::var("RUST_LOG").unwrap_or_else(|_| cfg.level.clone());

    if cfg.json {
        let (reload_layer, handle) = reload::Layer::new(EnvFilter::new(&directives));
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::new(&directives))
            .with_max_level(tracing::Level::TRACE)
            .with_timer(ChronoUtc::rfc_3339())
            .finish()
            .with(reload_layer)
            .init();
        wrap_handle(handle)
    } else {
        let (reload_layer, handle) = reload::Layer::new(EnvFilter::new(&directives));
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(&directives))
            .with_max_level(tracing::Level::TRACE)
            .finish()
            .with(reload_layer)
            .init();
        wrap_handle(handle)
    }
}
