use std::net::SocketAddr;
use std::time::Duration;

use paperflow_config::Config;
use paperflow_engine::{
    EngineConfig, JobType, QueueSettings, RetryPolicy, TimeoutSettings, WorkerSlots,
};

/// Resolve the bind address from the config.
pub fn parse_bind_address(config: &Config) -> Result<SocketAddr, anyhow::Error> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    addr.parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address {addr}: {e}"))
}

/// Translate the file/env configuration into engine tuning knobs.
pub fn engine_config_from_config(config: &Config) -> EngineConfig {
    let mut engine = EngineConfig::default();

    engine.queue = QueueSettings {
        high_watermark: config.queue.high_watermark,
        shed_window: Duration::from_secs(config.queue.shed_window_secs),
        export_per_document: config.queue.export_per_document,
        ai_rate_per_sec: config.queue.ai_rate_per_sec,
        ai_burst: config.queue.ai_burst,
    };
    engine.slots = WorkerSlots {
        convert: config.workers.convert,
        export: config.workers.export,
        ai: config.workers.ai,
    };
    engine.timeouts = TimeoutSettings {
        convert: Duration::from_secs(config.timeouts.convert_secs),
        export: Duration::from_secs(config.timeouts.export_secs),
        ai: Duration::from_secs(config.timeouts.ai_secs),
        liveness: Duration::from_secs(config.timeouts.liveness_secs),
    };

    for (job_type, policy) in [
        (JobType::Convert, &config.retry.convert),
        (JobType::Export, &config.retry.export),
        (JobType::Ai, &config.retry.ai),
    ] {
        engine.retry.insert(
            job_type,
            RetryPolicy {
                base: Duration::from_millis(policy.base_ms),
                cap: Duration::from_millis(policy.cap_ms),
                max_attempts: policy.max_attempts,
            },
        );
    }
    engine.retry_seed = config.retry.seed;

    engine.retention.event_ttl = Duration::from_secs(config.retention.event_ttl_hours * 3600);
    engine.retention.idempotency_ttl =
        Duration::from_secs(config.retention.idempotency_ttl_hours * 3600);
    engine.retention.finished_jobs_cap = config.retention.finished_jobs_cap;
    engine.retention.sweep_interval = Duration::from_secs(config.retention.sweep_interval_secs);

    engine
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_translate_cleanly() {
        let config = Config::default();
        let engine = engine_config_from_config(&config);
        assert_eq!(engine.queue.high_watermark, 100);
        assert_eq!(engine.slots.convert, 2);
        assert_eq!(engine.timeouts.ai, Duration::from_secs(30));
        assert_eq!(
            engine.retry[&JobType::Ai].cap,
            Duration::from_millis(10_000)
        );
        assert_eq!(engine.retention.finished_jobs_cap, 1000);
    }

    #[test]
    fn bind_address_resolves() {
        let config = Config::default();
        let addr = parse_bind_address(&config).unwrap();
        assert_eq!(addr.port(), 7400);
    }
}
