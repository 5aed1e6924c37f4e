//! txguard-telemetry - 日志与指标初始化

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use txguard_config::TelemetryConfig;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to install tracing subscriber: {0}")]
    Tracing(#[from] tracing_subscriber::util::TryInitError),

    #[error("Failed to install Prometheus recorder: {0}")]
    Metrics(#[from] BuildError),
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

/// 初始化 tracing
pub fn init_tracing(log_level: &str) -> Result<(), TelemetryError> {
    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;
    Ok(())
}

/// 初始化 JSON 格式的 tracing（生产环境）
pub fn init_tracing_json(log_level: &str) -> Result<(), TelemetryError> {
    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()?;
    Ok(())
}

/// 按配置选择日志格式
pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    if config.json {
        init_tracing_json(&config.log_level)
    } else {
        init_tracing(&config.log_level)
    }
}

/// 初始化 Prometheus metrics
pub fn init_metrics() -> Result<PrometheusHandle, TelemetryError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(handle)
}

/// 为 txguard 的指标注册说明
pub fn describe_metrics() {
    describe_counter!(
        "txguard_transactions_total",
        "Finished transactions by outcome"
    );
    describe_counter!(
        "txguard_transaction_retries_total",
        "Transaction attempts that were retried"
    );
    describe_histogram!(
        "txguard_transaction_duration_seconds",
        metrics::Unit::Seconds,
        "Wall time of atomically including retries"
    );
    describe_counter!(
        "txguard_circuit_breaker_transitions_total",
        "Circuit breaker state transitions"
    );
    describe_counter!(
        "txguard_circuit_breaker_rejections_total",
        "Calls rejected by an open circuit breaker"
    );
    describe_gauge!(
        "txguard_circuit_breaker_state",
        "Circuit breaker state (0 closed, 1 open, 2 half-open)"
    );
    describe_histogram!(
        "txguard_query_duration_seconds",
        metrics::Unit::Seconds,
        "Statement execution time by driver and operation"
    );
    describe_counter!("txguard_query_errors_total", "Failed statements");
    describe_counter!(
        "txguard_slow_queries_total",
        "Statements slower than the slow query threshold"
    );
    describe_gauge!("txguard_db_pool_acquired", "Connections in use");
    describe_gauge!("txguard_db_pool_idle", "Idle connections");
    describe_gauge!("txguard_db_pool_total", "Open connections");
    describe_gauge!("txguard_db_pool_max", "Connection pool limit");
    describe_gauge!(
        "txguard_db_health_status",
        "Database health (0 healthy, 1 degraded, 2 unhealthy)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_metrics_renders_help() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            describe_metrics();
            metrics::counter!("txguard_transactions_total", "outcome" => "committed").increment(2);
        });

        let output = handle.render();
        assert!(output.contains("# HELP txguard_transactions_total Finished transactions by outcome"));
        assert!(output.contains("txguard_transactions_total{outcome=\"committed\"} 2"));
    }

    #[test]
    fn test_invalid_level_falls_back() {
        // 非法指令不会 panic，EnvFilter 忽略无法解析的部分
        let _ = env_filter("not a level");
    }
}
