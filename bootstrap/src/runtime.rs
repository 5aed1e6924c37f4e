//! 运行时初始化与关闭信号

use tracing::{info, warn};
use txguard_config::TxGuardConfig;
use txguard_core::Context;
use txguard_telemetry::TelemetryError;

/// 按配置初始化日志
pub fn init_runtime(config: &TxGuardConfig) -> Result<(), TelemetryError> {
    txguard_telemetry::init(&config.telemetry)?;

    info!(
        app_name = %config.app_name,
        app_env = %config.app_env,
        "Runtime initialized"
    );
    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM，然后取消 `ctx`
pub async fn cancel_on_shutdown_signal(ctx: Context) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = ctx.done() => return,
    }

    info!("Shutdown signal received");
    ctx.cancel();
}
