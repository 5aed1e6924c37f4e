//! 基础设施资源管理
//!
//! 按配置创建连接池、事务协调器和健康检查缓存，并负责按顺序关闭

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use txguard_adapter_mysql::{MySqlConfig, MySqlDatabase};
use txguard_adapter_postgres::{PostgresConfig, PostgresDatabase};
use txguard_common::CircuitBreaker;
use txguard_config::{ConfigError, TxGuardConfig};
use txguard_core::{Context, HealthCache, TransactionCoordinator};
use txguard_errors::DbError;
use txguard_ports::{Database, Driver};
use txguard_telemetry::TelemetryError;

use crate::runtime::init_runtime;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error(transparent)]
    Database(#[from] DbError),
}

/// 基础设施资源容器
pub struct Infrastructure {
    config: TxGuardConfig,
    database: Arc<dyn Database>,
    coordinator: Arc<TransactionCoordinator>,
    health: Arc<HealthCache>,
    /// 后台任务的根上下文，关闭时取消
    context: Context,
    health_task: Option<JoinHandle<()>>,
}

impl Infrastructure {
    /// 加载配置、初始化日志并连接数据库
    pub async fn start(config_dir: &str) -> Result<Self, BootstrapError> {
        let config = TxGuardConfig::load(config_dir)?;
        init_runtime(&config)?;
        Self::from_config(config).await
    }

    /// 按 `database.driver` 连接数据库，建连失败按重试配置重试
    pub async fn from_config(config: TxGuardConfig) -> Result<Self, BootstrapError> {
        config.validate()?;

        let db = &config.database;
        let retry = config.retry_config();
        info!(
            driver = %db.driver,
            url = %db.masked_url(),
            "Connecting to database"
        );

        let database: Arc<dyn Database> = match db.driver {
            Driver::Postgres => {
                Arc::new(PostgresDatabase::connect(&PostgresConfig::from(db), &retry).await?)
            }
            Driver::MySql => Arc::new(MySqlDatabase::connect(&MySqlConfig::from(db), &retry).await?),
        };

        Ok(Self::with_database(config, database))
    }

    /// 使用已创建的数据库组装其余组件
    ///
    /// 配置了检查间隔时会启动后台健康检查，需要在 tokio 运行时中调用
    pub fn with_database(config: TxGuardConfig, database: Arc<dyn Database>) -> Self {
        let mut coordinator = TransactionCoordinator::new(database.clone(), config.retry_config());
        if let Some(breaker_config) = config.circuit_breaker_config() {
            coordinator = coordinator.with_circuit_breaker(CircuitBreaker::new("database", breaker_config));
        }

        let health = Arc::new(HealthCache::new(database.clone(), config.health_config()));
        let context = Context::background();
        let health_task = config
            .health
            .check_interval()
            .map(|interval| health.clone().spawn_background(interval, context.child()));

        info!(
            driver = %database.driver(),
            circuit_breaker = coordinator.circuit_breaker().is_some(),
            background_health = health_task.is_some(),
            "Infrastructure initialized"
        );

        Self {
            config,
            database,
            coordinator: Arc::new(coordinator),
            health,
            context,
            health_task,
        }
    }

    pub fn config(&self) -> &TxGuardConfig {
        &self.config
    }

    pub fn database(&self) -> Arc<dyn Database> {
        self.database.clone()
    }

    pub fn coordinator(&self) -> Arc<TransactionCoordinator> {
        self.coordinator.clone()
    }

    pub fn health(&self) -> Arc<HealthCache> {
        self.health.clone()
    }

    /// 后台任务使用的根上下文
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// 停止后台任务并关闭连接池，超时后放弃等待
    pub async fn shutdown(self, timeout: Duration) {
        info!("Shutting down infrastructure");
        self.context.cancel();

        if let Some(task) = self.health_task {
            if let Err(e) = task.await {
                warn!(error = %e, "Background health checker terminated abnormally");
            }
        }

        let database = self.database;
        if Context::background()
            .with_timeout(timeout)
            .run(async move { database.close().await })
            .await
            .is_err()
        {
            warn!(timeout_secs = timeout.as_secs(), "Database pool close timed out");
            return;
        }

        info!("Infrastructure shut down");
    }
}
