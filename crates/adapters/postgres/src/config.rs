//! PostgreSQL 连接配置

use std::time::Duration;

use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use txguard_common::DEFAULT_SLOW_QUERY_THRESHOLD;
use txguard_config::DatabaseConfig;

/// SSL 模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    /// 服务器支持时使用 SSL
    #[default]
    Prefer,
    Require,
    /// 验证 CA 证书
    VerifyCa,
    /// 验证完整证书链
    VerifyFull,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

/// PostgreSQL 配置
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: Secret<String>,
    /// `None` 时沿用连接串中的设置
    pub ssl_mode: Option<SslMode>,
    pub application_name: Option<String>,
    /// 连接的 search_path
    pub schema: Option<String>,
    pub pool_min: u32,
    pub pool_max: u32,
    /// 获取连接超时
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    /// 连接最大生命周期
    pub max_lifetime: Option<Duration>,
    /// 超过该耗时的语句输出慢查询日志，`None` 时关闭
    pub slow_query_threshold: Option<Duration>,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: Secret::new(String::new()),
            ssl_mode: None,
            application_name: None,
            schema: None,
            pool_min: 1,
            pool_max: 25,
            acquire_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Some(Duration::from_secs(1800)),
            slow_query_threshold: Some(DEFAULT_SLOW_QUERY_THRESHOLD),
        }
    }
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Secret::new(url.into()),
            ..Default::default()
        }
    }

    pub fn with_ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = Some(mode);
        self
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_slow_query_threshold(mut self, threshold: Option<Duration>) -> Self {
        self.slow_query_threshold = threshold;
        self
    }

    pub fn with_pool(mut self, min: u32, max: u32) -> Self {
        self.pool_min = min;
        self.pool_max = max;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// 追加 SSL、应用名和 search_path 参数后的连接串
    pub fn connection_url(&self) -> Secret<String> {
        let mut url = self.url.expose_secret().clone();
        let mut params = Vec::new();

        if let Some(mode) = self.ssl_mode {
            params.push(format!("sslmode={}", mode.as_str()));
        }
        if let Some(ref app_name) = self.application_name {
            params.push(format!("application_name={}", app_name));
        }
        if let Some(ref schema) = self.schema {
            params.push(format!("options=-c%20search_path%3D{}", schema));
        }

        if !params.is_empty() {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&params.join("&"));
        }

        Secret::new(url)
    }
}

impl From<&DatabaseConfig> for PostgresConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            url: config.url.clone(),
            pool_min: config.min_connections,
            pool_max: config.max_connections,
            acquire_timeout: config.acquire_timeout(),
            idle_timeout: config.idle_timeout(),
            max_lifetime: config.max_lifetime(),
            slow_query_threshold: config.slow_query_threshold(),
            ..Default::default()
        }
    }
}
