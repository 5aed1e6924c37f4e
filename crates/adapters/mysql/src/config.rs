//! MySQL 连接配置

use std::time::Duration;

use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use txguard_common::DEFAULT_SLOW_QUERY_THRESHOLD;
use txguard_config::DatabaseConfig;

/// 对应连接串参数 `ssl-mode`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MySqlSslMode {
    Disabled,
    #[default]
    Preferred,
    Required,
    VerifyCa,
    VerifyIdentity,
}

impl MySqlSslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MySqlSslMode::Disabled => "DISABLED",
            MySqlSslMode::Preferred => "PREFERRED",
            MySqlSslMode::Required => "REQUIRED",
            MySqlSslMode::VerifyCa => "VERIFY_CA",
            MySqlSslMode::VerifyIdentity => "VERIFY_IDENTITY",
        }
    }
}

/// MySQL 配置
#[derive(Debug, Clone)]
pub struct MySqlConfig {
    pub url: Secret<String>,
    pub ssl_mode: Option<MySqlSslMode>,
    pub charset: Option<String>,
    pub pool_min: u32,
    pub pool_max: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Option<Duration>,
    /// 超过该耗时的语句输出慢查询日志，`None` 时关闭
    pub slow_query_threshold: Option<Duration>,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            url: Secret::new(String::new()),
            ssl_mode: None,
            charset: None,
            pool_min: 1,
            pool_max: 25,
            acquire_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Some(Duration::from_secs(1800)),
            slow_query_threshold: Some(DEFAULT_SLOW_QUERY_THRESHOLD),
        }
    }
}

impl MySqlConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Secret::new(url.into()),
            ..Default::default()
        }
    }

    pub fn with_ssl_mode(mut self, mode: MySqlSslMode) -> Self {
        self.ssl_mode = Some(mode);
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
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

    pub fn connection_url(&self) -> Secret<String> {
        let mut url = self.url.expose_secret().clone();
        let mut params = Vec::new();

        if let Some(mode) = self.ssl_mode {
            params.push(format!("ssl-mode={}", mode.as_str()));
        }
        if let Some(ref charset) = self.charset {
            params.push(format!("charset={}", charset));
        }

        if !params.is_empty() {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&params.join("&"));
        }

        Secret::new(url)
    }
}

impl From<&DatabaseConfig> for MySqlConfig {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_url() {
        let config = MySqlConfig::new("mysql://root:pw@localhost:3306/shop")
            .with_ssl_mode(MySqlSslMode::VerifyIdentity)
            .with_charset("utf8mb4");

        assert_eq!(
            config.connection_url().expose_secret(),
            "mysql://root:pw@localhost:3306/shop?ssl-mode=VERIFY_IDENTITY&charset=utf8mb4"
        );
    }

    #[test]
    fn test_connection_url_unchanged_without_params() {
        let config = MySqlConfig::new("mysql://localhost/shop?timezone=%2B00:00");
        assert_eq!(
            config.connection_url().expose_secret(),
            "mysql://localhost/shop?timezone=%2B00:00"
        );
    }

    #[test]
    fn test_ssl_mode_serde() {
        let mode: MySqlSslMode = serde_json::from_str("\"VERIFY_CA\"").unwrap();
        assert_eq!(mode, MySqlSslMode::VerifyCa);
        assert_eq!(MySqlSslMode::default().as_str(), "PREFERRED");
    }

    #[test]
    fn test_from_database_config() {
        let db = DatabaseConfig {
            driver: txguard_ports::Driver::MySql,
            url: Secret::new("mysql://localhost/shop".to_string()),
            max_connections: 8,
            min_connections: 2,
            acquire_timeout_secs: 5,
            idle_timeout_secs: 120,
            max_lifetime_secs: 900,
            slow_query_threshold_ms: 0,
        };

        let config = MySqlConfig::from(&db);
        assert_eq!((config.pool_min, config.pool_max), (2, 8));
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.max_lifetime, Some(Duration::from_secs(900)));
        assert_eq!(config.slow_query_threshold, None);

        let tuned = MySqlConfig::new("mysql://localhost/shop")
            .with_slow_query_threshold(Some(Duration::from_millis(250)));
        assert_eq!(tuned.slow_query_threshold, Some(Duration::from_millis(250)));
    }
}
