//! 断路器
//!
//! Closed -> Open -> HalfOpen 状态转换。连续失败达到阈值后打开，
//! 超过重置时间后的下一次调用作为探测请求进入 HalfOpen，
//! 探测成功关闭、失败重新打开。HalfOpen 期间同一时刻只放行一个探测请求。

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use txguard_errors::{DbError, DbResult};

/// 断路器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    fn gauge_value(&self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::Open => 1.0,
            Self::HalfOpen => 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// 连续失败多少次后打开
    pub max_failures: u32,
    /// 打开后多久允许探测
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    probe_in_flight: bool,
}

/// 断路器，克隆后共享同一份状态
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    state: Arc<Mutex<BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                probe_in_flight: false,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// 执行受保护的操作，任何错误都计为失败
    ///
    /// 断路器打开时直接返回 [`DbError::CircuitOpen`]，不调用 `op`
    pub async fn execute<F, Fut, T>(&self, op: F) -> DbResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        self.execute_if(|_| true, op).await
    }

    /// 执行受保护的操作，只有 `is_failure` 返回 true 的错误计为失败
    ///
    /// 其余错误不改变计数和状态，只释放探测名额
    pub async fn execute_if<P, F, Fut, T>(&self, is_failure: P, op: F) -> DbResult<T>
    where
        P: FnOnce(&DbError) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let probe = self.admit()?;
        let mut guard = CallGuard {
            breaker: self,
            probe,
            recorded: false,
        };

        let result = op().await;
        guard.recorded = true;
        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(e) if is_failure(e) => Outcome::Failure,
            Err(_) => Outcome::Neutral,
        };
        self.record_result(outcome, probe);
        result
    }

    /// 强制关闭并清零失败计数
    pub fn reset(&self) {
        let mut state = self.lock();
        let from = state.state;
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.last_failure_at = None;
        state.probe_in_flight = false;
        drop(state);

        if from != CircuitState::Closed {
            self.transitioned(from, CircuitState::Closed);
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // 锁内没有可能 panic 的逻辑，中毒时状态仍然一致
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 返回本次调用是否为 HalfOpen 探测
    fn admit(&self) -> DbResult<bool> {
        let mut state = self.lock();

        match state.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let expired = state
                    .last_failure_at
                    .is_none_or(|at| at.elapsed() > self.config.reset_timeout);
                if !expired {
                    drop(state);
                    self.rejected();
                    return Err(DbError::CircuitOpen);
                }
                state.state = CircuitState::HalfOpen;
                state.probe_in_flight = true;
                drop(state);
                self.transitioned(CircuitState::Open, CircuitState::HalfOpen);
                Ok(true)
            }
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    drop(state);
                    self.rejected();
                    return Err(DbError::CircuitOpen);
                }
                state.probe_in_flight = true;
                Ok(true)
            }
        }
    }

    fn record_result(&self, outcome: Outcome, probe: bool) {
        let mut state = self.lock();
        if probe {
            state.probe_in_flight = false;
        }

        let from = state.state;
        // 非探测调用在 Closed 时放行，状态变化后才完成的结果作废
        if outcome == Outcome::Neutral || (!probe && from != CircuitState::Closed) {
            return;
        }

        if outcome == Outcome::Success {
            state.failure_count = 0;
            if from == CircuitState::HalfOpen {
                state.state = CircuitState::Closed;
                state.last_failure_at = None;
            }
        } else {
            state.failure_count = state.failure_count.saturating_add(1);
            state.last_failure_at = Some(Instant::now());
            match from {
                CircuitState::Closed if state.failure_count >= self.config.max_failures => {
                    state.state = CircuitState::Open;
                }
                CircuitState::HalfOpen => state.state = CircuitState::Open,
                _ => {}
            }
        }

        let to = state.state;
        let failures = state.failure_count;
        drop(state);

        if from != to {
            if to == CircuitState::Open {
                tracing::warn!(
                    breaker = %self.name,
                    failures,
                    reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                    "Circuit breaker transitioned to OPEN"
                );
            }
            self.transitioned(from, to);
        }
    }

    fn transitioned(&self, from: CircuitState, to: CircuitState) {
        tracing::info!(
            breaker = %self.name,
            from = from.as_str(),
            to = to.as_str(),
            "Circuit breaker state changed"
        );
        counter!(
            "txguard_circuit_breaker_transitions_total",
            "breaker" => self.name.to_string(),
            "to" => to.as_str()
        )
        .increment(1);
        gauge!("txguard_circuit_breaker_state", "breaker" => self.name.to_string())
            .set(to.gauge_value());
    }

    fn rejected(&self) {
        tracing::debug!(breaker = %self.name, "Circuit breaker rejected call");
        counter!(
            "txguard_circuit_breaker_rejections_total",
            "breaker" => self.name.to_string()
        )
        .increment(1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    Neutral,
}

/// 操作 future 被丢弃时释放探测名额，避免 HalfOpen 永久占用
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    recorded: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if self.probe && !self.recorded {
            self.breaker.lock().probe_in_flight = false;
        }
    }
}
