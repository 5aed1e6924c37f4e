//! txguard-common - 重试退避、断路器与语句耗时观测

pub mod circuit_breaker;
pub mod query_observer;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use query_observer::{DEFAULT_SLOW_QUERY_THRESHOLD, QueryObserver};
pub use retry::{JITTER_FRACTION, RetryConfig, next_delay, with_retry};
