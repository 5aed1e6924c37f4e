//! txguard-errors - 数据库错误分类
//!
//! 把驱动相关的原始错误归入稳定的 [`ErrorKind`] 分类，调用方只按类别决策，
//! 不依赖具体驱动的错误类型。对外错误输出遵循 RFC 7807 Problem Details。

mod classify;
mod kind;
pub mod mysql;
pub mod postgres;

use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use classify::{DriverError, VendorCode, VendorError, classify, classify_io, classify_sqlx};
pub use kind::{ConflictKind, ErrorKind};

/// 类型擦除的底层错误
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// 已分类的错误
///
/// 创建后不再修改，`source()` 返回原始错误供调用方检查
#[derive(Debug)]
pub struct ClassifiedError {
    kind: ErrorKind,
    message: String,
    cause: Option<BoxError>,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// 附带原始错误，类别由调用方指定
    pub fn with_cause(kind: ErrorKind, message: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    /// 对原始错误分类并包装
    pub fn from_source<E>(message: impl Into<String>, err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let kind = classify(&err);
        Self::with_cause(kind, message, err)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl StdError for ClassifiedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// 上下文终止原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// 所有组件统一返回的错误类型
#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Classified(#[from] ClassifiedError),

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: ClassifiedError,
    },

    /// 断路器拒绝了调用，未访问数据库
    ///
    /// `kind()` 为 `Unavailable` 以便映射 HTTP 503 / gRPC UNAVAILABLE，
    /// 但 `is_retryable()` 为 false：立即重试只会再次被拒绝，
    /// 应等待重置时间后再试。用 [`DbError::is_circuit_open`] 区分。
    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("invalid savepoint name {name:?}: {reason}")]
    InvalidSavepointName { name: String, reason: &'static str },
}

impl DbError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self::Classified(ClassifiedError::new(kind, msg))
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, msg)
    }

    pub fn conflict(kind: ConflictKind, msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict(kind), msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, msg)
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, msg)
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, msg)
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, msg)
    }

    /// 分类任意错误并附加说明
    pub fn wrap<E>(err: E, msg: impl Into<String>) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Classified(ClassifiedError::from_source(msg, err))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Classified(e) => e.kind(),
            Self::RetriesExhausted { last, .. } => last.kind(),
            Self::CircuitOpen => ErrorKind::Unavailable,
            Self::InvalidSavepointName { .. } => ErrorKind::InvalidArgument,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            // 重试预算已用完或断路器打开时不应再被外层重试
            Self::RetriesExhausted { .. } | Self::CircuitOpen => false,
            other => other.kind().is_retryable(),
        }
    }

    /// 是否被断路器拒绝
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_unique_violation(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict(_))
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    /// 失败前的尝试次数，仅 `RetriesExhausted` 有值
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetriesExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// 转换为 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        self.kind().http_status()
    }

    /// 转换为 gRPC 状态码
    pub fn grpc_code(&self) -> tonic::Code {
        self.kind().grpc_code()
    }

    /// 转换为 Problem Details
    pub fn to_problem_details(&self) -> ProblemDetails {
        let kind = self.kind();
        ProblemDetails {
            r#type: format!("urn:txguard:problem:{}", kind.problem_slug()),
            title: kind.problem_title().to_string(),
            status: kind.http_status(),
            detail: self.to_string(),
            instance: None,
        }
    }
}

impl From<ContextError> for DbError {
    fn from(err: ContextError) -> Self {
        let kind = match err {
            ContextError::Cancelled => ErrorKind::Cancelled,
            ContextError::DeadlineExceeded => ErrorKind::Timeout,
        };
        Self::Classified(ClassifiedError::with_cause(kind, "context done", err))
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        let kind = classify_sqlx(&err);
        Self::Classified(ClassifiedError::with_cause(kind, "database error", err))
    }
}

impl From<DbError> for tonic::Status {
    fn from(err: DbError) -> Self {
        tonic::Status::new(err.grpc_code(), err.to_string())
    }
}

/// RFC 7807 Problem Details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// Result 类型别名
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_of_variants() {
        assert_eq!(DbError::not_found("user").kind(), ErrorKind::NotFound);
        assert_eq!(DbError::CircuitOpen.kind(), ErrorKind::Unavailable);
        assert_eq!(
            DbError::InvalidSavepointName {
                name: "1x".into(),
                reason: "must not start with a digit",
            }
            .kind(),
            ErrorKind::InvalidArgument
        );

        let exhausted = DbError::RetriesExhausted {
            attempts: 3,
            last: ClassifiedError::new(ErrorKind::Conflict(ConflictKind::Deadlock), "deadlock"),
        };
        assert_eq!(exhausted.kind(), ErrorKind::Conflict(ConflictKind::Deadlock));
        assert_eq!(exhausted.attempts(), Some(3));
        assert!(exhausted.is_conflict());
        assert!(!exhausted.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = DbError::timeout("ping");
        assert_eq!(err.to_string(), "TIMEOUT: ping");

        let exhausted = DbError::RetriesExhausted {
            attempts: 2,
            last: ClassifiedError::new(ErrorKind::Unavailable, "connection refused"),
        };
        assert_eq!(
            exhausted.to_string(),
            "retries exhausted after 2 attempts: UNAVAILABLE: connection refused"
        );
    }

    #[test]
    fn test_wrap_keeps_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out");
        let err = DbError::wrap(io, "fetch orders");

        assert_eq!(err.kind(), ErrorKind::Timeout);
        let source = err.source().expect("cause");
        assert_eq!(source.to_string(), "read timed out");
    }

    #[test]
    fn test_wrap_preserves_existing_kind() {
        let inner = DbError::conflict(ConflictKind::Serialization, "40001");
        let err = DbError::wrap(inner, "transfer");
        assert_eq!(err.kind(), ErrorKind::Conflict(ConflictKind::Serialization));
    }

    #[test]
    fn test_context_error_conversion() {
        assert!(DbError::from(ContextError::Cancelled).is_cancelled());
        assert!(DbError::from(ContextError::DeadlineExceeded).is_timeout());
    }

    #[test]
    fn test_sqlx_conversion() {
        let err = DbError::from(sqlx::Error::RowNotFound);
        assert!(err.is_not_found());
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_problem_details() {
        let problem = DbError::already_exists("email taken").to_problem_details();
        assert_eq!(problem.status, 409);
        assert_eq!(problem.r#type, "urn:txguard:problem:already-exists");
        assert_eq!(problem.title, "Resource Already Exists");
        assert!(problem.detail.contains("email taken"));

        let json = serde_json::to_value(&problem).unwrap();
        assert!(json.get("instance").is_none());
    }

    #[test]
    fn test_circuit_open_is_unavailable_but_not_retryable() {
        let err = DbError::CircuitOpen;
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert!(err.kind().is_retryable());
        assert!(!err.is_retryable());
        assert!(err.is_circuit_open());
        assert!(!DbError::unavailable("connection refused").is_circuit_open());
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn test_grpc_status() {
        let status: tonic::Status = DbError::CircuitOpen.into();
        assert_eq!(status.code(), tonic::Code::Unavailable);
        assert_eq!(status.message(), "circuit breaker is open");
    }
}
