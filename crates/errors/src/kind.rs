//! 错误分类枚举
//!
//! 与驱动无关的数据库错误类别，调用方只根据类别决定业务逻辑

use std::fmt;

use serde::{Deserialize, Serialize};

/// 冲突类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// 死锁
    Deadlock,
    /// 串行化失败
    Serialization,
}

/// 数据库错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Conflict(ConflictKind),
    Timeout,
    Unavailable,
    InvalidArgument,
    PermissionDenied,
    Internal,
    Cancelled,
}

impl ErrorKind {
    /// 稳定的字符串表示
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::Conflict(_) => "CONFLICT",
            Self::Timeout => "TIMEOUT",
            Self::Unavailable => "UNAVAILABLE",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::Internal => "INTERNAL",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// 是否为可重试的瞬时错误
    ///
    /// 只有冲突（死锁 / 串行化失败）、不可用和超时会被重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Unavailable | Self::Timeout)
    }

    /// 转换为 HTTP 状态码
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidArgument => 400,
            Self::PermissionDenied => 403,
            Self::NotFound => 404,
            Self::Timeout => 408,
            Self::AlreadyExists | Self::Conflict(_) => 409,
            Self::Cancelled => 499,
            Self::Internal => 500,
            Self::Unavailable => 503,
        }
    }

    /// 转换为 gRPC 状态码
    pub fn grpc_code(&self) -> tonic::Code {
        match self {
            Self::NotFound => tonic::Code::NotFound,
            Self::AlreadyExists => tonic::Code::AlreadyExists,
            Self::Conflict(_) => tonic::Code::Aborted,
            Self::Timeout => tonic::Code::DeadlineExceeded,
            Self::Unavailable => tonic::Code::Unavailable,
            Self::InvalidArgument => tonic::Code::InvalidArgument,
            Self::PermissionDenied => tonic::Code::PermissionDenied,
            Self::Internal => tonic::Code::Internal,
            Self::Cancelled => tonic::Code::Cancelled,
        }
    }

    pub(crate) fn problem_slug(&self) -> &'static str {
        match self {
            Self::NotFound => "not-found",
            Self::AlreadyExists => "already-exists",
            Self::Conflict(ConflictKind::Deadlock) => "deadlock",
            Self::Conflict(ConflictKind::Serialization) => "serialization-failure",
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::InvalidArgument => "invalid-argument",
            Self::PermissionDenied => "permission-denied",
            Self::Internal => "internal",
            Self::Cancelled => "cancelled",
        }
    }

    pub(crate) fn problem_title(&self) -> &'static str {
        match self {
            Self::NotFound => "Resource Not Found",
            Self::AlreadyExists => "Resource Already Exists",
            Self::Conflict(_) => "Concurrent Modification Conflict",
            Self::Timeout => "Operation Timed Out",
            Self::Unavailable => "Database Unavailable",
            Self::InvalidArgument => "Invalid Argument",
            Self::PermissionDenied => "Permission Denied",
            Self::Internal => "Internal Database Error",
            Self::Cancelled => "Operation Cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict(ConflictKind::Deadlock) => f.write_str("CONFLICT(deadlock)"),
            Self::Conflict(ConflictKind::Serialization) => f.write_str("CONFLICT(serialization)"),
            other => f.write_str(other.as_str()),
        }
    }
}
