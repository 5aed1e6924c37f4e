//! 错误分类器
//!
//! 沿 `source()` 链查找可识别的错误：上下文取消 / 超时优先于任何驱动错误，
//! 其次是 sqlx 错误、带厂商错误码的驱动错误和 IO 错误，都无法识别时为 `Internal`。

use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use std::io;

use crate::kind::ErrorKind;
use crate::{ClassifiedError, ContextError, DbError, mysql, postgres};

/// 厂商错误码
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VendorCode {
    /// PostgreSQL 五位 SQLSTATE
    SqlState(String),
    /// MySQL 数字错误号
    MySql(u16),
}

impl VendorCode {
    /// 查表得到错误类别
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SqlState(code) => postgres::classify_sqlstate(code),
            Self::MySql(number) => mysql::classify_mysql(*number),
        }
    }
}

impl fmt::Display for VendorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SqlState(code) => write!(f, "SQLSTATE {code}"),
            Self::MySql(number) => write!(f, "MySQL error {number}"),
        }
    }
}

/// 能提供厂商错误码的驱动错误
pub trait VendorError {
    fn vendor_code(&self) -> Option<VendorCode>;
}

/// 通用驱动错误载体
///
/// 非 sqlx 驱动把错误码和消息放进这里即可参与分类
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    pub code: VendorCode,
    pub message: String,
}

impl DriverError {
    pub fn new(code: VendorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn sqlstate(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(VendorCode::SqlState(code.into()), message)
    }

    pub fn mysql(number: u16, message: impl Into<String>) -> Self {
        Self::new(VendorCode::MySql(number), message)
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl Error for DriverError {}

impl VendorError for DriverError {
    fn vendor_code(&self) -> Option<VendorCode> {
        Some(self.code.clone())
    }
}

impl VendorError for sqlx::Error {
    fn vendor_code(&self) -> Option<VendorCode> {
        let sqlx::Error::Database(db_err) = self else {
            return None;
        };

        if let Some(mysql_err) = db_err.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>() {
            return Some(VendorCode::MySql(mysql_err.number()));
        }

        db_err
            .code()
            .map(|code: Cow<'_, str>| VendorCode::SqlState(code.into_owned()))
    }
}

/// 对任意错误分类
pub fn classify(err: &(dyn Error + 'static)) -> ErrorKind {
    if let Some(kind) = classified_kind(err) {
        return kind;
    }

    // 上下文终止优先：驱动在取消时往往报出连接错误
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(ctx_err) = e.downcast_ref::<ContextError>() {
            return match ctx_err {
                ContextError::Cancelled => ErrorKind::Cancelled,
                ContextError::DeadlineExceeded => ErrorKind::Timeout,
            };
        }
        if e.is::<tokio::time::error::Elapsed>() {
            return ErrorKind::Timeout;
        }
        current = e.source();
    }

    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(kind) = classified_kind(e) {
            return kind;
        }
        if let Some(sqlx_err) = e.downcast_ref::<sqlx::Error>() {
            return classify_sqlx(sqlx_err);
        }
        if let Some(driver_err) = e.downcast_ref::<DriverError>() {
            return driver_err.code.kind();
        }
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return classify_io(io_err);
        }
        current = e.source();
    }

    ErrorKind::Internal
}

fn classified_kind(err: &(dyn Error + 'static)) -> Option<ErrorKind> {
    if let Some(db_err) = err.downcast_ref::<DbError>() {
        return Some(db_err.kind());
    }
    err.downcast_ref::<ClassifiedError>().map(ClassifiedError::kind)
}

/// 对 sqlx 错误分类
pub fn classify_sqlx(err: &sqlx::Error) -> ErrorKind {
    match err {
        sqlx::Error::RowNotFound => ErrorKind::NotFound,
        sqlx::Error::PoolTimedOut => ErrorKind::Timeout,
        sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed | sqlx::Error::Tls(_) => {
            ErrorKind::Unavailable
        }
        sqlx::Error::Io(io_err) => match io_err.kind() {
            io::ErrorKind::TimedOut => ErrorKind::Timeout,
            _ => ErrorKind::Unavailable,
        },
        sqlx::Error::Database(_) => err
            .vendor_code()
            .map(|code| code.kind())
            .unwrap_or(ErrorKind::Internal),
        sqlx::Error::Configuration(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::TypeNotFound { .. } => ErrorKind::InvalidArgument,
        _ => ErrorKind::Internal,
    }
}

/// 对 IO 错误分类
pub fn classify_io(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::Timeout,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::UnexpectedEof => ErrorKind::Unavailable,
        io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => ErrorKind::InvalidArgument,
        io::ErrorKind::Interrupted => ErrorKind::Cancelled,
        _ => ErrorKind::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConflictKind;

    #[derive(Debug)]
    struct Wrapper {
        inner: Box<dyn Error + Send + Sync>,
    }

    impl fmt::Display for Wrapper {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("repository failure")
        }
    }

    impl Error for Wrapper {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(self.inner.as_ref())
        }
    }

    fn wrap(inner: impl Error + Send + Sync + 'static) -> Wrapper {
        Wrapper {
            inner: Box::new(inner),
        }
    }

    #[test]
    fn test_driver_error_lookup() {
        assert_eq!(
            classify(&DriverError::sqlstate("40P01", "deadlock detected")),
            ErrorKind::Conflict(ConflictKind::Deadlock)
        );
        assert_eq!(
            classify(&DriverError::mysql(1062, "Duplicate entry")),
            ErrorKind::AlreadyExists
        );
    }

    #[test]
    fn test_walks_source_chain() {
        let err = wrap(wrap(DriverError::sqlstate("23505", "duplicate key")));
        assert_eq!(classify(&err), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_context_error_wins_over_driver_error() {
        // 外层是连接错误，内层是上下文取消
        let err = wrap(ClassifiedError::with_cause(
            ErrorKind::Unavailable,
            "connection closed",
            ContextError::Cancelled,
        ));
        assert_eq!(classify(&err), ErrorKind::Cancelled);

        let err = wrap(wrap(ContextError::DeadlineExceeded));
        assert_eq!(classify(&err), ErrorKind::Timeout);
    }

    #[test]
    fn test_top_level_classified_error_keeps_kind() {
        let err = ClassifiedError::with_cause(
            ErrorKind::Unavailable,
            "connection closed",
            ContextError::Cancelled,
        );
        assert_eq!(classify(&err), ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn test_elapsed_is_timeout() {
        let elapsed = tokio::time::timeout(
            std::time::Duration::from_millis(1),
            std::future::pending::<()>(),
        )
        .await
        .unwrap_err();
        assert_eq!(classify(&wrap(elapsed)), ErrorKind::Timeout);
    }

    #[test]
    fn test_sqlx_errors() {
        assert_eq!(classify_sqlx(&sqlx::Error::RowNotFound), ErrorKind::NotFound);
        assert_eq!(classify_sqlx(&sqlx::Error::PoolTimedOut), ErrorKind::Timeout);
        assert_eq!(classify_sqlx(&sqlx::Error::PoolClosed), ErrorKind::Unavailable);
        assert_eq!(
            classify_sqlx(&sqlx::Error::Io(io::Error::from(io::ErrorKind::ConnectionReset))),
            ErrorKind::Unavailable
        );
        assert_eq!(
            classify_sqlx(&sqlx::Error::ColumnNotFound("email".into())),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            classify_sqlx(&sqlx::Error::Protocol("unexpected message".into())),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_io_errors() {
        assert_eq!(
            classify(&io::Error::from(io::ErrorKind::TimedOut)),
            ErrorKind::Timeout
        );
        assert_eq!(
            classify(&io::Error::from(io::ErrorKind::ConnectionRefused)),
            ErrorKind::Unavailable
        );
    }

    #[test]
    fn test_unknown_error_is_internal() {
        let err = wrap(fmt::Error);
        assert_eq!(classify(&err), ErrorKind::Internal);
    }
}
