//! MySQL 错误号映射
//!
//! 参考: https://dev.mysql.com/doc/mysql-errors/8.0/en/server-error-reference.html

use crate::kind::{ConflictKind, ErrorKind};

/// 将 MySQL 错误号映射为错误类别，未知错误号为 `Internal`
pub fn classify_mysql(number: u16) -> ErrorKind {
    match number {
        // 连接 / 认证
        1040 => ErrorKind::Unavailable, // ER_CON_COUNT_ERROR
        1042 => ErrorKind::Unavailable, // ER_BAD_HOST_ERROR
        1043 => ErrorKind::Unavailable, // ER_HANDSHAKE_ERROR
        1044 => ErrorKind::PermissionDenied, // ER_DBACCESS_DENIED_ERROR
        1045 => ErrorKind::PermissionDenied, // ER_ACCESS_DENIED_ERROR
        1053 => ErrorKind::Unavailable, // ER_SERVER_SHUTDOWN
        1927 => ErrorKind::Unavailable, // ER_CONNECTION_KILLED
        4031 => ErrorKind::Unavailable, // ER_CLIENT_INTERACTION_TIMEOUT

        // 客户端连接丢失
        2002 | 2003 => ErrorKind::Unavailable, // CR_CONNECTION_ERROR / CR_CONN_HOST_ERROR
        2006 => ErrorKind::Unavailable,        // CR_SERVER_GONE_ERROR
        2013 => ErrorKind::Unavailable,        // CR_SERVER_LOST

        // 数据库 / 表
        1017 => ErrorKind::NotFound,      // ER_FILE_NOT_FOUND
        1049 => ErrorKind::NotFound,      // ER_BAD_DB_ERROR
        1050 => ErrorKind::AlreadyExists, // ER_TABLE_EXISTS_ERROR
        1051 => ErrorKind::NotFound,      // ER_BAD_TABLE_ERROR
        1146 => ErrorKind::NotFound,      // ER_NO_SUCH_TABLE
        1054 => ErrorKind::InvalidArgument, // ER_BAD_FIELD_ERROR
        1060 => ErrorKind::InvalidArgument, // ER_DUP_FIELDNAME
        1061 => ErrorKind::InvalidArgument, // ER_DUP_KEYNAME
        1062 => ErrorKind::AlreadyExists,   // ER_DUP_ENTRY
        1064 => ErrorKind::InvalidArgument, // ER_PARSE_ERROR

        // 约束 / 数据
        1048 => ErrorKind::InvalidArgument, // ER_BAD_NULL_ERROR
        1216 | 1217 => ErrorKind::InvalidArgument, // ER_NO_REFERENCED_ROW / ER_ROW_IS_REFERENCED
        1451 | 1452 => ErrorKind::InvalidArgument, // ER_ROW_IS_REFERENCED_2 / ER_NO_REFERENCED_ROW_2
        1264 => ErrorKind::InvalidArgument, // ER_WARN_DATA_OUT_OF_RANGE
        1366 => ErrorKind::InvalidArgument, // ER_TRUNCATED_WRONG_VALUE_FOR_FIELD
        1406 => ErrorKind::InvalidArgument, // ER_DATA_TOO_LONG

        // 事务
        1205 => ErrorKind::Timeout, // ER_LOCK_WAIT_TIMEOUT
        1213 => ErrorKind::Conflict(ConflictKind::Deadlock), // ER_LOCK_DEADLOCK
        1020 => ErrorKind::Conflict(ConflictKind::Serialization), // ER_CHECKREAD
        3572 => ErrorKind::Timeout, // ER_LOCK_NOWAIT
        1637 => ErrorKind::Unavailable, // ER_TOO_MANY_CONCURRENT_TRXS

        // 资源
        1037 => ErrorKind::Unavailable, // ER_OUTOFMEMORY
        1041 => ErrorKind::Unavailable, // ER_OUT_OF_RESOURCES

        // 超时 / 中断
        1159 | 1161 => ErrorKind::Timeout, // ER_NET_READ_INTERRUPTED / ER_NET_WRITE_INTERRUPTED
        1160 => ErrorKind::Timeout,        // ER_NET_ERROR_ON_WRITE
        3024 => ErrorKind::Timeout,        // ER_QUERY_TIMEOUT
        1317 => ErrorKind::Cancelled,      // ER_QUERY_INTERRUPTED

        // 权限
        1142 => ErrorKind::PermissionDenied, // ER_TABLEACCESS_DENIED_ERROR
        1143 => ErrorKind::PermissionDenied, // ER_COLUMNACCESS_DENIED_ERROR
        1227 => ErrorKind::PermissionDenied, // ER_SPECIFIC_ACCESS_DENIED_ERROR

        _ => ErrorKind::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_entry() {
        assert_eq!(classify_mysql(1062), ErrorKind::AlreadyExists);
        assert_eq!(classify_mysql(1050), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_lock_errors() {
        assert_eq!(
            classify_mysql(1213),
            ErrorKind::Conflict(ConflictKind::Deadlock)
        );
        assert_eq!(classify_mysql(1205), ErrorKind::Timeout);
    }

    #[test]
    fn test_connection_errors() {
        for number in [1040, 1042, 1043, 2002, 2003, 2006, 2013] {
            assert_eq!(classify_mysql(number), ErrorKind::Unavailable, "{number}");
        }
    }

    #[test]
    fn test_foreign_key_errors() {
        for number in [1216, 1217, 1451, 1452] {
            assert_eq!(classify_mysql(number), ErrorKind::InvalidArgument, "{number}");
        }
    }

    #[test]
    fn test_unknown_number() {
        assert_eq!(classify_mysql(9999), ErrorKind::Internal);
        assert_eq!(classify_mysql(0), ErrorKind::Internal);
    }
}
