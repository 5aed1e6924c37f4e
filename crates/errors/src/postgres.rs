//! PostgreSQL SQLSTATE 错误码映射
//!
//! 参考: https://www.postgresql.org/docs/current/errcodes-appendix.html

use crate::kind::{ConflictKind, ErrorKind};

/// 将 SQLSTATE 映射为错误类别
///
/// 先匹配具体错误码，未命中时按错误类（前两位）回退，未知类别为 `Internal`
pub fn classify_sqlstate(code: &str) -> ErrorKind {
    match code {
        // Class 08: Connection Exception
        "08P01" => ErrorKind::Internal, // protocol_violation

        // Class 0A: Feature Not Supported
        "0A000" => ErrorKind::InvalidArgument,

        // Class 23: Integrity Constraint Violation
        "23505" => ErrorKind::AlreadyExists, // unique_violation
        "23P01" => ErrorKind::InvalidArgument, // exclusion_violation

        // Class 25: Invalid Transaction State
        "25006" => ErrorKind::InvalidArgument, // read_only_sql_transaction
        "25P02" => ErrorKind::Internal,        // in_failed_sql_transaction
        "25P03" => ErrorKind::Timeout,         // idle_in_transaction_session_timeout

        // Class 3D / 3F: Invalid Catalog / Schema Name
        "3D000" => ErrorKind::NotFound,
        "3F000" => ErrorKind::NotFound,

        // Class 40: Transaction Rollback
        "40001" => ErrorKind::Conflict(ConflictKind::Serialization), // serialization_failure
        "40P01" => ErrorKind::Conflict(ConflictKind::Deadlock),      // deadlock_detected
        "40002" => ErrorKind::InvalidArgument, // transaction_integrity_constraint_violation
        "40003" => ErrorKind::Unavailable,     // statement_completion_unknown

        // Class 42: Syntax Error or Access Rule Violation
        "42501" => ErrorKind::PermissionDenied, // insufficient_privilege
        "42P01" => ErrorKind::NotFound,         // undefined_table
        "42P04" => ErrorKind::AlreadyExists,    // duplicate_database
        "42P06" => ErrorKind::AlreadyExists,    // duplicate_schema
        "42P07" => ErrorKind::AlreadyExists,    // duplicate_table
        "42710" => ErrorKind::AlreadyExists,    // duplicate_object

        // Class 55: Object Not In Prerequisite State
        "55P03" => ErrorKind::Timeout, // lock_not_available
        "55006" => ErrorKind::Conflict(ConflictKind::Serialization), // object_in_use

        // Class 57: Operator Intervention
        "57014" => ErrorKind::Cancelled, // query_canceled

        // Class 58: System Error
        "58030" => ErrorKind::Unavailable, // io_error
        "58P01" => ErrorKind::NotFound,    // undefined_file
        "58P02" => ErrorKind::AlreadyExists, // duplicate_file

        _ => classify_class(code),
    }
}

fn classify_class(code: &str) -> ErrorKind {
    match code.get(..2) {
        Some("08") => ErrorKind::Unavailable,
        Some("22") => ErrorKind::InvalidArgument,
        Some("23") => ErrorKind::InvalidArgument,
        Some("28") => ErrorKind::PermissionDenied,
        Some("40") => ErrorKind::Conflict(ConflictKind::Serialization),
        Some("42") => ErrorKind::InvalidArgument,
        Some("53") => ErrorKind::Unavailable,
        Some("54") => ErrorKind::InvalidArgument,
        Some("57") => ErrorKind::Unavailable,
        _ => ErrorKind::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_codes() {
        assert_eq!(classify_sqlstate("23505"), ErrorKind::AlreadyExists);
        assert_eq!(classify_sqlstate("23503"), ErrorKind::InvalidArgument);
        assert_eq!(classify_sqlstate("23502"), ErrorKind::InvalidArgument);
        assert_eq!(classify_sqlstate("23514"), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_transaction_rollback_codes() {
        assert_eq!(
            classify_sqlstate("40001"),
            ErrorKind::Conflict(ConflictKind::Serialization)
        );
        assert_eq!(
            classify_sqlstate("40P01"),
            ErrorKind::Conflict(ConflictKind::Deadlock)
        );
    }

    #[test]
    fn test_connection_class() {
        for code in ["08000", "08001", "08003", "08004", "08006"] {
            assert_eq!(classify_sqlstate(code), ErrorKind::Unavailable, "{code}");
        }
        assert_eq!(classify_sqlstate("08P01"), ErrorKind::Internal);
    }

    #[test]
    fn test_operator_intervention() {
        assert_eq!(classify_sqlstate("57P01"), ErrorKind::Unavailable);
        assert_eq!(classify_sqlstate("57P03"), ErrorKind::Unavailable);
        assert_eq!(classify_sqlstate("57014"), ErrorKind::Cancelled);
        assert_eq!(classify_sqlstate("53300"), ErrorKind::Unavailable);
    }

    #[test]
    fn test_access_codes() {
        assert_eq!(classify_sqlstate("42501"), ErrorKind::PermissionDenied);
        assert_eq!(classify_sqlstate("28P01"), ErrorKind::PermissionDenied);
        assert_eq!(classify_sqlstate("42P01"), ErrorKind::NotFound);
        assert_eq!(classify_sqlstate("42601"), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_unknown_codes_fall_back_to_internal() {
        assert_eq!(classify_sqlstate("XX000"), ErrorKind::Internal);
        assert_eq!(classify_sqlstate("HV000"), ErrorKind::Internal);
        assert_eq!(classify_sqlstate(""), ErrorKind::Internal);
        assert_eq!(classify_sqlstate("9"), ErrorKind::Internal);
    }
}
