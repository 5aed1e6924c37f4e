//! JSON 参数绑定与行解码

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row as _, TypeInfo, ValueRef};
use txguard_errors::{DbError, DbResult};
use txguard_ports::{Row, SqlValue};

pub(crate) type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// 按 JSON 类型绑定参数
///
/// NULL 以 TEXT 类型发送，非文本列需要在 SQL 中显式转换（如 `$1::int`）
pub(crate) fn bind_value<'q>(query: PgQuery<'q>, value: &SqlValue) -> PgQuery<'q> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        SqlValue::String(s) => query.bind(s.clone()),
        SqlValue::Array(_) | SqlValue::Object(_) => query.bind(sqlx::types::Json(value.clone())),
    }
}

pub(crate) fn bind_all<'q>(sql: &'q str, args: &[SqlValue]) -> PgQuery<'q> {
    args.iter()
        .fold(sqlx::query(sql), |query, value| bind_value(query, value))
}

/// 把一行转换为列名到 JSON 值的映射
pub(crate) fn to_json_row(row: &PgRow) -> DbResult<Row> {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = column_value(row, index, column.type_info().name())
            .map_err(|e| DbError::wrap(e, format!("failed to decode column {}", column.name())))?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn column_value(row: &PgRow, index: usize, type_name: &str) -> Result<SqlValue, sqlx::Error> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(SqlValue::Null);
    }

    let value = match type_name {
        "BOOL" => SqlValue::Bool(row.try_get(index)?),
        "INT2" => SqlValue::from(row.try_get::<i16, _>(index)?),
        "INT4" => SqlValue::from(row.try_get::<i32, _>(index)?),
        "INT8" => SqlValue::from(row.try_get::<i64, _>(index)?),
        "OID" => SqlValue::from(row.try_get::<sqlx::postgres::types::Oid, _>(index)?.0),
        "FLOAT4" => SqlValue::from(f64::from(row.try_get::<f32, _>(index)?)),
        "FLOAT8" => SqlValue::from(row.try_get::<f64, _>(index)?),
        "JSON" | "JSONB" => row.try_get::<SqlValue, _>(index)?,
        "UUID" => SqlValue::String(row.try_get::<uuid::Uuid, _>(index)?.to_string()),
        "TIMESTAMPTZ" => SqlValue::String(row.try_get::<DateTime<Utc>, _>(index)?.to_rfc3339()),
        "TIMESTAMP" => SqlValue::String(
            row.try_get::<NaiveDateTime, _>(index)?
                .format("%Y-%m-%dT%H:%M:%S%.f")
                .to_string(),
        ),
        "DATE" => SqlValue::String(row.try_get::<NaiveDate, _>(index)?.to_string()),
        "TIME" => SqlValue::String(row.try_get::<NaiveTime, _>(index)?.to_string()),
        "BYTEA" => SqlValue::from(row.try_get::<Vec<u8>, _>(index)?),
        // TEXT、VARCHAR、NAME 等文本类型；其他类型会返回类型不匹配错误
        _ => SqlValue::String(row.try_get::<String, _>(index)?),
    };
    Ok(value)
}
