//! JSON 参数绑定与行解码

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::mysql::{MySqlArguments, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, MySql, Row as _, TypeInfo, ValueRef};
use txguard_errors::{DbError, DbResult};
use txguard_ports::{Row, SqlValue};

pub(crate) type MySqlQuery<'q> = Query<'q, MySql, MySqlArguments>;

pub(crate) fn bind_value<'q>(query: MySqlQuery<'q>, value: &SqlValue) -> MySqlQuery<'q> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else if let Some(u) = n.as_u64() {
                query.bind(u)
            } else {
                query.bind(n.as_f64().unwrap_or_default())
            }
        }
        SqlValue::String(s) => query.bind(s.clone()),
        SqlValue::Array(_) | SqlValue::Object(_) => query.bind(sqlx::types::Json(value.clone())),
    }
}

pub(crate) fn bind_all<'q>(sql: &'q str, args: &[SqlValue]) -> MySqlQuery<'q> {
    args.iter()
        .fold(sqlx::query(sql), |query, value| bind_value(query, value))
}

pub(crate) fn to_json_row(row: &MySqlRow) -> DbResult<Row> {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = column_value(row, index, column.type_info().name())
            .map_err(|e| DbError::wrap(e, format!("failed to decode column {}", column.name())))?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn column_value(row: &MySqlRow, index: usize, type_name: &str) -> Result<SqlValue, sqlx::Error> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(SqlValue::Null);
    }

    let value = match type_name {
        "BOOLEAN" => SqlValue::Bool(row.try_get(index)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            SqlValue::from(row.try_get::<i64, _>(index)?)
        }
        name if name.ends_with(" UNSIGNED") => SqlValue::from(row.try_get::<u64, _>(index)?),
        "FLOAT" => SqlValue::from(f64::from(row.try_get::<f32, _>(index)?)),
        "DOUBLE" => SqlValue::from(row.try_get::<f64, _>(index)?),
        "JSON" => row.try_get::<SqlValue, _>(index)?,
        "TIMESTAMP" => SqlValue::String(row.try_get::<DateTime<Utc>, _>(index)?.to_rfc3339()),
        "DATETIME" => SqlValue::String(
            row.try_get::<NaiveDateTime, _>(index)?
                .format("%Y-%m-%dT%H:%M:%S%.f")
                .to_string(),
        ),
        "DATE" => SqlValue::String(row.try_get::<NaiveDate, _>(index)?.to_string()),
        "TIME" => SqlValue::String(row.try_get::<NaiveTime, _>(index)?.to_string()),
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" | "BIT" => {
            SqlValue::from(row.try_get::<Vec<u8>, _>(index)?)
        }
        // VARCHAR、CHAR、TEXT、ENUM 等
        _ => SqlValue::String(row.try_get::<String, _>(index)?),
    };
    Ok(value)
}
