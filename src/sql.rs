use chrono::{NaiveDate, NaiveDateTime};
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::MAX_SQL_LEN;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertWorker {
        id: Ulid,
        name: String,
    },
    InsertService {
        service: Service,
    },
    InsertCustomer {
        id: Ulid,
        name: String,
        phone: Option<String>,
    },
    InsertAppointment {
        id: Ulid,
        customer_id: Ulid,
        service_id: Ulid,
        worker_id: Ulid,
        start: Ms,
        end: Ms,
        participants: u32,
    },
    Reschedule {
        appointment_id: Ulid,
        start: Ms,
        end: Ms,
    },
    Cancel {
        appointment_id: Ulid,
    },
    Confirm {
        appointment_id: Ulid,
    },
    UpdateSettings {
        data: String,
    },
    DeleteWorker {
        id: Ulid,
    },
    DeleteService {
        id: Ulid,
    },
    DeleteCustomer {
        id: Ulid,
    },
    DeleteAppointment {
        id: Ulid,
    },
    SelectWorkers,
    SelectServices,
    SelectCustomers,
    SelectSettings,
    SelectAppointments {
        worker_id: Ulid,
        status: Option<AppointmentStatus>,
    },
    SelectAppointment {
        id: Ulid,
    },
    SelectReminders {
        appointment_id: Ulid,
    },
    SelectWaitlist {
        worker_id: Ulid,
    },
    SelectSlots {
        worker_id: Ulid,
        date: NaiveDate,
    },
    SelectWeek {
        date: NaiveDate,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    if sql.len() > MAX_SQL_LEN {
        return Err(SqlError::TooLong);
    }
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if let Some(cmd) = parse_listen(trimmed) {
        return Ok(cmd);
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [one] => one,
        _ => return Err(SqlError::Unsupported("multiple statements".into())),
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// LISTEN / UNLISTEN are handled before sqlparser; channel names are taken verbatim.
fn parse_listen(trimmed: &str) -> Option<Command> {
    let (verb, rest) = trimmed.split_once(char::is_whitespace).unwrap_or((trimmed, ""));
    let channel = rest.trim().trim_matches('"').to_string();
    match verb.to_ascii_uppercase().as_str() {
        "LISTEN" if !channel.is_empty() => Some(Command::Listen { channel }),
        "UNLISTEN" if channel == "*" => Some(Command::UnlistenAll),
        "UNLISTEN" if !channel.is_empty() => Some(Command::Unlisten { channel }),
        _ => None,
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let need = |n: usize| {
        if values.len() < n {
            Err(SqlError::WrongArity(table.clone(), n, values.len()))
        } else {
            Ok(())
        }
    };

    match table.as_str() {
        "workers" => {
            need(2)?;
            Ok(Command::InsertWorker {
                id: parse_ulid_expr(&values[0])?,
                name: parse_string_expr(&values[1])?,
            })
        }
        "services" => {
            need(2)?;
            let is_group = values.get(2).map(parse_bool).transpose()?.unwrap_or(false);
            Ok(Command::InsertService {
                service: Service {
                    id: parse_ulid_expr(&values[0])?,
                    name: parse_string_expr(&values[1])?,
                    is_group,
                    max_capacity: values.get(3).map(parse_u32_or_null).transpose()?.flatten(),
                    min_capacity: values.get(4).map(parse_u32_or_null).transpose()?.flatten(),
                    allow_waitlist: values.get(5).map(parse_bool).transpose()?.unwrap_or(false),
                },
            })
        }
        "customers" => {
            need(2)?;
            Ok(Command::InsertCustomer {
                id: parse_ulid_expr(&values[0])?,
                name: parse_string_expr(&values[1])?,
                phone: values.get(2).map(parse_string_or_null).transpose()?.flatten(),
            })
        }
        "appointments" => {
            need(6)?;
            Ok(Command::InsertAppointment {
                id: parse_ulid_expr(&values[0])?,
                customer_id: parse_ulid_expr(&values[1])?,
                service_id: parse_ulid_expr(&values[2])?,
                worker_id: parse_ulid_expr(&values[3])?,
                start: parse_ms_expr(&values[4])?,
                end: parse_ms_expr(&values[5])?,
                participants: values.get(6).map(parse_u32).transpose()?.unwrap_or(1),
            })
        }
        "reschedules" => {
            need(3)?;
            Ok(Command::Reschedule {
                appointment_id: parse_ulid_expr(&values[0])?,
                start: parse_ms_expr(&values[1])?,
                end: parse_ms_expr(&values[2])?,
            })
        }
        "cancellations" => {
            need(1)?;
            Ok(Command::Cancel {
                appointment_id: parse_ulid_expr(&values[0])?,
            })
        }
        "confirmations" => {
            need(1)?;
            Ok(Command::Confirm {
                appointment_id: parse_ulid_expr(&values[0])?,
            })
        }
        "settings" => {
            need(1)?;
            Ok(Command::UpdateSettings {
                data: parse_string_expr(&values[0])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = collect_filters(delete.selection.as_ref())?;
    let id = parse_ulid_expr(require(&filters, "id")?)?;

    match table.as_str() {
        "workers" => Ok(Command::DeleteWorker { id }),
        "services" => Ok(Command::DeleteService { id }),
        "customers" => Ok(Command::DeleteCustomer { id }),
        "appointments" => Ok(Command::DeleteAppointment { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let filters = collect_filters(select.selection.as_ref())?;

    match table.as_str() {
        "workers" => Ok(Command::SelectWorkers),
        "services" => Ok(Command::SelectServices),
        "customers" => Ok(Command::SelectCustomers),
        "settings" => Ok(Command::SelectSettings),
        "appointments" => {
            if let Some(id) = lookup(&filters, "id") {
                return Ok(Command::SelectAppointment {
                    id: parse_ulid_expr(id)?,
                });
            }
            let status = match lookup(&filters, "status") {
                Some(expr) => {
                    let s = parse_string_expr(expr)?;
                    Some(AppointmentStatus::parse(&s).ok_or(SqlError::Parse(format!("unknown status: {s}")))?)
                }
                None => None,
            };
            Ok(Command::SelectAppointments {
                worker_id: parse_ulid_expr(require(&filters, "worker_id")?)?,
                status,
            })
        }
        "reminders" => Ok(Command::SelectReminders {
            appointment_id: parse_ulid_expr(require(&filters, "appointment_id")?)?,
        }),
        "waitlist" => Ok(Command::SelectWaitlist {
            worker_id: parse_ulid_expr(require(&filters, "worker_id")?)?,
        }),
        "slots" => Ok(Command::SelectSlots {
            worker_id: parse_ulid_expr(require(&filters, "worker_id")?)?,
            date: parse_date_expr(require(&filters, "date")?)?,
        }),
        "week" => Ok(Command::SelectWeek {
            date: parse_date_expr(require(&filters, "date")?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

type Filters<'a> = Vec<(String, &'a Expr)>;

/// Flatten `col = value [AND col = value ...]` into (column, value) pairs.
fn collect_filters(selection: Option<&Expr>) -> Result<Filters<'_>, SqlError> {
    fn walk<'a>(expr: &'a Expr, out: &mut Filters<'a>) -> Result<(), SqlError> {
        match expr {
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::And,
                right,
            } => {
                walk(left, out)?;
                walk(right, out)
            }
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::Eq,
                right,
            } => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.push((col, right));
                Ok(())
            }
            Expr::Nested(inner) => walk(inner, out),
            other => Err(SqlError::Unsupported(format!("filter {other}"))),
        }
    }

    let mut out = Vec::new();
    if let Some(expr) = selection {
        walk(expr, &mut out)?;
    }
    Ok(out)
}

fn lookup<'a>(filters: &Filters<'a>, column: &str) -> Option<&'a Expr> {
    filters.iter().find(|(c, _)| c == column).map(|(_, e)| *e)
}

fn require<'a>(filters: &Filters<'a>, column: &'static str) -> Result<&'a Expr, SqlError> {
    lookup(filters, column).ok_or(SqlError::MissingFilter(column))
}

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s))
        | Some(Value::DoubleQuotedString(s))
        | Some(Value::DollarQuotedString(ast::DollarQuotedString { value: s, .. })) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_string_expr(expr).map(Some)
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64_expr(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .trim()
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_u32(expr).map(Some)
}

/// Instants are either epoch milliseconds or a local `YYYY-MM-DD HH:MM[:SS]`.
fn parse_ms_expr(expr: &Expr) -> Result<Ms, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr)
        && s.contains('-')
        && !s.starts_with('-')
    {
        const FORMATS: [&str; 4] = ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"];
        return FORMATS
            .iter()
            .find_map(|f| NaiveDateTime::parse_from_str(s.trim(), f).ok())
            .map(|dt| dt.and_utc().timestamp_millis())
            .ok_or_else(|| SqlError::Parse(format!("bad timestamp: {s}")));
    }
    parse_i64_expr(expr)
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string_expr(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Ok(true),
            "false" | "f" | "0" | "no" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("query too long")]
    TooLong,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(String, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}

impl SqlError {
    pub fn sqlstate(&self) -> &'static str {
        match self {
            SqlError::UnknownTable(_) => "42P01",
            SqlError::TooLong => "54000",
            SqlError::Unsupported(_) => "0A000",
            _ => "42601",
        }
    }
}
