use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, Sink, SinkExt};
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::response::NotificationResponse;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::{process_socket, TlsAcceptor};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;
use ulid::Ulid;

use crate::engine::{Engine, EngineError, NewAppointment};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

// ── Auth ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct SlotwiseAuthSource {
    password: String,
}

impl SlotwiseAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for SlotwiseAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Handler ──────────────────────────────────────────────────────

/// One handler per connection; it owns the connection's LISTEN subscriptions.
pub struct SlotwiseHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<SlotwiseQueryParser>,
    listeners: Mutex<HashMap<String, broadcast::Receiver<Event>>>,
}

impl SlotwiseHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(SlotwiseQueryParser),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    /// Parse, execute, and record metrics for one statement.
    async fn run(&self, engine: &Engine, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    /// Forward buffered change notifications to the client.
    async fn flush_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        let mut pending = Vec::new();
        {
            let mut listeners = self.listeners.lock().await;
            for (channel, rx) in listeners.iter_mut() {
                loop {
                    match rx.try_recv() {
                        Ok(event) => pending.push((channel.clone(), event)),
                        Err(broadcast::error::TryRecvError::Lagged(n)) => {
                            debug!("listener on {channel} lagged by {n} events");
                        }
                        Err(_) => break,
                    }
                }
            }
        }
        for (channel, event) in pending {
            let payload = serde_json::to_string(&event).unwrap_or_else(|_| event.kind().to_string());
            client
                .feed(PgWireBackendMessage::NotificationResponse(NotificationResponse::new(
                    std::process::id() as i32,
                    channel,
                    payload,
                )))
                .await?;
        }
        Ok(())
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertWorker { id, name } => {
                engine.add_worker(id, name).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::InsertService { service } => {
                engine.add_service(service).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::InsertCustomer { id, name, phone } => {
                engine
                    .register_customer(id, name, phone)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::InsertAppointment {
                id,
                customer_id,
                service_id,
                worker_id,
                start,
                end,
                participants,
            } => {
                let span = Span::checked(start, end).ok_or(EngineError::InvalidSpan { start, end }).map_err(engine_err)?;
                let ctx = engine.context();
                let outcome = engine
                    .book_appointment(&ctx, NewAppointment {
                        id,
                        customer_id,
                        service_id,
                        worker_id,
                        span,
                        participants,
                    })
                    .await
                    .map_err(engine_err)?;
                // A waitlisted request creates no appointment row.
                Ok(inserted(outcome.appointment_id().map_or(0, |_| 1)))
            }
            Command::Reschedule {
                appointment_id,
                start,
                end,
            } => {
                let span = Span::checked(start, end).ok_or(EngineError::InvalidSpan { start, end }).map_err(engine_err)?;
                let ctx = engine.context();
                engine
                    .reschedule_appointment(&ctx, appointment_id, span)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::Cancel { appointment_id } => {
                engine
                    .cancel_appointment(appointment_id)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::Confirm { appointment_id } => {
                let ctx = engine.context();
                engine
                    .confirm_appointment(&ctx, appointment_id)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::UpdateSettings { data } => {
                engine.update_settings(&data).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::DeleteWorker { id } => {
                engine.remove_worker(id).await.map_err(engine_err)?;
                Ok(deleted())
            }
            Command::DeleteService { id } => {
                engine.remove_service(id).await.map_err(engine_err)?;
                Ok(deleted())
            }
            Command::DeleteCustomer { id } => {
                engine.remove_customer(id).await.map_err(engine_err)?;
                Ok(deleted())
            }
            Command::DeleteAppointment { id } => {
                engine.delete_appointment(id).await.map_err(engine_err)?;
                Ok(deleted())
            }
            Command::SelectWorkers => {
                let workers = engine.list_workers().await;
                rows(workers_schema(), workers, |enc, w| {
                    enc.encode_field(&w.id.to_string())?;
                    enc.encode_field(&w.name)
                })
            }
            Command::SelectServices => rows(services_schema(), engine.list_services(), |enc, s| {
                enc.encode_field(&s.id.to_string())?;
                enc.encode_field(&s.name)?;
                enc.encode_field(&s.is_group)?;
                enc.encode_field(&s.max_capacity.map(|v| v as i32))?;
                enc.encode_field(&s.min_capacity.map(|v| v as i32))?;
                enc.encode_field(&s.allow_waitlist)
            }),
            Command::SelectCustomers => rows(customers_schema(), engine.list_customers(), |enc, c| {
                enc.encode_field(&c.id.to_string())?;
                enc.encode_field(&c.name)?;
                enc.encode_field(&c.phone)
            }),
            Command::SelectSettings => rows(settings_schema(), vec![engine.settings()], |enc, s| {
                enc.encode_field(&s.to_json())
            }),
            Command::SelectAppointments { worker_id, status } => {
                let list = engine
                    .list_appointments(worker_id, status)
                    .await
                    .map_err(engine_err)?;
                rows(appointments_schema(), list, encode_appointment)
            }
            Command::SelectAppointment { id } => {
                let found: Vec<Appointment> = engine.get_appointment(id).await.into_iter().collect();
                rows(appointments_schema(), found, encode_appointment)
            }
            Command::SelectReminders { appointment_id } => {
                rows(reminders_schema(), engine.get_reminders(appointment_id), |enc, r| {
                    enc.encode_field(&r.id.to_string())?;
                    enc.encode_field(&r.appointment_id.to_string())?;
                    enc.encode_field(&r.customer_id.to_string())?;
                    enc.encode_field(&r.scheduled_for)?;
                    enc.encode_field(&r.channel.as_str().to_string())?;
                    enc.encode_field(&(r.days_before as i32))?;
                    enc.encode_field(&r.status.as_str().to_string())?;
                    enc.encode_field(&r.last_error)
                })
            }
            Command::SelectWaitlist { worker_id } => {
                let list = engine.get_waitlist(worker_id).await.map_err(engine_err)?;
                rows(waitlist_schema(), list, |enc, w| {
                    enc.encode_field(&w.id.to_string())?;
                    enc.encode_field(&w.appointment_id.map(|id| id.to_string()))?;
                    enc.encode_field(&w.service_id.to_string())?;
                    enc.encode_field(&w.customer_id.to_string())?;
                    enc.encode_field(&w.span.start)?;
                    enc.encode_field(&w.span.end)?;
                    enc.encode_field(&(w.participants as i32))
                })
            }
            Command::SelectSlots { worker_id, date } => {
                let slots = engine
                    .get_day_slots(worker_id, date)
                    .await
                    .map_err(engine_err)?;
                rows(slots_schema(), slots, |enc, s| {
                    enc.encode_field(&s.time)?;
                    enc.encode_field(&s.span.start)?;
                    enc.encode_field(&s.span.end)?;
                    enc.encode_field(&s.bookable)
                })
            }
            Command::SelectWeek { date } => rows(week_schema(), engine.get_week(date), |enc, (d, working)| {
                enc.encode_field(&d.format("%Y-%m-%d").to_string())?;
                enc.encode_field(working)
            }),
            Command::Listen { channel } => {
                let worker_id = parse_channel(&channel)?;
                let rx = engine.notify.subscribe(worker_id);
                self.listeners.lock().await.insert(channel, rx);
                Ok(Response::Execution(Tag::new("LISTEN")))
            }
            Command::Unlisten { channel } => {
                self.listeners.lock().await.remove(&channel);
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
            Command::UnlistenAll => {
                self.listeners.lock().await.clear();
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
        }
    }
}

fn parse_channel(channel: &str) -> PgWireResult<Ulid> {
    let id = channel.strip_prefix("worker_").ok_or_else(|| {
        user_error("42000", format!("invalid channel: {channel} (expected worker_{{id}})"))
    })?;
    Ulid::from_string(id).map_err(|e| user_error("42000", format!("bad ULID in channel: {e}")))
}

fn inserted(n: usize) -> Response {
    Response::Execution(Tag::new("INSERT").with_oid(0).with_rows(n))
}

fn deleted() -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(1))
}

fn encode_appointment(enc: &mut DataRowEncoder, a: &Appointment) -> PgWireResult<()> {
    enc.encode_field(&a.id.to_string())?;
    enc.encode_field(&a.customer_id.to_string())?;
    enc.encode_field(&a.service_id.to_string())?;
    enc.encode_field(&a.worker_id.to_string())?;
    enc.encode_field(&a.span.start)?;
    enc.encode_field(&a.span.end)?;
    enc.encode_field(&a.status.as_str().to_string())?;
    enc.encode_field(&a.is_group)?;
    enc.encode_field(&(a.current_participants as i32))?;
    enc.encode_field(&a.max_capacity.map(|v| v as i32))
}

fn rows<T>(
    schema: Vec<FieldInfo>,
    items: impl IntoIterator<Item = T>,
    mut encode: impl FnMut(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema);
    let data: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, &item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(data))))
}

// ── Schemas ──────────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn workers_schema() -> Vec<FieldInfo> {
    vec![field("id", Type::VARCHAR), field("name", Type::VARCHAR)]
}

fn services_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("is_group", Type::BOOL),
        field("max_capacity", Type::INT4),
        field("min_capacity", Type::INT4),
        field("allow_waitlist", Type::BOOL),
    ]
}

fn customers_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("phone", Type::VARCHAR),
    ]
}

fn settings_schema() -> Vec<FieldInfo> {
    vec![field("data", Type::VARCHAR)]
}

fn appointments_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("customer_id", Type::VARCHAR),
        field("service_id", Type::VARCHAR),
        field("worker_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("status", Type::VARCHAR),
        field("is_group", Type::BOOL),
        field("current_participants", Type::INT4),
        field("max_capacity", Type::INT4),
    ]
}

fn reminders_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("appointment_id", Type::VARCHAR),
        field("customer_id", Type::VARCHAR),
        field("scheduled_for", Type::INT8),
        field("channel", Type::VARCHAR),
        field("days_before", Type::INT4),
        field("status", Type::VARCHAR),
        field("last_error", Type::VARCHAR),
    ]
}

fn waitlist_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("appointment_id", Type::VARCHAR),
        field("service_id", Type::VARCHAR),
        field("customer_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("participants", Type::INT4),
    ]
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        field("time", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("bookable", Type::BOOL),
    ]
}

fn week_schema() -> Vec<FieldInfo> {
    vec![field("date", Type::VARCHAR), field("working", Type::BOOL)]
}

/// Result columns of a statement, judged from its `FROM` table.
fn schema_for_sql(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_ascii_lowercase();
    if !lower.trim_start().starts_with("select") {
        return Vec::new();
    }
    let table = lower
        .split_once(" from ")
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .map(|t| t.trim_matches(|c| c == '"' || c == ';'))
        .unwrap_or_default();
    match table {
        "workers" => workers_schema(),
        "services" => services_schema(),
        "customers" => customers_schema(),
        "settings" => settings_schema(),
        "appointments" => appointments_schema(),
        "reminders" => reminders_schema(),
        "waitlist" => waitlist_schema(),
        "slots" => slots_schema(),
        "week" => week_schema(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl SimpleQueryHandler for SlotwiseHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let result = self.run(&engine, query).await;
        self.flush_notifications(client).await?;
        Ok(vec![result?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotwiseQueryParser;

#[async_trait]
impl QueryParser for SlotwiseQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for_sql(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotwiseHandler {
    type Statement = String;
    type QueryParser = SlotwiseQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(&self, client: &mut C, portal: &Portal<Self::Statement>, _max_rows: usize) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = bind_params(&portal.statement.statement, &portal.parameters);
        let result = self.run(&engine, &sql).await;
        self.flush_notifications(client).await?;
        result
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(param_types, schema_for_sql(&target.statement)))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for_sql(&target.statement.statement)))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        if let Ok(n) = sql[start..end].parse::<usize>() {
            max = max.max(n);
        }
        i = end.max(start);
    }
    max
}

/// Substitute `$N` placeholders with bound parameter values (text format).
///
/// One left-to-right pass over the statement: inserted values are never
/// rescanned, and `$N` inside a quoted literal of the statement is left alone.
fn bind_params(sql: &str, params: &[Option<Bytes>]) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                in_literal = !in_literal;
                i += 1;
            }
            b'$' if !in_literal => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                let slot = sql[start..end]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|n| params.get(n));
                if let Some(param) = slot {
                    out.push_str(&sql[copied..i]);
                    match param {
                        Some(value) => {
                            out.push('\'');
                            out.push_str(&String::from_utf8_lossy(value).replace('\'', "''"));
                            out.push('\'');
                        }
                        None => out.push_str("NULL"),
                    }
                    copied = end;
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    out.push_str(&sql[copied..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotwiseFactory {
    handler: Arc<SlotwiseHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<SlotwiseAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotwiseFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(SlotwiseHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                SlotwiseAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotwiseFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = SlotwiseFactory::new(tenant_manager, password);
    process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(e.sqlstate(), e.user_message())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error(e.sqlstate(), e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM workers"), 0);
        assert_eq!(count_params("INSERT INTO workers VALUES ($1, $2)"), 2);
        assert_eq!(count_params("SELECT $3, $10, $2"), 10);
        assert_eq!(count_params("price $ alone"), 0);
    }

    #[test]
    fn bound_values_are_quoted_once() {
        let params = [Some(Bytes::from_static(b"01ABC")), Some(Bytes::from_static(b"Chair $1"))];
        assert_eq!(
            bind_params("INSERT INTO workers (id, name) VALUES ($1, $2)", &params),
            "INSERT INTO workers (id, name) VALUES ('01ABC', 'Chair $1')"
        );

        let quote = [Some(Bytes::from_static(b"x', '$2")), None];
        assert_eq!(bind_params("VALUES ($1, $2)", &quote), "VALUES ('x'', ''$2', NULL)");
    }

    #[test]
    fn placeholders_in_literals_and_past_the_end_stay() {
        let params = [Some(Bytes::from_static(b"a"))];
        assert_eq!(bind_params("SELECT '$1', $1, $10", &params), "SELECT '$1', 'a', $10");
    }

    #[test]
    fn schema_follows_from_table() {
        let names = |sql: &str| -> Vec<String> {
            schema_for_sql(sql).iter().map(|f| f.name().to_string()).collect()
        };
        assert_eq!(names("SELECT * FROM workers"), vec!["id", "name"]);
        assert_eq!(names("select * from slots where worker_id = $1")[3], "bookable");
        assert!(names("INSERT INTO workers VALUES ($1, $2)").is_empty());
        assert!(names("SELECT * FROM nowhere").is_empty());
    }

    #[test]
    fn channel_names() {
        let id = Ulid::new();
        assert_eq!(parse_channel(&format!("worker_{id}")).unwrap(), id);
        assert!(parse_channel("resource_x").is_err());
        assert!(parse_channel("worker_nope").is_err());
    }
}
