use crate::agents::AgentRegistry;
use crate::audit::{AccessRecord, AuditSink, InputMetadata, ServiceKind, ServiceRecord};
use crate::metrics::{
    self, DecisionStats, MetricsSummary, MetricsWindow, ServiceStats, UserTypeStats,
};
use crate::types::{
    AgentDescriptor, AgentSummary, AppError, Decision, Identity, Result, UserContext,
};
use crate::utils::toml_config::VerifaceConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Database, Row, Value};

/// Audit store and agent registry on libsql (local file, in-memory or remote Turso).
pub struct TursoClient {
    _db: Database,
    // A single shared connection: `:memory:` databases are per-connection
    conn: Connection,
}

impl TursoClient {
    /// Connect to a remote Turso database
    pub async fn new_remote(url: String, auth_token: String) -> Result<Self> {
        let db = Builder::new_remote(url, auth_token)
            .build()
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Turso: {}", e)))?;

        Self::from_database(db).await
    }

    /// Open (or create) a local database file. `:memory:` is accepted.
    pub async fn new_local(path: &str) -> Result<Self> {
        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        AppError::Database(format!("Failed to create database directory: {}", e))
                    })?;
                }
            }
        }

        let db = Builder::new_local(path).build().await.map_err(|e| {
            AppError::Database(format!("Failed to open local database: {}", e))
        })?;

        Self::from_database(db).await
    }

    /// Fresh in-memory database, mainly for tests
    pub async fn new_memory() -> Result<Self> {
        Self::new_local(":memory:").await
    }

    /// Remote Turso when both `[database]` env vars resolve, otherwise the local `url`
    pub async fn from_config(config: &VerifaceConfig) -> Result<Self> {
        match config.turso_remote() {
            Some((url, token)) => {
                tracing::info!("Using remote Turso database");
                Self::new_remote(url, token).await
            }
            None => {
                tracing::info!("Using local database at {}", config.database.url);
                Self::new_local(&config.database.url).await
            }
        }
    }

    async fn from_database(db: Database) -> Result<Self> {
        let conn = db
            .connect()
            .map_err(|e| AppError::Database(format!("Failed to get connection: {}", e)))?;

        let client = Self { _db: db, conn };
        client.initialize_schema().await?;

        Ok(client)
    }

    pub fn connection(&self) -> Result<Connection> {
        Ok(self.conn.clone())
    }

    async fn initialize_schema(&self) -> Result<()> {
        let conn = self.connection()?;

        // One row per pipeline invocation
        conn.execute(
            "CREATE TABLE IF NOT EXISTS access_logs (
                request_id TEXT NOT NULL,
                ts INTEGER NOT NULL,
                route TEXT NOT NULL,
                user_id TEXT,
                user_type TEXT,
                user_role TEXT NOT NULL,
                input_metadata TEXT NOT NULL,
                decision TEXT,
                identity_name TEXT,
                identity_score REAL,
                agents_queried INTEGER NOT NULL,
                agents_timeouts INTEGER NOT NULL,
                agents_failures INTEGER NOT NULL,
                qa_used INTEGER NOT NULL,
                elapsed_ms REAL NOT NULL,
                status_code INTEGER NOT NULL,
                client_addr TEXT
            )",
            (),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to create access_logs table: {}", e)))?;

        // One row per outbound call
        conn.execute(
            "CREATE TABLE IF NOT EXISTS service_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                request_id TEXT NOT NULL,
                ts INTEGER NOT NULL,
                service_kind TEXT NOT NULL,
                service_name TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                payload_size_bytes INTEGER NOT NULL,
                latency_ms REAL NOT NULL,
                timed_out INTEGER NOT NULL,
                error TEXT,
                status_code INTEGER,
                result TEXT
            )",
            (),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to create service_logs table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS agents (
                name TEXT PRIMARY KEY,
                verify_endpoint TEXT NOT NULL,
                threshold REAL NOT NULL,
                active INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            (),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to create agents table: {}", e)))?;

        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_access_ts ON access_logs(ts);
             CREATE INDEX IF NOT EXISTS idx_access_user_type_ts ON access_logs(user_type, ts);
             CREATE INDEX IF NOT EXISTS idx_access_route_ts ON access_logs(route, ts);
             CREATE INDEX IF NOT EXISTS idx_access_decision_ts ON access_logs(decision, ts);
             CREATE INDEX IF NOT EXISTS idx_access_request_id ON access_logs(request_id);
             CREATE INDEX IF NOT EXISTS idx_service_name_ts ON service_logs(service_name, ts);
             CREATE INDEX IF NOT EXISTS idx_service_kind_ts ON service_logs(service_kind, ts);
             CREATE INDEX IF NOT EXISTS idx_service_status_ts ON service_logs(status_code, ts);
             CREATE INDEX IF NOT EXISTS idx_service_request_id ON service_logs(request_id);",
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    // Audit operations
    pub async fn insert_access_record(&self, record: &AccessRecord) -> Result<()> {
        let conn = self.connection()?;
        let input = serde_json::to_string(&record.input)
            .map_err(|e| AppError::Internal(format!("Failed to serialize input metadata: {}", e)))?;

        let params: Vec<Value> = vec![
            record.request_id.as_str().into(),
            record.ts.timestamp_millis().into(),
            record.route.as_str().into(),
            record.user.id.clone().into(),
            record.user.user_type.clone().into(),
            record.user.role.as_str().into(),
            input.into(),
            record.decision.map(|d| d.as_str()).into(),
            record.identity.as_ref().and_then(|i| i.name.clone()).into(),
            record.identity.as_ref().map(|i| i.score).into(),
            (record.agents.queried as i64).into(),
            (record.agents.timeouts as i64).into(),
            (record.agents.failures as i64).into(),
            record.qa_used.into(),
            record.elapsed_ms.into(),
            i64::from(record.status_code).into(),
            record.client_addr.clone().into(),
        ];

        conn.execute(
            "INSERT INTO access_logs
             (request_id, ts, route, user_id, user_type, user_role, input_metadata,
              decision, identity_name, identity_score, agents_queried, agents_timeouts,
              agents_failures, qa_used, elapsed_ms, status_code, client_addr)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params,
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to insert access record: {}", e)))?;

        Ok(())
    }

    pub async fn insert_service_record(&self, record: &ServiceRecord) -> Result<()> {
        let conn = self.connection()?;
        let result = record
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| AppError::Internal(format!("Failed to serialize result: {}", e)))?;

        let params: Vec<Value> = vec![
            record.request_id.as_str().into(),
            record.ts.timestamp_millis().into(),
            record.service_kind.as_str().into(),
            record.service_name.as_str().into(),
            record.endpoint.as_str().into(),
            (record.payload_size_bytes as i64).into(),
            record.latency_ms.into(),
            record.timed_out.into(),
            record.error.clone().into(),
            record.status_code.map(i64::from).into(),
            result.into(),
        ];

        conn.execute(
            "INSERT INTO service_logs
             (request_id, ts, service_kind, service_name, endpoint, payload_size_bytes,
              latency_ms, timed_out, error, status_code, result)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params,
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to insert service record: {}", e)))?;

        Ok(())
    }

    pub async fn get_access_record(&self, request_id: &str) -> Result<Option<AccessRecord>> {
        let conn = self.connection()?;

        let mut rows = conn
            .query(
                "SELECT request_id, ts, route, user_id, user_type, user_role, input_metadata,
                        decision, identity_name, identity_score, agents_queried, agents_timeouts,
                        agents_failures, qa_used, elapsed_ms, status_code, client_addr
                 FROM access_logs WHERE request_id = ?",
                [request_id],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to query access record: {}", e)))?;

        match rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            Some(row) => Ok(Some(access_record_from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn service_records_for(&self, request_id: &str) -> Result<Vec<ServiceRecord>> {
        let conn = self.connection()?;

        let mut rows = conn
            .query(
                "SELECT request_id, ts, service_kind, service_name, endpoint, payload_size_bytes,
                        latency_ms, timed_out, error, status_code, result
                 FROM service_logs WHERE request_id = ? ORDER BY id ASC",
                [request_id],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to query service records: {}", e)))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            records.push(service_record_from_row(&row)?);
        }

        Ok(records)
    }

    // Agent operations
    pub async fn upsert_agent(&self, agent: &AgentDescriptor) -> Result<()> {
        let conn = self.connection()?;
        let now = Utc::now().timestamp();

        conn.execute(
            "INSERT INTO agents (name, verify_endpoint, threshold, active, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                verify_endpoint = excluded.verify_endpoint,
                threshold = excluded.threshold,
                active = excluded.active,
                updated_at = excluded.updated_at",
            (
                agent.name.as_str(),
                agent.verify_endpoint.as_str(),
                agent.threshold,
                agent.active,
                now,
            ),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to upsert agent: {}", e)))?;

        Ok(())
    }

    /// Toggle an agent; `NotFound` if no such agent exists.
    pub async fn set_agent_active(&self, name: &str, active: bool) -> Result<()> {
        let conn = self.connection()?;
        let now = Utc::now().timestamp();

        let changed = conn
            .execute(
                "UPDATE agents SET active = ?, updated_at = ? WHERE name = ?",
                (active, now, name),
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to update agent: {}", e)))?;

        if changed == 0 {
            return Err(AppError::NotFound(format!("Agent '{}' not found", name)));
        }

        Ok(())
    }

    /// All agents, active or not, ordered by name
    pub async fn list_agents(&self) -> Result<Vec<AgentDescriptor>> {
        self.query_agents("SELECT name, verify_endpoint, threshold, active FROM agents ORDER BY name")
            .await
    }

    async fn query_agents(&self, sql: &str) -> Result<Vec<AgentDescriptor>> {
        let conn = self.connection()?;

        let mut rows = conn
            .query(sql, ())
            .await
            .map_err(|e| AppError::Database(format!("Failed to query agents: {}", e)))?;

        let mut agents = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            agents.push(AgentDescriptor {
                name: text(&row, 0)?,
                verify_endpoint: text(&row, 1)?,
                threshold: real(&row, 2)?,
                active: int(&row, 3)? != 0,
            });
        }

        Ok(agents)
    }

    // Metrics queries
    pub async fn metrics_summary(&self, window: MetricsWindow) -> Result<MetricsSummary> {
        let conn = self.connection()?;
        let since = window.since_ms(Utc::now());

        let mut rows = conn
            .query(
                "SELECT COUNT(*), AVG(elapsed_ms), SUM(agents_timeouts)
                 FROM access_logs WHERE ts >= ?",
                [since],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to query summary: {}", e)))?;

        let (total_requests, avg_latency, timeouts) = match rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            Some(row) => (
                int(&row, 0)? as u64,
                opt_real(&row, 1)?.unwrap_or(0.0),
                opt_int(&row, 2)?.unwrap_or(0) as u64,
            ),
            None => (0, 0.0, 0),
        };

        let mut rows = conn
            .query(
                "SELECT route, elapsed_ms FROM access_logs WHERE ts >= ?",
                [since],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to query route latencies: {}", e)))?;

        let mut samples = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            samples.push((text(&row, 0)?, real(&row, 1)?));
        }

        Ok(MetricsSummary {
            period_days: window.days,
            total_requests,
            avg_latency: metrics::round3(avg_latency),
            timeouts,
            routes: metrics::route_stats(samples),
        })
    }

    pub async fn metrics_by_user_type(&self, window: MetricsWindow) -> Result<Vec<UserTypeStats>> {
        let conn = self.connection()?;

        let mut rows = conn
            .query(
                "SELECT user_type, COUNT(*) AS count, AVG(elapsed_ms)
                 FROM access_logs WHERE ts >= ?
                 GROUP BY user_type ORDER BY count DESC, user_type ASC",
                [window.since_ms(Utc::now())],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to query user types: {}", e)))?;

        let mut stats = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            stats.push(UserTypeStats {
                user_type: opt_text(&row, 0)?,
                count: int(&row, 1)? as u64,
                avg_latency: metrics::round3(opt_real(&row, 2)?.unwrap_or(0.0)),
            });
        }

        Ok(stats)
    }

    pub async fn metrics_decisions(&self, window: MetricsWindow) -> Result<Vec<DecisionStats>> {
        let conn = self.connection()?;

        let mut rows = conn
            .query(
                "SELECT decision, COUNT(*) AS count
                 FROM access_logs WHERE ts >= ?
                 GROUP BY decision ORDER BY count DESC, decision ASC",
                [window.since_ms(Utc::now())],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to query decisions: {}", e)))?;

        let mut stats = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            stats.push(DecisionStats {
                decision: opt_text(&row, 0)?,
                count: int(&row, 1)? as u64,
            });
        }

        Ok(stats)
    }

    /// Per verification agent: calls, timeouts and mean latency, worst first
    pub async fn metrics_services(&self, window: MetricsWindow) -> Result<Vec<ServiceStats>> {
        let conn = self.connection()?;

        let mut rows = conn
            .query(
                "SELECT service_name, COUNT(*), SUM(timed_out) AS timeouts, AVG(latency_ms)
                 FROM service_logs WHERE ts >= ? AND service_kind = ?
                 GROUP BY service_name ORDER BY timeouts DESC, service_name ASC",
                (
                    window.since_ms(Utc::now()),
                    ServiceKind::Verification.as_str(),
                ),
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to query services: {}", e)))?;

        let mut stats = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            stats.push(ServiceStats {
                service_name: text(&row, 0)?,
                queries: int(&row, 1)? as u64,
                timeouts: opt_int(&row, 2)?.unwrap_or(0) as u64,
                avg_latency: metrics::round3(opt_real(&row, 3)?.unwrap_or(0.0)),
            });
        }

        Ok(stats)
    }
}

#[async_trait]
impl AuditSink for TursoClient {
    async fn append_access(&self, record: AccessRecord) -> Result<()> {
        self.insert_access_record(&record).await
    }

    async fn append_service(&self, record: ServiceRecord) -> Result<()> {
        self.insert_service_record(&record).await
    }
}

#[async_trait]
impl AgentRegistry for TursoClient {
    async fn list_active_agents(&self) -> Result<Vec<AgentDescriptor>> {
        self.query_agents(
            "SELECT name, verify_endpoint, threshold, active FROM agents
             WHERE active = 1 ORDER BY name",
        )
        .await
    }
}

// Row decoding. `Row::get` panics on a type mismatch, so go through `Value`.

fn value(row: &Row, idx: i32) -> Result<Value> {
    row.get_value(idx)
        .map_err(|e| AppError::Database(e.to_string()))
}

fn column_type_error(idx: i32, expected: &str, got: &Value) -> AppError {
    AppError::Database(format!(
        "Column {} expected {}, found {:?}",
        idx, expected, got
    ))
}

fn opt_text(row: &Row, idx: i32) -> Result<Option<String>> {
    match value(row, idx)? {
        Value::Null => Ok(None),
        Value::Text(s) => Ok(Some(s)),
        other => Err(column_type_error(idx, "text", &other)),
    }
}

fn text(row: &Row, idx: i32) -> Result<String> {
    opt_text(row, idx)?.ok_or_else(|| column_type_error(idx, "text", &Value::Null))
}

fn opt_int(row: &Row, idx: i32) -> Result<Option<i64>> {
    match value(row, idx)? {
        Value::Null => Ok(None),
        Value::Integer(i) => Ok(Some(i)),
        Value::Real(f) => Ok(Some(f as i64)),
        other => Err(column_type_error(idx, "integer", &other)),
    }
}

fn int(row: &Row, idx: i32) -> Result<i64> {
    opt_int(row, idx)?.ok_or_else(|| column_type_error(idx, "integer", &Value::Null))
}

fn opt_real(row: &Row, idx: i32) -> Result<Option<f64>> {
    match value(row, idx)? {
        Value::Null => Ok(None),
        Value::Real(f) => Ok(Some(f)),
        Value::Integer(i) => Ok(Some(i as f64)),
        other => Err(column_type_error(idx, "real", &other)),
    }
}

fn real(row: &Row, idx: i32) -> Result<f64> {
    opt_real(row, idx)?.ok_or_else(|| column_type_error(idx, "real", &Value::Null))
}

fn timestamp(row: &Row, idx: i32) -> Result<DateTime<Utc>> {
    let millis = int(row, idx)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| AppError::Database(format!("Invalid timestamp {}", millis)))
}

fn json_column<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| AppError::Database(format!("Corrupt JSON column: {}", e)))
}

fn access_record_from_row(row: &Row) -> Result<AccessRecord> {
    let input: InputMetadata = json_column(&text(row, 6)?)?;
    let decision = match opt_text(row, 7)?.as_deref() {
        None => None,
        Some("identified") => Some(Decision::Identified),
        Some("ambiguous") => Some(Decision::Ambiguous),
        Some("unknown") => Some(Decision::Unknown),
        Some(other) => {
            return Err(AppError::Database(format!("Unknown decision '{}'", other)));
        }
    };
    let identity = match opt_real(row, 9)? {
        Some(score) => Some(Identity {
            name: opt_text(row, 8)?,
            score,
        }),
        None => None,
    };

    Ok(AccessRecord {
        request_id: text(row, 0)?,
        ts: timestamp(row, 1)?,
        route: text(row, 2)?,
        user: UserContext {
            id: opt_text(row, 3)?,
            user_type: opt_text(row, 4)?,
            role: text(row, 5)?,
        },
        input,
        decision,
        identity,
        agents: AgentSummary {
            queried: int(row, 10)? as usize,
            timeouts: int(row, 11)? as usize,
            failures: int(row, 12)? as usize,
        },
        qa_used: int(row, 13)? != 0,
        elapsed_ms: real(row, 14)?,
        status_code: int(row, 15)? as u16,
        client_addr: opt_text(row, 16)?,
    })
}

fn service_record_from_row(row: &Row) -> Result<ServiceRecord> {
    let service_kind = match text(row, 2)?.as_str() {
        "verification" => ServiceKind::Verification,
        "qa" => ServiceKind::Qa,
        other => {
            return Err(AppError::Database(format!("Unknown service kind '{}'", other)));
        }
    };
    let result = opt_text(row, 10)?
        .map(|raw| json_column::<serde_json::Value>(&raw))
        .transpose()?;

    Ok(ServiceRecord {
        request_id: text(row, 0)?,
        ts: timestamp(row, 1)?,
        service_kind,
        service_name: text(row, 3)?,
        endpoint: text(row, 4)?,
        payload_size_bytes: int(row, 5)? as usize,
        latency_ms: real(row, 6)?,
        timed_out: int(row, 7)? != 0,
        error: opt_text(row, 8)?,
        status_code: opt_int(row, 9)?.map(|c| c as u16),
        result,
    })
}
