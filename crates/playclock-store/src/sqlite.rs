//! SQLite-based store implementation

use chrono::{DateTime, Utc};
use playclock_api::{Connectivity, Device, DeviceKind, Session, SessionStatus};
use playclock_util::{DeviceId, SessionId};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration as StdDuration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{Store, StoreError, StoreResult};

const BUSY_RETRIES: u32 = 3;
const BUSY_RETRY_DELAY: StdDuration = StdDuration::from_millis(50);

/// Retry a statement a bounded number of times when another process holds
/// the database. Validation and constraint errors pass through untouched.
fn with_busy_retry<T>(mut op: impl FnMut() -> rusqlite::Result<T>) -> rusqlite::Result<T> {
    let mut attempts = 0;
    loop {
        match op() {
            Err(e) if is_busy(&e) && attempts < BUSY_RETRIES => {
                attempts += 1;
                warn!(attempts, "Database busy, retrying");
                std::thread::sleep(BUSY_RETRY_DELAY);
            }
            other => return other,
        }
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

fn parse_timestamp(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp '{}': {}", s, e)))
}

fn parse_status(s: &str) -> StoreResult<SessionStatus> {
    match s {
        "active" => Ok(SessionStatus::Active),
        "paused" => Ok(SessionStatus::Paused),
        "expired" => Ok(SessionStatus::Expired),
        "cancelled" => Ok(SessionStatus::Cancelled),
        other => Err(StoreError::Serialization(format!(
            "unknown session status '{}'",
            other
        ))),
    }
}

fn parse_kind(s: &str) -> StoreResult<DeviceKind> {
    match s {
        "computer" => Ok(DeviceKind::Computer),
        "console" => Ok(DeviceKind::Console),
        other => Err(StoreError::Serialization(format!(
            "unknown device kind '{}'",
            other
        ))),
    }
}

fn parse_connectivity(s: &str) -> StoreResult<Connectivity> {
    match s {
        "online" => Ok(Connectivity::Online),
        "offline" => Ok(Connectivity::Offline),
        other => Err(StoreError::Serialization(format!(
            "unknown connectivity '{}'",
            other
        ))),
    }
}

/// Raw device row, parsed into the API type after the query
struct RawDevice {
    id: String,
    name: String,
    kind: String,
    status: String,
    last_seen: Option<String>,
}

impl RawDevice {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            kind: row.get(2)?,
            status: row.get(3)?,
            last_seen: row.get(4)?,
        })
    }

    fn into_device(self) -> StoreResult<Device> {
        Ok(Device {
            id: DeviceId::new(self.id),
            name: self.name,
            kind: parse_kind(&self.kind)?,
            connectivity: parse_connectivity(&self.status)?,
            last_seen: self.last_seen.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

/// Raw session row, parsed into the API type after the query
struct RawSession {
    id: String,
    device_id: String,
    start_time: String,
    duration_minutes: i64,
    amount: i64,
    status: String,
    paused_at: Option<String>,
}

impl RawSession {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            device_id: row.get(1)?,
            start_time: row.get(2)?,
            duration_minutes: row.get(3)?,
            amount: row.get(4)?,
            status: row.get(5)?,
            paused_at: row.get(6)?,
        })
    }

    fn into_session(self) -> StoreResult<Session> {
        let uuid = Uuid::parse_str(&self.id)
            .map_err(|e| StoreError::Serialization(format!("bad session id '{}': {}", self.id, e)))?;
        Ok(Session {
            id: SessionId::from_uuid(uuid),
            device_id: DeviceId::new(self.device_id),
            start_time: parse_timestamp(&self.start_time)?,
            duration_minutes: self.duration_minutes,
            amount: self.amount,
            status: parse_status(&self.status)?,
            paused_at: self.paused_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

const DEVICE_COLS: &str = "id, name, kind, status, last_seen";
const SESSION_COLS: &str = "id, device_id, start_time, duration_minutes, amount, status, paused_at";

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.busy_timeout(StdDuration::from_secs(5))?;
        conn.pragma_update(None, "foreign_keys", true)?;

        conn.execute_batch(
            r#"
            -- Device catalog, seeded from config at startup
            CREATE TABLE IF NOT EXISTS devices (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('computer', 'console')),
                status TEXT NOT NULL DEFAULT 'offline' CHECK (status IN ('online', 'offline')),
                last_seen TEXT
            );

            -- Sessions, current and historical. Rows are never deleted.
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                device_id TEXT NOT NULL REFERENCES devices(id),
                start_time TEXT NOT NULL,
                duration_minutes INTEGER NOT NULL,
                amount INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL CHECK (status IN ('active', 'paused', 'expired', 'cancelled')),
                paused_at TEXT
            );

            -- At most one active or paused session per device
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_current
                ON sessions(device_id) WHERE status IN ('active', 'paused');

            CREATE INDEX IF NOT EXISTS idx_sessions_start ON sessions(start_time);
            CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

impl Store for SqliteStore {
    fn upsert_device(&self, device: &Device) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        with_busy_retry(|| {
            conn.execute(
                r#"
                INSERT INTO devices (id, name, kind, status, last_seen)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(id)
                DO UPDATE SET name = excluded.name, kind = excluded.kind
                "#,
                params![
                    device.id.as_str(),
                    device.name,
                    device.kind.to_string(),
                    device.connectivity.to_string(),
                    device.last_seen.map(|t| t.to_rfc3339()),
                ],
            )
        })?;

        debug!(device_id = %device.id, "Device upserted");
        Ok(())
    }

    fn get_device(&self, id: &DeviceId) -> StoreResult<Option<Device>> {
        let conn = self.conn.lock().unwrap();

        let raw = conn
            .query_row(
                &format!("SELECT {} FROM devices WHERE id = ?", DEVICE_COLS),
                [id.as_str()],
                RawDevice::from_row,
            )
            .optional()?;

        raw.map(RawDevice::into_device).transpose()
    }

    fn list_devices(&self) -> StoreResult<Vec<Device>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt =
            conn.prepare(&format!("SELECT {} FROM devices ORDER BY id", DEVICE_COLS))?;
        let rows = stmt.query_map([], RawDevice::from_row)?;

        let mut devices = Vec::new();
        for row in rows {
            devices.push(row?.into_device()?);
        }
        Ok(devices)
    }

    fn set_connectivity(
        &self,
        id: &DeviceId,
        connectivity: Connectivity,
        last_seen: DateTime<Utc>,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        let updated = with_busy_retry(|| {
            conn.execute(
                "UPDATE devices SET status = ?, last_seen = ? WHERE id = ?",
                params![
                    connectivity.to_string(),
                    last_seen.to_rfc3339(),
                    id.as_str()
                ],
            )
        })?;

        if updated == 0 {
            return Err(StoreError::NotFound(format!("device {}", id)));
        }
        Ok(())
    }

    fn insert_session(&self, session: &Session) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        with_busy_retry(|| {
            conn.execute(
                &format!(
                    "INSERT INTO sessions ({}) VALUES (?, ?, ?, ?, ?, ?, ?)",
                    SESSION_COLS
                ),
                params![
                    session.id.to_string(),
                    session.device_id.as_str(),
                    session.start_time.to_rfc3339(),
                    session.duration_minutes,
                    session.amount,
                    session.status.to_string(),
                    session.paused_at.map(|t| t.to_rfc3339()),
                ],
            )
        })?;

        debug!(session_id = %session.id, device_id = %session.device_id, "Session inserted");
        Ok(())
    }

    fn update_session(&self, session: &Session) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        let updated = with_busy_retry(|| {
            conn.execute(
                r#"
                UPDATE sessions
                SET start_time = ?, duration_minutes = ?, amount = ?, status = ?, paused_at = ?
                WHERE id = ?
                "#,
                params![
                    session.start_time.to_rfc3339(),
                    session.duration_minutes,
                    session.amount,
                    session.status.to_string(),
                    session.paused_at.map(|t| t.to_rfc3339()),
                    session.id.to_string(),
                ],
            )
        })?;

        if updated == 0 {
            return Err(StoreError::NotFound(format!("session {}", session.id)));
        }

        debug!(session_id = %session.id, status = %session.status, "Session updated");
        Ok(())
    }

    fn get_session(&self, id: &SessionId) -> StoreResult<Option<Session>> {
        let conn = self.conn.lock().unwrap();

        let raw = conn
            .query_row(
                &format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLS),
                [id.to_string()],
                RawSession::from_row,
            )
            .optional()?;

        raw.map(RawSession::into_session).transpose()
    }

    fn current_session(&self, device_id: &DeviceId) -> StoreResult<Option<Session>> {
        let conn = self.conn.lock().unwrap();

        let raw = conn
            .query_row(
                &format!(
                    "SELECT {} FROM sessions WHERE device_id = ? AND status IN ('active', 'paused')",
                    SESSION_COLS
                ),
                [device_id.as_str()],
                RawSession::from_row,
            )
            .optional()?;

        raw.map(RawSession::into_session).transpose()
    }

    fn active_sessions(&self) -> StoreResult<Vec<Session>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions WHERE status = 'active' ORDER BY start_time",
            SESSION_COLS
        ))?;
        let rows = stmt.query_map([], RawSession::from_row)?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?.into_session()?);
        }
        Ok(sessions)
    }

    fn list_sessions(&self, limit: Option<u32>) -> StoreResult<Vec<Session>> {
        let conn = self.conn.lock().unwrap();

        // A negative LIMIT disables it
        let limit = limit.map(i64::from).unwrap_or(-1);
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions ORDER BY start_time DESC LIMIT ?",
            SESSION_COLS
        ))?;
        let rows = stmt.query_map([limit], RawSession::from_row)?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?.into_session()?);
        }
        Ok(sessions)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
