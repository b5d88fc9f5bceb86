// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SQLite-backed gateway store.
//
// Holds job records plus the read-mostly account tables (users, tokens, IP
// registrations).  Document bytes live on disk under the storage root; the
// store only records their paths.  Job status transitions are guarded in
// SQL so an out-of-order update fails instead of silently overwriting.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, instrument};

use zikzi_core::GatewayStore;
use zikzi_core::error::{Result, ZikziError};
use zikzi_core::types::{
    IpRegistration, JobId, JobIntake, JobOutcome, JobStatus, PrintJob, Token, User, UserId,
};

/// Schema, created on open.
const CREATE_TABLES_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        user_id TEXT,
        source_ip TEXT NOT NULL,
        hostname TEXT NOT NULL DEFAULT '',
        document_name TEXT NOT NULL DEFAULT '',
        app_name TEXT NOT NULL DEFAULT '',
        os_version TEXT NOT NULL DEFAULT '',
        original_file TEXT,
        pdf_file TEXT,
        thumbnail_file TEXT,
        page_count INTEGER NOT NULL DEFAULT 0,
        file_size INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        processed_at TEXT,
        error TEXT
    );
    CREATE INDEX IF NOT EXISTS jobs_user_created ON jobs (user_id, created_at);

    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT,
        digest_ha1 TEXT,
        allow_password_auth INTEGER NOT NULL DEFAULT 0,
        is_active INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS tokens (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        value TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        expires_at TEXT,
        last_used_at TEXT,
        last_used_ip TEXT
    );

    CREATE TABLE IF NOT EXISTS ip_registrations (
        ip_address TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        expires_at TEXT
    );
"#;

const JOB_COLUMNS: &str = "id, user_id, source_ip, hostname, document_name, app_name, \
     os_version, original_file, pdf_file, thumbnail_file, page_count, file_size, status, \
     created_at, processed_at, error";

/// Gateway store backed by a single SQLite connection.
///
/// The connection sits behind a mutex, which serialises all writes.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` in WAL mode.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path.as_ref())
            .map_err(|e| ZikziError::Database(format!("open: {e}")))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| ZikziError::Database(format!("WAL pragma: {e}")))?;

        conn.execute_batch(CREATE_TABLES_SQL)
            .map_err(|e| ZikziError::Database(format!("create tables: {e}")))?;

        info!("gateway database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ZikziError::Database(format!("open in-memory: {e}")))?;

        conn.execute_batch(CREATE_TABLES_SQL)
            .map_err(|e| ZikziError::Database(format!("create tables: {e}")))?;

        debug!("in-memory gateway database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ZikziError::Database("connection lock poisoned".into()))
    }

    // -- Account bootstrap ------------------------------------------------

    #[instrument(skip(self, user), fields(user = %user.username))]
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO users (id, username, password_hash, digest_ha1,
                 allow_password_auth, is_active) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user.id.0,
                    user.username,
                    user.password_hash,
                    user.digest_ha1,
                    user.allow_password_auth,
                    user.is_active,
                ],
            )
            .map_err(|e| ZikziError::Database(format!("insert user: {e}")))?;
        Ok(())
    }

    /// Insert a token and return its row id.
    #[instrument(skip(self, user_id, value), fields(user_id = %user_id))]
    pub fn insert_token(
        &self,
        user_id: &UserId,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tokens (user_id, value, is_active, expires_at) VALUES (?1, ?2, 1, ?3)",
            params![user_id.0, value, expires_at.map(timestamp)],
        )
        .map_err(|e| ZikziError::Database(format!("insert token: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    #[instrument(skip(self, reg), fields(ip = %reg.ip_address))]
    pub fn insert_ip_registration(&self, reg: &IpRegistration) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO ip_registrations (ip_address, user_id, is_active, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    reg.ip_address.to_canonical().to_string(),
                    reg.user_id.0,
                    reg.is_active,
                    reg.expires_at.map(timestamp),
                ],
            )
            .map_err(|e| ZikziError::Database(format!("insert registration: {e}")))?;
        Ok(())
    }

    /// Current status of `job_id`, used to explain a rejected transition.
    fn transition_error(conn: &Connection, job_id: &JobId, to: JobStatus) -> ZikziError {
        let current: Option<String> = match conn
            .query_row(
                "SELECT status FROM jobs WHERE id = ?1",
                params![job_id.to_string()],
                |row| row.get(0),
            )
            .optional()
        {
            Ok(status) => status,
            Err(e) => return ZikziError::Database(format!("read status: {e}")),
        };

        match current.as_deref().and_then(JobStatus::parse) {
            Some(from) => ZikziError::InvalidTransition {
                job_id: *job_id,
                from,
                to,
            },
            None => ZikziError::JobNotFound(*job_id),
        }
    }
}

impl GatewayStore for SqliteStore {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    fn create_job(&self, job: &PrintJob) -> Result<()> {
        self.conn()?
            .execute(
                &format!(
                    "INSERT INTO jobs ({JOB_COLUMNS}) VALUES
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
                ),
                params![
                    job.id.to_string(),
                    job.user_id.as_ref().map(|u| u.0.as_str()),
                    job.source_ip,
                    job.hostname,
                    job.document_name,
                    job.app_name,
                    job.os_version,
                    job.original_file.as_deref().map(path_text),
                    job.pdf_file.as_deref().map(path_text),
                    job.thumbnail_file.as_deref().map(path_text),
                    job.page_count,
                    job.file_size as i64,
                    job.status.as_str(),
                    timestamp(job.created_at),
                    job.processed_at.map(timestamp),
                    job.error,
                ],
            )
            .map_err(|e| ZikziError::Database(format!("insert job: {e}")))?;

        info!(job_id = %job.id, source_ip = %job.source_ip, "job received");
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    fn get_job(&self, job_id: &JobId) -> Result<Option<PrintJob>> {
        self.conn()?
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![job_id.to_string()],
                row_to_print_job,
            )
            .optional()
            .map_err(|e| ZikziError::Database(format!("get job: {e}")))
    }

    #[instrument(skip(self, intake), fields(job_id = %job_id))]
    fn begin_processing(&self, job_id: &JobId, intake: &JobIntake) -> Result<()> {
        let conn = self.conn()?;
        let rows = conn
            .execute(
                "UPDATE jobs SET status = 'processing', document_name = ?1, hostname = ?2,
                 app_name = ?3, original_file = ?4, file_size = ?5
                 WHERE id = ?6 AND status = 'received'",
                params![
                    intake.document_name,
                    intake.hostname,
                    intake.app_name,
                    path_text(&intake.original_file),
                    intake.file_size as i64,
                    job_id.to_string(),
                ],
            )
            .map_err(|e| ZikziError::Database(format!("begin processing: {e}")))?;

        if rows == 0 {
            return Err(Self::transition_error(&conn, job_id, JobStatus::Processing));
        }
        debug!(job_id = %job_id, bytes = intake.file_size, "job processing");
        Ok(())
    }

    #[instrument(skip(self, outcome), fields(job_id = %job_id, status = outcome.status().as_str()))]
    fn finish_job(&self, job_id: &JobId, outcome: &JobOutcome) -> Result<()> {
        let conn = self.conn()?;
        let now = timestamp(Utc::now());
        let result = match outcome {
            JobOutcome::Completed {
                pdf_file,
                thumbnail_file,
                page_count,
                error,
            } => conn.execute(
                "UPDATE jobs SET status = 'completed', pdf_file = ?1, thumbnail_file = ?2,
                 page_count = ?3, error = ?4, processed_at = ?5
                 WHERE id = ?6 AND status = 'processing'",
                params![
                    path_text(pdf_file),
                    thumbnail_file.as_deref().map(path_text),
                    page_count,
                    error,
                    now,
                    job_id.to_string(),
                ],
            ),
            JobOutcome::Failed { error } => conn.execute(
                "UPDATE jobs SET status = 'failed', error = ?1, processed_at = ?2
                 WHERE id = ?3 AND status = 'processing'",
                params![error, now, job_id.to_string()],
            ),
        };
        let rows = result.map_err(|e| ZikziError::Database(format!("finish job: {e}")))?;

        if rows == 0 {
            return Err(Self::transition_error(&conn, job_id, outcome.status()));
        }
        info!(job_id = %job_id, status = outcome.status().as_str(), "job finished");
        Ok(())
    }

    #[instrument(skip(self))]
    fn recent_jobs(&self, user_id: Option<&UserId>, limit: usize) -> Result<Vec<PrintJob>> {
        let conn = self.conn()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let collect = |e: rusqlite::Error| ZikziError::Database(format!("recent jobs: {e}"));

        let jobs = match user_id {
            Some(user) => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {JOB_COLUMNS} FROM jobs WHERE user_id = ?1
                         ORDER BY created_at DESC, rowid DESC LIMIT ?2"
                    ))
                    .map_err(collect)?;
                stmt.query_map(params![user.0, limit], row_to_print_job)
                    .map_err(collect)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(collect)?
            }
            None => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {JOB_COLUMNS} FROM jobs
                         ORDER BY created_at DESC, rowid DESC LIMIT ?1"
                    ))
                    .map_err(collect)?;
                stmt.query_map(params![limit], row_to_print_job)
                    .map_err(collect)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(collect)?
            }
        };

        debug!(count = jobs.len(), "retrieved recent jobs");
        Ok(jobs)
    }

    #[instrument(skip(self))]
    fn count_queued_jobs(&self) -> Result<u64> {
        let count: i64 = self
            .conn()?
            .query_row(
                "SELECT COUNT(*) FROM jobs WHERE status IN ('received', 'processing')",
                [],
                |row| row.get(0),
            )
            .map_err(|e| ZikziError::Database(format!("count queued: {e}")))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    #[instrument(skip(self))]
    fn active_ip_registration(
        &self,
        ip: IpAddr,
        now: DateTime<Utc>,
    ) -> Result<Option<IpRegistration>> {
        let reg = self
            .conn()?
            .query_row(
                "SELECT ip_address, user_id, is_active, expires_at FROM ip_registrations
                 WHERE ip_address = ?1 AND is_active = 1",
                params![ip.to_canonical().to_string()],
                row_to_registration,
            )
            .optional()
            .map_err(|e| ZikziError::Database(format!("registration lookup: {e}")))?;
        Ok(reg.filter(|r| r.is_usable_at(now)))
    }

    #[instrument(skip(self))]
    fn find_user_by_name(&self, username: &str) -> Result<Option<User>> {
        self.conn()?
            .query_row(
                "SELECT id, username, password_hash, digest_ha1, allow_password_auth, is_active
                 FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok(User {
                        id: UserId(row.get(0)?),
                        username: row.get(1)?,
                        password_hash: row.get(2)?,
                        digest_ha1: row.get(3)?,
                        allow_password_auth: row.get(4)?,
                        is_active: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(|e| ZikziError::Database(format!("user lookup: {e}")))
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    fn active_tokens(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<Vec<Token>> {
        let conn = self.conn()?;
        let collect = |e: rusqlite::Error| ZikziError::Database(format!("token lookup: {e}"));
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, value, is_active, expires_at, last_used_at, last_used_ip
                 FROM tokens WHERE user_id = ?1 AND is_active = 1 ORDER BY id",
            )
            .map_err(collect)?;
        let tokens = stmt
            .query_map(params![user_id.0], row_to_token)
            .map_err(collect)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(collect)?;
        Ok(tokens.into_iter().filter(|t| t.is_usable_at(now)).collect())
    }

    #[instrument(skip(self))]
    fn touch_token(&self, token_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE tokens SET last_used_at = ?1 WHERE id = ?2",
                params![timestamp(at), token_id],
            )
            .map_err(|e| ZikziError::Database(format!("touch token: {e}")))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn conversion_error<E>(column: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_timestamp(column: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e))
}

fn parse_optional_timestamp(
    column: usize,
    text: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    text.map(|t| parse_timestamp(column, &t)).transpose()
}

/// Map a SQLite row to a `PrintJob`.
///
/// Column indices follow `JOB_COLUMNS`.
fn row_to_print_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<PrintJob> {
    let id_str: String = row.get(0)?;
    let uuid = uuid::Uuid::parse_str(&id_str).map_err(|e| conversion_error(0, e))?;

    let status_str: String = row.get(12)?;
    let status = JobStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            12,
            rusqlite::types::Type::Text,
            format!("unknown status {status_str:?}").into(),
        )
    })?;

    let created_at_str: String = row.get(13)?;

    Ok(PrintJob {
        id: JobId(uuid),
        user_id: row.get::<_, Option<String>>(1)?.map(UserId),
        source_ip: row.get(2)?,
        hostname: row.get(3)?,
        document_name: row.get(4)?,
        app_name: row.get(5)?,
        os_version: row.get(6)?,
        original_file: row.get::<_, Option<String>>(7)?.map(PathBuf::from),
        pdf_file: row.get::<_, Option<String>>(8)?.map(PathBuf::from),
        thumbnail_file: row.get::<_, Option<String>>(9)?.map(PathBuf::from),
        page_count: row.get(10)?,
        file_size: u64::try_from(row.get::<_, i64>(11)?).unwrap_or(0),
        status,
        created_at: parse_timestamp(13, &created_at_str)?,
        processed_at: parse_optional_timestamp(14, row.get(14)?)?,
        error: row.get(15)?,
    })
}

fn row_to_registration(row: &rusqlite::Row<'_>) -> rusqlite::Result<IpRegistration> {
    let ip_str: String = row.get(0)?;
    Ok(IpRegistration {
        ip_address: ip_str.parse().map_err(|e| conversion_error(0, e))?,
        user_id: UserId(row.get(1)?),
        is_active: row.get(2)?,
        expires_at: parse_optional_timestamp(3, row.get(3)?)?,
    })
}

fn row_to_token(row: &rusqlite::Row<'_>) -> rusqlite::Result<Token> {
    Ok(Token {
        id: row.get(0)?,
        user_id: UserId(row.get(1)?),
        value: row.get(2)?,
        is_active: row.get(3)?,
        expires_at: parse_optional_timestamp(4, row.get(4)?)?,
        last_used_at: parse_optional_timestamp(5, row.get(5)?)?,
        last_used_ip: row.get(6)?,
    })
}
