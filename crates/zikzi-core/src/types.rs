// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Zikzi print gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier for a print job.
///
/// This is the persistent id; it is the trailing segment of every
/// `job-uri` handed out over IPP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse the textual form used in job URIs and file names.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a user owned by the account store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Lifecycle states of a print job.
///
/// Status only ever advances `Received -> Processing -> {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Row created, document not yet fully on disk.
    Received,
    /// Document persisted, conversion dispatched.
    Processing,
    /// PDF produced.
    Completed,
    /// Conversion (or intake) failed -- see the job error field.
    Failed,
}

impl JobStatus {
    /// Column value used by the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "received" => Some(Self::Received),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether no further mutation is allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `next` is the legal successor of `self`.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Received, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

/// A print job as persisted by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintJob {
    pub id: JobId,
    /// `None` marks an orphaned job (no attributable user).
    pub user_id: Option<UserId>,
    pub source_ip: String,
    pub hostname: String,
    pub document_name: String,
    pub app_name: String,
    pub os_version: String,
    pub original_file: Option<PathBuf>,
    pub pdf_file: Option<PathBuf>,
    pub thumbnail_file: Option<PathBuf>,
    pub page_count: u32,
    pub file_size: u64,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    /// Set once, at the terminal transition.
    pub processed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl PrintJob {
    /// A freshly received job with no document on disk yet.
    pub fn new(user_id: Option<UserId>, source_ip: IpAddr) -> Self {
        Self {
            id: JobId::new(),
            user_id,
            source_ip: source_ip.to_string(),
            hostname: String::new(),
            document_name: String::new(),
            app_name: String::new(),
            os_version: String::new(),
            original_file: None,
            pdf_file: None,
            thumbnail_file: None,
            page_count: 0,
            file_size: 0,
            status: JobStatus::Received,
            created_at: Utc::now(),
            processed_at: None,
            error: None,
        }
    }

    pub fn is_orphaned(&self) -> bool {
        self.user_id.is_none()
    }
}

/// Metadata recorded when a job moves from `Received` to `Processing`.
#[derive(Debug, Clone, Default)]
pub struct JobIntake {
    pub document_name: String,
    pub hostname: String,
    pub app_name: String,
    pub original_file: PathBuf,
    pub file_size: u64,
}

/// Terminal result recorded when a job leaves `Processing`.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed {
        pdf_file: PathBuf,
        thumbnail_file: Option<PathBuf>,
        page_count: u32,
        /// Non-fatal failure text (thumbnail rendering).
        error: Option<String>,
    },
    Failed {
        error: String,
    },
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Completed { .. } => JobStatus::Completed,
            Self::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// Maps a source IP to the user who owns submissions from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpRegistration {
    pub ip_address: IpAddr,
    pub user_id: UserId,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl IpRegistration {
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.is_none_or(|at| now < at)
    }
}

/// A user account as seen by the protocol layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Argon2 PHC string.
    pub password_hash: Option<String>,
    /// Precomputed `MD5(username:realm:password)` hex digest.
    pub digest_ha1: Option<String>,
    /// Whether the account password may be used by IPP clients.
    pub allow_password_auth: bool,
    pub is_active: bool,
}

/// An API/print token belonging to a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: i64,
    pub user_id: UserId,
    pub value: String,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_used_ip: Option<String>,
}

impl Token {
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.is_none_or(|at| now < at)
    }
}

/// How a request was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Ip,
    Basic,
    Digest,
}

/// Per-request authentication result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthResult {
    pub authenticated: bool,
    pub user_id: Option<UserId>,
    pub method: Option<AuthMethod>,
}

impl AuthResult {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(user_id: UserId, method: AuthMethod) -> Self {
        Self {
            authenticated: true,
            user_id: Some(user_id),
            method: Some(method),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn status_only_advances_forward() {
        use JobStatus::*;
        assert!(Received.can_advance_to(Processing));
        assert!(Processing.can_advance_to(Completed));
        assert!(Processing.can_advance_to(Failed));

        assert!(!Received.can_advance_to(Completed));
        assert!(!Received.can_advance_to(Failed));
        assert!(!Processing.can_advance_to(Received));
        assert!(!Completed.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Processing));
        assert!(!Completed.can_advance_to(Completed));
    }

    #[test]
    fn status_column_values_parse_back() {
        for status in [
            JobStatus::Received,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("cancelled"), None);
    }

    #[test]
    fn new_job_is_received_and_orphaned_without_user() {
        let job = PrintJob::new(None, "10.0.0.7".parse().unwrap());
        assert_eq!(job.status, JobStatus::Received);
        assert!(job.is_orphaned());
        assert_eq!(job.source_ip, "10.0.0.7");
        assert!(job.processed_at.is_none());
    }

    #[test]
    fn registration_expiry_is_exclusive() {
        let now = Utc::now();
        let mut reg = IpRegistration {
            ip_address: "10.0.0.1".parse().unwrap(),
            user_id: "u1".into(),
            is_active: true,
            expires_at: Some(now),
        };
        assert!(!reg.is_usable_at(now));
        reg.expires_at = Some(now + Duration::seconds(1));
        assert!(reg.is_usable_at(now));
        reg.is_active = false;
        assert!(!reg.is_usable_at(now));
    }

    #[test]
    fn token_without_expiry_stays_usable() {
        let token = Token {
            id: 1,
            user_id: "u1".into(),
            value: "T1".into(),
            is_active: true,
            expires_at: None,
            last_used_at: None,
            last_used_ip: None,
        };
        assert!(token.is_usable_at(Utc::now() + Duration::days(3650)));
    }

    #[test]
    fn job_id_parses_its_display_form() {
        let id = JobId::new();
        assert_eq!(JobId::parse(&id.to_string()), Some(id));
        assert_eq!(JobId::parse("not-a-uuid"), None);
    }
}
