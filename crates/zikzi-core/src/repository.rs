// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Store interface consumed by the intake servers, the auth resolver, and the
// conversion worker.  Account management (users, tokens, registrations) is
// owned elsewhere; the protocol layer only reads it, plus the single
// `touch_token` write.

use std::net::IpAddr;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    IpRegistration, JobId, JobIntake, JobOutcome, PrintJob, Token, User, UserId,
};

/// Keyed lookups and guarded job transitions.
///
/// Implementations serialise their own writes; callers add no locking.
/// Methods are synchronous and short, so async callers invoke them inline.
pub trait GatewayStore: Send + Sync {
    /// Insert a job in `Received` state.
    fn create_job(&self, job: &PrintJob) -> Result<()>;

    fn get_job(&self, job_id: &JobId) -> Result<Option<PrintJob>>;

    /// `Received -> Processing`, recording document metadata.
    fn begin_processing(&self, job_id: &JobId, intake: &JobIntake) -> Result<()>;

    /// `Processing -> Completed | Failed`, setting `processed_at` once.
    fn finish_job(&self, job_id: &JobId, outcome: &JobOutcome) -> Result<()>;

    /// Newest first, optionally restricted to one owner.
    fn recent_jobs(&self, user_id: Option<&UserId>, limit: usize) -> Result<Vec<PrintJob>>;

    /// Jobs in `Received` or `Processing`.
    fn count_queued_jobs(&self) -> Result<u64>;

    /// Active, unexpired registration for `ip` at `now`.
    fn active_ip_registration(
        &self,
        ip: IpAddr,
        now: DateTime<Utc>,
    ) -> Result<Option<IpRegistration>>;

    fn find_user_by_name(&self, username: &str) -> Result<Option<User>>;

    /// Active, unexpired tokens owned by `user_id` at `now`.
    fn active_tokens(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<Vec<Token>>;

    /// Record a successful token authentication.
    fn touch_token(&self, token_id: i64, at: DateTime<Utc>) -> Result<()>;
}
