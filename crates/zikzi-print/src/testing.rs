// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fixtures shared by the server tests: a scripted stand-in for the
// converter binary, a gateway context over an in-memory store, and a store
// whose intake transition fails on demand.

use std::net::IpAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};

use zikzi_core::config::{ConverterConfig, GatewayConfig};
use zikzi_core::error::{Result, ZikziError};
use zikzi_core::repository::GatewayStore;
use zikzi_core::types::{
    IpRegistration, JobId, JobIntake, JobOutcome, PrintJob, Token, User, UserId,
};
use zikzi_document::ConversionPipeline;

use crate::context::GatewayContext;
use crate::store::SqliteStore;

#[derive(Debug, Clone, Copy)]
pub(crate) enum FakeConverter {
    /// Writes every requested output and reports one page.
    Succeeds,
    /// Exits non-zero for every invocation.
    Fails,
}

/// Write the fake converter script into `dir`.
pub(crate) fn fake_converter(dir: &Path, converter: FakeConverter) -> PathBuf {
    let body = match converter {
        FakeConverter::Succeeds => {
            "out=\"\"\ncount=\"\"\n\
             for arg in \"$@\"; do\n\
               case \"$arg\" in\n\
                 -sOutputFile=*) out=\"${arg#-sOutputFile=}\" ;;\n\
                 -dNODISPLAY) count=1 ;;\n\
               esac\n\
             done\n\
             if [ -n \"$count\" ]; then echo 1; exit 0; fi\n\
             echo converted > \"$out\"\n"
        }
        FakeConverter::Fails => "echo 'Error: /undefined in showpage' >&2\nexit 1\n",
    };

    let path = dir.join("fake-gs");
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub(crate) fn fake_pipeline(dir: &Path, converter: FakeConverter) -> ConversionPipeline {
    ConversionPipeline::new(&ConverterConfig {
        binary: fake_converter(dir, converter),
        timeout_secs: 10,
    })
}

/// A context rooted at `dir` with a succeeding converter.
pub(crate) fn test_context(
    dir: &Path,
    configure: impl FnOnce(&mut GatewayConfig),
) -> (Arc<SqliteStore>, Arc<GatewayContext>) {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let ctx = context_over(dir, store.clone(), configure);
    (store, ctx)
}

/// Like `test_context`, but the first `failures` calls to
/// `begin_processing` return a database error.
pub(crate) fn failing_intake_context(
    dir: &Path,
    failures: usize,
    configure: impl FnOnce(&mut GatewayConfig),
) -> (Arc<SqliteStore>, Arc<GatewayContext>) {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let failing = Arc::new(FailingIntakeStore {
        inner: store.clone(),
        failures: AtomicUsize::new(failures),
    });
    let ctx = context_over(dir, failing, configure);
    (store, ctx)
}

fn context_over(
    dir: &Path,
    store: Arc<dyn GatewayStore>,
    configure: impl FnOnce(&mut GatewayConfig),
) -> Arc<GatewayContext> {
    let mut config = GatewayConfig {
        storage_root: dir.join("storage"),
        database_path: dir.join("zikzi.db"),
        ..GatewayConfig::default()
    };
    configure(&mut config);

    let pipeline = fake_pipeline(dir, FakeConverter::Succeeds);
    Arc::new(GatewayContext::with_pipeline(config, store, pipeline).unwrap())
}

struct FailingIntakeStore {
    inner: Arc<SqliteStore>,
    failures: AtomicUsize,
}

impl GatewayStore for FailingIntakeStore {
    fn create_job(&self, job: &PrintJob) -> Result<()> {
        self.inner.create_job(job)
    }

    fn get_job(&self, job_id: &JobId) -> Result<Option<PrintJob>> {
        self.inner.get_job(job_id)
    }

    fn begin_processing(&self, job_id: &JobId, intake: &JobIntake) -> Result<()> {
        let remaining = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if remaining.is_ok() {
            return Err(ZikziError::Database("database is locked".into()));
        }
        self.inner.begin_processing(job_id, intake)
    }

    fn finish_job(&self, job_id: &JobId, outcome: &JobOutcome) -> Result<()> {
        self.inner.finish_job(job_id, outcome)
    }

    fn recent_jobs(&self, user_id: Option<&UserId>, limit: usize) -> Result<Vec<PrintJob>> {
        self.inner.recent_jobs(user_id, limit)
    }

    fn count_queued_jobs(&self) -> Result<u64> {
        self.inner.count_queued_jobs()
    }

    fn active_ip_registration(
        &self,
        ip: IpAddr,
        now: DateTime<Utc>,
    ) -> Result<Option<IpRegistration>> {
        self.inner.active_ip_registration(ip, now)
    }

    fn find_user_by_name(&self, username: &str) -> Result<Option<User>> {
        self.inner.find_user_by_name(username)
    }

    fn active_tokens(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<Vec<Token>> {
        self.inner.active_tokens(user_id, now)
    }

    fn touch_token(&self, token_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.inner.touch_token(token_id, at)
    }
}
