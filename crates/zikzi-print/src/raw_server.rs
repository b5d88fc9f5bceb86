// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raw PostScript intake (JetDirect style, port 9100 by default).
//
// A client connects, streams a PostScript document, and closes its side.
// There is no protocol framing and no reply: the source IP decides who owns
// the job, and DSC header comments supply the document metadata.
//
// Per connection:
//   1. resolve the owner from the IP registration table
//   2. create the job row (received)
//   3. stream to `originals/{job_id}.ps`, scanning DSC comments on the way
//   4. record the intake (processing) and dispatch conversion

use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use zikzi_core::error::Result;
use zikzi_core::types::{JobId, JobIntake, PrintJob, UserId};
use zikzi_document::{DscMetadata, DscScanner};

use crate::context::GatewayContext;
use crate::proxy_protocol::ProxyListener;

/// Read buffer per connection.
const CHUNK_SIZE: usize = 64 * 1024;

/// Raw socket print server.
pub struct RawServer {
    ctx: Arc<GatewayContext>,
    span: Span,
}

impl RawServer {
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self {
            ctx,
            span: info_span!("raw_server"),
        }
    }

    /// Accept connections until `shutdown` fires, then give in-flight
    /// uploads the configured grace period before cutting them off.
    pub async fn run(self, mut listener: ProxyListener, shutdown: CancellationToken) -> Result<()> {
        info!(parent: &self.span, addr = %listener.local_addr(), "raw print server listening");

        let tracker = TaskTracker::new();
        let force_close = CancellationToken::new();

        loop {
            let (stream, client) = tokio::select! {
                _ = shutdown.cancelled() => break,
                conn = listener.next_connection() => match conn {
                    Some(conn) => conn,
                    None => break,
                },
            };

            let ctx = Arc::clone(&self.ctx);
            let cancel = force_close.clone();
            let span = info_span!(parent: &self.span, "connection", peer = %client.source);
            tracker.spawn(
                async move {
                    debug!(proxied = client.is_proxied(), "connection accepted");
                    handle_connection(&ctx, stream, client.ip(), &cancel).await;
                }
                .instrument(span),
            );
        }

        drop(listener);
        tracker.close();

        let grace = self.ctx.config.shutdown_grace();
        if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
            warn!(parent: &self.span, open = tracker.len(), "grace period over, closing raw connections");
            force_close.cancel();
            tracker.wait().await;
        }
        info!(parent: &self.span, "raw print server stopped");
        Ok(())
    }
}

/// Handle one raw connection from `client_ip` to completion.
///
/// Every failure is logged and ends the connection; nothing is sent back.
pub(crate) async fn handle_connection<R>(
    ctx: &GatewayContext,
    mut reader: R,
    client_ip: IpAddr,
    cancel: &CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let owner = match lookup_owner(ctx, client_ip) {
        Ok(Some(user_id)) => Some(user_id),
        Ok(None) if !ctx.config.auth.allow_unregistered => {
            debug!(client = %client_ip, "unregistered source, closing");
            return;
        }
        Ok(None) => None,
        Err(e) => {
            error!(client = %client_ip, error = %e, "registration lookup failed");
            return;
        }
    };

    let job = PrintJob::new(owner, client_ip);
    if let Err(e) = ctx.store.create_job(&job) {
        error!(client = %client_ip, error = %e, "failed to create job");
        return;
    }
    let job_id = job.id;
    let original_file = ctx.jobs.original_path(&job_id, "ps");
    info!(job_id = %job_id, orphaned = job.is_orphaned(), "receiving raw job");

    let mut intake = JobIntake {
        original_file,
        ..JobIntake::default()
    };

    match receive(&mut reader, &intake.original_file, cancel).await {
        Ok((meta, bytes)) => {
            intake.file_size = bytes;
            intake.document_name = meta.title.unwrap_or_default();
            intake.hostname = meta.for_user.unwrap_or_default();
            intake.app_name = meta.creator.unwrap_or_default();
            debug!(job_id = %job_id, bytes, "document received");
            if let Err(e) = ctx.jobs.begin(job_id, &intake) {
                error!(job_id = %job_id, error = %e, "failed to record intake");
                ctx.jobs
                    .abandon(&job_id, &intake, format!("failed to record intake: {e}"));
            }
        }
        Err((e, bytes)) => {
            warn!(job_id = %job_id, error = %e, bytes, "raw upload aborted");
            intake.file_size = bytes;
            abandon(ctx, &job_id, &intake, e);
        }
    }
}

fn lookup_owner(ctx: &GatewayContext, ip: IpAddr) -> Result<Option<UserId>> {
    Ok(ctx
        .store
        .active_ip_registration(ip, Utc::now())?
        .map(|reg| reg.user_id))
}

fn abandon(ctx: &GatewayContext, job_id: &JobId, intake: &JobIntake, e: io::Error) {
    ctx.jobs.abandon(job_id, intake, format!("upload failed: {e}"));
}

/// Copy `reader` to `path` until EOF, scanning DSC comments from the same
/// chunks.  On failure the byte count written so far is returned with the error.
async fn receive<R>(
    reader: &mut R,
    path: &std::path::Path,
    cancel: &CancellationToken,
) -> std::result::Result<(DscMetadata, u64), (io::Error, u64)>
where
    R: AsyncRead + Unpin,
{
    let mut file = tokio::fs::File::create(path).await.map_err(|e| (e, 0))?;
    let mut scanner = DscScanner::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written: u64 = 0;

    loop {
        let n = tokio::select! {
            read = reader.read(&mut buf) => read.map_err(|e| (e, written))?,
            _ = cancel.cancelled() => {
                return Err((io::Error::new(io::ErrorKind::Interrupted, "gateway shutting down"), written));
            }
        };
        if n == 0 {
            break;
        }
        scanner.feed(&buf[..n]);
        file.write_all(&buf[..n]).await.map_err(|e| (e, written))?;
        written += n as u64;
    }

    file.flush().await.map_err(|e| (e, written))?;
    Ok((scanner.finish(), written))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
