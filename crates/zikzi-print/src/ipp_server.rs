// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// IPP print server over HTTP (RFC 8010, RFC 8011).
//
// Clients POST an `application/ipp` body to `/ipp/print`, any path under
// `/ipp/`, or `/`.  axum handles the HTTP side; `handle_ipp` turns one
// request into a reply and is independent of the transport.
//
// # Supported operations
//
//   - Print-Job              (0x0002)  auth
//   - Validate-Job           (0x0004)  auth, always succeeds
//   - Cancel-Job             (0x0008)  auth, always succeeds, no mutation
//   - Get-Job-Attributes     (0x0009)
//   - Get-Jobs               (0x000A)  auth
//   - Get-Printer-Attributes (0x000B)
//
// Print-Job always answers job-id 1.  The persistent job id travels in the
// trailing segment of `job-uri`, which Get-Job-Attributes accepts back.
// Get-Jobs numbers its entries by position.

use std::net::IpAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, DefaultBodyLimit, State};
use axum::http::header::{ALLOW, AUTHORIZATION, CONTENT_TYPE, HOST, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use zikzi_core::config::AuthConfig;
use zikzi_core::error::{Result, ZikziError};
use zikzi_core::types::{JobId, JobIntake, JobStatus, PrintJob, UserId};
use zikzi_security::AuthRequest;

use crate::context::GatewayContext;
use crate::ipp_codec::*;
use crate::proxy_protocol::{ClientAddr, ProxyListener};
use crate::trusted_proxy::TrustedProxyMatcher;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Largest request body accepted.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024 * 1024; // 64 MiB

/// Name returned in printer-name.
const PRINTER_NAME: &str = "Zikzi";

/// job-id handed back by Print-Job.
const PRINT_JOB_ID: i32 = 1;

/// app name recorded on jobs submitted over IPP.
const IPP_APP_NAME: &str = "IPP Client";

/// Most jobs returned by Get-Jobs.
const GET_JOBS_LIMIT: usize = 100;

const SUPPORTED_OPERATIONS: [i32; 6] = [
    OP_PRINT_JOB as i32,
    OP_VALIDATE_JOB as i32,
    OP_CANCEL_JOB as i32,
    OP_GET_JOB_ATTRIBUTES as i32,
    OP_GET_JOBS as i32,
    OP_GET_PRINTER_ATTRIBUTES as i32,
];

/// The first entry is the default.
const DOCUMENT_FORMATS: [&str; 3] = [
    "application/postscript",
    "application/pdf",
    "application/octet-stream",
];

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

// ---------------------------------------------------------------------------
// Request / reply
// ---------------------------------------------------------------------------

/// The parts of an HTTP request the IPP layer uses.
#[derive(Debug, Clone)]
pub struct IppHttpRequest {
    pub method: Method,
    /// `Host` header, used to build printer and job URIs.
    pub host: Option<String>,
    pub authorization: Option<String>,
    /// Client IP after PROXY and forwarded-header resolution.
    pub client_ip: IpAddr,
    pub body: Bytes,
}

/// What to send back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IppReply {
    /// HTTP 200 with an `application/ipp` body.
    Ipp(Vec<u8>),
    /// HTTP 401 with the Basic and Digest `WWW-Authenticate` values.
    Challenge([String; 2]),
    /// HTTP 405.
    MethodNotAllowed,
}

impl IntoResponse for IppReply {
    fn into_response(self) -> Response {
        match self {
            Self::Ipp(body) => (
                [(CONTENT_TYPE, HeaderValue::from_static("application/ipp"))],
                body,
            )
                .into_response(),
            Self::Challenge(challenges) => {
                let mut response = StatusCode::UNAUTHORIZED.into_response();
                for challenge in challenges {
                    match HeaderValue::from_str(&challenge) {
                        Ok(value) => {
                            response.headers_mut().append(WWW_AUTHENTICATE, value);
                        }
                        Err(e) => warn!(error = %e, "unencodable challenge dropped"),
                    }
                }
                response
            }
            Self::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                [(ALLOW, HeaderValue::from_static("POST"))],
            )
                .into_response(),
        }
    }
}

// ---------------------------------------------------------------------------
// IppServer
// ---------------------------------------------------------------------------

/// IPP print server.
pub struct IppServer {
    ctx: Arc<GatewayContext>,
    span: Span,
}

impl IppServer {
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self {
            ctx,
            span: info_span!("ipp_server"),
        }
    }

    /// Serve until `shutdown` fires, then let open requests finish within
    /// the configured grace period.
    pub async fn run(self, listener: ProxyListener, shutdown: CancellationToken) -> Result<()> {
        info!(parent: &self.span, addr = %listener.local_addr(), "IPP print server listening");

        let app = router(Arc::clone(&self.ctx)).into_make_service_with_connect_info::<ClientAddr>();
        let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown.clone().cancelled_owned());
        let mut server = tokio::spawn(serve.into_future().instrument(self.span.clone()));

        tokio::select! {
            joined = &mut server => return server_result(joined),
            _ = shutdown.cancelled() => {}
        }

        let grace = self.ctx.config.shutdown_grace();
        match tokio::time::timeout(grace, &mut server).await {
            Ok(joined) => server_result(joined)?,
            Err(_) => {
                warn!(parent: &self.span, "grace period over, closing IPP connections");
                server.abort();
            }
        }
        info!(parent: &self.span, "IPP print server stopped");
        Ok(())
    }
}

fn server_result(joined: std::result::Result<std::io::Result<()>, JoinError>) -> Result<()> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ZikziError::PrintServer(format!("IPP server: {e}"))),
        Err(e) => Err(ZikziError::PrintServer(format!("IPP server task: {e}"))),
    }
}

/// HTTP routes for IPP.
pub fn router(ctx: Arc<GatewayContext>) -> Router {
    Router::new()
        .route("/", any(ipp_endpoint))
        .route("/ipp/{*path}", any(ipp_endpoint))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn ipp_endpoint(
    State(ctx): State<Arc<GatewayContext>>,
    ConnectInfo(client): ConnectInfo<ClientAddr>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> IppReply {
    let request = IppHttpRequest {
        method,
        host: header_str(&headers, &HOST).map(str::to_owned),
        authorization: header_str(&headers, &AUTHORIZATION).map(str::to_owned),
        client_ip: resolve_client_ip(client.ip(), &headers, &ctx.forwarded),
        body,
    };
    handle_ipp(&ctx, &request).await
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// The client IP for a request from `peer`: the first `X-Forwarded-For`
/// entry, else `X-Real-IP`, but only when `peer` is a trusted proxy.
pub fn resolve_client_ip(peer: IpAddr, headers: &HeaderMap, trusted: &TrustedProxyMatcher) -> IpAddr {
    if !trusted.is_trusted(peer) {
        return peer;
    }
    let forwarded = header_str(headers, &X_FORWARDED_FOR)
        .and_then(|list| list.split(',').next())
        .and_then(|first| first.trim().parse().ok());
    forwarded
        .or_else(|| header_str(headers, &X_REAL_IP).and_then(|ip| ip.trim().parse().ok()))
        .unwrap_or(peer)
}

// ---------------------------------------------------------------------------
// Request handling
// ---------------------------------------------------------------------------

enum Gate {
    Allowed(Option<UserId>),
    Challenge,
    Denied,
}

/// Answer one IPP request.
pub async fn handle_ipp(ctx: &GatewayContext, http: &IppHttpRequest) -> IppReply {
    if http.method != Method::POST {
        return IppReply::MethodNotAllowed;
    }

    let request = match parse_ipp_request(&http.body) {
        Ok(request) => request,
        Err(e) => {
            debug!(client = %http.client_ip, error = %e, "undecodable IPP request");
            return IppReply::Ipp(error_response(
                (IPP_VERSION_MAJOR, IPP_VERSION_MINOR),
                STATUS_CLIENT_ERROR_BAD_REQUEST,
                request_id_hint(&http.body),
                &e.to_string(),
            ));
        }
    };

    let operation = request.operation_id;
    let user = if requires_auth(operation) {
        match authorize(ctx, http) {
            Gate::Allowed(user) => user,
            Gate::Challenge => {
                return match ctx.auth.challenge_headers() {
                    Ok(challenges) => IppReply::Challenge(challenges),
                    Err(e) => {
                        error!(error = %e, "cannot issue challenge");
                        IppReply::Ipp(reply_error(&request, STATUS_SERVER_ERROR_INTERNAL, "cannot issue challenge"))
                    }
                };
            }
            Gate::Denied => {
                debug!(client = %http.client_ip, operation, "anonymous request refused");
                return IppReply::Ipp(reply_error(
                    &request,
                    STATUS_CLIENT_ERROR_NOT_AUTHORIZED,
                    "authentication required",
                ));
            }
        }
    } else {
        None
    };

    let body = match operation {
        OP_PRINT_JOB => handle_print_job(ctx, &request, http, user).await,
        OP_VALIDATE_JOB => reply_ok(&request),
        OP_CANCEL_JOB => reply_ok(&request),
        OP_GET_JOBS => handle_get_jobs(ctx, &request, http, user.as_ref()),
        OP_GET_JOB_ATTRIBUTES => handle_get_job_attributes(ctx, &request, http),
        OP_GET_PRINTER_ATTRIBUTES => handle_get_printer_attributes(ctx, &request, http),
        other => {
            debug!(operation = format_args!("0x{other:04x}"), "unsupported IPP operation");
            reply_error(
                &request,
                STATUS_SERVER_ERROR_OPERATION_NOT_SUPPORTED,
                "operation not supported",
            )
        }
    };
    IppReply::Ipp(body)
}

fn requires_auth(operation: u16) -> bool {
    matches!(
        operation,
        OP_PRINT_JOB | OP_VALIDATE_JOB | OP_GET_JOBS | OP_CANCEL_JOB
    )
}

fn authorize(ctx: &GatewayContext, http: &IppHttpRequest) -> Gate {
    let outcome = ctx.auth.resolve(
        &AuthRequest {
            authorization: http.authorization.as_deref(),
            method: http.method.as_str(),
        },
        http.client_ip,
    );

    if outcome.result.authenticated {
        Gate::Allowed(outcome.result.user_id)
    } else if outcome.must_challenge {
        Gate::Challenge
    } else if ctx.config.auth.allow_unregistered {
        Gate::Allowed(None)
    } else {
        Gate::Denied
    }
}

/// The request-id of an undecodable body, if its header is intact.
fn request_id_hint(body: &[u8]) -> u32 {
    body.get(4..HEADER_LEN)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u32::from_be_bytes)
        .unwrap_or(0)
}

fn printer_uri(ctx: &GatewayContext, http: &IppHttpRequest) -> String {
    match http.host.as_deref() {
        Some(host) => format!("ipp://{host}/ipp/print"),
        None => format!("ipp://localhost:{}/ipp/print", ctx.config.ipp_port),
    }
}

fn job_uri(printer_uri: &str, job_id: &JobId) -> String {
    format!("{printer_uri}/jobs/{job_id}")
}

// ---------------------------------------------------------------------------
// Operation handlers
// ---------------------------------------------------------------------------

/// Print-Job (0x0002): persist the document and start conversion.
async fn handle_print_job(
    ctx: &GatewayContext,
    request: &IppRequest,
    http: &IppHttpRequest,
    user: Option<UserId>,
) -> Vec<u8> {
    if request.document_data.is_empty() {
        return reply_error(request, STATUS_CLIENT_ERROR_BAD_REQUEST, "no document data");
    }

    let format = request.operation_string("document-format").unwrap_or_default();
    let extension = if format.contains("pdf") { "pdf" } else { "ps" };

    let job = PrintJob::new(user, http.client_ip);
    if let Err(e) = ctx.store.create_job(&job) {
        error!(client = %http.client_ip, error = %e, "failed to create job");
        return reply_error(request, STATUS_SERVER_ERROR_INTERNAL, "failed to create job");
    }

    let intake = JobIntake {
        document_name: request.operation_string("job-name").unwrap_or_default(),
        hostname: request
            .operation_string("requesting-user-name")
            .unwrap_or_default(),
        app_name: IPP_APP_NAME.into(),
        original_file: ctx.jobs.original_path(&job.id, extension),
        file_size: request.document_data.len() as u64,
    };

    if let Err(e) = tokio::fs::write(&intake.original_file, &request.document_data).await {
        error!(job_id = %job.id, error = %e, "failed to store document");
        ctx.jobs
            .abandon(&job.id, &intake, format!("failed to store document: {e}"));
        return reply_error(request, STATUS_SERVER_ERROR_INTERNAL, "failed to store document");
    }

    if let Err(e) = ctx.jobs.begin(job.id, &intake) {
        error!(job_id = %job.id, error = %e, "failed to record intake");
        ctx.jobs
            .abandon(&job.id, &intake, format!("failed to record intake: {e}"));
        return reply_error(request, STATUS_SERVER_ERROR_INTERNAL, "failed to record job");
    }

    info!(
        job_id = %job.id,
        bytes = intake.file_size,
        document = %intake.document_name,
        orphaned = job.is_orphaned(),
        "Print-Job accepted"
    );

    let mut resp = IppResponseBuilder::reply_to(request, STATUS_OK);
    resp.operation_group().text("status-message", "successful-ok");
    resp.begin_group(TAG_JOB_ATTRIBUTES)
        .integer("job-id", PRINT_JOB_ID)
        .uri("job-uri", &job_uri(&printer_uri(ctx, http), &job.id))
        .enum_attr("job-state", JOB_STATE_PROCESSING)
        .keyword("job-state-reasons", "job-printing");
    resp.build()
}

/// Get-Jobs (0x000A): the newest jobs, numbered by position.
fn handle_get_jobs(
    ctx: &GatewayContext,
    request: &IppRequest,
    http: &IppHttpRequest,
    user: Option<&UserId>,
) -> Vec<u8> {
    let jobs = match ctx.store.recent_jobs(user, GET_JOBS_LIMIT) {
        Ok(jobs) => jobs,
        Err(e) => {
            error!(error = %e, "failed to list jobs");
            return reply_error(request, STATUS_SERVER_ERROR_INTERNAL, "failed to list jobs");
        }
    };

    let printer_uri = printer_uri(ctx, http);
    let mut resp = IppResponseBuilder::reply_to(request, STATUS_OK);
    resp.operation_group();
    for (position, job) in (1..).zip(jobs.iter()) {
        resp.begin_group(TAG_JOB_ATTRIBUTES)
            .integer("job-id", position)
            .uri("job-uri", &job_uri(&printer_uri, &job.id))
            .enum_attr("job-state", job_state(job.status))
            .name_attr("job-name", &job.document_name);
    }
    debug!(count = jobs.len(), "Get-Jobs");
    resp.build()
}

/// Get-Job-Attributes (0x0009): look a job up by the id in its job-uri.
fn handle_get_job_attributes(
    ctx: &GatewayContext,
    request: &IppRequest,
    http: &IppHttpRequest,
) -> Vec<u8> {
    let job_id = request
        .operation_string("job-uri")
        .and_then(|uri| uri.rsplit('/').next().and_then(JobId::parse));
    let Some(job_id) = job_id else {
        return reply_error(request, STATUS_CLIENT_ERROR_NOT_FOUND, "job not found");
    };

    let job = match ctx.store.get_job(&job_id) {
        Ok(Some(job)) => job,
        Ok(None) => return reply_error(request, STATUS_CLIENT_ERROR_NOT_FOUND, "job not found"),
        Err(e) => {
            error!(job_id = %job_id, error = %e, "job lookup failed");
            return reply_error(request, STATUS_SERVER_ERROR_INTERNAL, "job lookup failed");
        }
    };

    let mut resp = IppResponseBuilder::reply_to(request, STATUS_OK);
    resp.operation_group();
    resp.begin_group(TAG_JOB_ATTRIBUTES)
        .uri("job-uri", &job_uri(&printer_uri(ctx, http), &job.id))
        .enum_attr("job-state", job_state(job.status))
        .keyword("job-state-reasons", job_state_reason(job.status))
        .name_attr("job-name", &job.document_name)
        .name_attr("job-originating-user-name", &job.hostname);
    if job.page_count > 0 {
        resp.integer(
            "job-media-sheets-completed",
            i32::try_from(job.page_count).unwrap_or(i32::MAX),
        );
    }
    resp.build()
}

/// Get-Printer-Attributes (0x000B).
fn handle_get_printer_attributes(
    ctx: &GatewayContext,
    request: &IppRequest,
    http: &IppHttpRequest,
) -> Vec<u8> {
    let queued = ctx.store.count_queued_jobs().unwrap_or_else(|e| {
        warn!(error = %e, "queued job count unavailable");
        0
    });
    let authentication = uri_authentication(&ctx.config.auth);

    let mut resp = IppResponseBuilder::reply_to(request, STATUS_OK);
    resp.operation_group();
    resp.begin_group(TAG_PRINTER_ATTRIBUTES)
        .uri("printer-uri-supported", &printer_uri(ctx, http))
        .name_attr("printer-name", PRINTER_NAME)
        .enum_attr("printer-state", PRINTER_STATE_IDLE)
        .keyword("printer-state-reasons", "none")
        .boolean("printer-is-accepting-jobs", true)
        .enums("operations-supported", &SUPPORTED_OPERATIONS)
        .mime_types("document-format-supported", &DOCUMENT_FORMATS)
        .mime_types("document-format-default", &DOCUMENT_FORMATS[..1])
        .charset("charset-configured", "utf-8")
        .charset("charset-supported", "utf-8")
        .natural_language("natural-language-configured", "en")
        .natural_language("generated-natural-language-supported", "en")
        .keywords("ipp-versions-supported", &["1.0", "1.1", "2.0"])
        .keywords("print-color-mode-supported", &["color", "monochrome"])
        .keyword("print-color-mode-default", "color")
        .keyword("uri-security-supported", "none")
        .keywords("uri-authentication-supported", &authentication)
        .integer("queued-job-count", i32::try_from(queued).unwrap_or(i32::MAX));
    resp.build()
}

/// Authentication schemes advertised for the printer URI.
fn uri_authentication(auth: &AuthConfig) -> Vec<&'static str> {
    let mut methods = Vec::new();
    if auth.ip_auth_enabled {
        methods.push("requesting-user-name");
    }
    if auth.login_auth_enabled {
        methods.extend(["basic", "digest"]);
    }
    if methods.is_empty() {
        methods.push("none");
    }
    methods
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

fn reply_ok(request: &IppRequest) -> Vec<u8> {
    let mut resp = IppResponseBuilder::reply_to(request, STATUS_OK);
    resp.operation_group().text("status-message", "successful-ok");
    resp.build()
}

fn reply_error(request: &IppRequest, status: u16, message: &str) -> Vec<u8> {
    error_response(
        (request.version_major, request.version_minor),
        status,
        request.request_id,
        message,
    )
}

/// Map `JobStatus` to an IPP job-state.
fn job_state(status: JobStatus) -> i32 {
    match status {
        JobStatus::Received => JOB_STATE_PENDING,
        JobStatus::Processing => JOB_STATE_PROCESSING,
        JobStatus::Completed => JOB_STATE_COMPLETED,
        JobStatus::Failed => JOB_STATE_ABORTED,
    }
}

/// Map `JobStatus` to a job-state-reasons keyword.
fn job_state_reason(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Received => "job-incoming",
        JobStatus::Processing => "job-printing",
        JobStatus::Completed => "job-completed-successfully",
        JobStatus::Failed => "job-aborted-by-system",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
