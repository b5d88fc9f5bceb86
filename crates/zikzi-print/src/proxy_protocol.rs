// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PROXY protocol v1/v2 support for both intake listeners.
//
// `ProxyListener` owns the TCP listener.  An acceptor task hands every new
// connection to its own handshake task, which applies the per-peer policy
// and reads the preamble under a timeout, so a slow peer never delays the
// others.  Finished handshakes are queued for `next_connection` (raw
// server) or axum's `serve` (IPP server).
//
// Only the header bytes are read off the socket (v1 up to CRLF, v2 by its
// length field) and handed to `proxy_protocol::parse`.  The payload that
// follows stays in the socket for the protocol handler.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use axum::extract::connect_info::Connected;
use axum::serve::{self, IncomingStream};
use proxy_protocol::{ProxyHeader, version1 as v1, version2 as v2};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span, warn};

use zikzi_core::config::ProxyConfig;
use zikzi_core::error::{Result, ZikziError};

use crate::trusted_proxy::TrustedProxyMatcher;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Binary signature that opens every v2 header.
pub const V2_SIGNATURE: [u8; 12] = [
    0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
];

/// Text prefix of a v1 header.
pub const V1_PREFIX: &[u8] = b"PROXY ";

/// Bytes read before deciding between v1 and v2.
const V1_SIGNATURE: &[u8] = b"PROXY";

/// Longest legal v1 header, CRLF included.
const V1_MAX_LEN: usize = 107;

/// v2 signature, version/command, family and length fields.
const V2_FIXED_LEN: usize = 16;

/// Handshakes waiting to be picked up by the server.
const ACCEPT_BACKLOG: usize = 128;

/// Pause between peeks while a header prefix is still ambiguous.
const PEEK_RETRY: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// What to do with a PROXY preamble on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyPolicy {
    /// Never look for a header; the physical peer is the client.
    Ignore,
    /// Parse a header if one is present, else use the physical peer.
    Use,
    /// Drop the connection unless a valid header is present.
    Require,
}

/// PROXY settings for one listener.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    enabled: bool,
    trusted: TrustedProxyMatcher,
    header_timeout: Duration,
}

impl ProxySettings {
    pub fn new(enabled: bool, trusted: TrustedProxyMatcher, header_timeout: Duration) -> Self {
        Self {
            enabled,
            trusted,
            header_timeout,
        }
    }

    /// PROXY support switched off.
    pub fn disabled() -> Self {
        Self::new(false, TrustedProxyMatcher::default(), Duration::from_secs(10))
    }

    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        Ok(Self::new(
            config.proxy_protocol,
            TrustedProxyMatcher::new(&config.proxy_protocol_trusted, false)?,
            config.header_timeout(),
        ))
    }

    /// Policy for a connection from the physical peer `ip`.
    pub fn policy_for(&self, ip: IpAddr) -> ProxyPolicy {
        if !self.enabled {
            ProxyPolicy::Ignore
        } else if !self.trusted.has_networks() {
            ProxyPolicy::Require
        } else if self.trusted.is_trusted(ip) {
            ProxyPolicy::Use
        } else {
            ProxyPolicy::Ignore
        }
    }
}

// ---------------------------------------------------------------------------
// Client address
// ---------------------------------------------------------------------------

/// Where a connection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr {
    /// The physical TCP peer.
    pub peer: SocketAddr,
    /// The client as reported by a PROXY header, or `peer` without one.
    pub source: SocketAddr,
}

impl ClientAddr {
    pub fn direct(peer: SocketAddr) -> Self {
        Self { peer, source: peer }
    }

    /// Resolved client IP.
    pub fn ip(&self) -> IpAddr {
        self.source.ip()
    }

    /// Whether a PROXY header changed the address.
    pub fn is_proxied(&self) -> bool {
        self.peer != self.source
    }
}

// ---------------------------------------------------------------------------
// Header parsing
// ---------------------------------------------------------------------------

/// Read one PROXY header from the start of `stream`.
///
/// Returns the source address it carries, or `None` for v1 `UNKNOWN`, v2
/// `LOCAL`, and the v2 UNSPEC/UNIX families.
pub async fn read_header<R>(stream: &mut R) -> Result<Option<SocketAddr>>
where
    R: AsyncRead + Unpin,
{
    let frame = read_frame(stream).await?;
    let header = proxy_protocol::parse(&mut frame.as_slice())
        .map_err(|e| proxy_error(format!("malformed header: {e}")))?;
    Ok(source_addr(&header))
}

/// Read exactly the bytes of one header, leaving the payload in `stream`.
async fn read_frame<R>(stream: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut frame = vec![0u8; V1_SIGNATURE.len()];
    stream.read_exact(&mut frame).await?;

    if frame == V1_SIGNATURE {
        while !frame.ends_with(b"\r\n") {
            if frame.len() >= V1_MAX_LEN {
                return Err(proxy_error("v1 header too long"));
            }
            frame.push(stream.read_u8().await?);
        }
        return Ok(frame);
    }

    frame.resize(V2_FIXED_LEN, 0);
    stream.read_exact(&mut frame[V1_SIGNATURE.len()..]).await?;
    if frame[..V2_SIGNATURE.len()] != V2_SIGNATURE {
        return Err(proxy_error("no PROXY signature"));
    }
    let len = u16::from_be_bytes([frame[14], frame[15]]) as usize;
    frame.resize(V2_FIXED_LEN + len, 0);
    stream.read_exact(&mut frame[V2_FIXED_LEN..]).await?;
    Ok(frame)
}

fn source_addr(header: &ProxyHeader) -> Option<SocketAddr> {
    match header {
        ProxyHeader::Version1 { addresses, .. } => match addresses {
            v1::ProxyAddresses::Ipv4 { source, .. } => Some(SocketAddr::V4(*source)),
            v1::ProxyAddresses::Ipv6 { source, .. } => Some(SocketAddr::V6(*source)),
            v1::ProxyAddresses::Unknown => None,
        },
        // Health checks from the proxy itself.
        ProxyHeader::Version2 {
            command: v2::ProxyCommand::Local,
            ..
        } => None,
        ProxyHeader::Version2 { addresses, .. } => match addresses {
            v2::ProxyAddresses::Ipv4 { source, .. } => Some(SocketAddr::V4(*source)),
            v2::ProxyAddresses::Ipv6 { source, .. } => Some(SocketAddr::V6(*source)),
            v2::ProxyAddresses::Unspec | v2::ProxyAddresses::Unix { .. } => None,
        },
        _ => None,
    }
}

/// Whether the next bytes on `stream` start a PROXY header.  Nothing is consumed.
async fn header_present(stream: &TcpStream) -> io::Result<bool> {
    let mut buf = [0u8; 12];
    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Ok(false);
        }
        let seen = &buf[..n];
        let v1 = V1_PREFIX.starts_with(&seen[..n.min(V1_PREFIX.len())]);
        let v2 = V2_SIGNATURE.starts_with(seen);
        if (v1 && n >= V1_PREFIX.len()) || (v2 && n == V2_SIGNATURE.len()) {
            return Ok(true);
        }
        if !v1 && !v2 {
            return Ok(false);
        }
        // A prefix of a signature: wait for more bytes.
        tokio::time::sleep(PEEK_RETRY).await;
    }
}

/// Apply `policy` to a freshly accepted connection.
pub async fn resolve_client(
    stream: &mut TcpStream,
    peer: SocketAddr,
    policy: ProxyPolicy,
) -> Result<ClientAddr> {
    let source = match policy {
        ProxyPolicy::Ignore => None,
        ProxyPolicy::Use => {
            if header_present(stream).await? {
                read_header(stream).await?
            } else {
                None
            }
        }
        ProxyPolicy::Require => {
            if !header_present(stream).await? {
                return Err(proxy_error("required header missing"));
            }
            read_header(stream).await?
        }
    };

    Ok(ClientAddr {
        peer,
        source: source.unwrap_or(peer),
    })
}

fn proxy_error(msg: impl Into<String>) -> ZikziError {
    ZikziError::ProxyProtocol(msg.into())
}

// ---------------------------------------------------------------------------
// ProxyListener
// ---------------------------------------------------------------------------

/// A TCP listener that resolves client addresses through PROXY headers.
pub struct ProxyListener {
    local_addr: SocketAddr,
    incoming: mpsc::Receiver<(TcpStream, ClientAddr)>,
    acceptor: JoinHandle<()>,
}

impl ProxyListener {
    /// Start accepting on `listener`.  Must be called inside a runtime.
    pub fn new(listener: TcpListener, settings: ProxySettings) -> io::Result<Self> {
        let local_addr = listener.local_addr()?;
        let (tx, incoming) = mpsc::channel(ACCEPT_BACKLOG);
        let span = info_span!("proxy_listener", addr = %local_addr);
        let acceptor = tokio::spawn(accept_loop(listener, settings, tx).instrument(span));
        Ok(Self {
            local_addr,
            incoming,
            acceptor,
        })
    }

    /// Bind `addr` and start accepting.
    pub async fn bind(addr: SocketAddr, settings: ProxySettings) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ZikziError::PrintServer(format!("bind {addr}: {e}")))?;
        Ok(Self::new(listener, settings)?)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The next connection whose handshake succeeded.
    pub async fn next_connection(&mut self) -> Option<(TcpStream, ClientAddr)> {
        self.incoming.recv().await
    }
}

impl Drop for ProxyListener {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    settings: ProxySettings,
    tx: mpsc::Sender<(TcpStream, ClientAddr)>,
) {
    loop {
        let (mut stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };

        if tx.is_closed() {
            return;
        }

        let policy = settings.policy_for(peer.ip());
        let header_timeout = settings.header_timeout;
        let tx = tx.clone();
        tokio::spawn(
            async move {
                let resolved =
                    tokio::time::timeout(header_timeout, resolve_client(&mut stream, peer, policy))
                        .await;
                let addr = match resolved {
                    Ok(Ok(addr)) => addr,
                    Ok(Err(e)) => {
                        debug!(peer = %peer, ?policy, error = %e, "dropping connection");
                        return;
                    }
                    Err(_) => {
                        debug!(peer = %peer, "PROXY header timed out");
                        return;
                    }
                };
                if addr.is_proxied() {
                    debug!(peer = %peer, client = %addr.source, "PROXY header accepted");
                }
                let _ = tx.send((stream, addr)).await;
            }
            .in_current_span(),
        );
    }
}

impl serve::Listener for ProxyListener {
    type Io = TcpStream;
    type Addr = ClientAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.next_connection().await {
            Some(conn) => conn,
            // The acceptor only stops when aborted; never hand out anything again.
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(ClientAddr::direct(self.local_addr))
    }
}

impl Connected<IncomingStream<'_, ProxyListener>> for ClientAddr {
    fn connect_info(stream: IncomingStream<'_, ProxyListener>) -> Self {
        *stream.remote_addr()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
