// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Zikzi Print: the two intake servers (raw PostScript and IPP over HTTP),
// the PROXY protocol listener in front of them, job dispatch to the
// conversion pipeline, and the SQLite store behind `zikzi-core`'s
// repository trait.

pub mod context;
pub mod ipp_codec;
pub mod ipp_server;
pub mod jobs;
pub mod proxy_protocol;
pub mod raw_server;
pub mod store;
pub mod trusted_proxy;

#[cfg(all(test, unix))]
mod testing;

pub use context::GatewayContext;
pub use ipp_server::IppServer;
pub use jobs::JobDispatcher;
pub use proxy_protocol::{ClientAddr, ProxyListener, ProxySettings};
pub use raw_server::RawServer;
pub use store::SqliteStore;
pub use trusted_proxy::TrustedProxyMatcher;
