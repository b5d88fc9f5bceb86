// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// zikzi-security: authentication for the intake servers.
//
// Digest nonces with a cancellable expiry sweeper, Argon2 password checks,
// HTTP Basic/Digest credential handling, and the resolver that maps a
// request to a user by registered IP or credentials.

pub mod auth;
pub mod credentials;
pub mod digest;
pub mod integrity;
pub mod nonce;

pub use auth::{AuthOutcome, AuthRequest, AuthResolver};
pub use digest::DigestCredentials;
pub use integrity::{constant_time_eq, md5_hex};
pub use nonce::NonceCache;
