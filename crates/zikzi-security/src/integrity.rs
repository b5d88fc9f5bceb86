// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Hash and comparison primitives for credential checks.

use md5::{Digest, Md5};
use subtle::ConstantTimeEq;

/// MD5 of `data` as a lowercase hex string (the HTTP Digest `H()` function).
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// MD5 over `parts` joined with `:`, as every Digest intermediate is built.
pub fn md5_colon_joined(parts: &[&str]) -> String {
    md5_hex(parts.join(":").as_bytes())
}

/// Compare two byte strings in constant time.  Differing lengths compare
/// unequal; lengths of tokens and hex digests are not secret.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
