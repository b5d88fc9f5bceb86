// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// HTTP Digest authentication (RFC 7616, MD5 with qop=auth) -- parameter
// parsing, response computation, and challenge header values.

use std::collections::HashMap;

use crate::integrity::{constant_time_eq, md5_colon_joined};

/// Client-supplied parameters from an `Authorization: Digest ...` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestCredentials {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    pub response: String,
    pub nc: String,
    pub cnonce: String,
    pub qop: Option<String>,
}

impl DigestCredentials {
    /// Parse the parameter list that follows the `Digest` scheme token.
    ///
    /// Values may be quoted (commas allowed inside) or bare tokens.  Returns
    /// `None` when any of username, nonce, uri or response is missing.
    pub fn parse(params: &str) -> Option<Self> {
        let map = parse_params(params);
        let take = |key: &str| map.get(key).cloned();

        Some(Self {
            username: take("username")?,
            realm: take("realm").unwrap_or_default(),
            nonce: take("nonce")?,
            uri: take("uri")?,
            response: take("response")?,
            nc: take("nc").unwrap_or_default(),
            cnonce: take("cnonce").unwrap_or_default(),
            qop: take("qop").filter(|q| !q.is_empty()),
        })
    }

    /// The response a client holding `ha1` should have sent.
    pub fn expected_response(&self, ha1: &str, method: &str) -> String {
        let ha2 = md5_colon_joined(&[method, &self.uri]);
        match &self.qop {
            Some(qop) => md5_colon_joined(&[ha1, &self.nonce, &self.nc, &self.cnonce, qop, &ha2]),
            None => md5_colon_joined(&[ha1, &self.nonce, &ha2]),
        }
    }

    /// Constant-time check of the client's response against `ha1`.
    pub fn verify(&self, ha1: &str, method: &str) -> bool {
        let expected = self.expected_response(ha1, method);
        constant_time_eq(
            expected.as_bytes(),
            self.response.to_ascii_lowercase().as_bytes(),
        )
    }
}

/// `HA1 = MD5(username:realm:secret)`.
pub fn ha1(username: &str, realm: &str, secret: &str) -> String {
    md5_colon_joined(&[username, realm, secret])
}

/// Value of the `WWW-Authenticate` header offering Basic.
pub fn basic_challenge(realm: &str) -> String {
    format!("Basic realm=\"{realm}\"")
}

/// Value of the `WWW-Authenticate` header offering Digest with `nonce`.
pub fn digest_challenge(realm: &str, nonce: &str) -> String {
    format!("Digest realm=\"{realm}\", nonce=\"{nonce}\", qop=\"auth\", algorithm=MD5")
}

/// Split `key=value, key="quoted, value"` into a lowercase-keyed map.
fn parse_params(input: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let bytes = input.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        // Skip separators.
        while pos < bytes.len() && (bytes[pos] == b',' || bytes[pos].is_ascii_whitespace()) {
            pos += 1;
        }
        let key_start = pos;
        while pos < bytes.len() && bytes[pos] != b'=' && bytes[pos] != b',' {
            pos += 1;
        }
        let key = input[key_start..pos].trim().to_ascii_lowercase();
        if pos >= bytes.len() || bytes[pos] == b',' {
            // Bare token with no value -- ignore.
            continue;
        }
        pos += 1; // '='
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }

        let value = if pos < bytes.len() && bytes[pos] == b'"' {
            pos += 1;
            let mut value = String::new();
            while pos < bytes.len() && bytes[pos] != b'"' {
                if bytes[pos] == b'\\' && pos + 1 < bytes.len() {
                    pos += 1;
                }
                let ch_len = utf8_len(bytes[pos]);
                let end = (pos + ch_len).min(bytes.len());
                value.push_str(&String::from_utf8_lossy(&bytes[pos..end]));
                pos = end;
            }
            pos += 1; // closing quote
            value
        } else {
            let start = pos;
            while pos < bytes.len() && bytes[pos] != b',' {
                pos += 1;
            }
            input[start..pos].trim().to_owned()
        };

        if !key.is_empty() {
            out.insert(key, value);
        }
    }
    out
}

/// Byte length of the UTF-8 sequence starting with `lead`.
fn utf8_len(lead: u8) -> usize {
    match lead {
        0xF0..=0xFF => 4,
        0xE0..=0xEF => 3,
        0xC0..=0xDF => 2,
        _ => 1,
    }
}
