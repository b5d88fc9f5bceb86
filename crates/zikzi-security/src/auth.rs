// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Request authentication: registered source IP first, then HTTP Basic or
// Digest credentials checked against account passwords and tokens.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, warn};

use zikzi_core::config::AuthConfig;
use zikzi_core::error::Result;
use zikzi_core::types::{AuthMethod, AuthResult, Token, User};
use zikzi_core::GatewayStore;

use crate::credentials::{decode_basic, verify_password};
use crate::digest::{DigestCredentials, basic_challenge, digest_challenge, ha1};
use crate::integrity::constant_time_eq;
use crate::nonce::NonceCache;

// ---------------------------------------------------------------------------
// Request / outcome
// ---------------------------------------------------------------------------

/// The parts of an HTTP request that authentication looks at.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthRequest<'a> {
    /// Raw `Authorization` header value, if any.
    pub authorization: Option<&'a str>,
    /// HTTP method, used in the Digest HA2.
    pub method: &'a str,
}

/// Result of [`AuthResolver::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthOutcome {
    pub result: AuthResult,
    /// The caller should answer with a 401 carrying fresh challenges.
    pub must_challenge: bool,
}

impl AuthOutcome {
    fn accepted(result: AuthResult) -> Self {
        Self {
            result,
            must_challenge: false,
        }
    }

    fn challenge() -> Self {
        Self {
            result: AuthResult::anonymous(),
            must_challenge: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Resolves requests to users.
///
/// Store lookups that fail are logged and count as a failed credential; the
/// protocol layer never surfaces store errors as auth errors.
pub struct AuthResolver {
    store: Arc<dyn GatewayStore>,
    nonces: Arc<NonceCache>,
    config: AuthConfig,
}

impl AuthResolver {
    pub fn new(store: Arc<dyn GatewayStore>, nonces: Arc<NonceCache>, config: AuthConfig) -> Self {
        Self {
            store,
            nonces,
            config,
        }
    }

    /// Authenticate `request` arriving from `client_ip`.
    pub fn resolve(&self, request: &AuthRequest<'_>, client_ip: IpAddr) -> AuthOutcome {
        if self.config.ip_auth_enabled {
            match self.store.active_ip_registration(client_ip, Utc::now()) {
                Ok(Some(reg)) => {
                    debug!(client = %client_ip, user_id = %reg.user_id, "authenticated by IP registration");
                    return AuthOutcome::accepted(AuthResult::authenticated(
                        reg.user_id,
                        AuthMethod::Ip,
                    ));
                }
                Ok(None) => {}
                Err(e) => error!(client = %client_ip, error = %e, "IP registration lookup failed"),
            }
        }

        if !self.config.login_auth_enabled {
            return AuthOutcome::default();
        }

        let Some(header) = request.authorization else {
            return AuthOutcome::challenge();
        };
        let (scheme, params) = header.trim().split_once(' ').unwrap_or((header.trim(), ""));

        let result = if scheme.eq_ignore_ascii_case("basic") {
            self.resolve_basic(params, client_ip)
        } else if scheme.eq_ignore_ascii_case("digest") {
            self.resolve_digest(params, request.method, client_ip)
        } else {
            debug!(client = %client_ip, scheme, "unrecognised authorization scheme");
            None
        };

        match result {
            Some(result) => AuthOutcome::accepted(result),
            None => AuthOutcome::challenge(),
        }
    }

    /// The two `WWW-Authenticate` values for a 401, issuing a fresh nonce.
    pub fn challenge_headers(&self) -> Result<[String; 2]> {
        let nonce = self.nonces.generate()?;
        Ok([
            basic_challenge(&self.config.realm),
            digest_challenge(&self.config.realm, &nonce),
        ])
    }

    // -- Basic ------------------------------------------------------------

    fn resolve_basic(&self, payload: &str, client_ip: IpAddr) -> Option<AuthResult> {
        let Some((username, credential)) = decode_basic(payload) else {
            debug!(client = %client_ip, "malformed Basic credentials");
            return None;
        };
        let user = self.lookup_user(&username)?;

        let password_ok = user.allow_password_auth
            && user
                .password_hash
                .as_deref()
                .is_some_and(|phc| verify_password(&credential, phc));
        if password_ok {
            debug!(client = %client_ip, user = %username, "authenticated by Basic password");
            return Some(AuthResult::authenticated(user.id, AuthMethod::Basic));
        }

        let matched = self
            .usable_tokens(&user)
            .into_iter()
            .find(|token| constant_time_eq(token.value.as_bytes(), credential.as_bytes()))?;
        self.touch(&matched);
        debug!(client = %client_ip, user = %username, "authenticated by Basic token");
        Some(AuthResult::authenticated(user.id, AuthMethod::Basic))
    }

    // -- Digest -----------------------------------------------------------

    fn resolve_digest(&self, params: &str, method: &str, client_ip: IpAddr) -> Option<AuthResult> {
        let Some(creds) = DigestCredentials::parse(params) else {
            debug!(client = %client_ip, "malformed Digest credentials");
            return None;
        };
        if !self.nonces.is_valid(&creds.nonce) {
            debug!(client = %client_ip, user = %creds.username, "stale or unknown nonce");
            return None;
        }
        let user = self.lookup_user(&creds.username)?;

        let password_ok = user.allow_password_auth
            && user
                .digest_ha1
                .as_deref()
                .is_some_and(|stored| creds.verify(&stored.to_ascii_lowercase(), method));
        if password_ok {
            debug!(client = %client_ip, user = %creds.username, "authenticated by Digest password");
            return Some(AuthResult::authenticated(user.id, AuthMethod::Digest));
        }

        let matched = self.usable_tokens(&user).into_iter().find(|token| {
            let token_ha1 = ha1(&creds.username, &self.config.realm, &token.value);
            creds.verify(&token_ha1, method)
        })?;
        self.touch(&matched);
        debug!(client = %client_ip, user = %creds.username, "authenticated by Digest token");
        Some(AuthResult::authenticated(user.id, AuthMethod::Digest))
    }

    // -- Store helpers ----------------------------------------------------

    fn lookup_user(&self, username: &str) -> Option<User> {
        match self.store.find_user_by_name(username) {
            Ok(Some(user)) if user.is_active => Some(user),
            Ok(_) => {
                debug!(user = %username, "unknown or inactive user");
                None
            }
            Err(e) => {
                error!(user = %username, error = %e, "user lookup failed");
                None
            }
        }
    }

    fn usable_tokens(&self, user: &User) -> Vec<Token> {
        let now = Utc::now();
        match self.store.active_tokens(&user.id, now) {
            Ok(tokens) => tokens.into_iter().filter(|t| t.is_usable_at(now)).collect(),
            Err(e) => {
                error!(user_id = %user.id, error = %e, "token lookup failed");
                Vec::new()
            }
        }
    }

    fn touch(&self, token: &Token) {
        if let Err(e) = self.store.touch_token(token.id, Utc::now()) {
            warn!(token_id = token.id, error = %e, "failed to record token use");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use chrono::{DateTime, Duration};

    use zikzi_core::types::{IpRegistration, JobId, JobIntake, JobOutcome, PrintJob, UserId};

    use super::*;
    use crate::credentials::hash_password;
    use crate::integrity::md5_colon_joined;

    /// Account data only; job methods are never reached by the resolver.
    #[derive(Default)]
    struct AccountStore {
        registrations: Vec<IpRegistration>,
        users: Vec<User>,
        tokens: Mutex<Vec<Token>>,
        touched: Mutex<HashMap<i64, DateTime<Utc>>>,
    }

    impl GatewayStore for AccountStore {
        fn create_job(&self, _job: &PrintJob) -> Result<()> {
            unreachable!()
        }
        fn get_job(&self, _job_id: &JobId) -> Result<Option<PrintJob>> {
            unreachable!()
        }
        fn begin_processing(&self, _job_id: &JobId, _intake: &JobIntake) -> Result<()> {
            unreachable!()
        }
        fn finish_job(&self, _job_id: &JobId, _outcome: &JobOutcome) -> Result<()> {
            unreachable!()
        }
        fn recent_jobs(&self, _user_id: Option<&UserId>, _limit: usize) -> Result<Vec<PrintJob>> {
            unreachable!()
        }
        fn count_queued_jobs(&self) -> Result<u64> {
            unreachable!()
        }
        fn active_ip_registration(
            &self,
            ip: IpAddr,
            now: DateTime<Utc>,
        ) -> Result<Option<IpRegistration>> {
            Ok(self
                .registrations
                .iter()
                .find(|r| r.ip_address == ip && r.is_usable_at(now))
                .cloned())
        }
        fn find_user_by_name(&self, username: &str) -> Result<Option<User>> {
            Ok(self.users.iter().find(|u| u.username == username).cloned())
        }
        fn active_tokens(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<Vec<Token>> {
            Ok(self
                .tokens
                .lock()
                .unwrap()
                .iter()
                .filter(|t| &t.user_id == user_id && t.is_usable_at(now))
                .cloned()
                .collect())
        }
        fn touch_token(&self, token_id: i64, at: DateTime<Utc>) -> Result<()> {
            self.touched.lock().unwrap().insert(token_id, at);
            Ok(())
        }
    }

    fn alice(allow_password_auth: bool) -> User {
        User {
            id: "u-alice".into(),
            username: "alice".into(),
            password_hash: Some(hash_password("wonderland").unwrap()),
            digest_ha1: Some(md5_colon_joined(&["alice", "zikzi", "wonderland"])),
            allow_password_auth,
            is_active: true,
        }
    }

    fn token(id: i64, value: &str) -> Token {
        Token {
            id,
            user_id: "u-alice".into(),
            value: value.into(),
            is_active: true,
            expires_at: None,
            last_used_at: None,
            last_used_ip: None,
        }
    }

    fn login_config() -> AuthConfig {
        AuthConfig {
            ip_auth_enabled: true,
            login_auth_enabled: true,
            ..AuthConfig::default()
        }
    }

    fn resolver(store: AccountStore, config: AuthConfig) -> (AuthResolver, Arc<AccountStore>) {
        let store = Arc::new(store);
        let resolver = AuthResolver::new(
            Arc::clone(&store) as Arc<dyn GatewayStore>,
            Arc::new(NonceCache::new()),
            config,
        );
        (resolver, store)
    }

    fn basic(user: &str, cred: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{user}:{cred}")))
    }

    fn digest_header(nonce: &str, secret_ha1: &str) -> String {
        let creds = DigestCredentials {
            username: "alice".into(),
            realm: "zikzi".into(),
            nonce: nonce.into(),
            uri: "/ipp/print".into(),
            response: String::new(),
            nc: "00000001".into(),
            cnonce: "xyz".into(),
            qop: Some("auth".into()),
        };
        let response = creds.expected_response(secret_ha1, "POST");
        format!(
            r#"Digest username="alice", realm="zikzi", nonce="{nonce}", uri="/ipp/print", response="{response}", qop=auth, nc=00000001, cnonce="xyz""#
        )
    }

    const CLIENT: &str = "192.0.2.10";

    #[test]
    fn registered_ip_authenticates_without_headers() {
        let store = AccountStore {
            registrations: vec![IpRegistration {
                ip_address: CLIENT.parse().unwrap(),
                user_id: "u-bob".into(),
                is_active: true,
                expires_at: None,
            }],
            ..Default::default()
        };
        let (resolver, _) = resolver(store, AuthConfig::default());

        let outcome = resolver.resolve(&AuthRequest::default(), CLIENT.parse().unwrap());
        assert_eq!(
            outcome.result,
            AuthResult::authenticated("u-bob".into(), AuthMethod::Ip)
        );
        assert!(!outcome.must_challenge);
    }

    #[test]
    fn expired_registration_is_ignored() {
        let store = AccountStore {
            registrations: vec![IpRegistration {
                ip_address: CLIENT.parse().unwrap(),
                user_id: "u-bob".into(),
                is_active: true,
                expires_at: Some(Utc::now() - Duration::minutes(1)),
            }],
            ..Default::default()
        };
        let (resolver, _) = resolver(store, AuthConfig::default());

        let outcome = resolver.resolve(&AuthRequest::default(), CLIENT.parse().unwrap());
        assert!(!outcome.result.authenticated);
        assert!(!outcome.must_challenge);
    }

    #[test]
    fn missing_header_with_login_auth_challenges() {
        let (resolver, _) = resolver(AccountStore::default(), login_config());
        let outcome = resolver.resolve(&AuthRequest::default(), CLIENT.parse().unwrap());
        assert!(!outcome.result.authenticated);
        assert!(outcome.must_challenge);
    }

    #[test]
    fn unknown_scheme_challenges() {
        let (resolver, _) = resolver(AccountStore::default(), login_config());
        let request = AuthRequest {
            authorization: Some("Bearer abc"),
            method: "POST",
        };
        assert!(resolver.resolve(&request, CLIENT.parse().unwrap()).must_challenge);
    }

    #[test]
    fn basic_password_requires_permission() {
        let header = basic("alice", "wonderland");
        let request = AuthRequest {
            authorization: Some(&header),
            method: "POST",
        };

        let store = AccountStore {
            users: vec![alice(true)],
            ..Default::default()
        };
        let (allowed, _) = resolver(store, login_config());
        let outcome = allowed.resolve(&request, CLIENT.parse().unwrap());
        assert_eq!(
            outcome.result,
            AuthResult::authenticated("u-alice".into(), AuthMethod::Basic)
        );

        let store = AccountStore {
            users: vec![alice(false)],
            ..Default::default()
        };
        let (denied, _) = resolver(store, login_config());
        let outcome = denied.resolve(&request, CLIENT.parse().unwrap());
        assert!(!outcome.result.authenticated);
        assert!(outcome.must_challenge);
    }

    #[test]
    fn basic_token_match_updates_last_used() {
        let store = AccountStore {
            users: vec![alice(false)],
            tokens: Mutex::new(vec![token(7, "T1")]),
            ..Default::default()
        };
        let (resolver, store) = resolver(store, login_config());

        let header = basic("alice", "T1");
        let request = AuthRequest {
            authorization: Some(&header),
            method: "POST",
        };
        let outcome = resolver.resolve(&request, CLIENT.parse().unwrap());
        assert!(outcome.result.authenticated);
        assert_eq!(outcome.result.method, Some(AuthMethod::Basic));
        assert!(store.touched.lock().unwrap().contains_key(&7));
    }

    #[test]
    fn inactive_token_is_rejected() {
        let mut revoked = token(8, "T2");
        revoked.is_active = false;
        let store = AccountStore {
            users: vec![alice(false)],
            tokens: Mutex::new(vec![revoked]),
            ..Default::default()
        };
        let (resolver, store) = resolver(store, login_config());

        let header = basic("alice", "T2");
        let request = AuthRequest {
            authorization: Some(&header),
            method: "POST",
        };
        let outcome = resolver.resolve(&request, CLIENT.parse().unwrap());
        assert!(!outcome.result.authenticated);
        assert!(outcome.must_challenge);
        assert!(store.touched.lock().unwrap().is_empty());
    }

    #[test]
    fn digest_with_token_secret_authenticates() {
        let store = AccountStore {
            users: vec![alice(false)],
            tokens: Mutex::new(vec![token(9, "T1")]),
            ..Default::default()
        };
        let (resolver, store) = resolver(store, login_config());
        let nonce = resolver.nonces.generate().unwrap();

        let header = digest_header(&nonce, &ha1("alice", "zikzi", "T1"));
        let request = AuthRequest {
            authorization: Some(&header),
            method: "POST",
        };
        let outcome = resolver.resolve(&request, CLIENT.parse().unwrap());
        assert_eq!(
            outcome.result,
            AuthResult::authenticated("u-alice".into(), AuthMethod::Digest)
        );
        assert!(store.touched.lock().unwrap().contains_key(&9));
    }

    #[test]
    fn digest_with_precomputed_ha1() {
        let store = AccountStore {
            users: vec![alice(true)],
            ..Default::default()
        };
        let (resolver, _) = resolver(store, login_config());
        let nonce = resolver.nonces.generate().unwrap();

        let header = digest_header(&nonce, &ha1("alice", "zikzi", "wonderland"));
        let request = AuthRequest {
            authorization: Some(&header),
            method: "POST",
        };
        assert!(resolver.resolve(&request, CLIENT.parse().unwrap()).result.authenticated);
    }

    #[test]
    fn digest_with_unknown_nonce_is_rechallenged() {
        let store = AccountStore {
            users: vec![alice(true)],
            ..Default::default()
        };
        let (resolver, _) = resolver(store, login_config());

        let header = digest_header("feedface", &ha1("alice", "zikzi", "wonderland"));
        let request = AuthRequest {
            authorization: Some(&header),
            method: "POST",
        };
        let outcome = resolver.resolve(&request, CLIENT.parse().unwrap());
        assert!(!outcome.result.authenticated);
        assert!(outcome.must_challenge);
    }

    #[test]
    fn digest_after_nonce_invalidated_is_rechallenged() {
        let store = AccountStore {
            users: vec![alice(true)],
            ..Default::default()
        };
        let (resolver, _) = resolver(store, login_config());
        let nonce = resolver.nonces.generate().unwrap();
        resolver.nonces.invalidate(&nonce);

        let header = digest_header(&nonce, &ha1("alice", "zikzi", "wonderland"));
        let request = AuthRequest {
            authorization: Some(&header),
            method: "POST",
        };
        assert!(resolver.resolve(&request, CLIENT.parse().unwrap()).must_challenge);
    }

    #[test]
    fn login_disabled_never_challenges() {
        let store = AccountStore {
            users: vec![alice(true)],
            ..Default::default()
        };
        let config = AuthConfig {
            ip_auth_enabled: false,
            login_auth_enabled: false,
            ..AuthConfig::default()
        };
        let (resolver, _) = resolver(store, config);

        let header = basic("alice", "wonderland");
        let request = AuthRequest {
            authorization: Some(&header),
            method: "POST",
        };
        assert_eq!(
            resolver.resolve(&request, CLIENT.parse().unwrap()),
            AuthOutcome::default()
        );
    }

    #[test]
    fn challenge_headers_issue_a_valid_nonce() {
        let (resolver, _) = resolver(AccountStore::default(), login_config());
        let [basic, digest] = resolver.challenge_headers().unwrap();
        assert_eq!(basic, r#"Basic realm="zikzi""#);

        let nonce = digest
            .split("nonce=\"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap();
        assert!(resolver.nonces.is_valid(nonce));
    }
}
