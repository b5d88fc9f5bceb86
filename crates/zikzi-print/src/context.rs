// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shared state handed to both intake servers.

use std::sync::Arc;

use zikzi_core::config::GatewayConfig;
use zikzi_core::error::Result;
use zikzi_core::repository::GatewayStore;
use zikzi_document::ConversionPipeline;
use zikzi_security::{AuthResolver, NonceCache};

use crate::jobs::JobDispatcher;
use crate::trusted_proxy::TrustedProxyMatcher;

/// Everything a connection handler needs, built once at startup.
pub struct GatewayContext {
    pub config: GatewayConfig,
    pub store: Arc<dyn GatewayStore>,
    pub nonces: Arc<NonceCache>,
    pub auth: AuthResolver,
    pub jobs: JobDispatcher,
    /// Peers allowed to set `X-Forwarded-For` / `X-Real-IP`.
    pub forwarded: TrustedProxyMatcher,
}

impl GatewayContext {
    pub fn new(config: GatewayConfig, store: Arc<dyn GatewayStore>) -> Result<Self> {
        let pipeline = ConversionPipeline::new(&config.converter);
        Self::with_pipeline(config, store, pipeline)
    }

    /// Build with an explicit conversion pipeline.
    pub fn with_pipeline(
        config: GatewayConfig,
        store: Arc<dyn GatewayStore>,
        pipeline: ConversionPipeline,
    ) -> Result<Self> {
        let nonces = Arc::new(NonceCache::new());
        let auth = AuthResolver::new(Arc::clone(&store), Arc::clone(&nonces), config.auth.clone());
        let jobs = JobDispatcher::new(
            Arc::clone(&store),
            Arc::new(pipeline),
            config.storage_root.clone(),
        );
        let forwarded =
            TrustedProxyMatcher::new(&config.proxy.trusted_proxies, config.proxy.trust_proxy)?;

        Ok(Self {
            config,
            store,
            nonces,
            auth,
            jobs,
            forwarded,
        })
    }
}
