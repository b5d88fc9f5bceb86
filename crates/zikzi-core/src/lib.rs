// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Zikzi core: types, configuration, errors, and the store interface shared
// across all crates.

pub mod config;
pub mod error;
pub mod repository;
pub mod types;

pub use config::GatewayConfig;
pub use error::ZikziError;
pub use repository::GatewayStore;
pub use types::*;
