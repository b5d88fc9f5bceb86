// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Zikzi.

use thiserror::Error;

use crate::types::{JobId, JobStatus};

/// Top-level error type for all Zikzi operations.
#[derive(Debug, Error)]
pub enum ZikziError {
    // -- Intake servers --
    #[error("print server error: {0}")]
    PrintServer(String),

    #[error("PROXY protocol error: {0}")]
    ProxyProtocol(String),

    // -- Conversion --
    #[error("conversion failed: {0}")]
    Conversion(String),

    // -- Job lifecycle --
    #[error("job {job_id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {0} not found")]
    JobNotFound(JobId),

    // -- Authentication --
    #[error("credential error: {0}")]
    Credential(String),

    #[error("random source unavailable")]
    Random,

    // -- Configuration --
    #[error("invalid configuration: {0}")]
    Config(String),

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ZikziError>;
