// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// zikzi-document: document handling for the Zikzi print gateway.
//
// Provides streaming DSC metadata extraction for PostScript intake and the
// external conversion pipeline (PDF, thumbnail, page count).

pub mod convert;
pub mod dsc;

pub use convert::{ConversionPipeline, ConversionResult};
pub use dsc::{DscMetadata, DscScanner};
