// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// External conversion pipeline: PostScript/PDF in, normalised PDF, a
// first-page PNG thumbnail, and a page count out.
//
// The converter is a Ghostscript-compatible command line run as a child
// process.  Only the PDF step can fail a job; thumbnail and page count
// failures are absorbed.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{Span, debug, info, info_span, instrument, warn};

use zikzi_core::config::ConverterConfig;
use zikzi_core::error::{Result, ZikziError};
use zikzi_core::types::{JobId, JobOutcome};

use crate::dsc;

/// Thumbnail resolution in DPI.
const THUMBNAIL_DPI: u32 = 150;

/// Prints the page count of the PDF named by `-sFile=`.
const PAGE_COUNT_PROGRAM: &str = "File (r) file runpdfbegin pdfpagecount = quit";

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// What one pipeline run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionResult {
    /// Set only when the PDF step succeeded.
    pub pdf_file: Option<PathBuf>,
    pub thumbnail_file: Option<PathBuf>,
    /// Always at least 1 once a PDF exists.
    pub page_count: u32,
    /// Fatal PDF error, or the non-fatal thumbnail error on success.
    pub error: Option<String>,
}

impl ConversionResult {
    /// Map to the terminal job transition.
    pub fn into_outcome(self) -> JobOutcome {
        match self.pdf_file {
            Some(pdf_file) => JobOutcome::Completed {
                pdf_file,
                thumbnail_file: self.thumbnail_file,
                page_count: self.page_count.max(1),
                error: self.error,
            },
            None => JobOutcome::Failed {
                error: self
                    .error
                    .unwrap_or_else(|| "conversion produced no PDF".to_owned()),
            },
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Runs the external converter with fixed argument sets.
#[derive(Debug, Clone)]
pub struct ConversionPipeline {
    binary: PathBuf,
    timeout: Duration,
    span: Span,
}

impl ConversionPipeline {
    pub fn new(config: &ConverterConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            timeout: config.timeout(),
            span: info_span!("conversion"),
        }
    }

    /// Convert `original` into `{job_id}.pdf` and `{job_id}_thumb.png`
    /// inside `output_dir`.  Never returns an error: failures are carried in
    /// the result.
    #[instrument(parent = &self.span, skip(self, original, output_dir, job_id), fields(job_id = %job_id))]
    pub async fn run(&self, original: &Path, output_dir: &Path, job_id: &JobId) -> ConversionResult {
        if let Err(e) = tokio::fs::create_dir_all(output_dir).await {
            warn!(error = %e, dir = %output_dir.display(), "cannot create output directory");
            return ConversionResult::failed(format!("cannot create output directory: {e}"));
        }

        let pdf_path = output_dir.join(format!("{job_id}.pdf"));
        if let Err(e) = self.to_pdf(original, &pdf_path).await {
            warn!(error = %e, "PDF conversion failed");
            return ConversionResult::failed(e.to_string());
        }

        let thumb_path = output_dir.join(format!("{job_id}_thumb.png"));
        let (thumbnail_file, error) = match self.thumbnail(&pdf_path, &thumb_path).await {
            Ok(()) => (Some(thumb_path), None),
            Err(e) => {
                warn!(error = %e, "thumbnail rendering failed");
                (None, Some(e.to_string()))
            }
        };

        let page_count = self.page_count(&pdf_path, original).await;
        info!(page_count, thumbnail = thumbnail_file.is_some(), "conversion finished");

        ConversionResult {
            pdf_file: Some(pdf_path),
            thumbnail_file,
            page_count,
            error,
        }
    }

    async fn to_pdf(&self, input: &Path, output: &Path) -> Result<()> {
        let args = vec![
            OsString::from("-dSAFER"),
            "-dBATCH".into(),
            "-dNOPAUSE".into(),
            "-sDEVICE=pdfwrite".into(),
            "-dPDFSETTINGS=/prepress".into(),
            "-dDownsampleColorImages=false".into(),
            "-dDownsampleGrayImages=false".into(),
            "-dDownsampleMonoImages=false".into(),
            "-sColorConversionStrategy=LeaveColorUnchanged".into(),
            "-dAutoRotatePages=/None".into(),
            output_file_arg(output),
            input.into(),
        ];
        self.invoke(args).await?;
        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(ZikziError::Conversion(format!(
                "converter reported success but wrote no {}",
                output.display()
            )));
        }
        Ok(())
    }

    async fn thumbnail(&self, pdf: &Path, output: &Path) -> Result<()> {
        let args = vec![
            OsString::from("-dSAFER"),
            "-dBATCH".into(),
            "-dNOPAUSE".into(),
            "-sDEVICE=png16m".into(),
            format!("-r{THUMBNAIL_DPI}").into(),
            "-dFirstPage=1".into(),
            "-dLastPage=1".into(),
            output_file_arg(output),
            pdf.into(),
        ];
        self.invoke(args).await.map(|_| ())
    }

    /// Page count from the produced PDF, falling back to `%%Page:` markers
    /// in the original and finally to 1.
    async fn page_count(&self, pdf: &Path, original: &Path) -> u32 {
        match self.native_page_count(pdf).await {
            Ok(n) if n > 0 => return u32::try_from(n).unwrap_or(u32::MAX),
            Ok(n) => debug!(reported = n, "converter reported no pages"),
            Err(e) => debug!(error = %e, "native page count failed"),
        }

        match dsc::scan_file(original).await {
            Ok(meta) if meta.page_markers > 0 => meta.page_markers,
            Ok(_) => 1,
            Err(e) => {
                debug!(error = %e, "DSC page count failed");
                1
            }
        }
    }

    /// The path reaches the interpreter as the string `File`, never as
    /// program text.
    async fn native_page_count(&self, pdf: &Path) -> Result<i64> {
        let mut permit = OsString::from("--permit-file-read=");
        permit.push(pdf);
        let mut file = OsString::from("-sFile=");
        file.push(pdf);
        let args = vec![
            OsString::from("-q"),
            "-dNODISPLAY".into(),
            "-dSAFER".into(),
            permit,
            file,
            "-c".into(),
            PAGE_COUNT_PROGRAM.into(),
        ];
        let output = self.invoke(args).await?;
        output
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .and_then(|line| line.parse::<i64>().ok())
            .ok_or_else(|| ZikziError::Conversion(format!("unparsable page count: {output:?}")))
    }

    /// Run the converter once; returns combined stdout and stderr.
    async fn invoke(&self, args: Vec<OsString>) -> Result<String> {
        debug!(binary = %self.binary.display(), ?args, "running converter");
        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                ZikziError::Conversion(format!(
                    "converter timed out after {}s",
                    self.timeout.as_secs_f32()
                ))
            })?
            .map_err(|e| {
                ZikziError::Conversion(format!("cannot run {}: {e}", self.binary.display()))
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(ZikziError::Conversion(format!(
                "converter exited with {}: {}",
                output.status,
                combined.trim()
            )));
        }
        Ok(combined)
    }
}

fn output_file_arg(path: &Path) -> OsString {
    let mut arg = OsString::from("-sOutputFile=");
    arg.push(path);
    arg
}
