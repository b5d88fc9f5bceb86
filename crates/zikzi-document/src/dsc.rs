// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PostScript Document Structuring Convention (DSC) comment scanner.
//
// The scanner is fed the same chunks that are being streamed to disk, so it
// never needs the whole document in memory.  Lines end at LF or CR; only
// lines starting with `%%` or `%!` are looked at.  Scanning continues past
// `%%EndComments` so that `%%Page:` markers in the body are counted too.
// The first usable value of each field is kept, so the header beats the
// comments of any EPS embedded further down.

use std::path::Path;

use tokio::io::AsyncReadExt;

use zikzi_core::error::Result;

/// Longest line prefix retained.  DSC keys sit at the start of a line, so
/// anything past this is irrelevant.
const MAX_LINE: usize = 4096;

/// Metadata gathered from DSC header comments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DscMetadata {
    /// `%%Title:`, surrounding parentheses removed.
    pub title: Option<String>,
    /// `%%Creator:`
    pub creator: Option<String>,
    /// `%%CreationDate:`
    pub creation_date: Option<String>,
    /// `%%For:`, surrounding parentheses removed.
    pub for_user: Option<String>,
    /// `%%Pages:` as written.
    pub pages: Option<String>,
    /// `%%BoundingBox:` as written.
    pub bounding_box: Option<String>,
    /// Number of `%%Page:` markers seen.
    pub page_markers: u32,
}

/// Incremental DSC scanner.
#[derive(Debug, Default)]
pub struct DscScanner {
    line: Vec<u8>,
    meta: DscMetadata,
}

impl DscScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of the stream.
    pub fn feed(&mut self, chunk: &[u8]) {
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                self.end_line();
            } else if self.line.len() < MAX_LINE {
                self.line.push(byte);
            }
        }
    }

    /// Flush the trailing partial line and return everything found.
    pub fn finish(mut self) -> DscMetadata {
        self.end_line();
        self.meta
    }

    /// What has been found so far.
    pub fn metadata(&self) -> &DscMetadata {
        &self.meta
    }

    fn end_line(&mut self) {
        if self.line.starts_with(b"%%") || self.line.starts_with(b"%!") {
            let text = String::from_utf8_lossy(&self.line).into_owned();
            self.inspect(&text);
        }
        self.line.clear();
    }

    fn inspect(&mut self, line: &str) {
        if line.starts_with("%%Page:") {
            self.meta.page_markers = self.meta.page_markers.saturating_add(1);
            return;
        }

        let meta = &mut self.meta;
        let (field, raw, strip) = if let Some(v) = line.strip_prefix("%%Title:") {
            (&mut meta.title, v, true)
        } else if let Some(v) = line.strip_prefix("%%Creator:") {
            (&mut meta.creator, v, false)
        } else if let Some(v) = line.strip_prefix("%%CreationDate:") {
            (&mut meta.creation_date, v, false)
        } else if let Some(v) = line.strip_prefix("%%For:") {
            (&mut meta.for_user, v, true)
        } else if let Some(v) = line.strip_prefix("%%Pages:") {
            (&mut meta.pages, v, false)
        } else if let Some(v) = line.strip_prefix("%%BoundingBox:") {
            (&mut meta.bounding_box, v, false)
        } else {
            return;
        };

        let value = raw.trim();
        if field.is_some() || value.is_empty() || value == "(atend)" {
            return;
        }
        let value = if strip { strip_parens(value) } else { value };
        *field = Some(value.to_owned());
    }
}

/// Remove one pair of enclosing parentheses, if present.
fn strip_parens(value: &str) -> &str {
    let value = value.strip_prefix('(').unwrap_or(value);
    value.strip_suffix(')').unwrap_or(value).trim()
}

/// Scan a whole file from disk.
pub async fn scan_file(path: &Path) -> Result<DscMetadata> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut scanner = DscScanner::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        scanner.feed(&buf[..n]);
    }
    Ok(scanner.finish())
}
