//! Synchronization artifact parser.
//!
//! Reads the text side-file the toolchain emits next to the document
//! (`<basename>.synctex`). The format is line-oriented:
//!
//! ```text
//! SyncTeX ...            header
//! version:1
//! >:pdf                  output mode
//! z:578                  coordinate origin
//! m:1000                 magnification * 1000
//! i:18:./chapter.tex     input file tag
//! s:1                    start of sheet (page)
//! h:18:39(-578,3840,3368,4074)0   open hbox: tag:line(x,y,w,h)d
//! k:18:40(2707,1536,-57)          kern inside the open box
//! g:18:41(-578,3840)              glue inside the open box
//! $:18:41(-578,3840)              math material inside the open box
//! e                               close hbox
//! ```
//!
//! `k`/`g`/`$` records widen the open box's first/last line range. A box
//! geometry is `(x, y)` at the baseline with `w` extending right and `h`
//! extending up; depth below the baseline is ignored for region purposes.
//!
//! Corrupt or missing artifacts degrade to an empty record - the toolchain
//! may simply not support synchronization. Individually malformed records
//! are skipped without aborting the load.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use thiserror::Error;

use super::record::{RegionRec, SyncRecord};
use super::Rect;
use crate::utils::path::resolve_path;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("cannot read artifact")]
    Io(#[from] std::io::Error),

    #[error("unrecognized header line `{0}`")]
    BadHeader(String),

    #[error("unsupported format version `{0}`")]
    BadVersion(String),
}

/// Load an artifact, degrading to an empty record on any failure.
pub fn load(path: &Path, source_root: &Path) -> SyncRecord {
    match parse_file(path, source_root) {
        Ok(record) => record,
        Err(err) => {
            crate::debug!("sync"; "no sync data from {}: {}", path.display(), err);
            SyncRecord::empty()
        }
    }
}

fn parse_file(path: &Path, source_root: &Path) -> Result<SyncRecord, ArtifactError> {
    let bytes = std::fs::read(path)?;
    parse_str(&String::from_utf8_lossy(&bytes), source_root)
}

/// An opened box awaiting its `e` record.
struct OpenBox {
    tag: u32,
    line: u32,
    first: Option<u32>,
    last: Option<u32>,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

pub(crate) fn parse_str(text: &str, source_root: &Path) -> Result<SyncRecord, ArtifactError> {
    let mut lines = text.lines();

    let header = lines.next().unwrap_or_default();
    if !header.starts_with("SyncTeX") && !header.starts_with("synchronize") {
        return Err(ArtifactError::BadHeader(header.to_string()));
    }
    let version = lines.next().unwrap_or_default();
    match version.strip_prefix("version:") {
        Some(v) if v.trim().parse::<u32>() == Ok(1) => {}
        _ => return Err(ArtifactError::BadVersion(version.to_string())),
    }

    let mut origin = 0.0_f64;
    let mut magnification = 1.0_f64;
    let mut files: Vec<PathBuf> = Vec::new();
    let mut tag_to_id: FxHashMap<u32, u32> = FxHashMap::default();
    let mut pages: Vec<Vec<RegionRec>> = Vec::new();
    let mut sheet: usize = 0;
    let mut open: Vec<OpenBox> = Vec::new();

    for line in lines {
        let Some((kind, rest)) = line.split_once(':') else {
            // close-box records carry no colon
            if line == "e" || line.starts_with("e ") {
                if sheet > 0
                    && let Some(done) = open.pop()
                {
                    push_region(&mut pages[sheet - 1], done, &tag_to_id);
                }
            }
            continue;
        };

        match kind {
            ">" => {} // output mode marker, nothing to index
            "z" => {
                if let Ok(z) = rest.trim().parse::<f64>() {
                    origin = z;
                }
            }
            "m" => {
                if let Ok(m) = rest.trim().parse::<f64>() {
                    magnification = m / 1000.0;
                }
            }
            "i" => {
                if let Some((tag_str, name)) = rest.split_once(':')
                    && let Ok(tag) = tag_str.parse::<u32>()
                    && !name.is_empty()
                {
                    let resolved = resolve_path(Path::new(name), source_root);
                    let id = files.len() as u32;
                    files.push(resolved);
                    tag_to_id.insert(tag, id);
                }
            }
            "s" => {
                if let Ok(n) = rest.trim().parse::<usize>() {
                    sheet = n;
                    while pages.len() < sheet {
                        pages.push(Vec::new());
                    }
                    open.clear();
                }
            }
            "h" => {
                if sheet > 0
                    && let Some((tag, line_no, nums)) = parse_box_record(rest)
                    && nums.len() >= 4
                {
                    open.push(OpenBox {
                        tag,
                        line: line_no,
                        first: None,
                        last: None,
                        x: origin + nums[0],
                        y: origin + nums[1],
                        width: nums[2],
                        height: nums[3],
                    });
                }
            }
            "k" | "g" | "$" => {
                if sheet > 0
                    && let Some(top) = open.last_mut()
                    && let Some((tag, line_no, _)) = parse_box_record(rest)
                    && tag == top.tag
                {
                    top.first = Some(top.first.map_or(line_no, |f| f.min(line_no)));
                    top.last = Some(top.last.map_or(line_no, |l| l.max(line_no)));
                }
            }
            _ => {} // unknown record kind, skip
        }
    }

    Ok(SyncRecord::from_parts(files, pages, magnification))
}

/// Parse `<tag>:<line>(<n>,<n>,...)` into its components.
///
/// Trailing material after the closing parenthesis (box depth) is ignored.
fn parse_box_record(rest: &str) -> Option<(u32, u32, Vec<f64>)> {
    let (head, tail) = rest.split_once('(')?;
    let (tag_str, line_str) = head.split_once(':')?;
    let tag = tag_str.trim().parse().ok()?;
    let line = line_str.trim().parse().ok()?;

    let nums_str = tail.split(')').next()?;
    let mut nums = Vec::with_capacity(5);
    for part in nums_str.split(',') {
        nums.push(part.trim().parse().ok()?);
    }
    Some((tag, line, nums))
}

fn push_region(page: &mut Vec<RegionRec>, done: OpenBox, tag_to_id: &FxHashMap<u32, u32>) {
    let Some(&file_id) = tag_to_id.get(&done.tag) else {
        return; // box references a tag with no input record
    };
    page.push(RegionRec {
        file_id,
        line: done.line,
        first: done.first,
        last: done.last,
        rect: Rect {
            left: done.x,
            top: done.y - done.height,
            width: done.width,
            height: done.height,
        },
    });
}
