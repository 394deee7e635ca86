//! Compiled bidirectional sync index.
//!
//! Built once from a parsed artifact, then read-only: both queries take
//! `&self` and are safe to call concurrently. Replacement happens at the
//! store level by swapping whole records.

use std::path::Path;
use std::path::PathBuf;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::{Rect, SourceLocation};
use crate::utils::path::resolve_path;

/// One typeset box with its source origin.
///
/// `line` is the line of the record that opened the box; `first`/`last` are
/// the refined range accumulated from the material typeset inside it.
#[derive(Debug, Clone)]
pub struct RegionRec {
    pub file_id: u32,
    pub line: u32,
    pub first: Option<u32>,
    pub last: Option<u32>,
    pub rect: Rect,
}

impl RegionRec {
    /// Line range covered by this region.
    fn range(&self) -> (u32, u32) {
        (self.first.unwrap_or(self.line), self.last.unwrap_or(self.line))
    }

    /// Source line a reverse query reports for this region.
    fn source_line(&self) -> u32 {
        self.first.unwrap_or(self.line)
    }
}

/// Result of a forward (source→output) query.
#[derive(Debug, Clone)]
pub struct ForwardMatch {
    /// 1-based page number
    pub page: u32,
    /// All matching regions on that page
    pub regions: SmallVec<[Rect; 4]>,
}

/// The compiled index for one document.
///
/// Always derived from exactly one completed, successful run; an empty record
/// (no pages, no files) is the graceful degradation for a missing or corrupt
/// artifact and answers every query with "no match".
#[derive(Debug, Default)]
pub struct SyncRecord {
    /// File table: id → absolute source path
    files: Vec<PathBuf>,
    /// Per page (index 0 = page 1), regions in emission order
    pages: Vec<Vec<RegionRec>>,
    /// Forward index: file id → (page index, region index), page-ordered
    by_file: FxHashMap<u32, Vec<(usize, usize)>>,
    /// Artifact magnification (`m:` preamble record), for callers converting
    /// to display coordinates
    magnification: f64,
}

impl SyncRecord {
    pub fn empty() -> Self {
        Self {
            magnification: 1.0,
            ..Self::default()
        }
    }

    /// Build from parsed artifact parts, compiling the forward index.
    pub(crate) fn from_parts(
        files: Vec<PathBuf>,
        pages: Vec<Vec<RegionRec>>,
        magnification: f64,
    ) -> Self {
        let mut by_file: FxHashMap<u32, Vec<(usize, usize)>> = FxHashMap::default();
        for (page_idx, regions) in pages.iter().enumerate() {
            for (region_idx, region) in regions.iter().enumerate() {
                by_file
                    .entry(region.file_id)
                    .or_default()
                    .push((page_idx, region_idx));
            }
        }
        Self {
            files,
            pages,
            by_file,
            magnification,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pages.iter().all(|p| p.is_empty())
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn region_count(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }

    pub fn magnification(&self) -> f64 {
        self.magnification
    }

    /// Source→output: best-matching regions on the best-matching page.
    ///
    /// Match tiers, most specific first:
    /// 1. regions recorded exactly at the query line
    /// 2. the smallest line-range superset containing the line
    /// 3. the region whose range is nearest to the line
    ///
    /// Within a tier the earliest page wins, and all of that page's
    /// tier-matching regions are returned. `None` only when the file has no
    /// entries at all.
    pub fn query_source_to_output(&self, file: &Path, line: u32) -> Option<ForwardMatch> {
        let file_id = self.file_id(file)?;
        let refs = self.by_file.get(&file_id)?;

        // Tier 1: exact line
        if let Some(page_idx) = self.first_page_where(refs, |r| r.line == line) {
            return Some(self.collect_on_page(refs, page_idx, |r| r.line == line));
        }

        // Tier 2: smallest containing range
        let containing = refs
            .iter()
            .filter(|&&(p, i)| {
                let (first, last) = self.pages[p][i].range();
                first <= line && line <= last
            })
            .min_by_key(|&&(p, i)| {
                let (first, last) = self.pages[p][i].range();
                (last - first, p, i)
            });
        if let Some(&(page_idx, _)) = containing {
            return Some(self.collect_on_page(refs, page_idx, |r| {
                let (first, last) = r.range();
                first <= line && line <= last
            }));
        }

        // Tier 3: nearest range (known file, but the line was never typeset
        // directly - land on the closest material instead of nowhere)
        let &(page_idx, region_idx) = refs.iter().min_by_key(|&&(p, i)| {
            let (first, last) = self.pages[p][i].range();
            let distance = if line < first {
                first - line
            } else if line > last {
                line - last
            } else {
                0
            };
            (distance, p, i)
        })?;
        let mut regions = SmallVec::new();
        regions.push(self.pages[page_idx][region_idx].rect);
        Some(ForwardMatch {
            page: page_idx as u32 + 1,
            regions,
        })
    }

    /// Output→source: the source location whose region contains the point.
    ///
    /// The smallest-area containing rectangle wins (innermost box is most
    /// specific); equal areas resolve to the earliest-emitted record. With no
    /// containing rectangle, the nearest region by center distance wins.
    /// `None` only when the page has zero regions.
    pub fn query_output_to_source(&self, page: u32, x: f64, y: f64) -> Option<SourceLocation> {
        let regions = self
            .pages
            .get(page.checked_sub(1)? as usize)
            .filter(|r| !r.is_empty())?;

        let containing = regions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.rect.contains(x, y))
            .min_by(|(seq_a, a), (seq_b, b)| {
                a.rect
                    .area()
                    .partial_cmp(&b.rect.area())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(seq_a.cmp(seq_b))
            });

        let (_, region) = match containing {
            Some(found) => found,
            None => regions
                .iter()
                .enumerate()
                .min_by(|(seq_a, a), (seq_b, b)| {
                    a.rect
                        .center_distance_sq(x, y)
                        .partial_cmp(&b.rect.center_distance_sq(x, y))
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(seq_a.cmp(seq_b))
                })?,
        };

        Some(SourceLocation {
            file: self.files.get(region.file_id as usize)?.clone(),
            line: region.source_line(),
            column: 0,
        })
    }

    /// Resolve a query path to a file-table id.
    ///
    /// The table stores absolute normalized paths; relative query paths are
    /// resolved against the directory of the first recorded file (the
    /// document root the artifact was loaded with).
    fn file_id(&self, file: &Path) -> Option<u32> {
        let resolved = if file.is_absolute() {
            crate::utils::path::lexical_normalize(file)
        } else {
            let root = self.files.first()?.parent()?;
            resolve_path(file, root)
        };
        self.files
            .iter()
            .position(|f| *f == resolved)
            .map(|idx| idx as u32)
    }

    fn first_page_where(
        &self,
        refs: &[(usize, usize)],
        pred: impl Fn(&RegionRec) -> bool,
    ) -> Option<usize> {
        refs.iter()
            .filter(|&&(p, i)| pred(&self.pages[p][i]))
            .map(|&(p, _)| p)
            .min()
    }

    fn collect_on_page(
        &self,
        refs: &[(usize, usize)],
        page_idx: usize,
        pred: impl Fn(&RegionRec) -> bool,
    ) -> ForwardMatch {
        let regions = refs
            .iter()
            .filter(|&&(p, i)| p == page_idx && pred(&self.pages[p][i]))
            .map(|&(p, i)| self.pages[p][i].rect)
            .collect();
        ForwardMatch {
            page: page_idx as u32 + 1,
            regions,
        }
    }
}
