//! Incremental log scanner.
//!
//! A buffered state machine fed by discrete chunk-arrival events: the runner
//! hands over raw output chunks exactly as the OS delivered them (not
//! line-aligned), the scanner keeps the incomplete trailing fragment and any
//! open multi-line diagnostic block between calls, and returns control after
//! consuming the available input. No blocking reads anywhere.

use super::patterns::{BlockNeeds, Classified, PatternFamily, PatternSet};
use super::DiagnosticEntry;

/// A TeX error block prints context lines between `!` and `l.N`; give up on
/// the line reference after this many unrelated lines.
const MAX_BLOCK_CONTEXT: usize = 8;

/// One scanned item, in the order the underlying text implies.
#[derive(Debug, PartialEq, Eq)]
pub enum ScanItem {
    /// A structured diagnostic
    Diagnostic(DiagnosticEntry),
    /// An uncategorized passthrough line (never dropped, just not structured)
    Line(String),
}

/// A diagnostic that started but still awaits its continuation line.
struct OpenBlock {
    entry: DiagnosticEntry,
    needs: BlockNeeds,
    context_lines: usize,
}

/// Chunk-buffered scanner for one output stream.
pub struct LogScanner {
    patterns: &'static PatternSet,
    /// Bytes of an incomplete trailing line, kept verbatim until the next
    /// chunk (or `finish`) completes it
    pending: Vec<u8>,
    block: Option<OpenBlock>,
}

impl LogScanner {
    pub fn new(family: PatternFamily) -> Self {
        Self {
            patterns: family.patterns(),
            pending: Vec::new(),
            block: None,
        }
    }

    /// Consume one chunk, returning the items completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ScanItem> {
        self.pending.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop(); // the newline itself
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let text = String::from_utf8_lossy(&line).into_owned();
            self.scan_line(&text, &mut out);
        }
        out
    }

    /// Flush the trailing fragment and any open block at end of stream.
    pub fn finish(&mut self) -> Vec<ScanItem> {
        let mut out = Vec::new();
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            let text = String::from_utf8_lossy(&tail).into_owned();
            self.scan_line(&text, &mut out);
        }
        self.flush_block(&mut out);
        out
    }

    fn scan_line(&mut self, line: &str, out: &mut Vec<ScanItem>) {
        match self.patterns.classify(line) {
            Classified::Entry(entry) => {
                self.flush_block(out);
                out.push(ScanItem::Diagnostic(entry));
            }
            Classified::BlockStart { entry, needs } => {
                self.flush_block(out);
                self.block = Some(OpenBlock {
                    entry,
                    needs,
                    context_lines: 0,
                });
            }
            Classified::LineRef { line: n, file } => {
                match self.block.take() {
                    Some(block) if block.needs == BlockNeeds::LineRef => {
                        let mut entry = block.entry;
                        entry.line = Some(n);
                        if entry.file.is_none() {
                            entry.file = file;
                        }
                        out.push(ScanItem::Diagnostic(entry));
                    }
                    other => {
                        // A stray continuation line outside a block is noise
                        self.block = other;
                        out.push(ScanItem::Line(line.to_string()));
                    }
                }
            }
            Classified::Detail(message) => match self.block.take() {
                Some(block) if block.needs == BlockNeeds::Detail => {
                    let mut entry = block.entry;
                    entry.message = message;
                    out.push(ScanItem::Diagnostic(entry));
                }
                other => {
                    self.block = other;
                    out.push(ScanItem::Line(line.to_string()));
                }
            },
            Classified::Plain => {
                if let Some(block) = &mut self.block {
                    block.context_lines += 1;
                    if block.context_lines > MAX_BLOCK_CONTEXT {
                        self.flush_block(out);
                    }
                }
                out.push(ScanItem::Line(line.to_string()));
            }
        }
    }

    /// Emit an open block as-is (the continuation never arrived).
    fn flush_block(&mut self, out: &mut Vec<ScanItem>) {
        if let Some(block) = self.block.take() {
            out.push(ScanItem::Diagnostic(block.entry));
        }
    }
}
