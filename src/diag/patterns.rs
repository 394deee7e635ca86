//! Per-toolchain diagnostic line patterns.
//!
//! Each toolchain family ships a [`PatternSet`] describing the line shapes it
//! emits. A [`ToolStep`](crate::config::ToolStep) names its family, and the
//! scanner selects the set through [`PatternFamily::patterns`] - a fixed
//! strategy table, never inspection of the output text itself.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{DiagnosticEntry, Severity};

/// Toolchain families with distinct log grammars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternFamily {
    /// TeX engines (pdfTeX, XeTeX, LuaTeX and their LaTeX formats)
    #[default]
    Tex,
    /// BibTeX and compatible bibliography processors
    Bibtex,
    /// MakeIndex and compatible index processors
    Makeindex,
}

impl PatternFamily {
    /// Strategy table: family → pattern set.
    pub fn patterns(self) -> &'static PatternSet {
        match self {
            Self::Tex => &TEX,
            Self::Bibtex => &BIBTEX,
            Self::Makeindex => &MAKEINDEX,
        }
    }
}

/// What a multi-line diagnostic block is still waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockNeeds {
    /// A `l.<N>` line (TeX) or `--line N of file F` line (BibTeX)
    LineRef,
    /// A `-- <message>` detail line (MakeIndex)
    Detail,
}

/// Classification of a single complete log line.
#[derive(Debug)]
pub enum Classified {
    /// A self-contained diagnostic
    Entry(DiagnosticEntry),
    /// Opens a multi-line diagnostic block
    BlockStart {
        entry: DiagnosticEntry,
        needs: BlockNeeds,
    },
    /// Supplies the source line (and possibly file) for an open block
    LineRef { line: u32, file: Option<PathBuf> },
    /// Supplies the message for an open block
    Detail(String),
    /// Not a diagnostic; passes through as an uncategorized log line
    Plain,
}

/// Compiled pattern set for one toolchain family.
pub struct PatternSet {
    rules: Vec<Rule>,
}

/// One line shape and how to interpret its captures.
struct Rule {
    regex: Regex,
    interpret: fn(&regex::Captures<'_>) -> Classified,
}

impl PatternSet {
    /// Classify one complete line of toolchain output.
    ///
    /// Rules are tried in declaration order; the first match wins.
    pub fn classify(&self, line: &str) -> Classified {
        for rule in &self.rules {
            if let Some(caps) = rule.regex.captures(line) {
                return (rule.interpret)(&caps);
            }
        }
        Classified::Plain
    }
}

fn rule(pattern: &str, interpret: fn(&regex::Captures<'_>) -> Classified) -> Rule {
    Rule {
        // Patterns are compile-time constants; a bad one is a programming error.
        regex: Regex::new(pattern).expect("invalid diagnostic pattern"),
        interpret,
    }
}

fn cap_line(caps: &regex::Captures<'_>, name: &str) -> Option<u32> {
    caps.name(name).and_then(|m| m.as_str().parse().ok())
}

/// Extract `on input line N` from a warning message, if present.
fn input_line(message: &str) -> Option<u32> {
    static RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"on input line (\d+)\.?\s*$").expect("input-line pattern"));
    RE.captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

// ============================================================================
// TeX engines
// ============================================================================

static TEX: LazyLock<PatternSet> = LazyLock::new(|| PatternSet {
    rules: vec![
        // "! Undefined control sequence." - opens a block; the source line
        // arrives on a later "l.N" line
        rule(r"^!\s?(?P<msg>.+)$", |caps| Classified::BlockStart {
            entry: DiagnosticEntry::new(Severity::Error, &caps["msg"]),
            needs: BlockNeeds::LineRef,
        }),
        // "l.12 \foo" - completes an open error block
        rule(r"^l\.(?P<line>\d+)", |caps| Classified::LineRef {
            line: cap_line(caps, "line").unwrap_or(0),
            file: None,
        }),
        // "LaTeX Warning: Reference `fig:x' undefined on input line 41."
        rule(r"^LaTeX Warning:\s*(?P<msg>.+)$", |caps| {
            let msg = &caps["msg"];
            Classified::Entry(
                DiagnosticEntry::new(Severity::Warning, msg)
                    .with_location(None, input_line(msg)),
            )
        }),
        // "Package hyperref Warning: ..." / "Class article Warning: ..."
        rule(
            r"^(?:Package|Class) (?P<name>\S+) Warning:\s*(?P<msg>.+)$",
            |caps| {
                let msg = format!("{}: {}", &caps["name"], &caps["msg"]);
                let line = input_line(&msg);
                Classified::Entry(
                    DiagnosticEntry::new(Severity::Warning, msg).with_location(None, line),
                )
            },
        ),
        // "Overfull \hbox (12.3pt too wide) in paragraph at lines 9--12"
        rule(
            r"^(?P<kind>Overfull|Underfull) \\[hv]box (?P<rest>.+)$",
            |caps| {
                static AT_LINES: LazyLock<Regex> = LazyLock::new(|| {
                    Regex::new(r"at lines? (\d+)").expect("at-lines pattern")
                });
                let msg = format!("{} \\box {}", &caps["kind"], &caps["rest"]);
                let line = AT_LINES
                    .captures(&caps["rest"])
                    .and_then(|c| c.get(1))
                    .and_then(|m| m.as_str().parse().ok());
                Classified::Entry(
                    DiagnosticEntry::new(Severity::Warning, msg).with_location(None, line),
                )
            },
        ),
        // "./main.tex:12: Undefined control sequence." (file-line-error mode)
        rule(
            r"^(?P<file>[^:\s][^:]*):(?P<line>\d+):\s*(?P<msg>.+)$",
            |caps| {
                Classified::Entry(
                    DiagnosticEntry::new(Severity::Error, &caps["msg"]).with_location(
                        Some(PathBuf::from(&caps["file"])),
                        cap_line(caps, "line"),
                    ),
                )
            },
        ),
    ],
});

// ============================================================================
// BibTeX
// ============================================================================

static BIBTEX: LazyLock<PatternSet> = LazyLock::new(|| PatternSet {
    rules: vec![
        // "I was expecting a `,' or a `}'---line 32 of file refs.bib"
        rule(
            r"^(?P<msg>.+?)---line (?P<line>\d+) of file (?P<file>.+)$",
            |caps| {
                Classified::Entry(
                    DiagnosticEntry::new(Severity::Error, &caps["msg"]).with_location(
                        Some(PathBuf::from(&caps["file"])),
                        cap_line(caps, "line"),
                    ),
                )
            },
        ),
        // "--line 123 of file refs.bib" - location for the preceding warning
        rule(r"^--line (?P<line>\d+) of file (?P<file>.+)$", |caps| {
            Classified::LineRef {
                line: cap_line(caps, "line").unwrap_or(0),
                file: Some(PathBuf::from(&caps["file"])),
            }
        }),
        // "Warning--empty journal in knuth:84" - location may follow
        rule(r"^Warning--(?P<msg>.+)$", |caps| Classified::BlockStart {
            entry: DiagnosticEntry::new(Severity::Warning, &caps["msg"]),
            needs: BlockNeeds::LineRef,
        }),
        // "I couldn't open database file refs.bib"
        rule(r"^I couldn't open (?P<msg>.+)$", |caps| {
            Classified::Entry(DiagnosticEntry::new(
                Severity::Error,
                format!("couldn't open {}", &caps["msg"]),
            ))
        }),
        // "I found no \citation commands---while reading file main.aux"
        rule(r"^I found no (?P<msg>.+)$", |caps| {
            Classified::Entry(DiagnosticEntry::new(
                Severity::Error,
                format!("found no {}", &caps["msg"]),
            ))
        }),
    ],
});

// ============================================================================
// MakeIndex
// ============================================================================

static MAKEINDEX: LazyLock<PatternSet> = LazyLock::new(|| PatternSet {
    rules: vec![
        // "!! Input index error (file = main.idx, line = 5):"
        // the actual message arrives on the following "-- ..." line
        rule(
            r"^\s*!! Input (?:index|style) error \(file = (?P<file>[^,]+), line = (?P<line>\d+)\):",
            |caps| Classified::BlockStart {
                entry: DiagnosticEntry::new(Severity::Error, "input error").with_location(
                    Some(PathBuf::from(&caps["file"])),
                    cap_line(caps, "line"),
                ),
                needs: BlockNeeds::Detail,
            },
        ),
        // "   -- Illegal space within braces in first argument."
        rule(r"^\s*-- (?P<msg>.+)$", |caps| {
            Classified::Detail(caps["msg"].to_string())
        }),
    ],
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tex_file_line_error() {
        let set = PatternFamily::Tex.patterns();
        match set.classify("./main.tex:12: Undefined control sequence.") {
            Classified::Entry(entry) => {
                assert_eq!(entry.severity, Severity::Error);
                assert_eq!(entry.file, Some(PathBuf::from("./main.tex")));
                assert_eq!(entry.line, Some(12));
                assert_eq!(entry.message, "Undefined control sequence.");
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_tex_bang_block_start_and_line_ref() {
        let set = PatternFamily::Tex.patterns();
        assert!(matches!(
            set.classify("! Undefined control sequence."),
            Classified::BlockStart {
                needs: BlockNeeds::LineRef,
                ..
            }
        ));
        match set.classify("l.5 \\foo") {
            Classified::LineRef { line, file } => {
                assert_eq!(line, 5);
                assert!(file.is_none());
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_tex_latex_warning_with_input_line() {
        let set = PatternFamily::Tex.patterns();
        match set.classify("LaTeX Warning: Reference `fig:one' undefined on input line 41.") {
            Classified::Entry(entry) => {
                assert_eq!(entry.severity, Severity::Warning);
                assert_eq!(entry.line, Some(41));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_tex_overfull_hbox() {
        let set = PatternFamily::Tex.patterns();
        match set.classify("Overfull \\hbox (12.3pt too wide) in paragraph at lines 9--12") {
            Classified::Entry(entry) => {
                assert_eq!(entry.severity, Severity::Warning);
                assert_eq!(entry.line, Some(9));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_tex_plain_line() {
        let set = PatternFamily::Tex.patterns();
        assert!(matches!(
            set.classify("This is pdfTeX, Version 3.141592653"),
            Classified::Plain
        ));
    }

    #[test]
    fn test_bibtex_inline_error_location() {
        let set = PatternFamily::Bibtex.patterns();
        match set.classify("I was expecting a `,' or a `}'---line 32 of file refs.bib") {
            Classified::Entry(entry) => {
                assert_eq!(entry.severity, Severity::Error);
                assert_eq!(entry.file, Some(PathBuf::from("refs.bib")));
                assert_eq!(entry.line, Some(32));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_bibtex_warning_opens_block() {
        let set = PatternFamily::Bibtex.patterns();
        assert!(matches!(
            set.classify("Warning--empty journal in knuth:84"),
            Classified::BlockStart {
                needs: BlockNeeds::LineRef,
                ..
            }
        ));
        match set.classify("--line 123 of file refs.bib") {
            Classified::LineRef { line, file } => {
                assert_eq!(line, 123);
                assert_eq!(file, Some(PathBuf::from("refs.bib")));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_makeindex_error_block() {
        let set = PatternFamily::Makeindex.patterns();
        assert!(matches!(
            set.classify("!! Input index error (file = main.idx, line = 5):"),
            Classified::BlockStart {
                needs: BlockNeeds::Detail,
                ..
            }
        ));
        assert!(matches!(
            set.classify("   -- Illegal space within braces in first argument."),
            Classified::Detail(_)
        ));
    }
}
