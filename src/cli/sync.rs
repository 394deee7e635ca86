//! `sync` command: query the synchronization mapper from the terminal.
//!
//! Loads the document's artifact once, runs one query, prints text or JSON.
//! "No match" is an answer, not a failure - missing artifacts degrade to an
//! empty record and every query on it reports no match.

use anyhow::Result;
use serde_json::json;

use super::SyncQuery;
use crate::core::DocumentSpec;
use crate::sync::SyncStore;

pub fn run(query: &SyncQuery) -> Result<()> {
    match query {
        SyncQuery::Forward {
            doc,
            line,
            file,
            json,
            pretty,
        } => {
            let doc = DocumentSpec::resolve(doc)?;
            let record = load(&doc);
            let target = file.clone().unwrap_or_else(|| doc.path().to_path_buf());

            match record.query_source_to_output(&target, *line) {
                Some(found) => {
                    if *json {
                        let regions: Vec<_> = found.regions.iter().collect();
                        print_json(&json!({ "page": found.page, "regions": regions }), *pretty)?;
                    } else {
                        crate::log!(
                            "sync";
                            "{}:{} -> page {} ({} regions)",
                            target.display(),
                            line,
                            found.page,
                            found.regions.len()
                        );
                        for rect in &found.regions {
                            println!(
                                "  [{:.1}, {:.1}] {:.1} x {:.1}",
                                rect.left, rect.top, rect.width, rect.height
                            );
                        }
                    }
                }
                None => no_match(*json, *pretty)?,
            }
        }
        SyncQuery::Inverse {
            doc,
            page,
            x,
            y,
            json,
            pretty,
        } => {
            let doc = DocumentSpec::resolve(doc)?;
            let record = load(&doc);

            match record.query_output_to_source(*page, *x, *y) {
                Some(location) => {
                    if *json {
                        print_json(&serde_json::to_value(&location)?, *pretty)?;
                    } else {
                        crate::log!(
                            "sync";
                            "page {} ({:.1}, {:.1}) -> {}:{}",
                            page,
                            x,
                            y,
                            location.file.display(),
                            location.line
                        );
                    }
                }
                None => no_match(*json, *pretty)?,
            }
        }
    }
    Ok(())
}

fn load(doc: &DocumentSpec) -> std::sync::Arc<crate::sync::SyncRecord> {
    let store = SyncStore::new();
    let record = store.reload(doc);
    if record.is_empty() {
        crate::debug!(
            "sync";
            "no synchronization data for {} (artifact: {})",
            doc.file_name(),
            doc.sync_artifact_path().display()
        );
    }
    record
}

fn no_match(as_json: bool, pretty: bool) -> Result<()> {
    if as_json {
        print_json(&json!({ "match": null }), pretty)?;
    } else {
        println!("no match");
    }
    Ok(())
}

fn print_json(value: &serde_json::Value, pretty: bool) -> Result<()> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{rendered}");
    Ok(())
}
