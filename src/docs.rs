//! `docqa docs list` / `docqa docs remove`.

use anyhow::{bail, Result};
use chrono::{TimeZone, Utc};

use docqa_core::store::Store;

use crate::config::Config;

fn format_ts(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

pub async fn run_docs_list(config: &Config) -> Result<()> {
    let store = crate::open_store(config).await?;
    let docs = store.list_documents().await?;

    if docs.is_empty() {
        println!("No documents ingested.");
        return Ok(());
    }

    for doc in &docs {
        let chunks = store.document_chunks(&doc.id).await?.len();
        println!(
            "{}  {}  {}  {} chunks  {}",
            doc.id,
            format_ts(doc.ingested_at),
            doc.content_type,
            chunks,
            doc.file_name
        );
    }
    println!();
    println!("{} document(s)", docs.len());
    Ok(())
}

/// Remove by id, or by file name when no id matches.
pub async fn run_docs_remove(config: &Config, target: &str) -> Result<()> {
    let store = crate::open_store(config).await?;
    let id = match store.get_document(target).await? {
        Some(doc) => doc.id,
        None => match store.find_document_by_name(target).await? {
            Some(doc) => doc.id,
            None => bail!("No document with id or file name '{}'", target),
        },
    };

    store.delete_document(&id).await?;
    println!("Removed {}", id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_render_in_utc() {
        assert_eq!(format_ts(0), "1970-01-01 00:00:00");
        assert_eq!(format_ts(1_700_000_000), "2023-11-14 22:13:20");
    }
}
