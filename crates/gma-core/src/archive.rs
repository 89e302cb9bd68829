//! Single-pass archive aggregation.
//!
//! One traversal of the message stream produces three mutually consistent
//! tables: the full message log, per-author message counts, and per-author
//! display-name history. Nothing touches disk until the stream is fully
//! drained, so a failed or cancelled run leaves no partial archive behind.

use std::{
    collections::{hash_map::Entry, BTreeSet, HashMap},
    path::{Path, PathBuf},
};

use tracing::info;

use crate::{
    csv,
    domain::{Group, GroupId, Message},
    errors::Error,
    formatting::{format_timestamp, image_urls},
    ports::ChatApi,
    Result,
};

pub const LOG_FILE: &str = "historic_messages.csv";
pub const COUNT_FILE: &str = "message_count.csv";
pub const NAMES_FILE: &str = "unique_names.csv";

/// Reserved count-table key holding the total across all authors.
pub const TOTAL_KEY: &str = "Total";

const PROGRESS_EVERY: u64 = 1000;

/// A failed archive run, carrying how many messages were aggregated before
/// the run broke. No output files exist when this is returned.
#[derive(Debug, thiserror::Error)]
#[error("archive aborted after {processed} messages: {source}")]
pub struct ArchiveAborted {
    pub processed: u64,
    #[source]
    pub source: Error,
}

/// Summary of a completed archive run.
#[derive(Clone, Debug)]
pub struct ArchiveSummary {
    pub group: Group,
    pub messages: u64,
    pub authors: usize,
    pub files: Vec<PathBuf>,
}

/// Drives one archive run against an injected API.
pub struct Archiver<'a> {
    api: &'a dyn ChatApi,
}

impl<'a> Archiver<'a> {
    pub fn new(api: &'a dyn ChatApi) -> Self {
        Self { api }
    }

    /// Archive every message of `group_id` into `output_dir`.
    ///
    /// All-or-nothing at the table level: the three files are written only
    /// after the stream is exhausted. Dropping the future between messages
    /// discards the in-memory tables without writing anything.
    pub async fn archive_group(
        &self,
        group_id: &GroupId,
        output_dir: &Path,
    ) -> std::result::Result<ArchiveSummary, ArchiveAborted> {
        let group = self
            .api
            .get_group(group_id)
            .await
            .map_err(|e| aborted(0, e))?;
        info!(group = %group.name, id = %group_id.0, "starting archive");

        let mut tables = Tables::new();
        {
            let mut pages = self.api.messages(group_id);
            while let Some(batch) = pages
                .next_page()
                .await
                .map_err(|e| aborted(tables.processed, e))?
            {
                for msg in &batch {
                    tables
                        .observe(msg)
                        .map_err(|e| aborted(tables.processed, e))?;
                    if tables.processed % PROGRESS_EVERY == 0 {
                        info!(processed = tables.processed, "archiving in progress");
                    }
                }
            }
        }

        std::fs::create_dir_all(output_dir)
            .map_err(|e| aborted(tables.processed, Error::Io(e)))?;
        let files = tables
            .write_to(output_dir)
            .map_err(|e| aborted(tables.processed, e))?;

        info!(
            group = %group.name,
            messages = tables.processed,
            "archive complete"
        );

        Ok(ArchiveSummary {
            group,
            messages: tables.processed,
            authors: tables.count_order.len(),
            files,
        })
    }
}

fn aborted(processed: u64, source: Error) -> ArchiveAborted {
    ArchiveAborted { processed, source }
}

/// In-memory aggregates for one run. Created empty, mutated exactly once per
/// message, serialized exactly once at run end.
struct Tables {
    log: Vec<Vec<String>>,
    counts: HashMap<String, u64>,
    /// Author ids in first-seen order; `Total` is written last, separately.
    count_order: Vec<String>,
    names: HashMap<String, BTreeSet<String>>,
    name_order: Vec<String>,
    processed: u64,
}

impl Tables {
    fn new() -> Self {
        let mut counts = HashMap::new();
        counts.insert(TOTAL_KEY.to_string(), 0);
        Self {
            log: Vec::new(),
            counts,
            count_order: Vec::new(),
            names: HashMap::new(),
            name_order: Vec::new(),
            processed: 0,
        }
    }

    fn observe(&mut self, msg: &Message) -> Result<()> {
        let ts = format_timestamp(msg.created_at).ok_or_else(|| {
            Error::Data(format!(
                "message {}: created_at {} out of range",
                msg.id, msg.created_at
            ))
        })?;

        self.log.push(vec![
            msg.user_id.0.clone(),
            msg.name.clone(),
            msg.text.clone().unwrap_or_default(),
            image_urls(&msg.attachments),
            ts,
        ]);

        self.bump(&msg.user_id.0);
        self.bump(TOTAL_KEY);

        if !self.names.contains_key(&msg.user_id.0) {
            self.name_order.push(msg.user_id.0.clone());
        }
        self.names
            .entry(msg.user_id.0.clone())
            .or_default()
            .insert(msg.name.clone());

        self.processed += 1;
        Ok(())
    }

    fn bump(&mut self, key: &str) {
        match self.counts.entry(key.to_string()) {
            Entry::Occupied(mut e) => *e.get_mut() += 1,
            Entry::Vacant(e) => {
                self.count_order.push(e.key().clone());
                e.insert(1);
            }
        }
    }

    /// Write the three tables, one full pass each. A failure partway leaves
    /// that file incomplete or absent without rolling back the others.
    fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let log_path = dir.join(LOG_FILE);
        csv::write_rows(&log_path, &self.log)?;

        let mut count_rows: Vec<Vec<String>> = self
            .count_order
            .iter()
            .map(|id| {
                vec![
                    id.clone(),
                    self.counts.get(id).copied().unwrap_or(0).to_string(),
                ]
            })
            .collect();
        count_rows.push(vec![
            TOTAL_KEY.to_string(),
            self.counts.get(TOTAL_KEY).copied().unwrap_or(0).to_string(),
        ]);
        let count_path = dir.join(COUNT_FILE);
        csv::write_rows(&count_path, &count_rows)?;

        let name_rows: Vec<Vec<String>> = self
            .name_order
            .iter()
            .map(|id| {
                let mut row = vec![id.clone()];
                if let Some(set) = self.names.get(id) {
                    row.extend(set.iter().cloned());
                }
                row
            })
            .collect();
        let names_path = dir.join(NAMES_FILE);
        csv::write_rows(&names_path, &name_rows)?;

        Ok(vec![log_path, count_path, names_path])
    }
}
