//! Group-listing export: every group's name and creation time.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use tracing::info;

use crate::{
    domain::GroupId,
    errors::Error,
    formatting::format_timestamp,
    ports::{drain, ChatApi},
    Result,
};

/// One group row as shown to the user and written to the listing file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupSummary {
    pub id: GroupId,
    pub name: String,
    /// Creation instant, already formatted as `MM-DD-YYYY HH:MM:SS`.
    pub created_at: String,
}

/// Drain the group pager and format each group's creation time.
pub async fn group_summaries(api: &dyn ChatApi) -> Result<Vec<GroupSummary>> {
    let mut pager = api.groups();
    let groups = drain(pager.as_mut()).await?;

    groups
        .into_iter()
        .map(|g| {
            let created_at = format_timestamp(g.created_at).ok_or_else(|| {
                Error::Data(format!(
                    "group {}: created_at {} out of range",
                    g.id.0, g.created_at
                ))
            })?;
            Ok(GroupSummary {
                id: g.id,
                name: g.name,
                created_at,
            })
        })
        .collect()
}

/// Write `name: timestamp` lines to `path`, creating parent directories.
pub fn write_group_listing(path: &Path, summaries: &[GroupSummary]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    for s in summaries {
        writeln!(w, "{}: {}", s.name, s.created_at)?;
    }
    w.flush()?;

    info!(count = summaries.len(), path = %path.display(), "group listing exported");
    Ok(())
}
