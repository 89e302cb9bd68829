//! Ports the archive core consumes; implemented by API adapter crates.

use async_trait::async_trait;

use crate::{
    domain::{Group, GroupId, Message},
    Result,
};

/// A finite, lazy sequence of pages.
///
/// `next_page` returns the next batch, `None` once the source is exhausted,
/// or an error after the adapter's retries are spent. Batches already
/// yielded remain valid after an error. A pager is restartable from the
/// beginning only: construct a new one instead of reusing a failed one.
#[async_trait]
pub trait Pages<T>: Send {
    async fn next_page(&mut self) -> Result<Option<Vec<T>>>;
}

/// The chat-service surface the archiver depends on.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Single group lookup.
    async fn get_group(&self, group_id: &GroupId) -> Result<Group>;

    /// Page through every group visible to the credential.
    fn groups(&self) -> Box<dyn Pages<Group> + '_>;

    /// Page through a group's messages, newest first.
    fn messages(&self, group_id: &GroupId) -> Box<dyn Pages<Message> + '_>;
}

/// Drain a pager to completion, collecting every item.
pub async fn drain<T>(pages: &mut dyn Pages<T>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    while let Some(batch) = pages.next_page().await? {
        out.extend(batch);
    }
    Ok(out)
}
