//! Shared timestamp / attachment-URL helpers used by the log, the group
//! listing, and the image downloader.

use chrono::{Local, LocalResult, TimeZone};

use crate::domain::Attachment;

/// Format an epoch-seconds instant as fixed-width local time,
/// `MM-DD-YYYY HH:MM:SS`.
///
/// Returns `None` for instants outside chrono's representable range.
pub fn format_timestamp(epoch_secs: i64) -> Option<String> {
    let dt = match Local.timestamp_opt(epoch_secs, 0) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => return None,
    };
    Some(dt.format("%m-%d-%Y %H:%M:%S").to_string())
}

/// Comma-joined URLs of image attachments, preserving their relative order.
///
/// Non-image attachments and image attachments without a URL are dropped.
pub fn image_urls(attachments: &[Attachment]) -> String {
    attachments
        .iter()
        .filter(|a| a.kind == "image")
        .filter_map(|a| a.url.as_deref())
        .collect::<Vec<_>>()
        .join(",")
}

/// Reduce a group name to a filesystem-friendly directory component.
pub fn safe_name(name: &str) -> String {
    let cleaned = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>();
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "group".to_string()
    } else {
        trimmed.to_string()
    }
}
