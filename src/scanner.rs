//! Media reference scanner.
//!
//! Finds the storage paths referenced by file-valued fields of exported records.
//! Which fields hold files is declared up front by the data source through a
//! [`MediaSchema`], one entry per record type.

use crate::record::SerializedRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Record type to the names of its file-valued fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSchema {
    file_fields: HashMap<String, HashSet<String>>,
}

impl MediaSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the file-valued fields of a record type
    pub fn with_file_fields<I, S>(mut self, model: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_fields
            .entry(model.to_string())
            .or_default()
            .extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn knows(&self, model: &str) -> bool {
        self.file_fields.contains_key(model)
    }

    pub fn is_file_field(&self, model: &str, field: &str) -> bool {
        self.file_fields
            .get(model)
            .map_or(false, |fields| fields.contains(field))
    }
}

/// Scans records for media references
#[derive(Debug)]
pub struct MediaScanner<'a> {
    schema: &'a MediaSchema,
    media_url: &'a str,
}

impl<'a> MediaScanner<'a> {
    pub fn new(schema: &'a MediaSchema, media_url: &'a str) -> Self {
        Self { schema, media_url }
    }

    /// Collect the distinct normalized paths referenced by `records`
    pub fn scan(&self, records: &[SerializedRecord]) -> BTreeSet<String> {
        let mut media_files = BTreeSet::new();

        for record in records {
            if !self.schema.knows(&record.model) {
                debug!("No media schema for model {}, skipping", record.model);
                continue;
            }

            for (field_name, value) in &record.fields {
                if !self.schema.is_file_field(&record.model, field_name) {
                    continue;
                }

                let raw = match value {
                    Value::Null => continue,
                    Value::String(s) => s,
                    other => {
                        debug!(
                            "Could not process field {} in {}: unexpected value {}",
                            field_name, record.model, other
                        );
                        continue;
                    }
                };

                if let Some(path) = normalize_media_path(raw, self.media_url) {
                    media_files.insert(path);
                }
            }
        }

        media_files
    }
}

/// Reduce a stored file reference to a storage-relative path.
///
/// `https://cdn.example/media/uploads/a.png` with media URL `/media/` becomes
/// `uploads/a.png`. Returns `None` for blank values.
pub fn normalize_media_path(value: &str, media_url: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let mut path = strip_origin(value);
    path = path.strip_prefix('/').unwrap_or(path);

    let prefix = media_url.trim_matches('/');
    if !prefix.is_empty() {
        if let Some(rest) = path
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
        {
            path = rest;
        }
    }

    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

/// Drop `http(s)://host` or a protocol-relative `//host` plus any query or
/// fragment, keeping the path component. Other values pass through.
fn strip_origin(value: &str) -> &str {
    let after_scheme = ["http://", "https://", "//"]
        .iter()
        .find_map(|origin| value.strip_prefix(*origin));
    let Some(after_scheme) = after_scheme else {
        return value;
    };

    let path = match after_scheme.find('/') {
        Some(idx) => &after_scheme[idx..],
        None => "",
    };

    let end = path.find(|c| c == '?' || c == '#').unwrap_or(path.len());
    &path[..end]
}
