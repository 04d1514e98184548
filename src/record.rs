//! Serialized records as they appear in `backup.json`

use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// One exported record: `{ "model": "<record-type-id>", "pk": .., "fields": { .. } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedRecord {
    /// Record-type identifier, e.g. `app.widget`
    pub model: String,
    /// Primary key, when the exporting data source has a stable one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pk: Option<Value>,
    /// Field name to value
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl SerializedRecord {
    pub fn new(model: impl Into<String>, pk: Option<Value>, fields: Map<String, Value>) -> Self {
        Self {
            model: model.into(),
            pk,
            fields,
        }
    }

    /// Look up a field value
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Read a fixture file into records
pub fn read_fixture<P: AsRef<Path>>(path: P) -> Result<Vec<SerializedRecord>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Write records as a pretty-printed fixture file
pub fn write_fixture<P: AsRef<Path>>(path: P, records: &[SerializedRecord]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, records)?;
    writer.flush()?;
    Ok(())
}

/// Distinct models in order of first appearance
pub fn models_in(records: &[SerializedRecord]) -> Vec<String> {
    let mut models: Vec<String> = Vec::new();
    for record in records {
        if !models.iter().any(|m| m == &record.model) {
            models.push(record.model.clone());
        }
    }
    models
}
