//! Record stores the engine exports from and imports into

use crate::record::SerializedRecord;
use crate::scanner::MediaSchema;
use crate::tenant::TenantId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// The record store behind the engine.
///
/// Every call carries the tenant explicitly; `None` means the unpartitioned store.
pub trait DataSource: Send + Sync {
    /// Every record type, ordered so that a type comes after the types it references
    fn models(&self) -> Vec<String>;

    /// File-valued fields per record type
    fn media_schema(&self) -> MediaSchema;

    fn export(&self, models: &[String], tenant: Option<&TenantId>) -> Result<Vec<SerializedRecord>>;

    /// Load records, replacing existing records with the same model and primary key
    fn import(&self, records: &[SerializedRecord], tenant: Option<&TenantId>) -> Result<usize>;

    /// Delete every record of `models`, dependents first; returns records removed
    fn clear(&self, models: &[String], tenant: Option<&TenantId>) -> Result<usize>;
}

/// Declared record type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_fields: Vec<String>,
}

impl ModelSchema {
    pub fn new(name: &str, file_fields: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            file_fields: file_fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SchemaFile {
    models: Vec<ModelSchema>,
}

/// Data source keeping one JSON array per record type.
///
/// ```text
/// <root>/schema.json
/// <root>/records/<model>.json
/// <root>/tenants/<tenant>/records/<model>.json
/// ```
#[derive(Debug)]
pub struct JsonDirDataSource {
    root: PathBuf,
    schema: Vec<ModelSchema>,
    write_lock: Mutex<()>,
}

impl JsonDirDataSource {
    /// Create (or overwrite the schema of) a store at `root`
    pub fn create<P: AsRef<Path>>(root: P, schema: Vec<ModelSchema>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let file = File::create(root.join("schema.json"))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &SchemaFile { models: schema.clone() })?;
        writer.flush()?;

        Ok(Self {
            root,
            schema,
            write_lock: Mutex::new(()),
        })
    }

    /// Open an existing store
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let schema_path = root.join("schema.json");
        let file = File::open(&schema_path).map_err(|e| Error::Configuration {
            reason: format!("cannot open data source schema {}: {}", schema_path.display(), e),
        })?;
        let schema: SchemaFile = serde_json::from_reader(BufReader::new(file))?;

        Ok(Self {
            root,
            schema: schema.models,
            write_lock: Mutex::new(()),
        })
    }

    fn known(&self, model: &str) -> Result<()> {
        if self.schema.iter().any(|m| m.name == model) {
            Ok(())
        } else {
            Err(Error::Configuration {
                reason: format!("unknown model {}", model),
            })
        }
    }

    fn model_path(&self, model: &str, tenant: Option<&TenantId>) -> Result<PathBuf> {
        let base = match tenant {
            Some(tenant) => {
                tenant.validate()?;
                self.root.join("tenants").join(tenant.as_str())
            }
            None => self.root.clone(),
        };
        Ok(base.join("records").join(format!("{}.json", model)))
    }

    fn load(&self, model: &str, tenant: Option<&TenantId>) -> Result<Vec<SerializedRecord>> {
        let path = self.model_path(model, tenant)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&path).map_err(|e| Error::DataSource {
            reason: format!("cannot read {}: {}", path.display(), e),
        })?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    fn store(&self, model: &str, tenant: Option<&TenantId>, records: &[SerializedRecord]) -> Result<()> {
        let path = self.model_path(model, tenant)?;
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;

        let mut staged = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(staged.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, records)?;
            writer.flush()?;
        }
        staged.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl DataSource for JsonDirDataSource {
    fn models(&self) -> Vec<String> {
        self.schema.iter().map(|m| m.name.clone()).collect()
    }

    fn media_schema(&self) -> MediaSchema {
        self.schema
            .iter()
            .fold(MediaSchema::new(), |schema, model| {
                schema.with_file_fields(&model.name, model.file_fields.iter().cloned())
            })
    }

    fn export(&self, models: &[String], tenant: Option<&TenantId>) -> Result<Vec<SerializedRecord>> {
        let mut records = Vec::new();
        for model in models {
            self.known(model)?;
            let loaded = self.load(model, tenant)?;
            debug!("Exported {} records of {}", loaded.len(), model);
            records.extend(loaded);
        }
        Ok(records)
    }

    fn import(&self, records: &[SerializedRecord], tenant: Option<&TenantId>) -> Result<usize> {
        let _lock = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut by_model: BTreeMap<&str, Vec<&SerializedRecord>> = BTreeMap::new();
        for record in records {
            self.known(&record.model)?;
            by_model.entry(record.model.as_str()).or_default().push(record);
        }

        let mut imported = 0;
        for (model, incoming) in by_model {
            let mut existing = self.load(model, tenant)?;
            for record in incoming {
                let slot = record
                    .pk
                    .as_ref()
                    .and_then(|pk| existing.iter().position(|r| r.pk.as_ref() == Some(pk)));
                match slot {
                    Some(idx) => existing[idx] = record.clone(),
                    None => existing.push(record.clone()),
                }
                imported += 1;
            }
            self.store(model, tenant, &existing)?;
        }

        info!("Imported {} records", imported);
        Ok(imported)
    }

    fn clear(&self, models: &[String], tenant: Option<&TenantId>) -> Result<usize> {
        let _lock = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut removed = 0;
        // Reverse declaration order deletes referencing types first
        for schema in self.schema.iter().rev() {
            if !models.contains(&schema.name) {
                continue;
            }
            let path = self.model_path(&schema.name, tenant)?;
            if path.exists() {
                removed += self.load(&schema.name, tenant)?.len();
                fs::remove_file(&path)?;
                debug!("Cleared records of {}", schema.name);
            }
        }
        Ok(removed)
    }
}
