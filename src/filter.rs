//! Field exclusion for exported records

use crate::record::SerializedRecord;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Records after exclusion, with the number of field values removed
#[derive(Debug)]
pub struct FilterOutcome {
    pub records: Vec<SerializedRecord>,
    pub removed_fields: usize,
}

/// Strip excluded fields from every record whose model has an exclusion set.
///
/// Records of other models are moved through untouched. Record order is kept.
pub fn filter_excluded_fields(
    records: Vec<SerializedRecord>,
    excluded_fields: &BTreeMap<String, BTreeSet<String>>,
) -> FilterOutcome {
    if excluded_fields.is_empty() {
        return FilterOutcome {
            records,
            removed_fields: 0,
        };
    }

    let mut removed_fields = 0;
    let records = records
        .into_iter()
        .map(|mut record| {
            if let Some(excluded) = excluded_fields.get(&record.model) {
                let before = record.fields.len();
                record.fields.retain(|name, _| !excluded.contains(name));
                removed_fields += before - record.fields.len();
            }
            record
        })
        .collect();

    if removed_fields > 0 {
        debug!("Excluded {} field values using {:?}", removed_fields, excluded_fields);
    }

    FilterOutcome {
        records,
        removed_fields,
    }
}
