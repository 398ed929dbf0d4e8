use crate::documents::DocumentStore;
use crate::fallback::FallbackStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Fallback keys copied into the document store, each into the collection of
/// the same name.
pub const MIGRATED_COLLECTIONS: [&str; 5] =
    ["clients", "orders", "deposits", "withdrawals", "orderRequests"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub migrated: BTreeMap<String, usize>,
    pub skipped_keys: Vec<String>,
    pub failure: Option<String>,
}

impl MigrationReport {
    pub fn total(&self) -> usize {
        self.migrated.values().sum()
    }

    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// Copies every element of the known fallback collections into the document
/// store. Elements get fresh ids and server timestamps; a missing `date` is
/// set to `now`. Running it twice stores everything twice. The first store
/// error ends the run and is recorded in the report next to the counts
/// already written.
pub fn migrate_fallback_to_remote(
    fallback: &FallbackStore,
    documents: &DocumentStore,
    now: DateTime<Utc>,
) -> MigrationReport {
    let mut report = MigrationReport::default();
    let stamp = now.to_rfc3339();

    for key in MIGRATED_COLLECTIONS {
        if fallback.get(key).is_none() {
            continue;
        }
        let Some(items) = fallback.read_json_array(key) else {
            report.skipped_keys.push(key.to_string());
            continue;
        };

        let mut count = 0usize;
        for item in items {
            let Value::Object(mut fields) = item else {
                warn!(event = "migrate_skip_item", collection = key, "element is not an object");
                continue;
            };
            fields.remove("id");
            let has_date = fields
                .get("date")
                .is_some_and(|value| !value.is_null());
            if !has_date {
                fields.insert("date".to_string(), Value::String(stamp.clone()));
            }

            if let Err(err) = documents.insert(key, fields) {
                warn!(event = "migrate_failed", collection = key, migrated = count, error = %err);
                report.migrated.insert(key.to_string(), count);
                report.failure = Some(format!("{key}: {err}"));
                return report;
            }
            count += 1;
        }

        info!(event = "migrate_collection", collection = key, migrated = count);
        report.migrated.insert(key.to_string(), count);
    }

    report
}
