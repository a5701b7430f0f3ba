use crate::error::ErrorSlot;
use crate::models::SymptomEntry;
use crate::services::circle_collection;
use crate::sync::subscriber::ScopedSubscription;
use crate::sync::writer::{FieldPolicy, OptimisticWriter};
use chrono::{DateTime, Local, Timelike, Utc};
use kinring_backend::{Fields, QuerySpec, Store};
use serde_json::json;
use std::collections::BTreeMap;

/// Only this many entries are mirrored; the full log stays in the store for
/// trend history.
pub const SYMPTOM_WINDOW: usize = 50;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymptomStat {
    pub count: usize,
    pub last_occurrence: Option<String>,
}

/// Shared symptom log, newest first.
pub struct SymptomService {
    collection: Option<String>,
    subscription: ScopedSubscription<SymptomEntry>,
    writer: OptimisticWriter,
    errors: ErrorSlot,
}

impl SymptomService {
    pub fn new(store: &Store, circle_id: Option<&str>) -> Self {
        let errors = ErrorSlot::default();
        let collection = circle_id.map(|id| circle_collection(id, "symptoms"));
        let subscription = ScopedSubscription::open(
            store,
            collection.clone(),
            QuerySpec {
                order_field: Some("loggedAt"),
                limit: Some(SYMPTOM_WINDOW),
                filter_equal: None,
            },
            errors.clone(),
            SymptomEntry::from_document,
        );
        Self {
            writer: OptimisticWriter::new(store.clone(), errors.clone()),
            collection,
            subscription,
            errors,
        }
    }

    /// Appends a symptom entry, stamping the wall-clock time and date the
    /// entry was made on this device alongside the server timestamp.
    pub fn add_symptom(&self, entry: Fields) -> Option<String> {
        let collection = self.collection.as_ref()?;
        let now = Local::now();
        let mut fields = entry;
        fields.insert(
            "time".to_string(),
            json!(format!("{:02}:{:02}", now.hour(), now.minute())),
        );
        fields.insert(
            "date".to_string(),
            json!(now.format("%d.%m.%Y").to_string()),
        );
        Some(
            self.writer
                .create(collection, "symptom", fields, FieldPolicy::Relaxed, "loggedAt"),
        )
    }

    pub fn remove_symptom(&self, doc_id: &str) {
        let Some(collection) = &self.collection else {
            return;
        };
        self.writer.delete(collection, doc_id);
    }

    pub fn symptoms(&self) -> Vec<SymptomEntry> {
        self.subscription.items()
    }

    /// Entries logged within the inclusive range, for reports.
    pub fn symptoms_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<SymptomEntry> {
        self.symptoms()
            .into_iter()
            .filter(|entry| match entry.logged_at {
                Some(ts) => ts >= start && ts <= end,
                None => false,
            })
            .collect()
    }

    /// Per-symptom occurrence counts for the doctor report. The mirrored list
    /// is newest-first, so the first date seen per type is the most recent.
    pub fn stats(&self) -> BTreeMap<String, SymptomStat> {
        let mut stats: BTreeMap<String, SymptomStat> = BTreeMap::new();
        for entry in self.symptoms() {
            let Some(key) = entry.catalog_id.clone().or_else(|| entry.label.clone()) else {
                continue;
            };
            let stat = stats.entry(key).or_default();
            stat.count += 1;
            if stat.last_occurrence.is_none() {
                stat.last_occurrence = entry.date.clone();
            }
        }
        stats
    }

    pub fn loading(&self) -> bool {
        self.subscription.loading()
    }

    pub fn errors(&self) -> ErrorSlot {
        self.errors.clone()
    }
}
