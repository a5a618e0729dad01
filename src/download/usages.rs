//! Dataset usage bookkeeping

use crate::license::License;
use crate::search::OccurrenceRecord;
use crate::types::DatasetKey;
use std::collections::{BTreeMap, BTreeSet};

/// Counts records per dataset and gathers the licenses seen
///
/// Writers use one collector per job, fed record by record. The aggregator
/// uses a fresh one to fold every job's result.
#[derive(Clone, Debug, Default)]
pub struct DatasetUsagesCollector {
    usages: BTreeMap<DatasetKey, u64>,
    licenses: BTreeSet<License>,
}

impl DatasetUsagesCollector {
    /// An empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one record of `dataset_key`, if any
    pub fn increment_dataset_usage(&mut self, dataset_key: Option<DatasetKey>) {
        if let Some(key) = dataset_key {
            *self.usages.entry(key).or_insert(0) += 1;
        }
    }

    /// Count one record and remember its license
    ///
    /// `Unspecified` is not recorded.
    pub fn collect_dataset_usage(&mut self, dataset_key: Option<DatasetKey>, license: License) {
        self.increment_dataset_usage(dataset_key);
        if license != License::Unspecified {
            self.licenses.insert(license);
        }
    }

    /// Count a search record
    pub fn collect_record(&mut self, record: &OccurrenceRecord) {
        self.collect_dataset_usage(record.dataset_key(), record.license());
    }

    /// Add another collector's per-dataset counts to this one
    pub fn sum_usages(&mut self, usages: &BTreeMap<DatasetKey, u64>) {
        for (key, count) in usages {
            *self.usages.entry(*key).or_insert(0) += count;
        }
    }

    /// Union another set of licenses into this one
    pub fn merge_licenses(&mut self, licenses: &BTreeSet<License>) {
        self.licenses.extend(licenses.iter().copied());
    }

    /// Records per dataset
    pub fn dataset_usages(&self) -> &BTreeMap<DatasetKey, u64> {
        &self.usages
    }

    /// Distinct licenses seen
    pub fn dataset_licenses(&self) -> &BTreeSet<License> {
        &self.licenses
    }

    /// Consume the collector
    pub fn into_parts(self) -> (BTreeMap<DatasetKey, u64>, BTreeSet<License>) {
        (self.usages, self.licenses)
    }
}
