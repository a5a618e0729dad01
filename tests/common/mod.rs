//! Common test utilities for occurrence-dl integration tests

use occurrence_dl::{Config, DownloadConfig, DownloadFormat, OccurrenceRecord, PersistenceConfig};
use serde_json::{Value, json};
use std::io::Read;
use std::path::Path;
use tempfile::TempDir;

/// Datasets the fixture records are spread over
pub const DATASETS: [&str; 3] = [
    "2c2f9d4e-4a2c-4a3b-9f55-1f2b0c4f3e10",
    "7d1b4f2a-98c1-4d5e-a0b7-3c9e8f1d2a64",
    "e5a3c8b1-0f6d-4e2a-b9c7-5d4f3a2b1c08",
];

/// `_source` of the fixture record `i`
pub fn occurrence_source(i: u64) -> Value {
    let license = match i % 3 {
        0 => "http://creativecommons.org/publicdomain/zero/1.0/legalcode",
        1 => "CC_BY_4_0",
        _ => "CC0_1_0",
    };
    json!({
        "gbifID": i,
        "datasetKey": DATASETS[(i % 3) as usize],
        "license": license,
        "scientificName": format!("Species {i}"),
        "year": 2000 + i,
        "countryCode": "DK",
        "verbatim": {
            "core": {
                "http://rs.tdwg.org/dwc/terms/recordedBy": format!("Collector {i}"),
                "http://rs.tdwg.org/dwc/terms/country": "Denmark"
            }
        }
    })
}

/// Fixture records as the search backend would return them
pub fn records(count: u64) -> Vec<OccurrenceRecord> {
    (0..count)
        .map(|i| OccurrenceRecord::from_source(occurrence_source(i)))
        .collect()
}

/// Engine configuration rooted in a scratch directory
pub fn test_config(root: &TempDir, max_threads: usize, job_min_records: u64) -> Config {
    let mut config = Config {
        download: DownloadConfig {
            work_dir: root.path().join("work"),
            output_dir: root.path().join("downloads"),
            max_threads,
            job_min_records,
            max_records: 200_000,
            default_format: DownloadFormat::SimpleCsv,
        },
        persistence: PersistenceConfig {
            database_path: root.path().join("occurrence-dl.db"),
        },
        ..Config::default()
    };
    config.lock.poll_interval = std::time::Duration::from_millis(10);
    config
}

/// Content of one member of a zip archive
pub fn zip_entry(archive: &Path, name: &str) -> String {
    let file = std::fs::File::open(archive).unwrap();
    let mut zip = zip::ZipArchive::new(file).unwrap();
    let mut content = String::new();
    zip.by_name(name)
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    content
}

/// First column of every data line (the header is skipped)
pub fn ids(content: &str) -> Vec<String> {
    content
        .lines()
        .skip(1)
        .map(|line| line.split('\t').next().unwrap_or_default().to_string())
        .collect()
}
