use super::*;
use crate::db::NewDownload;
use crate::download::partition::job_files;
use crate::predicate::Predicate;
use crate::query::{CompiledQuery, QueryCompiler};
use crate::registry::DownloadRecord;
use crate::types::DownloadStatus;
use async_trait::async_trait;
use std::io::Read;
use std::sync::Mutex;
use tempfile::TempDir;

/// In-memory registry recording what the aggregator persisted
#[derive(Default)]
struct RecordingRegistry {
    fail_usages: bool,
    record: Mutex<Option<DownloadRecord>>,
    usages: Mutex<BTreeMap<DatasetKey, u64>>,
}

impl RecordingRegistry {
    fn with_download(key: &str) -> Self {
        let now = chrono::Utc::now();
        Self {
            record: Mutex::new(Some(DownloadRecord {
                key: DownloadKey::new(key),
                predicate: "{}".to_string(),
                format: DownloadFormat::SimpleCsv,
                status: DownloadStatus::Running,
                license: None,
                total_records: 0,
                archive_path: None,
                archive_size: None,
                checksum: None,
                error_message: None,
                creator: None,
                created_at: now,
                modified_at: now,
            })),
            ..Self::default()
        }
    }

    fn license(&self) -> Option<License> {
        self.record.lock().unwrap().as_ref().and_then(|r| r.license)
    }
}

#[async_trait]
impl Registry for RecordingRegistry {
    async fn create(&self, _download: &NewDownload) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &DownloadKey) -> Result<DownloadRecord> {
        self.record
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn update(&self, record: &DownloadRecord) -> Result<()> {
        *self.record.lock().unwrap() = Some(record.clone());
        Ok(())
    }

    async fn create_usages(
        &self,
        _key: &DownloadKey,
        usages: &BTreeMap<DatasetKey, u64>,
    ) -> Result<()> {
        if self.fail_usages {
            return Err(Error::Other("registry unavailable".to_string()));
        }
        *self.usages.lock().unwrap() = usages.clone();
        Ok(())
    }
}

struct Fixture {
    _root: TempDir,
    work_dir: PathBuf,
    target_dir: PathBuf,
    query: Arc<CompiledQuery>,
}

impl Fixture {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let work_dir = root.path().join("work").join("k");
        let target_dir = root.path().join("out");
        std::fs::create_dir_all(&work_dir).unwrap();
        Self {
            work_dir,
            target_dir,
            query: Arc::new(QueryCompiler::new().compile(&Predicate::and(vec![])).unwrap()),
            _root: root,
        }
    }

    /// A finished job whose partial files hold `rows`
    fn result(
        &self,
        index: usize,
        from: u64,
        rows: &[&str],
        usages: &[(u128, u64)],
        licenses: &[License],
    ) -> JobResult {
        let (interpreted, verbatim) = job_files(&self.work_dir, &DownloadKey::new("k"), index);
        let body: String = rows.iter().map(|r| format!("{r}\n")).collect();
        std::fs::write(&interpreted, &body).unwrap();
        std::fs::write(&verbatim, &body).unwrap();
        JobResult {
            job: FileJob::new(
                index,
                self.query.clone(),
                from,
                from + rows.len() as u64,
                interpreted,
                verbatim,
            )
            .unwrap(),
            records: rows.len() as u64,
            dataset_usages: usages
                .iter()
                .map(|(k, n)| (DatasetKey::from_u128(*k), *n))
                .collect(),
            dataset_licenses: licenses.iter().copied().collect(),
        }
    }

    fn aggregator(&self, format: DownloadFormat, registry: Arc<RecordingRegistry>) -> Aggregator {
        Aggregator::new(DownloadKey::new("k"), format, &self.work_dir, registry)
    }
}

fn zip_entry(path: &Path, name: &str) -> String {
    let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut content = String::new();
    archive
        .by_name(name)
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    content
}

#[tokio::test]
async fn test_partials_are_merged_in_job_order() {
    let fx = Fixture::new();
    let results = vec![
        fx.result(2, 4, &["r4", "r5"], &[], &[]),
        fx.result(0, 0, &["r0", "r1"], &[], &[]),
        fx.result(1, 2, &["r2", "r3"], &[], &[]),
    ];
    let target = fx.target_dir.join("k.tsv");

    let summary = fx
        .aggregator(DownloadFormat::SimpleTsv, Arc::new(RecordingRegistry::with_download("k")))
        .aggregate(results, &target)
        .await
        .unwrap();

    let content = std::fs::read_to_string(&target).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], header_line(INTERPRETED_TERMS).trim_end());
    assert_eq!(&lines[1..], &["r0", "r1", "r2", "r3", "r4", "r5"]);
    assert_eq!(summary.records, 6);
    assert_eq!(summary.size, content.len() as u64);
    assert_eq!(summary.checksum.len(), 64);
}

#[tokio::test]
async fn test_simple_csv_zip_holds_one_data_file() {
    let fx = Fixture::new();
    let target = fx.target_dir.join("k.zip");

    fx.aggregator(DownloadFormat::SimpleCsv, Arc::new(RecordingRegistry::with_download("k")))
        .aggregate(vec![fx.result(0, 0, &["a"], &[], &[])], &target)
        .await
        .unwrap();

    let archive = zip::ZipArchive::new(File::open(&target).unwrap()).unwrap();
    assert_eq!(archive.len(), 1);
    assert!(zip_entry(&target, "k.csv").ends_with("\na\n"));
}

#[tokio::test]
async fn test_dwca_archive_layout() {
    let fx = Fixture::new();
    let target = fx.target_dir.join("k.zip");

    fx.aggregator(DownloadFormat::Dwca, Arc::new(RecordingRegistry::with_download("k")))
        .aggregate(
            vec![fx.result(0, 0, &["a"], &[], &[License::CcByNc4_0])],
            &target,
        )
        .await
        .unwrap();

    let archive = zip::ZipArchive::new(File::open(&target).unwrap()).unwrap();
    let mut names: Vec<&str> = archive.file_names().collect();
    names.sort();
    assert_eq!(names, vec!["meta.xml", "occurrence.txt", "rights.txt", "verbatim.txt"]);
    assert!(zip_entry(&target, "verbatim.txt").starts_with("gbifID\t"));
    assert!(zip_entry(&target, "rights.txt").contains("CC_BY_NC_4_0"));
}

#[tokio::test]
async fn test_usages_are_summed_and_license_persisted() {
    let fx = Fixture::new();
    let registry = Arc::new(RecordingRegistry::with_download("k"));
    let results = vec![
        fx.result(0, 0, &["a"], &[(1, 3), (2, 1)], &[License::Cc0_1_0]),
        fx.result(1, 1, &["b"], &[(1, 4)], &[License::CcBy4_0, License::Cc0_1_0]),
    ];

    let summary = fx
        .aggregator(DownloadFormat::SimpleCsv, registry.clone())
        .aggregate(results, &fx.target_dir.join("k.zip"))
        .await
        .unwrap();

    let expected = BTreeMap::from([(DatasetKey::from_u128(1), 7), (DatasetKey::from_u128(2), 1)]);
    assert_eq!(summary.dataset_usages, expected);
    assert_eq!(*registry.usages.lock().unwrap(), expected);
    assert_eq!(summary.license, License::CcBy4_0);
    assert_eq!(registry.license(), Some(License::CcBy4_0));
}

#[tokio::test]
async fn test_no_license_observed_selects_baseline() {
    let fx = Fixture::new();
    let registry = Arc::new(RecordingRegistry::with_download("k"));

    let summary = fx
        .aggregator(DownloadFormat::SimpleCsv, registry.clone())
        .aggregate(
            vec![fx.result(0, 0, &["a"], &[], &[License::Unsupported])],
            &fx.target_dir.join("k.zip"),
        )
        .await
        .unwrap();

    assert_eq!(summary.license, License::CcBy4_0);
}

#[tokio::test]
async fn test_persistence_failure_does_not_fail_the_download() {
    let fx = Fixture::new();
    let registry = Arc::new(RecordingRegistry {
        fail_usages: true,
        ..RecordingRegistry::with_download("k")
    });
    let target = fx.target_dir.join("k.zip");

    let summary = fx
        .aggregator(DownloadFormat::SimpleCsv, registry.clone())
        .aggregate(vec![fx.result(0, 0, &["a"], &[(1, 1)], &[])], &target)
        .await
        .unwrap();

    assert!(target.exists());
    assert_eq!(summary.records, 1);
    assert_eq!(registry.license(), None);
}

#[tokio::test]
async fn test_work_dir_deleted_after_success() {
    let fx = Fixture::new();

    fx.aggregator(DownloadFormat::SimpleCsv, Arc::new(RecordingRegistry::with_download("k")))
        .aggregate(vec![fx.result(0, 0, &["a"], &[], &[])], &fx.target_dir.join("k.zip"))
        .await
        .unwrap();

    assert!(!fx.work_dir.exists());
}

#[tokio::test]
async fn test_empty_result_gives_header_only_archive() {
    let fx = Fixture::new();
    let target = fx.target_dir.join("k.zip");

    let summary = fx
        .aggregator(DownloadFormat::SimpleCsv, Arc::new(RecordingRegistry::with_download("k")))
        .aggregate(Vec::new(), &target)
        .await
        .unwrap();

    assert_eq!(summary.records, 0);
    assert_eq!(zip_entry(&target, "k.csv"), header_line(INTERPRETED_TERMS));
}

#[tokio::test]
async fn test_missing_partial_fails_and_keeps_work_dir() {
    let fx = Fixture::new();
    let result = fx.result(0, 0, &["a"], &[], &[]);
    std::fs::remove_file(result.job.interpreted_file()).unwrap();
    let kept = fx.result(1, 1, &["b"], &[], &[]);

    let err = fx
        .aggregator(DownloadFormat::SimpleCsv, Arc::new(RecordingRegistry::with_download("k")))
        .aggregate(vec![result, kept.clone()], &fx.target_dir.join("k.zip"))
        .await
        .unwrap_err();

    match err {
        Error::Aggregation { work_dir, .. } => assert_eq!(work_dir, fx.work_dir),
        other => panic!("expected Aggregation, got {other:?}"),
    }
    assert!(kept.job.interpreted_file().exists());
}
