//! Archive and working-directory file operations
//!
//! Blocking helpers; async callers run them through `spawn_blocking`.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Content of one archive member
#[derive(Clone, Debug)]
pub enum EntrySource {
    /// Copy an existing file
    File(PathBuf),
    /// Write these bytes
    Bytes(Vec<u8>),
}

/// A member of a zip archive
#[derive(Clone, Debug)]
pub struct ArchiveEntry {
    /// Name inside the archive
    pub name: String,
    /// Where the content comes from
    pub source: EntrySource,
}

impl ArchiveEntry {
    /// Member copied from a file
    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: EntrySource::File(path.into()),
        }
    }

    /// Member with in-memory content
    pub fn bytes(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            source: EntrySource::Bytes(content.into()),
        }
    }
}

/// Append the content of `source` to `target`, returning the bytes copied
pub fn append_file(source: &Path, target: &mut impl Write) -> Result<u64> {
    let mut reader = BufReader::new(File::open(source)?);
    Ok(std::io::copy(&mut reader, target)?)
}

/// Write a deflate-compressed zip archive holding `entries`, in order
///
/// Returns the archive size in bytes. Zip64 extensions are enabled so that
/// members larger than 4 GiB are supported.
pub fn create_zip_archive(entries: &[ArchiveEntry], target: &Path) -> Result<u64> {
    let file = File::create(target)?;
    let mut zip = zip::ZipWriter::new(BufWriter::new(file));
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .large_file(true);

    for entry in entries {
        zip.start_file(entry.name.as_str(), options)?;
        match &entry.source {
            EntrySource::File(path) => {
                append_file(path, &mut zip)?;
            }
            EntrySource::Bytes(content) => zip.write_all(content)?,
        }
    }

    let mut writer = zip.finish()?;
    writer.flush()?;
    drop(writer);
    Ok(std::fs::metadata(target)?.len())
}

/// Move a finished data file to its final location, returning its size
///
/// Falls back to copying when the target is on another file system.
pub fn create_single_file(source: &Path, target: &Path) -> Result<u64> {
    if std::fs::rename(source, target).is_err() {
        std::fs::copy(source, target)?;
        std::fs::remove_file(source)?;
    }
    Ok(std::fs::metadata(target)?.len())
}

/// Recursively delete a directory; a missing directory is not an error
pub fn delete_directory(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Hex SHA-256 of a file
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

const DWC_TERMS_NS: &str = "http://rs.tdwg.org/dwc/terms/";

/// Darwin Core Archive descriptor for an interpreted core file with a
/// verbatim extension, both tab-delimited with a header line
pub fn dwca_meta_xml(
    interpreted_file: &str,
    interpreted_terms: &[&str],
    verbatim_file: &str,
    verbatim_terms: &[&str],
) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str("<archive xmlns=\"http://rs.tdwg.org/dwc/text/\" metadata=\"metadata.xml\">\n");
    push_table(
        &mut xml,
        "core",
        "http://rs.tdwg.org/dwc/terms/Occurrence",
        interpreted_file,
        interpreted_terms,
    );
    push_table(
        &mut xml,
        "extension",
        "http://rs.tdwg.org/dwc/terms/Occurrence",
        verbatim_file,
        verbatim_terms,
    );
    xml.push_str("</archive>\n");
    xml
}

fn push_table(xml: &mut String, element: &str, row_type: &str, location: &str, terms: &[&str]) {
    xml.push_str(&format!(
        "  <{element} encoding=\"UTF-8\" fieldsTerminatedBy=\"\\t\" linesTerminatedBy=\"\\n\" \
         fieldsEnclosedBy=\"\" ignoreHeaderLines=\"1\" rowType=\"{row_type}\">\n"
    ));
    xml.push_str(&format!("    <files><location>{location}</location></files>\n"));
    if element == "core" {
        xml.push_str("    <id index=\"0\"/>\n");
    } else {
        xml.push_str("    <coreid index=\"0\"/>\n");
    }
    for (index, term) in terms.iter().enumerate().skip(1) {
        xml.push_str(&format!(
            "    <field index=\"{index}\" term=\"{DWC_TERMS_NS}{term}\"/>\n"
        ));
    }
    xml.push_str(&format!("  </{element}>\n"));
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_concatenates_in_call_order() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, "first\n").unwrap();
        std::fs::write(&b, "second\n").unwrap();

        let mut out = Vec::new();
        append_file(&a, &mut out).unwrap();
        let copied = append_file(&b, &mut out).unwrap();

        assert_eq!(out, b"first\nsecond\n");
        assert_eq!(copied, 7);
        assert!(a.exists(), "append must not consume the source");
    }

    #[test]
    fn zip_archive_holds_entries_in_order() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("data.tsv");
        std::fs::write(&data, "id\tname\n1\tPuma\n").unwrap();
        let target = dir.path().join("out.zip");

        let size = create_zip_archive(
            &[
                ArchiveEntry::file("0001.csv", &data),
                ArchiveEntry::bytes("rights.txt", "CC_BY_4_0"),
            ],
            &target,
        )
        .unwrap();

        assert_eq!(size, std::fs::metadata(&target).unwrap().len());
        let mut archive = zip::ZipArchive::new(File::open(&target).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);
        let mut content = String::new();
        archive
            .by_index(0)
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "id\tname\n1\tPuma\n");
        assert_eq!(archive.by_index(1).unwrap().name(), "rights.txt");
    }

    #[test]
    fn missing_member_source_fails() {
        let dir = TempDir::new().unwrap();
        let result = create_zip_archive(
            &[ArchiveEntry::file("x", dir.path().join("missing"))],
            &dir.path().join("out.zip"),
        );
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn single_file_is_moved() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("data");
        let target = dir.path().join("final.tsv");
        std::fs::write(&source, "abc").unwrap();

        assert_eq!(create_single_file(&source, &target).unwrap(), 3);
        assert!(!source.exists());
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "abc");
    }

    #[test]
    fn deleting_missing_directory_is_ok() {
        let dir = TempDir::new().unwrap();
        let work = dir.path().join("work");
        std::fs::create_dir_all(work.join("nested")).unwrap();
        std::fs::write(work.join("nested/part"), "x").unwrap();

        delete_directory(&work).unwrap();
        assert!(!work.exists());
        delete_directory(&work).unwrap();
    }

    #[test]
    fn sha256_matches_known_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, "abc").unwrap();

        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn meta_xml_lists_terms_after_id_column() {
        let xml = dwca_meta_xml(
            "occurrence.txt",
            &["gbifID", "catalogNumber"],
            "verbatim.txt",
            &["gbifID", "recordedBy"],
        );

        assert!(xml.contains("<location>occurrence.txt</location>"));
        assert!(xml.contains("<id index=\"0\"/>"));
        assert!(xml.contains("<coreid index=\"0\"/>"));
        assert!(xml.contains("index=\"1\" term=\"http://rs.tdwg.org/dwc/terms/catalogNumber\""));
        assert!(xml.contains("term=\"http://rs.tdwg.org/dwc/terms/recordedBy\""));
    }
}
