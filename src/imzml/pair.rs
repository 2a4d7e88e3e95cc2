//! Locating and validating an imzML header/payload pair.
//!
//! A dataset lives as two sibling files: the `.imzML` header and the `.ibd`
//! payload. [`find_pair`] resolves the pair inside a directory, and
//! [`uuids_match`] confirms both files describe the same acquisition by
//! comparing the header's identifying token with the first 16 raw bytes of
//! the payload.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use uuid::Uuid;

use super::parser::ims_terms;
use quick_xml::events::Event;
use quick_xml::Reader;

/// Find the `.imzML`/`.ibd` file pair in a directory.
///
/// Extensions are matched case-insensitively; when several header files are
/// present the first one with a matching payload wins.
pub fn find_pair<P: AsRef<Path>>(directory: P) -> Option<(PathBuf, PathBuf)> {
    let directory = directory.as_ref();
    if !directory.is_dir() {
        return None;
    }

    let entries = std::fs::read_dir(directory).ok()?;
    let files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();

    let imzml_files: Vec<&PathBuf> = files
        .iter()
        .filter(|path| has_extension(path, "imzml"))
        .collect();

    if imzml_files.len() > 1 {
        warn!("found {} imzML files in {}", imzml_files.len(), directory.display());
    }

    for imzml in imzml_files {
        let stem = imzml.file_stem()?.to_string_lossy().to_lowercase();
        let ibd = files.iter().find(|path| {
            has_extension(path, "ibd")
                && path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_lowercase() == stem)
                    .unwrap_or(false)
        });
        if let Some(ibd) = ibd {
            return Some((imzml.clone(), ibd.clone()));
        }
    }

    None
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase() == extension)
        .unwrap_or(false)
}

/// Check that a header and payload carry the same identifying UUID.
///
/// The header token may be hyphenated, brace-wrapped and mixed-case; it is
/// normalized and compared against the first 16 raw bytes of the payload.
/// Any failure (missing token, short payload, unreadable file) yields
/// `false` rather than an error.
pub fn uuids_match<P: AsRef<Path>, Q: AsRef<Path>>(imzml: P, ibd: Q) -> bool {
    let header_uuid = match read_header_uuid(imzml.as_ref()) {
        Some(uuid) => uuid,
        None => {
            debug!("no UUID found in {}", imzml.as_ref().display());
            return false;
        }
    };

    let payload_uuid = match read_payload_uuid(ibd.as_ref()) {
        Some(uuid) => uuid,
        None => {
            debug!("could not read UUID bytes from {}", ibd.as_ref().display());
            return false;
        }
    };

    header_uuid == payload_uuid
}

/// Extract and normalize the UUID token from a header file.
fn read_header_uuid(imzml: &Path) -> Option<Uuid> {
    let file = File::open(imzml).ok()?;
    let mut reader = Reader::from_reader(std::io::BufReader::new(file));
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                if e.name().as_ref() == b"cvParam" {
                    let mut accession = None;
                    let mut value = None;
                    for attr in e.attributes().filter_map(|a| a.ok()) {
                        match attr.key.as_ref() {
                            b"accession" => {
                                accession = String::from_utf8(attr.value.to_vec()).ok()
                            }
                            b"value" => value = String::from_utf8(attr.value.to_vec()).ok(),
                            _ => {}
                        }
                    }
                    if accession.as_deref() == Some(ims_terms::UUID) {
                        // Uuid::try_parse accepts simple, hyphenated and
                        // braced forms, case-insensitively
                        return Uuid::try_parse(value?.trim()).ok();
                    }
                }
            }
            Ok(Event::Eof) => return None,
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

/// Read the first 16 raw bytes of the payload file.
fn read_payload_uuid(ibd: &Path) -> Option<Uuid> {
    let mut file = File::open(ibd).ok()?;
    let mut bytes = [0u8; 16];
    file.read_exact(&mut bytes).ok()?;
    Some(Uuid::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn touch(path: &Path, contents: &[u8]) {
        let mut file = File::create(path).unwrap();
        file.write_all(contents).unwrap();
    }

    #[test]
    fn test_find_pair() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("sample.imzML"), b"");
        touch(&dir.path().join("sample.ibd"), b"");
        touch(&dir.path().join("notes.txt"), b"");

        let (imzml, ibd) = find_pair(dir.path()).unwrap();
        assert!(imzml.ends_with("sample.imzML"));
        assert!(ibd.ends_with("sample.ibd"));
    }

    #[test]
    fn test_find_pair_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Sample.imzml"), b"");
        touch(&dir.path().join("Sample.IBD"), b"");

        assert!(find_pair(dir.path()).is_some());
    }

    #[test]
    fn test_find_pair_requires_payload() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("sample.imzML"), b"");

        assert!(find_pair(dir.path()).is_none());
        assert!(find_pair(dir.path().join("sample.imzML")).is_none());
    }

    #[test]
    fn test_uuid_normalization() {
        let dir = tempfile::tempdir().unwrap();
        let imzml = dir.path().join("a.imzML");
        let ibd = dir.path().join("a.ibd");

        let xml = r#"<?xml version="1.0"?>
<mzML xmlns="http://psi.hupo.org/ms/mzml">
  <fileDescription>
    <fileContent>
      <cvParam cvRef="IMS" accession="IMS:1000080" name="universally unique identifier"
               value="{01234567-89AB-cdef-0123-456789abcdef}"/>
    </fileContent>
  </fileDescription>
</mzML>"#;
        touch(&imzml, xml.as_bytes());

        let payload: [u8; 16] = [
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67,
            0x89, 0xab, 0xcd, 0xef,
        ];
        touch(&ibd, &payload);

        assert!(uuids_match(&imzml, &ibd));
    }

    #[test]
    fn test_uuid_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let imzml = dir.path().join("a.imzML");
        let ibd = dir.path().join("a.ibd");

        let xml = r#"<mzML><cvParam accession="IMS:1000080" value="01234567-89ab-cdef-0123-456789abcdef"/></mzML>"#;
        touch(&imzml, xml.as_bytes());
        touch(&ibd, &[0u8; 16]);

        assert!(!uuids_match(&imzml, &ibd));
    }
}
