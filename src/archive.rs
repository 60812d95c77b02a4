//! Result archive packaging

use std::io::{Cursor, Write};

use zip::ZipWriter;
use zip::write::FileOptions;

use crate::error::{Error, Result};
use crate::types::ArchiveEntry;

/// Pack entries into an in-memory zip archive.
///
/// Entry names are used verbatim; callers are responsible for keeping
/// them unique within one archive.
pub fn build_zip(entries: &[ArchiveEntry]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in entries {
        writer
            .start_file(entry.name.as_str(), options)
            .map_err(|e| Error::Archive(format!("could not start {}: {e}", entry.name)))?;
        writer
            .write_all(&entry.bytes)
            .map_err(|e| Error::Archive(format!("could not write {}: {e}", entry.name)))?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| Error::Archive(format!("could not finish archive: {e}")))?;
    Ok(cursor.into_inner())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::io::Read;

    use zip::ZipArchive;

    use super::*;

    #[test]
    fn entries_round_trip_through_the_archive() {
        let entries = vec![
            ArchiveEntry {
                name: "nsu_0_raw.json".to_string(),
                bytes: br#"{"LoteDFe":[]}"#.to_vec(),
            },
            ArchiveEntry {
                name: "NFS-e_0_1_1.xml".to_string(),
                bytes: b"<NFSe/>".to_vec(),
            },
        ];
        let bytes = build_zip(&entries).unwrap();

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);
        let mut content = String::new();
        archive
            .by_name("NFS-e_0_1_1.xml")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "<NFSe/>");
    }

    #[test]
    fn an_empty_archive_is_still_valid() {
        let bytes = build_zip(&[]).unwrap();
        let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 0);
    }
}
