//! Records of binary payloads held by external file storage.

use rusqlite::params;
use uuid::Uuid;

use crate::database::{fmt_ts, not_found, parse_ts, parse_uuid, Database};
use crate::error::Result;
use crate::models::{FileKind, FileRecord};
use crate::repository::FileStore;

impl FileStore for Database {
    fn insert_file(&self, file: &FileRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO files (id, file_name, kind, size, url, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                file.id.to_string(),
                file.file_name,
                file.kind.as_str(),
                file.size,
                file.url,
                fmt_ts(&file.uploaded_at),
            ],
        )?;
        Ok(())
    }

    fn get_file(&self, id: &Uuid) -> Result<FileRecord> {
        self.conn()
            .query_row(
                "SELECT id, file_name, kind, size, url, uploaded_at FROM files WHERE id = ?1",
                params![id.to_string()],
                row_to_file,
            )
            .map_err(not_found)
    }
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    let id: String = row.get(0)?;
    let kind: String = row.get(2)?;
    let uploaded: String = row.get(5)?;
    Ok(FileRecord {
        id: parse_uuid(0, &id)?,
        file_name: row.get(1)?,
        // Unknown kinds from older writers degrade to a plain document.
        kind: FileKind::parse(&kind).unwrap_or(FileKind::Document),
        size: row.get(3)?,
        url: row.get(4)?,
        uploaded_at: parse_ts(5, &uploaded)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::StoreError;

    #[test]
    fn insert_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("files.db")).unwrap();
        let file = FileRecord {
            id: Uuid::new_v4(),
            file_name: "voice-note.ogg".into(),
            kind: FileKind::Audio,
            size: 4096,
            url: "/uploads/voice-note.ogg".into(),
            uploaded_at: Utc::now(),
        };
        db.insert_file(&file).unwrap();

        let loaded = db.get_file(&file.id).unwrap();
        assert_eq!(loaded.kind, FileKind::Audio);
        assert_eq!(loaded.url, file.url);
        assert!(matches!(
            db.get_file(&Uuid::new_v4()),
            Err(StoreError::NotFound)
        ));
    }
}
