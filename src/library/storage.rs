//! SQLite index plus per-speaker directories
//!
//! ```text
//! <root>/index.db
//! <root>/original/rec-2024-05-01_09-30-00.wav
//! <root>/A/conv-2024-05-01_09-31-12-A.wav
//! ```

use super::{Recording, SpeakerClass, DATETIME_FORMAT, FILE_DATETIME_FORMAT};
use crate::audio::AudioFileFormat;
use crate::error::StorageError;
use chrono::{Local, NaiveDateTime, Timelike};
use rusqlite::{params, Connection, OptionalExtension};
use std::io::Write;
use std::path::{Path, PathBuf};

const MAX_NAME_LEN: usize = 255;

/// Give up on collision suffixes after this many attempts
const MAX_COLLISION_SUFFIX: u32 = 1000;

pub struct RecordingLibrary {
    root: PathBuf,
    conn: Connection,
}

/// Row as stored, before the timestamp and class are parsed
struct RawRecording {
    id: i64,
    recorded_at: String,
    speaker_class: String,
    filename: String,
}

impl RawRecording {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            recorded_at: row.get(1)?,
            speaker_class: row.get(2)?,
            filename: row.get(3)?,
        })
    }

    fn parse(self) -> Result<Recording, StorageError> {
        let recorded_at = NaiveDateTime::parse_from_str(&self.recorded_at, DATETIME_FORMAT)
            .map_err(|e| {
                StorageError::Corrupt(format!(
                    "recording {} has timestamp '{}': {}",
                    self.id, self.recorded_at, e
                ))
            })?;
        let speaker_class: SpeakerClass = self.speaker_class.parse().map_err(|e: String| {
            StorageError::Corrupt(format!("recording {}: {}", self.id, e))
        })?;

        Ok(Recording {
            id: self.id,
            recorded_at,
            speaker_class,
            filename: self.filename,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, recorded_at, speaker_class, filename FROM recordings";

impl RecordingLibrary {
    /// Open or create a library rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        for class in SpeakerClass::ALL {
            std::fs::create_dir_all(root.join(class.as_str()))?;
        }

        let conn = Connection::open(root.join("index.db"))?;
        let library = Self { root, conn };
        library.init_schema()?;

        tracing::debug!("Opened recordings library at {}", library.root.display());
        Ok(library)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS recordings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recorded_at TEXT NOT NULL,
                speaker_class TEXT NOT NULL,
                filename TEXT NOT NULL,
                UNIQUE (speaker_class, filename)
            );

            CREATE INDEX IF NOT EXISTS idx_recordings_speaker
                ON recordings(speaker_class, recorded_at DESC);
            "#,
        )?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the audio file of `recording` lives
    pub fn path_of(&self, recording: &Recording) -> PathBuf {
        self.file_path(recording.speaker_class, &recording.filename)
    }

    fn file_path(&self, class: SpeakerClass, filename: &str) -> PathBuf {
        self.root.join(class.as_str()).join(filename)
    }

    pub fn find_by_id(&self, id: i64) -> Result<Option<Recording>, StorageError> {
        self.conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                RawRecording::from_row,
            )
            .optional()?
            .map(RawRecording::parse)
            .transpose()
    }

    /// Like `find_by_id`, but a missing id is an error
    pub fn get(&self, id: i64) -> Result<Recording, StorageError> {
        self.find_by_id(id)?.ok_or(StorageError::NotFound(id))
    }

    /// Recordings of one class, newest first
    pub fn list_by_speaker(&self, class: SpeakerClass) -> Result<Vec<Recording>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE speaker_class = ?1 ORDER BY recorded_at DESC, id DESC",
            SELECT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![class.as_str()], RawRecording::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawRecording::parse).collect()
    }

    /// Every recording, newest first
    pub fn list_all(&self) -> Result<Vec<Recording>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "{} ORDER BY recorded_at DESC, id DESC",
            SELECT_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], RawRecording::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawRecording::parse).collect()
    }

    /// Store a microphone capture
    pub fn add_original(
        &self,
        bytes: &[u8],
        recorded_at: NaiveDateTime,
        format: AudioFileFormat,
    ) -> Result<Recording, StorageError> {
        let stem = format!("rec-{}", recorded_at.format(FILE_DATETIME_FORMAT));
        self.store(bytes, SpeakerClass::Original, &stem, format, recorded_at)
    }

    /// Store audio returned by the conversion service, stamped now
    pub fn add_received(
        &self,
        bytes: &[u8],
        speaker: SpeakerClass,
        format: AudioFileFormat,
    ) -> Result<Recording, StorageError> {
        let now = Local::now().naive_local();
        let received_at = now.with_nanosecond(0).unwrap_or(now);
        let stem = format!(
            "conv-{}-{}",
            received_at.format(FILE_DATETIME_FORMAT),
            speaker
        );
        self.store(bytes, speaker, &stem, format, received_at)
    }

    fn store(
        &self,
        bytes: &[u8],
        class: SpeakerClass,
        stem: &str,
        format: AudioFileFormat,
        recorded_at: NaiveDateTime,
    ) -> Result<Recording, StorageError> {
        let (filename, path) = self.create_unique(bytes, class, stem, format.extension())?;

        let inserted = self.conn.execute(
            "INSERT INTO recordings (recorded_at, speaker_class, filename) VALUES (?1, ?2, ?3)",
            params![
                recorded_at.format(DATETIME_FORMAT).to_string(),
                class.as_str(),
                filename
            ],
        );
        if let Err(e) = inserted {
            // Never leave a file the index does not know about
            let _ = std::fs::remove_file(&path);
            return Err(e.into());
        }

        let recording = Recording {
            id: self.conn.last_insert_rowid(),
            recorded_at: recorded_at.with_nanosecond(0).unwrap_or(recorded_at),
            speaker_class: class,
            filename,
        };
        tracing::info!(
            "Saved {} recording {} ({} bytes)",
            class,
            recording.filename,
            bytes.len()
        );
        Ok(recording)
    }

    /// Write `bytes` to a new file named `<stem>.<ext>`, or `<stem>-N.<ext>`
    /// when that name is taken on disk or in the index
    fn create_unique(
        &self,
        bytes: &[u8],
        class: SpeakerClass,
        stem: &str,
        ext: &str,
    ) -> Result<(String, PathBuf), StorageError> {
        for n in 0..MAX_COLLISION_SUFFIX {
            let filename = if n == 0 {
                format!("{}.{}", stem, ext)
            } else {
                format!("{}-{}.{}", stem, n, ext)
            };
            if self.name_in_index(class, &filename)? {
                continue;
            }

            let path = self.file_path(class, &filename);
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(bytes).and_then(|_| file.sync_all()) {
                        drop(file);
                        let _ = std::fs::remove_file(&path);
                        return Err(e.into());
                    }
                    return Ok((filename, path));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(StorageError::AlreadyExists(format!("{}.{}", stem, ext)))
    }

    fn name_in_index(&self, class: SpeakerClass, filename: &str) -> Result<bool, StorageError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM recordings WHERE speaker_class = ?1 AND filename = ?2",
                params![class.as_str(), filename],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Complete file contents
    pub fn read(&self, recording: &Recording) -> Result<Vec<u8>, StorageError> {
        Ok(std::fs::read(self.path_of(recording))?)
    }

    /// Rename a recording on disk and in the index.
    ///
    /// The original extension is kept, and appended when `new_name` lacks it.
    pub fn rename(&self, id: i64, new_name: &str) -> Result<Recording, StorageError> {
        let recording = self.get(id)?;
        let filename = validated_filename(new_name, &recording.filename)?;

        if filename == recording.filename {
            return Ok(recording);
        }
        if self.name_in_index(recording.speaker_class, &filename)?
            || self.file_path(recording.speaker_class, &filename).exists()
        {
            return Err(StorageError::AlreadyExists(filename));
        }

        let from = self.path_of(&recording);
        let to = self.file_path(recording.speaker_class, &filename);
        std::fs::rename(&from, &to)?;

        let updated = self.conn.execute(
            "UPDATE recordings SET filename = ?2 WHERE id = ?1",
            params![id, filename],
        );
        if let Err(e) = updated {
            if let Err(undo) = std::fs::rename(&to, &from) {
                tracing::error!(
                    "Failed to restore {} after index update failed: {}",
                    from.display(),
                    undo
                );
            }
            return Err(e.into());
        }

        tracing::info!("Renamed recording {}: {} -> {}", id, recording.filename, filename);
        Ok(Recording {
            filename,
            ..recording
        })
    }

    /// Remove a recording from the index and delete its file
    pub fn delete(&self, id: i64) -> Result<Recording, StorageError> {
        let recording = self.get(id)?;

        // The row only goes once the file is gone; dropping `tx` rolls back
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM recordings WHERE id = ?1", params![id])?;

        let path = self.path_of(&recording);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Recording file {} was already gone", path.display());
            }
            Err(e) => return Err(e.into()),
        }
        tx.commit()?;

        tracing::info!("Deleted recording {} ({})", id, recording.filename);
        Ok(recording)
    }
}

/// Check a user-supplied name and attach the extension of `current`
fn validated_filename(new_name: &str, current: &str) -> Result<String, StorageError> {
    let name = new_name.trim();
    let invalid = |reason| StorageError::InvalidName {
        name: new_name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(invalid("name contains a path separator"));
    }
    if name.starts_with('.') {
        return Err(invalid("name starts with a dot"));
    }

    let filename = match Path::new(current).extension().and_then(|e| e.to_str()) {
        Some(ext) => {
            let has_ext = Path::new(name)
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(ext));
            if has_ext {
                name.to_string()
            } else {
                format!("{}.{}", name, ext)
            }
        }
        None => name.to_string(),
    };

    if filename.len() > MAX_NAME_LEN {
        return Err(invalid("name is longer than 255 bytes"));
    }
    Ok(filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_library() -> (RecordingLibrary, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let library = RecordingLibrary::open(temp_dir.path()).unwrap();
        (library, temp_dir)
    }

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, DATETIME_FORMAT).unwrap()
    }

    #[test]
    fn test_open_creates_layout() {
        let (library, temp) = create_test_library();
        assert!(temp.path().join("index.db").exists());
        for class in ["original", "A", "B", "C"] {
            assert!(temp.path().join(class).is_dir());
        }
        assert_eq!(library.root(), temp.path());
    }

    #[test]
    fn test_add_and_find_original() {
        let (library, _temp) = create_test_library();

        let recording = library
            .add_original(b"RIFFdata", at("2024-05-01T09:30:00"), AudioFileFormat::Wav)
            .unwrap();
        assert_eq!(recording.filename, "rec-2024-05-01_09-30-00.wav");
        assert_eq!(recording.speaker_class, SpeakerClass::Original);

        let loaded = library.find_by_id(recording.id).unwrap().unwrap();
        assert_eq!(loaded, recording);
        assert_eq!(library.read(&loaded).unwrap(), b"RIFFdata");
    }

    #[test]
    fn test_find_missing() {
        let (library, _temp) = create_test_library();
        assert!(library.find_by_id(42).unwrap().is_none());
        assert!(matches!(library.get(42), Err(StorageError::NotFound(42))));
    }

    #[test]
    fn test_name_collision_gets_suffix() {
        let (library, _temp) = create_test_library();
        let when = at("2024-05-01T09:30:00");

        let first = library.add_original(b"1", when, AudioFileFormat::Wav).unwrap();
        let second = library.add_original(b"2", when, AudioFileFormat::Wav).unwrap();

        assert_eq!(first.filename, "rec-2024-05-01_09-30-00.wav");
        assert_eq!(second.filename, "rec-2024-05-01_09-30-00-1.wav");
        assert_eq!(library.read(&first).unwrap(), b"1");
        assert_eq!(library.read(&second).unwrap(), b"2");
    }

    #[test]
    fn test_stray_file_is_not_overwritten() {
        let (library, temp) = create_test_library();
        let stray = temp.path().join("original/rec-2024-05-01_09-30-00.wav");
        std::fs::write(&stray, b"keep me").unwrap();

        let recording = library
            .add_original(b"new", at("2024-05-01T09:30:00"), AudioFileFormat::Wav)
            .unwrap();
        assert_eq!(recording.filename, "rec-2024-05-01_09-30-00-1.wav");
        assert_eq!(std::fs::read(&stray).unwrap(), b"keep me");
    }

    #[test]
    fn test_add_received() {
        let (library, _temp) = create_test_library();

        let recording = library
            .add_received(b"fLaC", SpeakerClass::B, AudioFileFormat::Flac)
            .unwrap();
        assert_eq!(recording.speaker_class, SpeakerClass::B);
        assert!(recording.filename.starts_with("conv-"));
        assert!(recording.filename.ends_with("-B.flac"));
        assert!(library
            .path_of(&recording)
            .starts_with(library.root().join("B")));
    }

    #[test]
    fn test_list_by_speaker_newest_first() {
        let (library, _temp) = create_test_library();

        library
            .add_original(b"a", at("2024-05-01T09:00:00"), AudioFileFormat::Wav)
            .unwrap();
        library
            .add_original(b"b", at("2024-05-03T09:00:00"), AudioFileFormat::Wav)
            .unwrap();
        library
            .add_original(b"c", at("2024-05-02T09:00:00"), AudioFileFormat::Wav)
            .unwrap();
        library
            .add_received(b"d", SpeakerClass::A, AudioFileFormat::Wav)
            .unwrap();

        let originals = library.list_by_speaker(SpeakerClass::Original).unwrap();
        let days: Vec<_> = originals
            .iter()
            .map(|r| r.recorded_at.format("%d").to_string())
            .collect();
        assert_eq!(days, ["03", "02", "01"]);

        assert_eq!(library.list_by_speaker(SpeakerClass::A).unwrap().len(), 1);
        assert!(library.list_by_speaker(SpeakerClass::C).unwrap().is_empty());
        assert_eq!(library.list_all().unwrap().len(), 4);
    }

    #[test]
    fn test_rename_keeps_extension() {
        let (library, temp) = create_test_library();
        let recording = library
            .add_original(b"x", at("2024-05-01T09:30:00"), AudioFileFormat::Wav)
            .unwrap();

        let renamed = library.rename(recording.id, "  greeting  ").unwrap();
        assert_eq!(renamed.filename, "greeting.wav");
        assert!(temp.path().join("original/greeting.wav").exists());
        assert!(!temp
            .path()
            .join("original/rec-2024-05-01_09-30-00.wav")
            .exists());
        assert_eq!(
            library.find_by_id(recording.id).unwrap().unwrap().filename,
            "greeting.wav"
        );

        let again = library.rename(recording.id, "hello.wav").unwrap();
        assert_eq!(again.filename, "hello.wav");
        assert_eq!(library.read(&again).unwrap(), b"x");
    }

    #[test]
    fn test_rename_rejects_invalid_names() {
        let (library, _temp) = create_test_library();
        let recording = library
            .add_original(b"x", at("2024-05-01T09:30:00"), AudioFileFormat::Wav)
            .unwrap();

        let long_name = "x".repeat(300);
        for bad in ["", "   ", "../escape", "a\\b", ".hidden", long_name.as_str()] {
            assert!(
                matches!(
                    library.rename(recording.id, bad),
                    Err(StorageError::InvalidName { .. })
                ),
                "'{}' should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_rename_to_existing_name_fails() {
        let (library, _temp) = create_test_library();
        let first = library
            .add_original(b"1", at("2024-05-01T09:30:00"), AudioFileFormat::Wav)
            .unwrap();
        let second = library
            .add_original(b"2", at("2024-05-01T09:31:00"), AudioFileFormat::Wav)
            .unwrap();

        let result = library.rename(second.id, "rec-2024-05-01_09-30-00");
        assert!(matches!(result, Err(StorageError::AlreadyExists(_))));
        assert_eq!(library.read(&first).unwrap(), b"1");
        assert_eq!(library.read(&second).unwrap(), b"2");
    }

    #[test]
    fn test_rename_missing_id() {
        let (library, _temp) = create_test_library();
        assert!(matches!(
            library.rename(7, "name"),
            Err(StorageError::NotFound(7))
        ));
    }

    #[test]
    fn test_delete_removes_row_and_file() {
        let (library, _temp) = create_test_library();
        let recording = library
            .add_original(b"x", at("2024-05-01T09:30:00"), AudioFileFormat::Wav)
            .unwrap();
        let path = library.path_of(&recording);
        assert!(path.exists());

        library.delete(recording.id).unwrap();
        assert!(!path.exists());
        assert!(library.find_by_id(recording.id).unwrap().is_none());
        assert!(matches!(
            library.delete(recording.id),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_with_missing_file() {
        let (library, _temp) = create_test_library();
        let recording = library
            .add_original(b"x", at("2024-05-01T09:30:00"), AudioFileFormat::Wav)
            .unwrap();
        std::fs::remove_file(library.path_of(&recording)).unwrap();

        library.delete(recording.id).unwrap();
        assert!(library.find_by_id(recording.id).unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_delete_keeps_row_when_file_cannot_be_removed() {
        use std::os::unix::fs::PermissionsExt;

        let (library, temp) = create_test_library();
        let recording = library
            .add_original(b"x", at("2024-05-01T09:30:00"), AudioFileFormat::Wav)
            .unwrap();
        let class_dir = temp.path().join("original");
        std::fs::set_permissions(&class_dir, std::fs::Permissions::from_mode(0o555)).unwrap();

        // Privileged users ignore directory permissions
        let writable = std::fs::write(class_dir.join(".check"), b"").is_ok();
        let result = library.delete(recording.id);
        std::fs::set_permissions(&class_dir, std::fs::Permissions::from_mode(0o755)).unwrap();
        if writable {
            return;
        }

        assert!(matches!(result, Err(StorageError::Io(_))));
        assert_eq!(library.find_by_id(recording.id).unwrap(), Some(recording.clone()));
        assert!(library.path_of(&recording).exists());

        library.delete(recording.id).unwrap();
        assert!(library.find_by_id(recording.id).unwrap().is_none());
    }

    #[test]
    fn test_reopen_keeps_index() {
        let temp = TempDir::new().unwrap();
        let id = {
            let library = RecordingLibrary::open(temp.path()).unwrap();
            library
                .add_original(b"x", at("2024-05-01T09:30:00"), AudioFileFormat::Flac)
                .unwrap()
                .id
        };

        let library = RecordingLibrary::open(temp.path()).unwrap();
        let recording = library.get(id).unwrap();
        assert_eq!(recording.format(), Some(AudioFileFormat::Flac));
    }

    #[test]
    fn test_validated_filename() {
        assert_eq!(validated_filename("note", "a.wav").unwrap(), "note.wav");
        assert_eq!(validated_filename("note.wav", "a.wav").unwrap(), "note.wav");
        assert_eq!(validated_filename("note.flac", "a.wav").unwrap(), "note.flac.wav");
        assert_eq!(validated_filename("note", "noext").unwrap(), "note");
        // 252 + ".wav" is over the limit
        assert!(validated_filename(&"n".repeat(252), "a.wav").is_err());
        assert!(validated_filename(&"n".repeat(251), "a.wav").is_ok());
    }
}
