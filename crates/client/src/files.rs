//! Moving file envelopes to and from disk.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tcpproto::FileEnvelope;
use tracing::debug;

use crate::error::{ClientError, Result};

/// Read the file at `path` into an envelope.
///
/// The envelope is named after the final path component and uses the
/// boundary derived from that name. Files larger than `max_size` bytes are
/// refused before being read.
pub fn read_envelope(path: impl AsRef<Path>, max_size: u64) -> Result<FileEnvelope> {
    let path = path.as_ref();
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ClientError::NoFileName(path.to_path_buf()))?
        .to_string();

    let size = fs::metadata(path)?.len();
    if size > max_size {
        return Err(ClientError::FileTooLarge {
            size,
            limit: max_size,
        });
    }

    let data = fs::read(path)?;
    debug!(path = %path.display(), size = data.len(), "read file for sending");
    Ok(FileEnvelope::new(filename, data))
}

/// Write a present envelope's bytes to `dir/<filename>`.
///
/// The filename comes from the peer, so anything that is not a single plain
/// path component is refused. Returns the written path.
pub fn write_envelope(envelope: &FileEnvelope, dir: impl AsRef<Path>) -> Result<PathBuf> {
    if !envelope.is_present() {
        return Err(ClientError::NoFile);
    }
    let (Some(filename), Some(data)) = (envelope.filename(), envelope.data()) else {
        return Err(ClientError::NoFile);
    };
    if !is_plain_filename(filename) {
        return Err(ClientError::UnsafeFilename(filename.to_string()));
    }

    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let path = dir.join(filename);
    fs::write(&path, data)?;
    debug!(path = %path.display(), size = data.len(), "wrote received file");
    Ok(path)
}

fn is_plain_filename(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_envelope_names_after_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("notes.txt");
        fs::write(&path, b"Hello World!").unwrap();

        let envelope = read_envelope(&path, 1024).unwrap();
        assert!(envelope.is_present());
        assert_eq!(envelope.filename(), Some("notes.txt"));
        assert_eq!(envelope.data(), Some(&b"Hello World!"[..]));
        assert_eq!(envelope.boundary(), "FILE_BORDER-notes.txt-FILE_BORDER");
    }

    #[test]
    fn test_read_envelope_respects_limit() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("big.bin");
        fs::write(&path, vec![0u8; 100]).unwrap();

        let err = read_envelope(&path, 99).unwrap_err();
        assert!(matches!(
            err,
            ClientError::FileTooLarge {
                size: 100,
                limit: 99
            }
        ));
    }

    #[test]
    fn test_read_envelope_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = read_envelope(temp_dir.path().join("absent"), 10).unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
    }

    #[test]
    fn test_write_envelope() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("downloads");
        let envelope = FileEnvelope::new("out.bin", vec![1, 2, 3]);

        let path = write_envelope(&envelope, &target).unwrap();
        assert_eq!(path, target.join("out.bin"));
        assert_eq!(fs::read(path).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_write_envelope_rejects_traversal() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["../escape", "/etc/passwd", "..", ".", "a/b", "a\\b"] {
            let envelope = FileEnvelope::with_boundary(name, b"x".to_vec(), "B");
            let err = write_envelope(&envelope, temp_dir.path()).unwrap_err();
            assert!(
                matches!(err, ClientError::UnsafeFilename(_)),
                "{name} should be refused"
            );
        }
    }

    #[test]
    fn test_write_envelope_rejects_absent_file() {
        let temp_dir = TempDir::new().unwrap();
        let envelope = FileEnvelope::from_parts(Some("a.txt".into()), None, "B");
        let err = write_envelope(&envelope, temp_dir.path()).unwrap_err();
        assert!(matches!(err, ClientError::NoFile));
    }
}
