use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::error::AttachmentError;
use crate::models::Attachment;

pub const MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;

pub fn check_size(name: &str, size: u64) -> Result<(), AttachmentError> {
    if size > MAX_ATTACHMENT_BYTES {
        return Err(AttachmentError::TooLarge {
            name: name.to_string(),
            size,
            max: MAX_ATTACHMENT_BYTES,
        });
    }
    Ok(())
}

pub fn mime_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

pub fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", STANDARD.encode(bytes))
}

impl Attachment {
    pub fn from_bytes(name: &str, bytes: &[u8]) -> Result<Self, AttachmentError> {
        let size = bytes.len() as u64;
        check_size(name, size)?;
        let mime_type = mime_for(name);
        Ok(Attachment {
            id: Uuid::new_v4(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            size,
            data: data_url(mime_type, bytes),
            uploaded_at: Utc::now(),
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Size is checked from metadata before the file is read.
pub fn load_file(path: &Path) -> Result<Attachment, AttachmentError> {
    let name = file_name(path);
    let read_err = |source| AttachmentError::Read {
        name: name.clone(),
        source,
    };
    let size = std::fs::metadata(path).map_err(read_err)?.len();
    check_size(&name, size)?;
    let bytes = std::fs::read(path).map_err(read_err)?;
    Attachment::from_bytes(&name, &bytes)
}

/// Loads each file in turn; a rejected file does not stop the others.
pub fn ingest_batch(paths: &[impl AsRef<Path>]) -> (Vec<Attachment>, Vec<AttachmentError>) {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();

    for path in paths {
        match load_file(path.as_ref()) {
            Ok(attachment) => accepted.push(attachment),
            Err(err) => {
                warn!(error = %err, "attachment rejected");
                rejected.push(err);
            }
        }
    }

    (accepted, rejected)
}

/// Handwritten notes and the school logo are stored inline as data URLs.
pub fn load_data_url(path: &Path) -> Result<String, AttachmentError> {
    let attachment = load_file(path)?;
    Ok(attachment.data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_mebibytes_is_the_inclusive_limit() {
        assert!(check_size("scan.pdf", MAX_ATTACHMENT_BYTES).is_ok());
        match check_size("scan.pdf", MAX_ATTACHMENT_BYTES + 1) {
            Err(AttachmentError::TooLarge { size, .. }) => {
                assert_eq!(size, MAX_ATTACHMENT_BYTES + 1)
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn bytes_become_a_data_url() {
        let attachment = Attachment::from_bytes("note.txt", b"hello").unwrap();
        assert_eq!(attachment.mime_type, "text/plain");
        assert_eq!(attachment.size, 5);
        assert_eq!(attachment.data, "data:text/plain;base64,aGVsbG8=");
    }

    #[test]
    fn unknown_extensions_fall_back_to_octet_stream() {
        assert_eq!(mime_for("archive"), "application/octet-stream");
        assert_eq!(mime_for("PHOTO.JPG"), "image/jpeg");
    }

    #[test]
    fn oversized_file_in_batch_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let small = dir.path().join("temoignage.txt");
        std::fs::write(&small, "Il a poussé son camarade.").unwrap();

        let big = dir.path().join("video.mp4");
        let file = std::fs::File::create(&big).unwrap();
        file.set_len(MAX_ATTACHMENT_BYTES + 1).unwrap();

        let missing = dir.path().join("absent.png");
        let (accepted, rejected) = ingest_batch(&[big, small, missing]);

        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].name, "temoignage.txt");
        assert_eq!(rejected.len(), 2);
        assert!(matches!(rejected[0], AttachmentError::TooLarge { .. }));
        assert!(matches!(rejected[1], AttachmentError::Read { .. }));
    }
}
