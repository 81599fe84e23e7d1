use std::path::Path;

use bytes::Bytes;

use crate::UploadResult;

/// A local file handed to the pipeline for upload
#[derive(Debug, Clone)]
pub struct RawFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl RawFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, inferring its MIME type from the extension
    pub async fn from_path(path: impl AsRef<Path>) -> UploadResult<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let mime_type = mime_from_name(&name).to_string();

        Ok(Self::new(name, mime_type, bytes))
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// MIME type for the file types field crews actually attach
pub fn mime_from_name(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "csv" => "text/csv",
        "txt" => "text/plain",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_inference() {
        assert_eq!(mime_from_name("IMG_0001.JPG"), "image/jpeg");
        assert_eq!(mime_from_name("handover.pdf"), "application/pdf");
        assert_eq!(mime_from_name("noext"), "application/octet-stream");
    }

    #[tokio::test]
    async fn from_path_reads_bytes() {
        let dir = std::env::temp_dir().join(format!("site-upload-{}", rand::random::<u32>()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("swms.pdf");
        tokio::fs::write(&path, b"%PDF-1.7").await.unwrap();

        let file = RawFile::from_path(&path).await.unwrap();
        assert_eq!(file.name, "swms.pdf");
        assert_eq!(file.mime_type, "application/pdf");
        assert_eq!(file.size_bytes(), 8);
        assert!(!file.is_image());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
