//! Document splitting - preamble vs. body.

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The body starts at this marker; the newline before it ends the preamble.
pub const BEGIN_DOCUMENT: &[u8] = b"\n\\begin{document}";

#[derive(thiserror::Error, Debug)]
pub enum DocumentError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not find \\begin{{document}} in {0}")]
    MissingBeginDocument(PathBuf),
}

/// A source file split at its `\begin{document}` line.
#[derive(Debug, Clone)]
pub struct Document {
    bytes: Vec<u8>,
    split: usize,
}

impl Document {
    /// Split raw bytes. `None` if the marker is absent.
    pub fn parse(bytes: Vec<u8>) -> Option<Self> {
        let at = bytes
            .windows(BEGIN_DOCUMENT.len())
            .position(|w| w == BEGIN_DOCUMENT)?;
        Some(Self { bytes, split: at + 1 })
    }

    /// Read and split a file from disk.
    pub async fn read(path: &Path) -> Result<Self, DocumentError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| DocumentError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(bytes).ok_or_else(|| DocumentError::MissingBeginDocument(path.to_path_buf()))
    }

    /// Everything up to and including the newline before `\begin{document}`.
    pub fn preamble(&self) -> &[u8] {
        &self.bytes[..self.split]
    }

    /// From `\begin{document}` to the end of the file.
    pub fn body(&self) -> &[u8] {
        &self.bytes[self.split..]
    }

    /// Frozen copy of the preamble for a priming task.
    pub fn preamble_shared(&self) -> Arc<[u8]> {
        Arc::from(self.preamble())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_keeps_newline_in_preamble() {
        let src = b"\\documentclass{article}\n\\begin{document}\nhi\n\\end{document}\n".to_vec();
        let doc = Document::parse(src.clone()).unwrap();

        assert_eq!(doc.preamble(), b"\\documentclass{article}\n");
        assert!(doc.body().starts_with(b"\\begin{document}"));

        let mut joined = doc.preamble().to_vec();
        joined.extend_from_slice(doc.body());
        assert_eq!(joined, src);
    }

    #[test]
    fn test_split_at_first_marker() {
        let src = b"a\n\\begin{document}x\n\\begin{document}y".to_vec();
        let doc = Document::parse(src).unwrap();
        assert_eq!(doc.preamble(), b"a\n");
        assert_eq!(doc.body(), b"\\begin{document}x\n\\begin{document}y");
    }

    #[test]
    fn test_missing_marker() {
        assert!(Document::parse(b"\\documentclass{article}\nno body".to_vec()).is_none());
        // Marker on the very first line has no newline before it
        assert!(Document::parse(b"\\begin{document}\n".to_vec()).is_none());
    }

    #[tokio::test]
    async fn test_read_errors() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.tex");
        let err = Document::read(&missing).await.unwrap_err();
        assert!(matches!(err, DocumentError::Read { .. }));

        let plain = dir.path().join("plain.tex");
        std::fs::write(&plain, "hello\n").unwrap();
        let err = Document::read(&plain).await.unwrap_err();
        assert!(matches!(err, DocumentError::MissingBeginDocument(_)));
        assert!(err.to_string().contains("\\begin{document}"));
    }
}
