use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::config::DownloadConfig;
use crate::error::DownloadError;

/// Retrieves a URL into a file on disk.
pub trait Fetcher: Send + Sync {
    /// Write the body of `url` to `dest`, returning the number of bytes stored.
    ///
    /// On success the file is complete and synced; callers do not need to
    /// wait for it to appear.
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64, DownloadError>;
}

/// Blocking HTTP fetcher with an explicit timeout and body size cap.
pub struct HttpFetcher {
    agent: ureq::Agent,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(config: &DownloadConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout())
            .build();

        Self {
            agent,
            max_bytes: config.max_bytes,
        }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        let response = self.agent.get(url).call().map_err(|e| DownloadError::Http {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        // Read one byte past the cap so oversized bodies are detected
        let mut body = Vec::new();
        response
            .into_reader()
            .take(self.max_bytes + 1)
            .read_to_end(&mut body)?;

        if body.len() as u64 > self.max_bytes {
            return Err(DownloadError::TooLarge {
                url: url.to_string(),
                limit: self.max_bytes,
            });
        }

        write_complete(url, &body, dest)
    }
}

/// Write `body` to `dest` and confirm the file holds all of it.
pub fn write_complete(url: &str, body: &[u8], dest: &Path) -> Result<u64, DownloadError> {
    if body.is_empty() {
        return Err(DownloadError::Empty {
            url: url.to_string(),
        });
    }

    let mut file = File::create(dest)?;
    file.write_all(body)?;
    file.sync_all()?;

    let expected = body.len() as u64;
    let found = std::fs::metadata(dest)?.len();
    if found != expected {
        return Err(DownloadError::Incomplete {
            path: dest.to_path_buf(),
            expected,
            found,
        });
    }

    Ok(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_complete() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("a.jpg");

        let written = write_complete("http://x/a.jpg", b"jpegbytes", &dest).unwrap();
        assert_eq!(written, 9);
        assert_eq!(std::fs::read(&dest).unwrap(), b"jpegbytes");
    }

    #[test]
    fn test_write_complete_rejects_empty_body() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("a.jpg");

        let err = write_complete("http://x/a.jpg", b"", &dest).unwrap_err();
        assert!(matches!(err, DownloadError::Empty { .. }));
        assert!(!dest.exists());
    }
}
