//! Line access to stored usage file content
//!
//! Plain files are streamed straight from storage. `.zip` uploads are read fully, and
//! the first non-directory entry is extracted on the blocking pool, up to a size limit.
//! Lines are handed out as raw bytes checked for UTF-8 one at a time, so one bad line
//! does not stop the rest of the file.

use futures::TryStreamExt;
use std::io::{self, Read};
use std::pin::Pin;
use std::str::Utf8Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use usagepipe_core::{PipelineError, PipelineResult};
use usagepipe_storage::ByteStream;

/// Reader over the lines of one usage file.
pub struct UsageLines {
    reader: Pin<Box<dyn AsyncBufRead + Send>>,
    buf: Vec<u8>,
}

impl UsageLines {
    fn new(reader: Pin<Box<dyn AsyncBufRead + Send>>) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    /// Next line without its terminator. `Ok(None)` at end of file; the inner error
    /// reports a line that is not valid UTF-8.
    pub async fn next_line(&mut self) -> io::Result<Option<Result<&str, Utf8Error>>> {
        self.buf.clear();
        if self.reader.read_until(b'\n', &mut self.buf).await? == 0 {
            return Ok(None);
        }
        let mut end = self.buf.len();
        while end > 0 && matches!(self.buf[end - 1], b'\n' | b'\r') {
            end -= 1;
        }
        Ok(Some(std::str::from_utf8(&self.buf[..end])))
    }
}

/// Build a line reader over a record's content.
pub async fn usage_lines(
    file_name: &str,
    stream: ByteStream,
    archive: bool,
    max_entry_bytes: u64,
    cancel: &CancellationToken,
) -> PipelineResult<UsageLines> {
    let reader: Pin<Box<dyn AsyncBufRead + Send>> = if archive {
        let data = tokio::select! {
            data = collect(stream) => data.map_err(|e| PipelineError::file_read(file_name, e))?,
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        };
        let entry = extract_first_entry(file_name, data, max_entry_bytes).await?;
        Box::pin(io::Cursor::new(entry))
    } else {
        Box::pin(StreamReader::new(
            stream.map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
        ))
    };

    Ok(UsageLines::new(reader))
}

async fn collect(mut stream: ByteStream) -> io::Result<Vec<u8>> {
    let mut data = Vec::new();
    while let Some(chunk) = stream
        .try_next()
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    {
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

async fn extract_first_entry(
    file_name: &str,
    data: Vec<u8>,
    max_entry_bytes: u64,
) -> PipelineResult<Vec<u8>> {
    let name = file_name.to_string();
    tokio::task::spawn_blocking(move || read_first_entry(&name, data, max_entry_bytes))
        .await
        .map_err(|e| PipelineError::file_read(file_name, format!("archive task failed: {}", e)))?
}

fn read_first_entry(file_name: &str, data: Vec<u8>, max_entry_bytes: u64) -> PipelineResult<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(io::Cursor::new(data))
        .map_err(|e| PipelineError::file_read(file_name, format!("invalid zip archive: {}", e)))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| PipelineError::file_read(file_name, format!("invalid zip entry: {}", e)))?;
        if entry.is_dir() {
            continue;
        }

        let too_large = || {
            PipelineError::file_read(
                file_name,
                format!("archive entry exceeds {} bytes", max_entry_bytes),
            )
        };
        // The declared size is untrusted; the read below is capped regardless.
        if entry.size() > max_entry_bytes {
            return Err(too_large());
        }

        tracing::debug!(file = %file_name, entry = %entry.name(), "Reading usage archive entry");
        let mut content = Vec::new();
        Read::take(&mut entry, max_entry_bytes.saturating_add(1))
            .read_to_end(&mut content)
            .map_err(|e| PipelineError::file_read(file_name, e))?;
        if content.len() as u64 > max_entry_bytes {
            return Err(too_large());
        }
        return Ok(content);
    }

    Err(PipelineError::file_read(file_name, "zip archive has no file entries"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::zip_bytes;
    use bytes::Bytes;

    fn byte_stream(chunks: Vec<&'static str>) -> ByteStream {
        Box::pin(futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                .collect::<Vec<_>>(),
        ))
    }

    const LIMIT: u64 = 1024 * 1024;

    async fn read_all(mut lines: UsageLines) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            out.push(line.unwrap().to_string());
        }
        out
    }

    #[tokio::test]
    async fn test_plain_lines_across_chunks() {
        let stream = byte_stream(vec!["first\nsec", "ond\n", "third"]);
        let lines = usage_lines("t.usage.1", stream, false, LIMIT, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(read_all(lines).await, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_crlf_and_invalid_utf8_lines() {
        let stream: ByteStream = Box::pin(futures::stream::iter(vec![Ok(Bytes::from_static(
            b"first\r\n\xff\xfe\nlast",
        ))]));
        let mut lines = usage_lines("t.usage.1", stream, false, LIMIT, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(lines.next_line().await.unwrap().unwrap(), Ok("first"));
        assert!(lines.next_line().await.unwrap().unwrap().is_err());
        assert_eq!(lines.next_line().await.unwrap().unwrap(), Ok("last"));
        assert!(lines.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_zip_entry_is_rejected() {
        let body = "x".repeat(100);
        let data = zip_bytes(&[("usage.txt", Some(body.as_str()))]);
        let stream: ByteStream = Box::pin(futures::stream::iter(vec![Ok(Bytes::from(data))]));

        let err = usage_lines("t.usage.1.zip", stream, true, 10, &CancellationToken::new())
            .await
            .err()
            .unwrap();
        match err {
            PipelineError::FileReadFailure { reason, .. } => {
                assert!(reason.contains("exceeds 10 bytes"), "{}", reason)
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_entry_read_respects_limit() {
        let body = "y".repeat(64);
        let data = zip_bytes(&[("usage.txt", Some(body.as_str()))]);

        assert_eq!(read_first_entry("t.usage.1.zip", data.clone(), 64).unwrap().len(), 64);
        assert!(matches!(
            read_first_entry("t.usage.1.zip", data, 63),
            Err(PipelineError::FileReadFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_zip_uses_first_file_entry() {
        let data = zip_bytes(&[
            ("logs/", None),
            ("usage.txt", Some("a\nb\n")),
            ("other.txt", Some("ignored\n")),
        ]);
        let stream: ByteStream = Box::pin(futures::stream::iter(vec![Ok(Bytes::from(data))]));

        let lines = usage_lines("t.usage.1.zip", stream, true, LIMIT, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(read_all(lines).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_invalid_zip_is_file_read_failure() {
        let stream = byte_stream(vec!["definitely not a zip"]);
        let err = usage_lines("t.usage.1.zip", stream, true, LIMIT, &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::FileReadFailure { .. }));
    }

    #[tokio::test]
    async fn test_empty_zip_is_file_read_failure() {
        let data = zip_bytes(&[("only-a-dir/", None)]);
        let stream: ByteStream = Box::pin(futures::stream::iter(vec![Ok(Bytes::from(data))]));

        let err = usage_lines("t.usage.1.zip", stream, true, LIMIT, &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::FileReadFailure { .. }));
    }
}
