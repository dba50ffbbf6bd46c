//! Source retrieval
//!
//! Resolves a URL into a byte stream symphonia can identify. Local paths are
//! opened directly; `http(s)` sources are fetched into memory with `ureq`,
//! checking the deadline and cancel token between reads.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use symphonia::core::io::MediaSource as ByteSource;
use symphonia::core::probe::Hint;

use super::error::{DecodeError, DecodeResult};
use super::{CancelToken, Deadline};

/// Read size for remote bodies
const CHUNK_SIZE: usize = 64 * 1024;

/// A resolved source ready for probing
pub(crate) struct Fetched {
    pub source: Box<dyn ByteSource>,
    pub hint: Hint,
}

/// Where a URL points
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Location<'a> {
    File(&'a str),
    Remote(&'a str),
}

/// Classify a URL as a local path or a remote resource
pub(crate) fn locate(url: &str) -> Location<'_> {
    if let Some(path) = url.strip_prefix("file://") {
        Location::File(path)
    } else if url.starts_with("http://") || url.starts_with("https://") {
        Location::Remote(url)
    } else {
        Location::File(url)
    }
}

/// Extension of the last path segment, ignoring query and fragment
pub(crate) fn extension_of(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}

/// Open `url` for decoding
pub(crate) fn fetch(url: &str, deadline: &Deadline, cancel: &CancelToken) -> DecodeResult<Fetched> {
    deadline.check(cancel)?;

    let mut hint = Hint::new();
    if let Some(ext) = extension_of(url) {
        hint.with_extension(ext);
    }

    match locate(url) {
        Location::File(path) => {
            let file = File::open(Path::new(path)).map_err(|e| DecodeError::Io {
                path: path.to_string(),
                source: e,
            })?;
            Ok(Fetched {
                source: Box::new(file),
                hint,
            })
        }
        Location::Remote(url) => {
            let (bytes, content_type) = fetch_remote(url, deadline, cancel)?;
            if let Some(mime) = content_type {
                hint.mime_type(&mime);
            }
            Ok(Fetched {
                source: Box::new(Cursor::new(bytes)),
                hint,
            })
        }
    }
}

fn fetch_remote(
    url: &str,
    deadline: &Deadline,
    cancel: &CancelToken,
) -> DecodeResult<(Vec<u8>, Option<String>)> {
    log::info!("MediaDecoder: fetching {}", url);

    let agent = ureq::AgentBuilder::new()
        .timeout(deadline.remaining())
        .build();

    let response = match agent.get(url).call() {
        Ok(response) => response,
        Err(e) => {
            // A transport error after the deadline is the load bound, not the network
            deadline.check(cancel)?;
            return Err(DecodeError::Network {
                url: url.to_string(),
                reason: e.to_string(),
            });
        }
    };

    let content_type = Some(response.content_type().to_string()).filter(|c| !c.is_empty());
    let expected: Option<usize> = response
        .header("Content-Length")
        .and_then(|s| s.parse().ok());

    let mut reader = response.into_reader();
    let mut bytes = Vec::with_capacity(expected.unwrap_or(CHUNK_SIZE));
    let mut chunk = vec![0u8; CHUNK_SIZE];

    loop {
        deadline.check(cancel)?;
        let read = match reader.read(&mut chunk) {
            Ok(read) => read,
            Err(e) => {
                deadline.check(cancel)?;
                return Err(DecodeError::Network {
                    url: url.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        if read == 0 {
            break;
        }
        bytes.extend_from_slice(&chunk[..read]);
    }

    if let Some(expected) = expected {
        if bytes.len() != expected {
            return Err(DecodeError::Network {
                url: url.to_string(),
                reason: format!("body truncated: expected {} bytes, got {}", expected, bytes.len()),
            });
        }
    }

    log::debug!("MediaDecoder: fetched {} bytes from {}", bytes.len(), url);
    Ok((bytes, content_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate() {
        assert_eq!(locate("file:///tmp/a.wav"), Location::File("/tmp/a.wav"));
        assert_eq!(locate("/tmp/a.wav"), Location::File("/tmp/a.wav"));
        assert_eq!(locate("song.mp3"), Location::File("song.mp3"));
        assert_eq!(
            locate("https://example.com/a.mp3"),
            Location::Remote("https://example.com/a.mp3")
        );
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("/music/track.flac"), Some("flac"));
        assert_eq!(extension_of("https://cdn.test/v.mp4?token=a.b"), Some("mp4"));
        assert_eq!(extension_of("https://cdn.test/stream"), None);
        assert_eq!(extension_of("/music/.hidden"), None);
        assert_eq!(extension_of("clip.webm#t=10"), Some("webm"));
    }
}
