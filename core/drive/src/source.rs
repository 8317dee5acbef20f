//! Upload content sources.
//!
//! A source is opened once per upload attempt and yields a byte stream that
//! is piped straight into the upload request body, so remote content is
//! never buffered whole in memory.

use bytes::Bytes;
use futures::{stream, Stream, StreamExt, TryStreamExt};
use reqwest::Client;
use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use tracing::debug;
use url::Url;

use photodrive_common::{Error, Result};

use crate::client::network_error;

/// Byte stream type for upload bodies.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

enum Kind {
    Url(Url),
    Bytes(Bytes),
    /// Local file, reopened for every attempt.
    Path(PathBuf),
    /// One-shot stream; `None` once an attempt has taken it.
    Stream(Option<ByteStream>),
}

/// Content to upload: a remote URL, a local file, an in-memory buffer, or a
/// stream.
///
/// URL, file and buffer sources can be reopened for every retry. Stream
/// sources are consumed by the first attempt that sends them.
pub struct UploadSource {
    kind: Kind,
}

impl UploadSource {
    /// Fetch content from an `http` or `https` URL at upload time.
    ///
    /// # Errors
    /// - URL does not parse
    /// - Scheme is not http/https
    pub fn url(url: &str) -> Result<Self> {
        let parsed =
            Url::parse(url).map_err(|e| Error::InvalidInput(format!("Invalid URL {}: {}", url, e)))?;

        match parsed.scheme() {
            "http" | "https" => Ok(Self {
                kind: Kind::Url(parsed),
            }),
            scheme => Err(Error::InvalidInput(format!(
                "Unsupported URL scheme '{}' in {}",
                scheme, url
            ))),
        }
    }

    /// Upload an in-memory buffer.
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Self {
            kind: Kind::Bytes(data.into()),
        }
    }

    /// Upload a local file, opened afresh for every attempt.
    ///
    /// The file is only held open while an attempt streams it.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: Kind::Path(path.into()),
        }
    }

    /// Upload whatever `stream` yields.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self {
            kind: Kind::Stream(Some(Box::pin(stream))),
        }
    }

    /// Upload the contents of an async reader, e.g. an open `tokio::fs::File`.
    pub fn reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self::stream(ReaderStream::new(reader).map_err(Error::from))
    }

    /// Whether another attempt can open this source again.
    pub fn is_replayable(&self) -> bool {
        !matches!(self.kind, Kind::Stream(_))
    }

    /// Whether a one-shot stream has already been taken by an attempt.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.kind, Kind::Stream(None))
    }

    /// Open the source for one upload attempt.
    pub(crate) async fn open(&mut self, http: &Client) -> Result<ByteStream> {
        match &mut self.kind {
            Kind::Url(url) => fetch(http, url).await,
            Kind::Bytes(data) => Ok(Box::pin(stream::iter([Ok::<_, Error>(data.clone())]))),
            Kind::Path(path) => {
                let file = tokio::fs::File::open(&*path).await.map_err(|e| {
                    Error::Io(std::io::Error::new(
                        e.kind(),
                        format!("Failed to open {}: {}", path.display(), e),
                    ))
                })?;
                Ok(Box::pin(ReaderStream::new(file).map_err(Error::from)))
            }
            Kind::Stream(stream) => stream.take().ok_or_else(|| {
                Error::SourceExhausted("Stream source was consumed by an earlier attempt".to_string())
            }),
        }
    }
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Url(url) => write!(f, "{}", url),
            Kind::Bytes(data) => write!(f, "<{} bytes in memory>", data.len()),
            Kind::Path(path) => write!(f, "{}", path.display()),
            Kind::Stream(Some(_)) => write!(f, "<stream>"),
            Kind::Stream(None) => write!(f, "<consumed stream>"),
        }
    }
}

/// Start a GET for `url` and return its body as a stream.
async fn fetch(http: &Client, url: &Url) -> Result<ByteStream> {
    debug!("Fetching upload content from {}", url);

    let response = http
        .get(url.clone())
        .send()
        .await
        .map_err(|e| network_error(&format!("Failed to fetch {}", url), &e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Network(format!(
            "Failed to fetch {}: HTTP {}",
            url, status
        )));
    }

    let url = url.clone();
    let stream = response.bytes_stream().map(move |chunk| {
        chunk.map_err(|e| network_error(&format!("Failed to read {}", url), &e))
    });

    Ok(Box::pin(stream))
}
