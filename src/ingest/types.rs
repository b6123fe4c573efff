// src/ingest/types.rs
use thiserror::Error;

use crate::listing::CanonicalRecord;

/// Connection/timeout level failure of a single HTTP request.
#[derive(Debug, Error)]
#[error("transport error for {url}: {message}")]
pub struct TransportError {
    pub url: String,
    pub message: String,
}

/// Why a page could not be used.
#[derive(Debug, Error)]
pub enum FetchFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("unparseable page body: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A source's paginated fetch was aborted. Records from earlier pages are discarded.
#[derive(Debug, Error)]
#[error("source {source_name} failed on page {page}: {cause}")]
pub struct FetchError {
    pub source_name: &'static str,
    pub page: u32,
    #[source]
    pub cause: FetchFailure,
}

/// One item had an unexpected shape. Always caught per item.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("item is not a JSON object")]
    NotAnObject,
    #[error("item has no identity key (`{0}`)")]
    MissingIdentity(&'static str),
}

#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    /// All records currently listed by the source, in page order.
    async fn fetch(&self) -> Result<Vec<CanonicalRecord>, FetchError>;
    fn name(&self) -> &'static str;
}
