/// Remote catalog listing.
///
/// Fetches a directory index page and pulls item names out of its
/// `title="<name>.<ext>"` attributes. The page is treated as loose text:
/// index pages are frequently malformed, so no markup parsing happens.
use std::collections::BTreeSet;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use storegame_shared::errors::ListingError;
use storegame_shared::models::CatalogEntry;

/// Lists downloadable items under a remote directory URL.
#[derive(Debug, Clone)]
pub struct CatalogLister {
    client: reqwest::Client,
    title_re: Regex,
}

impl CatalogLister {
    /// Create a lister whose requests give up after `timeout`, matching
    /// items that end in `.<extension>`.
    pub fn new(timeout: Duration, extension: &str) -> Result<Self, ListingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ListingError::Http(e.to_string()))?;

        let pattern = format!(r#"title="([^"]+\.{})""#, regex::escape(extension));
        let title_re = Regex::new(&pattern).map_err(|e| ListingError::Http(e.to_string()))?;

        Ok(Self { client, title_re })
    }

    /// List the catalog at `url`. Failures are logged and yield an empty list.
    pub async fn list(&self, url: &str) -> Vec<CatalogEntry> {
        match self.fetch(url).await {
            Ok(entries) => {
                info!("Listed {} items from {}", entries.len(), url);
                entries
            }
            Err(e) => {
                warn!("Failed to list {}: {}", url, e);
                Vec::new()
            }
        }
    }

    /// Fetch and extract, surfacing the error to the caller.
    pub async fn fetch(&self, url: &str) -> Result<Vec<CatalogEntry>, ListingError> {
        debug!("Fetching listing {}", url);
        let response = self.client.get(url).send().await.map_err(listing_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ListingError::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(listing_error)?;
        Ok(self
            .extract_names(&body)
            .into_iter()
            .map(|name| CatalogEntry {
                name,
                source_url: url.to_string(),
            })
            .collect())
    }

    /// Distinct item names in the body, in ascending order.
    pub fn extract_names(&self, body: &str) -> Vec<String> {
        self.title_re
            .captures_iter(body)
            .map(|cap| cap[1].to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

fn listing_error(e: reqwest::Error) -> ListingError {
    if e.is_timeout() {
        ListingError::Timeout
    } else {
        ListingError::Http(e.to_string())
    }
}
