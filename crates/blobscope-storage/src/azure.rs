//! Azure Blob Storage over the REST API
//!
//! Requests are signed with Shared Key: an HMAC-SHA256 over the canonical
//! request, keyed with the base64-decoded account key.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use sha2::Sha256;

use crate::{BlobInfo, ObjectStore, StorageError, StorageTarget, StoreConnector};

type HmacSha256 = Hmac<Sha256>;

/// REST API version sent with every request
const API_VERSION: &str = "2021-08-06";

/// Blob names keep their `/` separators in the URL path
const PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Query values are fully encoded
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Client bound to one container of one storage account
pub struct AzureBlobClient {
    http: reqwest::Client,
    account: String,
    container: String,
    key: Vec<u8>,
    endpoint: String,
}

impl AzureBlobClient {
    /// Create a client for the container named in `target`
    pub fn new(http: reqwest::Client, target: &StorageTarget) -> Result<Self, StorageError> {
        let key = BASE64
            .decode(target.key.trim())
            .map_err(|_| StorageError::InvalidKey)?;
        let account = target.account.trim().to_string();

        Ok(Self {
            http,
            endpoint: format!("https://{account}.blob.core.windows.net"),
            account,
            container: target.container.trim().to_string(),
            key,
        })
    }

    async fn list_page(&self, marker: Option<&str>) -> Result<ListPage, StorageError> {
        let mut query = vec![("comp", "list"), ("restype", "container")];
        if let Some(marker) = marker {
            query.push(("marker", marker));
        }

        let path = format!("/{}", self.container);
        let body = self.get(&path, &query).await?;
        let text = String::from_utf8_lossy(&body);
        parse_listing(&text)
    }

    /// Signed GET of `path` (already encoded) with the given query pairs
    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Vec<u8>, StorageError> {
        let mut url = format!("{}{}", self.endpoint, path);
        for (i, (name, value)) in query.iter().enumerate() {
            url.push(if i == 0 { '?' } else { '&' });
            url.push_str(name);
            url.push('=');
            url.extend(utf8_percent_encode(value, QUERY_ENCODE_SET));
        }

        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let signature = self.sign("GET", path, query, &date)?;

        let response = self
            .http
            .get(&url)
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION)
            .header(
                "Authorization",
                format!("SharedKey {}:{}", self.account, signature),
            )
            .send()
            .await
            .map_err(|source| StorageError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::NOT_FOUND && path.len() > self.container.len() + 1 {
                return Err(StorageError::NotFound(path.to_string()));
            }
            return Err(StorageError::Status {
                status: status.as_u16(),
                url,
                message: error_message(&message),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| StorageError::Transport { url, source })?;
        Ok(body.to_vec())
    }

    fn sign(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, &str)],
        date: &str,
    ) -> Result<String, StorageError> {
        let string_to_sign = string_to_sign(method, &self.account, path, query, date);
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| StorageError::InvalidKey)?;
        mac.update(string_to_sign.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl ObjectStore for AzureBlobClient {
    async fn list(&self) -> Result<Vec<BlobInfo>, StorageError> {
        let mut blobs = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let page = self.list_page(marker.as_deref()).await?;
            blobs.extend(page.blobs);
            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        tracing::debug!(container = %self.container, count = blobs.len(), "listed blobs");
        Ok(blobs)
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let path = format!(
            "/{}/{}",
            self.container,
            utf8_percent_encode(name, PATH_ENCODE_SET)
        );
        self.get(&path, &[]).await
    }
}

/// Connector that builds `AzureBlobClient`s sharing one HTTP client
#[derive(Clone)]
pub struct AzureConnector {
    http: reqwest::Client,
}

impl AzureConnector {
    pub fn new() -> Result<Self, StorageError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(StorageError::Client)?;
        Ok(Self { http })
    }
}

impl StoreConnector for AzureConnector {
    fn connect(&self, target: &StorageTarget) -> Result<Arc<dyn ObjectStore>, StorageError> {
        Ok(Arc::new(AzureBlobClient::new(self.http.clone(), target)?))
    }
}

/// Canonical Shared Key string for a request without body or conditional headers
fn string_to_sign(
    method: &str,
    account: &str,
    path: &str,
    query: &[(&str, &str)],
    date: &str,
) -> String {
    // Content-Encoding through Range: eleven empty standard headers
    let mut out = format!("{method}\n{}", "\n".repeat(11));
    out.push_str(&format!("x-ms-date:{date}\nx-ms-version:{API_VERSION}\n"));
    out.push_str(&format!("/{account}{path}"));

    let mut params: Vec<(String, &str)> = query
        .iter()
        .map(|(name, value)| (name.to_lowercase(), *value))
        .collect();
    params.sort();
    for (name, value) in params {
        out.push_str(&format!("\n{name}:{value}"));
    }
    out
}

/// Pull the `<Message>` out of an Azure error body, if there is one
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct ErrorBody {
        message: Option<String>,
    }

    quick_xml::de::from_str::<ErrorBody>(body.trim_start_matches('\u{feff}'))
        .ok()
        .and_then(|e| e.message)
        .map(|m| m.lines().next().unwrap_or_default().to_string())
        .unwrap_or_else(|| body.chars().take(200).collect())
}

struct ListPage {
    blobs: Vec<BlobInfo>,
    next_marker: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EnumerationResults {
    #[serde(default)]
    blobs: BlobsXml,
    #[serde(default)]
    next_marker: Option<String>,
}

#[derive(Default, Deserialize)]
struct BlobsXml {
    #[serde(rename = "Blob", default)]
    items: Vec<BlobXml>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlobXml {
    name: String,
    #[serde(default)]
    properties: Option<PropertiesXml>,
}

#[derive(Deserialize)]
struct PropertiesXml {
    #[serde(rename = "Last-Modified", default)]
    last_modified: Option<String>,
}

fn parse_listing(xml: &str) -> Result<ListPage, StorageError> {
    let results: EnumerationResults = quick_xml::de::from_str(xml.trim_start_matches('\u{feff}'))
        .map_err(|e| StorageError::Listing(e.to_string()))?;

    let blobs = results
        .blobs
        .items
        .into_iter()
        .map(|blob| {
            let last_modified = blob
                .properties
                .and_then(|p| p.last_modified)
                .and_then(|s| DateTime::parse_from_rfc2822(s.trim()).ok())
                .map(|ts| ts.with_timezone(&Utc));
            BlobInfo::new(blob.name, last_modified)
        })
        .collect();

    Ok(ListPage {
        blobs,
        next_marker: results.next_marker.filter(|m| !m.trim().is_empty()),
    })
}
