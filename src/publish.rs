//! Remote publishing of landed artifacts to Azure Blob Storage.
//!
//! The [`Publish`] trait is the seam the controller uploads through; the
//! production implementation is [`AzureBlobPublisher`], which issues a
//! single `Put Blob` per file and overwrites any existing object with the
//! same name.
//!
//! # Credentials
//!
//! The publisher is built from a standard storage connection string (usually
//! `AZURE_STORAGE_CONNECTION_STRING`). Three shapes are understood:
//!
//! | Shape | Auth |
//! |-------|------|
//! | `AccountName=..;AccountKey=..[;EndpointSuffix=..][;BlobEndpoint=..]` | Shared Key signature |
//! | `BlobEndpoint=..;SharedAccessSignature=..` | SAS query string |
//! | `UseDevelopmentStorage=true` | Shared Key against the local emulator |

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use itertools::Itertools;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use sha2::Sha256;
use std::fmt;
use std::path::Path;
use std::time::Instant;
use tracing::{info, instrument, warn};
use url::Url;

use crate::error::IngestError;

pub const CONNECTION_STRING_VAR: &str = "AZURE_STORAGE_CONNECTION_STRING";

const API_VERSION: &str = "2021-08-06";
const NDJSON: &str = "application/x-ndjson";
const DEV_ACCOUNT: &str = "devstoreaccount1";
const DEV_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

/// Upload destination for landed files.
#[async_trait]
pub trait Publish: Send + Sync {
    /// Upload `local_path` verbatim as `object_name`, replacing any existing object.
    async fn upload(&self, local_path: &Path, object_name: &str) -> Result<(), IngestError>;
}

#[derive(Clone)]
enum BlobAuth {
    SharedKey { account: String, key: Vec<u8> },
    Sas(String),
}

impl fmt::Debug for BlobAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobAuth::SharedKey { account, .. } => f
                .debug_struct("SharedKey")
                .field("account", account)
                .finish_non_exhaustive(),
            BlobAuth::Sas(_) => f.write_str("Sas(..)"),
        }
    }
}

/// A parsed storage connection string.
#[derive(Debug, Clone)]
pub struct StorageAccount {
    endpoint: Url,
    auth: BlobAuth,
}

impl StorageAccount {
    pub fn parse(connection_string: &str) -> Result<Self, IngestError> {
        let mut fields = std::collections::HashMap::new();
        for part in connection_string.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                IngestError::InvalidCredential(format!("segment without '=': {part}"))
            })?;
            fields.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
        let get = |k: &str| fields.get(k).filter(|v| !v.is_empty()).cloned();

        if get("usedevelopmentstorage").is_some_and(|v| v.eq_ignore_ascii_case("true")) {
            return Self::shared_key(DEV_ACCOUNT, DEV_KEY, DEV_ENDPOINT);
        }

        let account = get("accountname");
        let endpoint = match (get("blobendpoint"), &account) {
            (Some(endpoint), _) => endpoint,
            (None, Some(account)) => format!(
                "{}://{}.blob.{}",
                get("defaultendpointsprotocol").unwrap_or_else(|| "https".into()),
                account,
                get("endpointsuffix").unwrap_or_else(|| "core.windows.net".into()),
            ),
            (None, None) => {
                return Err(IngestError::InvalidCredential(
                    "neither AccountName nor BlobEndpoint present".into(),
                ));
            }
        };

        if let Some(sas) = get("sharedaccesssignature") {
            return Ok(Self {
                endpoint: parse_endpoint(&endpoint)?,
                auth: BlobAuth::Sas(sas.trim_start_matches('?').to_string()),
            });
        }

        match (account, get("accountkey")) {
            (Some(account), Some(key)) => Self::shared_key(&account, &key, &endpoint),
            _ => Err(IngestError::InvalidCredential(
                "AccountName/AccountKey or SharedAccessSignature required".into(),
            )),
        }
    }

    fn shared_key(account: &str, key: &str, endpoint: &str) -> Result<Self, IngestError> {
        let key = STANDARD
            .decode(key)
            .map_err(|e| IngestError::InvalidCredential(format!("AccountKey is not base64: {e}")))?;
        Ok(Self {
            endpoint: parse_endpoint(endpoint)?,
            auth: BlobAuth::SharedKey {
                account: account.to_string(),
                key,
            },
        })
    }

    /// Full URL of `object_name` inside `container`, without auth query.
    pub fn blob_url(&self, container: &str, object_name: &str) -> Result<Url, IngestError> {
        let encoded = object_name
            .split('/')
            .filter(|s| !s.is_empty())
            .map(urlencoding::encode)
            .join("/");
        let raw = format!(
            "{}/{}/{}",
            self.endpoint.as_str().trim_end_matches('/'),
            container,
            encoded
        );
        Url::parse(&raw).map_err(|e| IngestError::InvalidCredential(format!("bad blob url {raw}: {e}")))
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url, IngestError> {
    Url::parse(endpoint)
        .map_err(|e| IngestError::InvalidCredential(format!("bad BlobEndpoint {endpoint}: {e}")))
}

/// Shared Key string-to-sign for a `Put Blob` request.
///
/// `x_ms_headers` must already be lowercase and sorted by name.
pub fn put_blob_string_to_sign(
    content_length: usize,
    content_type: &str,
    x_ms_headers: &[(&str, &str)],
    canonical_resource: &str,
) -> String {
    let length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };
    let headers: String = x_ms_headers
        .iter()
        .map(|(k, v)| format!("{k}:{v}\n"))
        .collect();
    // VERB, Content-Encoding, Content-Language, Content-Length, Content-MD5,
    // Content-Type, Date, If-Modified-Since, If-Match, If-None-Match,
    // If-Unmodified-Since, Range.
    format!("PUT\n\n\n{length}\n\n{content_type}\n\n\n\n\n\n\n{headers}{canonical_resource}")
}

pub fn sign(key: &[u8], string_to_sign: &str) -> Result<String, IngestError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| IngestError::InvalidCredential(e.to_string()))?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Uploads to one container of an Azure storage account.
#[derive(Debug, Clone)]
pub struct AzureBlobPublisher {
    client: reqwest::Client,
    account: StorageAccount,
    container: String,
}

impl AzureBlobPublisher {
    pub fn new(account: StorageAccount, container: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            account,
            container: container.into(),
        }
    }

    /// Build from an optional connection string.
    ///
    /// # Arguments
    ///
    /// * `connection_string` - Usually the value of `AZURE_STORAGE_CONNECTION_STRING`
    /// * `container` - Container every object is uploaded into
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::MissingCredential`] when the string is absent or
    /// blank, and [`IngestError::InvalidCredential`] when it cannot be parsed.
    /// Both are raised before any network traffic.
    pub fn from_connection_string(
        connection_string: Option<&str>,
        container: impl Into<String>,
    ) -> Result<Self, IngestError> {
        let conn = connection_string
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(IngestError::MissingCredential(CONNECTION_STRING_VAR))?;
        Ok(Self::new(StorageAccount::parse(conn)?, container))
    }

    fn request_headers(
        &self,
        url: &Url,
        content_length: usize,
    ) -> Result<(Url, HeaderMap), IngestError> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let x_ms = [
            ("x-ms-blob-type", "BlockBlob"),
            ("x-ms-date", date.as_str()),
            ("x-ms-version", API_VERSION),
        ];

        let mut headers = HeaderMap::new();
        headers.insert("x-ms-blob-type", HeaderValue::from_static("BlockBlob"));
        headers.insert("x-ms-date", header_value(&date)?);
        headers.insert("x-ms-version", HeaderValue::from_static(API_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(NDJSON));

        let mut url = url.clone();
        match &self.account.auth {
            BlobAuth::SharedKey { account, key } => {
                let resource = format!("/{}{}", account, url.path());
                let to_sign = put_blob_string_to_sign(content_length, NDJSON, &x_ms, &resource);
                let signature = sign(key, &to_sign)?;
                headers.insert(
                    AUTHORIZATION,
                    header_value(&format!("SharedKey {account}:{signature}"))?,
                );
            }
            BlobAuth::Sas(sas) => url.set_query(Some(sas.as_str())),
        }
        Ok((url, headers))
    }
}

fn header_value(value: &str) -> Result<HeaderValue, IngestError> {
    HeaderValue::from_str(value)
        .map_err(|e| IngestError::InvalidCredential(format!("bad header value: {e}")))
}

#[async_trait]
impl Publish for AzureBlobPublisher {
    #[instrument(level = "info", skip_all, fields(container = %self.container, object = %object_name))]
    async fn upload(&self, local_path: &Path, object_name: &str) -> Result<(), IngestError> {
        let t0 = Instant::now();
        let body = tokio::fs::read(local_path)
            .await
            .map_err(|e| IngestError::io(local_path, e))?;
        let bytes = body.len();

        let url = self.account.blob_url(&self.container, object_name)?;
        let (url, headers) = self.request_headers(&url, bytes)?;

        let resp = self.client.put(url).headers(headers).body(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), elapsed_ms = t0.elapsed().as_millis() as u64, "Upload rejected");
            return Err(IngestError::Upload {
                object: object_name.to_string(),
                status: status.as_u16(),
                body: crate::utils::truncate_for_log(&body, 300),
            });
        }

        info!(bytes, elapsed_ms = t0.elapsed().as_millis() as u64, "Uploaded blob");
        Ok(())
    }
}
