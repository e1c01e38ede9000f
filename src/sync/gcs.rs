//! GCS Bucket Client
//!
//! Production client over the Google Cloud Storage JSON API. The listing
//! endpoint surfaces each object's `crc32c` attribute, which is the
//! integrity tag the download pipeline verifies against, and `alt=media`
//! reads stream the object body.
//!
//! The persistence buckets are world-readable; requests are unauthenticated.

use crate::sync::bucket::{BucketClient, ByteStream, ObjectRef};
use futures::StreamExt;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::pin::Pin;

const GCS_API_BASE: &str = "https://storage.googleapis.com/storage/v1/b";

/// One page of a GCS object listing
#[derive(Debug, Deserialize)]
struct ListPage {
    #[serde(default)]
    items: Vec<ListedObject>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    name: String,
    #[serde(default)]
    crc32c: String,
}

/// GCS-backed bucket client; cloning shares the underlying HTTP pool
#[derive(Debug, Clone)]
pub struct GcsBucket {
    http: reqwest::Client,
    bucket: String,
}

impl GcsBucket {
    pub fn new(bucket: impl Into<String>) -> Self {
        GcsBucket {
            http: reqwest::Client::new(),
            bucket: bucket.into(),
        }
    }

    /// Metadata URL for one object (the key is a single encoded segment)
    fn object_url(&self, key: &str) -> IoResult<Url> {
        let mut url = Url::parse(&format!("{}/{}/o", GCS_API_BASE, self.bucket))
            .map_err(|e| IoError::new(ErrorKind::InvalidInput, e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| IoError::new(ErrorKind::InvalidInput, "bucket URL cannot be a base"))?
            .push(key);
        Ok(url)
    }

    fn list_url(&self) -> IoResult<Url> {
        Url::parse(&format!("{}/{}/o", GCS_API_BASE, self.bucket))
            .map_err(|e| IoError::new(ErrorKind::InvalidInput, e.to_string()))
    }

    fn map_error(err: reqwest::Error) -> IoError {
        if err.status() == Some(StatusCode::NOT_FOUND) {
            IoError::new(ErrorKind::NotFound, err.to_string())
        } else if err.is_timeout() {
            IoError::new(ErrorKind::TimedOut, err.to_string())
        } else {
            IoError::other(err)
        }
    }
}

impl BucketClient for GcsBucket {
    fn exists<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<bool>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.object_url(key)?;
            let response = self.http.get(url).send().await.map_err(Self::map_error)?;
            match response.status() {
                status if status.is_success() => Ok(true),
                StatusCode::NOT_FOUND => Ok(false),
                status => Err(IoError::other(format!(
                    "metadata probe for {} returned {}",
                    key, status
                ))),
            }
        })
    }

    fn read<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<ByteStream>> + Send + 'a>> {
        Box::pin(async move {
            let mut url = self.object_url(key)?;
            url.query_pairs_mut().append_pair("alt", "media");
            let response = self
                .http
                .get(url)
                .send()
                .await
                .map_err(Self::map_error)?
                .error_for_status()
                .map_err(Self::map_error)?;

            let stream: ByteStream = Box::pin(
                response
                    .bytes_stream()
                    .map(|chunk| chunk.map_err(Self::map_error)),
            );
            Ok(stream)
        })
    }

    fn list<'a>(
        &'a self,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<ObjectRef>>> + Send + 'a>> {
        Box::pin(async move {
            let mut refs = Vec::new();
            let mut page_token: Option<String> = None;

            loop {
                let mut url = self.list_url()?;
                {
                    let mut query = url.query_pairs_mut();
                    query.append_pair("prefix", prefix);
                    if let Some(token) = &page_token {
                        query.append_pair("pageToken", token);
                    }
                }

                let page: ListPage = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .map_err(Self::map_error)?
                    .error_for_status()
                    .map_err(Self::map_error)?
                    .json()
                    .await
                    .map_err(Self::map_error)?;

                refs.extend(page.items.into_iter().map(|item| ObjectRef {
                    key: item.name,
                    crc32c_b64: item.crc32c,
                }));

                match page.next_page_token {
                    Some(token) => page_token = Some(token),
                    None => break,
                }
            }

            Ok(refs)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url_encodes_key() {
        let client = GcsBucket::new("chain-bucket");
        let url = client
            .object_url("incremental/devnet/.currentTxBlk")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/storage/v1/b/chain-bucket/o/incremental%2Fdevnet%2F.currentTxBlk"
        );
    }

    #[test]
    fn test_list_page_parses_crc() {
        let body = r#"{
            "items": [
                {"name": "incremental/devnet/persistence/a", "crc32c": "4waSgw=="},
                {"name": "incremental/devnet/persistence/b"}
            ],
            "nextPageToken": "tok"
        }"#;
        let page: ListPage = serde_json::from_str(body).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].crc32c, "4waSgw==");
        assert_eq!(page.items[1].crc32c, "");
        assert_eq!(page.next_page_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_list_page_tolerates_empty_listing() {
        let page: ListPage = serde_json::from_str("{}").unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_page_token.is_none());
    }
}
