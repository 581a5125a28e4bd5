//! WebDAV remote tier.
//!
//! Volumes are stored as plain resources under the configured endpoint.
//! Range reads map onto `GET` with a `Range` header, uploads onto a
//! streaming `PUT`.

use std::{collections::HashMap, io, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{
    header::{CONTENT_LENGTH, CONTENT_TYPE, RANGE},
    Body,
    Method,
    RequestBuilder,
    StatusCode,
};
use tokio::io::AsyncReadExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::info;
use url::Url;

use crate::{
    client::{RemoteClient, RemoteStat, RemoteStream, UploadBody},
    config::BackendConfiguration,
    registry::BackendFactory,
    storage::{BackendStorage, RemoteBackendStorage},
    BackendError,
    BackendResult,
    StorageType,
};

pub const STORAGE_TYPE: &str = "webdav";

/// Size of the chunks a local file is cut into while it is uploaded.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8" ?><D:propfind xmlns:D="DAV:"><D:prop><D:resourcetype/></D:prop></D:propfind>"#;

/// Credentials and endpoint of one WebDAV tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebDavConfig {
    pub username: String,
    pub password: String,
    pub endpoint: String,
}

impl WebDavConfig {
    pub fn from_configuration(configuration: &BackendConfiguration, prefix: &str) -> Self {
        Self {
            username: configuration.get_string(&format!("{prefix}username")),
            password: configuration.get_string(&format!("{prefix}password")),
            endpoint: configuration.get_string(&format!("{prefix}endpoint")),
        }
    }

    pub fn to_properties(&self) -> HashMap<String, String> {
        HashMap::from([
            ("username".to_string(), self.username.clone()),
            ("password".to_string(), self.password.clone()),
            ("endpoint".to_string(), self.endpoint.clone()),
        ])
    }
}

/// Builds [`RemoteBackendStorage`] instances backed by [`WebDavClient`].
#[derive(Debug, Default)]
pub struct WebDavBackendFactory;

#[async_trait]
impl BackendFactory for WebDavBackendFactory {
    fn storage_type(&self) -> StorageType {
        StorageType::from(STORAGE_TYPE)
    }

    async fn build_storage(
        &self,
        configuration: &BackendConfiguration,
        config_prefix: &str,
        id: &str,
    ) -> BackendResult<Arc<dyn BackendStorage>> {
        let config = WebDavConfig::from_configuration(configuration, config_prefix);
        let connection_error = |source: anyhow::Error| BackendError::ConnectionError {
            storage: format!("{STORAGE_TYPE}.{id}"),
            endpoint: config.endpoint.clone(),
            source,
        };

        let client =
            WebDavClient::new(&config.endpoint, &config.username, &config.password)
                .map_err(connection_error)?;
        client.connect().await.map_err(connection_error)?;

        info!(
            id,
            endpoint = %config.endpoint,
            "created backend storage {STORAGE_TYPE}.{id}"
        );

        Ok(Arc::new(RemoteBackendStorage::new(
            self.storage_type(),
            id,
            config.to_properties(),
            Arc::new(client),
        )))
    }
}

/// Minimal WebDAV client covering the primitives a remote tier needs.
pub struct WebDavClient {
    http: reqwest::Client,
    endpoint: Url,
    username: String,
    password: String,
}

impl WebDavClient {
    pub fn new(endpoint: &str, username: &str, password: &str) -> Result<Self> {
        let endpoint: Url = endpoint
            .parse()
            .with_context(|| format!("invalid webdav endpoint '{endpoint}'"))?;
        if endpoint.cannot_be_a_base() {
            bail!("invalid webdav endpoint '{endpoint}': not a base URL");
        }
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            endpoint,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// Resolve a remote path below the endpoint, percent-encoding each
    /// segment. A path with no segments would address the endpoint
    /// collection itself and is rejected.
    fn url(&self, path: &str) -> Result<Url> {
        let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();
        if segments.peek().is_none() {
            bail!("invalid object path '{path}'");
        }
        let mut url = self.endpoint.clone();
        if let Ok(mut path_segments) = url.path_segments_mut() {
            path_segments.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.http.request(method, url);
        if self.username.is_empty() {
            return request;
        }
        request.basic_auth(&self.username, Some(&self.password))
    }

    fn dav_method(name: &str) -> Result<Method> {
        Method::from_bytes(name.as_bytes()).with_context(|| format!("invalid method {name}"))
    }

    /// Create every missing collection above `path`.
    async fn create_parent_collections(&self, path: &str) -> Result<()> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        for depth in 1..segments.len() {
            let parent = segments[..depth].join("/");
            let mut url = self.url(&parent)?;
            if let Ok(mut segments) = url.path_segments_mut() {
                segments.push("");
            }
            let response = self
                .request(Self::dav_method("MKCOL")?, url)
                .send()
                .await
                .with_context(|| format!("MKCOL {parent}"))?;
            let status = response.status();
            if !status.is_success() && status != StatusCode::METHOD_NOT_ALLOWED {
                bail!("MKCOL {parent} returned {status}");
            }
        }
        Ok(())
    }
}

fn body_stream(response: reqwest::Response) -> RemoteStream {
    Box::pin(response.bytes_stream().map_err(anyhow::Error::from))
}

#[async_trait]
impl RemoteClient for WebDavClient {
    async fn connect(&self) -> Result<()> {
        let response = self
            .request(Self::dav_method("PROPFIND")?, self.endpoint.clone())
            .header("Depth", "0")
            .header(CONTENT_TYPE, "application/xml;charset=UTF-8")
            .body(PROPFIND_BODY)
            .send()
            .await
            .with_context(|| format!("PROPFIND {}", self.endpoint))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            status @ (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                Err(anyhow!("authentication failed: {status}"))
            }
            status => Err(anyhow!("PROPFIND {} returned {status}", self.endpoint)),
        }
    }

    async fn read_range(&self, path: &str, offset: u64, length: u64) -> Result<RemoteStream> {
        if length == 0 {
            return Ok(Box::pin(futures::stream::empty()));
        }
        let end = offset
            .checked_add(length - 1)
            .ok_or_else(|| anyhow!("range not satisfiable: offset {offset} length {length}"))?;
        let response = self
            .request(Method::GET, self.url(path)?)
            .header(RANGE, format!("bytes={offset}-{end}"))
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => Ok(body_stream(response)),
            StatusCode::OK => {
                // The server ignored the range: skip to the offset ourselves.
                let mut reader =
                    StreamReader::new(body_stream(response).map_err(io::Error::other));
                let skipped =
                    tokio::io::copy(&mut (&mut reader).take(offset), &mut tokio::io::sink())
                        .await
                        .with_context(|| format!("GET {path}"))?;
                if skipped < offset {
                    bail!("range not satisfiable: {path} is {skipped} bytes long");
                }
                Ok(Box::pin(
                    ReaderStream::new(reader.take(length)).map_err(anyhow::Error::from),
                ))
            }
            status => Err(anyhow!("GET {path} bytes={offset}-{end} returned {status}")),
        }
    }

    async fn read_stream(&self, path: &str) -> Result<RemoteStream> {
        let response = self
            .request(Method::GET, self.url(path)?)
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("GET {path} returned {status}");
        }
        Ok(body_stream(response))
    }

    async fn write_stream(&self, path: &str, body: UploadBody, size: u64) -> Result<()> {
        self.create_parent_collections(path).await?;

        let body = Body::wrap_stream(ReaderStream::with_capacity(body, UPLOAD_CHUNK_SIZE));
        let response = self
            .request(Method::PUT, self.url(path)?)
            .header(CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await
            .with_context(|| format!("PUT {path}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("PUT {path} returned {status}");
        }
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<Option<RemoteStat>> {
        let response = self
            .request(Method::HEAD, self.url(path)?)
            .send()
            .await
            .with_context(|| format!("HEAD {path}"))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            bail!("HEAD {path} returned {status}");
        }

        // Content-Length of a HEAD response describes the resource, not the
        // (empty) body, so read the header directly.
        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| anyhow!("HEAD {path} returned no content length"))?;
        Ok(Some(RemoteStat { size }))
    }

    async fn remove_all(&self, path: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, self.url(path)?)
            .send()
            .await
            .with_context(|| format!("DELETE {path}"))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(anyhow!("DELETE {path} returned {status}")),
        }
    }
}
