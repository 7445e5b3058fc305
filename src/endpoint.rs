use bytes::Bytes;
use futures_util::future::BoxFuture;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};

use crate::types::{Block, FileId};
use crate::{Error, Result};

pub const HEADER_FILE_ID: &str = "X-FileID";
pub const HEADER_HASH: &str = "X-Hash";
pub const HEADER_START: &str = "X-Start";
pub const HEADER_LAST: &str = "X-Last";

/// Everything the server is told about a block besides its bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockRequest {
    pub file_id: FileId,
    pub hash: String,
    pub start: u64,
    pub last: bool,
    pub file_size: u64,
    pub mime_type: String,
}

impl BlockRequest {
    pub fn for_block(block: &Block, hash: &str) -> Self {
        Self {
            file_id: block.info.file_id.clone(),
            hash: hash.to_owned(),
            start: block.info.start,
            last: block.info.last,
            file_size: block.info.file_size,
            mime_type: block.mime_type.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Accepted,
    /// The server saw different bytes than the hash promised.
    Corrupted,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistenceCheck {
    pub file_size: u64,
    pub mime_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExistenceReply {
    pub present: bool,
}

/// The remote side of the upload protocol.
pub trait BlockEndpoint: Send + Sync {
    /// Returns `true` if the server already stores this block.
    fn check<'a>(&'a self, block: &'a BlockRequest) -> BoxFuture<'a, Result<bool>>;

    fn transfer<'a>(
        &'a self,
        block: &'a BlockRequest,
        data: Bytes,
    ) -> BoxFuture<'a, Result<TransferStatus>>;
}

/// Talks to an HTTP upload endpoint.
#[derive(Clone, Debug)]
pub struct HttpEndpoint {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpEndpoint {
    pub fn new(url: &str) -> Result<Self> {
        let url = reqwest::Url::parse(url)
            .map_err(|err| Error::ConfigError(format!("invalid endpoint {url:?}: {err}")))?;
        let client = reqwest::Client::builder().build()?;

        Ok(Self { client, url })
    }
}

impl BlockEndpoint for HttpEndpoint {
    fn check<'a>(&'a self, block: &'a BlockRequest) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let res = self
                .client
                .put(self.url.clone())
                .header(HEADER_FILE_ID, block.file_id.as_str())
                .header(HEADER_HASH, block.hash.as_str())
                .header(HEADER_START, block.start)
                .json(&ExistenceCheck {
                    file_size: block.file_size,
                    mime_type: block.mime_type.clone(),
                })
                .send()
                .await?;

            if res.status() != StatusCode::OK {
                return Err(Error::server(res.status(), "existence check"));
            }

            let reply: ExistenceReply = res.json().await?;
            Ok(reply.present)
        })
    }

    fn transfer<'a>(
        &'a self,
        block: &'a BlockRequest,
        data: Bytes,
    ) -> BoxFuture<'a, Result<TransferStatus>> {
        Box::pin(async move {
            let res = self
                .client
                .post(self.url.clone())
                .header(HEADER_FILE_ID, block.file_id.as_str())
                .header(HEADER_HASH, block.hash.as_str())
                .header(HEADER_START, block.start)
                .header(HEADER_LAST, if block.last { "true" } else { "false" })
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(data)
                .send()
                .await?;

            match res.status() {
                StatusCode::OK => Ok(TransferStatus::Accepted),
                StatusCode::BAD_REQUEST => Ok(TransferStatus::Corrupted),
                status => Err(Error::server(status, "block transfer")),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;
    use httpmock::prelude::*;

    fn request() -> BlockRequest {
        BlockRequest {
            file_id: FileId::from_name("report.pdf", HashAlgorithm::Sha256),
            hash: "abc123".into(),
            start: 1024,
            last: true,
            file_size: 1500,
            mime_type: "application/pdf".into(),
        }
    }

    #[tokio::test]
    async fn test_existence_check_wire_format() -> Result<()> {
        let block = request();
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/blocks")
                    .header(HEADER_FILE_ID, block.file_id.as_str())
                    .header(HEADER_HASH, "abc123")
                    .header(HEADER_START, "1024")
                    .header("content-type", "application/json")
                    .json_body(serde_json::json!({
                        "fileSize": 1500,
                        "mimeType": "application/pdf",
                    }));
                then.status(200).json_body(serde_json::json!({ "present": true }));
            })
            .await;

        let endpoint = HttpEndpoint::new(&server.url("/blocks"))?;
        assert!(endpoint.check(&block).await?);

        mock.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_existence_check_error_status() -> Result<()> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/blocks");
                then.status(503);
            })
            .await;

        let endpoint = HttpEndpoint::new(&server.url("/blocks"))?;
        let err = endpoint.check(&request()).await.unwrap_err();

        assert!(matches!(
            err,
            Error::ServerError { status, .. } if status == StatusCode::SERVICE_UNAVAILABLE
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_transfer_wire_format() -> Result<()> {
        let block = request();
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/blocks")
                    .header(HEADER_FILE_ID, block.file_id.as_str())
                    .header(HEADER_HASH, "abc123")
                    .header(HEADER_START, "1024")
                    .header(HEADER_LAST, "true")
                    .header("content-type", "application/octet-stream")
                    .body("raw block bytes");
                then.status(200);
            })
            .await;

        let endpoint = HttpEndpoint::new(&server.url("/blocks"))?;
        let status = endpoint
            .transfer(&block, Bytes::from_static(b"raw block bytes"))
            .await?;

        assert_eq!(status, TransferStatus::Accepted);
        mock.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_transfer_status_mapping() -> Result<()> {
        let server = MockServer::start_async().await;
        let corrupt = server
            .mock_async(|when, then| {
                when.method(POST).path("/blocks");
                then.status(400);
            })
            .await;

        let endpoint = HttpEndpoint::new(&server.url("/blocks"))?;
        let status = endpoint.transfer(&request(), Bytes::new()).await?;
        assert_eq!(status, TransferStatus::Corrupted);

        corrupt.delete_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/blocks");
                then.status(500);
            })
            .await;

        let err = endpoint.transfer(&request(), Bytes::new()).await.unwrap_err();
        assert!(matches!(err, Error::ServerError { .. }));
        Ok(())
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        assert!(matches!(
            HttpEndpoint::new("not a url"),
            Err(Error::ConfigError(_))
        ));
    }
}
