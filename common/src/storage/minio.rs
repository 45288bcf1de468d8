// MinIO client: object put, get, delete and list against a single bucket

use crate::config::MinioConfig;
use crate::errors::StorageError;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// MinIO client wrapper around a single bucket
#[derive(Clone, Debug)]
pub struct MinioClient {
    bucket: Arc<Bucket>,
}

impl MinioClient {
    /// Create a new MinIO client from configuration
    #[instrument(skip(config), fields(endpoint = %config.endpoint, bucket = %config.bucket))]
    pub async fn new(config: &MinioConfig) -> Result<Self, StorageError> {
        info!("Initializing MinIO client");

        let credentials = Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| {
            error!(error = %e, "Failed to create MinIO credentials");
            StorageError::MinioError(format!("Failed to create credentials: {}", e))
        })?;

        // The endpoint keeps its scheme so plain-http MinIO works
        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        };

        let bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| {
                error!(error = %e, "Failed to create MinIO bucket");
                StorageError::MinioError(format!("Failed to create bucket: {}", e))
            })?
            .with_path_style();

        info!(
            bucket = %config.bucket,
            endpoint = %config.endpoint,
            "MinIO client initialized successfully"
        );

        Ok(Self {
            bucket: Arc::new(bucket),
        })
    }

    /// Health check for MinIO connection
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), StorageError> {
        debug!("Performing MinIO health check");

        match self
            .bucket
            .list("".to_string(), Some("/".to_string()))
            .await
        {
            Ok(_) => {
                debug!("MinIO health check passed");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "MinIO health check failed");
                Err(StorageError::MinioError(format!(
                    "Health check failed: {}",
                    e
                )))
            }
        }
    }

    /// Store data to MinIO at the specified path
    #[instrument(skip(self, data), fields(path = %path, size = data.len()))]
    pub async fn put_object(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        let response = self.bucket.put_object(path, data).await.map_err(|e| {
            error!(error = %e, path = %path, "Failed to store object to MinIO");
            StorageError::MinioError(format!("Failed to put object '{}': {}", path, e))
        })?;
        check_status("put", path, response.status_code(), response.bytes())?;

        debug!(path = %path, "Object stored successfully");
        Ok(())
    }

    /// Retrieve data from MinIO at the specified path
    #[instrument(skip(self), fields(path = %path))]
    pub async fn get_object(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(path).await.map_err(|e| {
            error!(error = %e, path = %path, "Failed to retrieve object from MinIO");
            StorageError::MinioError(format!("Failed to get object '{}': {}", path, e))
        })?;
        check_status("get", path, response.status_code(), response.bytes())?;

        let data = response.bytes().to_vec();
        debug!(path = %path, size = data.len(), "Object retrieved successfully");
        Ok(data)
    }

    /// Delete an object from MinIO
    #[instrument(skip(self), fields(path = %path))]
    pub async fn delete_object(&self, path: &str) -> Result<(), StorageError> {
        let response = self.bucket.delete_object(path).await.map_err(|e| {
            error!(error = %e, path = %path, "Failed to delete object from MinIO");
            StorageError::MinioError(format!("Failed to delete object '{}': {}", path, e))
        })?;
        check_status("delete", path, response.status_code(), response.bytes())?;

        debug!(path = %path, "Object deleted successfully");
        Ok(())
    }

    /// List every object key below `prefix`, at any depth
    #[instrument(skip(self), fields(prefix = %prefix))]
    pub async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let results = self
            .bucket
            .list(prefix.to_string(), None)
            .await
            .map_err(|e| {
                error!(error = %e, prefix = %prefix, "Failed to list objects in MinIO");
                StorageError::MinioError(format!(
                    "Failed to list objects with prefix '{}': {}",
                    prefix, e
                ))
            })?;

        let objects: Vec<String> = results
            .into_iter()
            .flat_map(|page| page.contents.into_iter().map(|content| content.key))
            .collect();

        debug!(prefix = %prefix, count = objects.len(), "Objects listed successfully");
        Ok(objects)
    }
}

/// Responses arrive as Ok whatever their status, so non-2xx is mapped here
fn check_status(operation: &str, path: &str, status: u16, body: &[u8]) -> Result<(), StorageError> {
    match status {
        200..=299 => Ok(()),
        404 => Err(StorageError::NotFound(path.to_string())),
        _ => {
            let body = String::from_utf8_lossy(body);
            error!(status, path = %path, operation, "MinIO rejected request");
            Err(StorageError::MinioError(format!(
                "Failed to {} object '{}': HTTP {}: {}",
                operation,
                path,
                status,
                body.trim()
            )))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> MinioConfig {
        MinioConfig {
            endpoint: "http://localhost:9000".to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            bucket: "crypto-report-test".to_string(),
            region: "us-east-1".to_string(),
        }
    }

    fn stub_config(endpoint: String) -> MinioConfig {
        MinioConfig {
            endpoint,
            ..test_config()
        }
    }

    #[test]
    fn test_check_status_mapping() {
        assert!(check_status("put", "a", 200, b"").is_ok());
        assert!(check_status("delete", "a", 204, b"").is_ok());
        assert!(matches!(
            check_status("get", "a", 404, b"<Code>NoSuchKey</Code>"),
            Err(StorageError::NotFound(_))
        ));
        match check_status("put", "a", 403, b"<Code>AccessDenied</Code>") {
            Err(StorageError::MinioError(message)) => assert!(message.contains("403")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let endpoint = stub::serve(
            "404 Not Found",
            "<Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message></Error>",
        )
        .await;
        let client = MinioClient::new(&stub_config(endpoint)).await.unwrap();

        assert!(matches!(
            client.get_object("artifacts/missing.json").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejected_put_is_an_error() {
        let endpoint = stub::serve(
            "403 Forbidden",
            "<Error><Code>AccessDenied</Code><Message>Access Denied.</Message></Error>",
        )
        .await;
        let client = MinioClient::new(&stub_config(endpoint)).await.unwrap();

        assert!(matches!(
            client.put_object("artifacts/report.png", b"png").await,
            Err(StorageError::MinioError(_))
        ));
        assert!(matches!(
            client.delete_object("artifacts/report.png").await,
            Err(StorageError::MinioError(_))
        ));
    }

    #[tokio::test]
    async fn test_accepted_put_succeeds() {
        let endpoint = stub::serve("200 OK", "").await;
        let client = MinioClient::new(&stub_config(endpoint)).await.unwrap();

        assert!(client.put_object("artifacts/report.png", b"png").await.is_ok());
    }

    #[tokio::test]
    async fn test_minio_client_creation_is_offline() {
        // Building the client performs no network calls
        let client = MinioClient::new(&test_config()).await;
        assert!(client.is_ok());
    }

    #[tokio::test]
    #[ignore] // Requires MinIO to be running
    async fn test_put_get_delete_roundtrip() {
        let client = MinioClient::new(&test_config()).await.unwrap();
        client.put_object("test/object.txt", b"hello").await.unwrap();
        assert_eq!(client.get_object("test/object.txt").await.unwrap(), b"hello");
        client.delete_object("test/object.txt").await.unwrap();
    }
}
