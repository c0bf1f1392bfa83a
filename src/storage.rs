use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::presigning::PresigningConfig;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Lifetime of a presigned upload URL.
const PRESIGN_TTL: Duration = Duration::from_secs(600);

/// Prefix for product image objects.
const PRODUCT_IMAGE_PREFIX: &str = "products";

/// StorageService
///
/// Object storage for product images. Clients never send image bytes through the
/// API; they receive a presigned URL and upload directly to the bucket.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Creates the configured bucket if missing. Only called for local MinIO setups.
    async fn ensure_bucket_exists(&self);

    /// A short-lived URL allowing a single `PUT` of `key` with `content_type`.
    async fn get_presigned_upload_url(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<String, String>;
}

/// S3StorageClient
///
/// `StorageService` over the AWS SDK. Path-style addressing keeps it working
/// against MinIO and other S3-compatible endpoints.
#[derive(Clone)]
pub struct S3StorageClient {
    client: s3::Client,
    bucket_name: String,
}

impl S3StorageClient {
    pub async fn new(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
    ) -> Self {
        let credentials =
            s3::config::Credentials::new(access_key, secret_key, None, None, "static");

        let config = s3::Config::builder()
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .region(s3::config::Region::new(region.to_string()))
            .behavior_version_latest()
            .force_path_style(true)
            .build();

        Self {
            client: s3::Client::from_conf(config),
            bucket_name: bucket.to_string(),
        }
    }
}

#[async_trait]
impl StorageService for S3StorageClient {
    async fn ensure_bucket_exists(&self) {
        // CreateBucket fails harmlessly when the bucket is already there.
        if let Err(e) = self
            .client
            .create_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            tracing::debug!(bucket = %self.bucket_name, error = %e, "create_bucket skipped");
        }
    }

    async fn get_presigned_upload_url(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<String, String> {
        let presigning = PresigningConfig::expires_in(PRESIGN_TTL).map_err(|e| e.to_string())?;

        let presigned_req = self
            .client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            // The upload must send exactly this Content-Type.
            .content_type(content_type)
            .presigned(presigning)
            .await
            .map_err(|e| e.to_string())?;

        Ok(presigned_req.uri().to_string())
    }
}

/// product_image_key
///
/// Builds the object key for a new product image: `products/{uuid}.{ext}`. The
/// extension comes from the client filename (lower-cased, alphanumeric only) and
/// the content type must be `image/*`.
pub fn product_image_key(filename: &str, content_type: &str) -> Result<String, String> {
    let content_type = content_type.trim().to_ascii_lowercase();
    let is_image = content_type
        .strip_prefix("image/")
        .is_some_and(|subtype| !subtype.is_empty());
    if !is_image {
        return Err(format!("unsupported content type '{content_type}', expected image/*"));
    }

    let extension = sanitize_key(filename)
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8)
        .filter(|ext| ext.bytes().all(|b| b.is_ascii_alphanumeric()))
        .ok_or_else(|| format!("filename '{filename}' has no usable extension"))?;

    Ok(format!("{PRODUCT_IMAGE_PREFIX}/{}.{extension}", Uuid::new_v4()))
}

/// Drops empty, `.` and `..` path segments.
fn sanitize_key(key: &str) -> String {
    key.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".." && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// MockStorageService
///
/// Returns deterministic local URLs, or fails on demand.
#[derive(Clone, Default)]
pub struct MockStorageService {
    pub should_fail: bool,
}

impl MockStorageService {
    pub fn new() -> Self {
        Self { should_fail: false }
    }

    pub fn new_failing() -> Self {
        Self { should_fail: true }
    }
}

#[async_trait]
impl StorageService for MockStorageService {
    async fn ensure_bucket_exists(&self) {}

    async fn get_presigned_upload_url(
        &self,
        key: &str,
        _content_type: &str,
    ) -> Result<String, String> {
        if self.should_fail {
            return Err("Mock Storage Error: Simulation requested".to_string());
        }
        Ok(format!(
            "http://localhost:9000/mock-bucket/{}?signature=fake",
            sanitize_key(key)
        ))
    }
}

pub type StorageState = Arc<dyn StorageService>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_keys_live_under_products_prefix() {
        let key = product_image_key("Front View.JPG", "image/jpeg").unwrap();
        assert!(key.starts_with("products/"));
        assert!(key.ends_with(".jpg"));
    }

    #[test]
    fn non_images_and_bad_extensions_are_rejected() {
        assert!(product_image_key("report.pdf", "application/pdf").is_err());
        assert!(product_image_key("noext", "image/png").is_err());
        assert!(product_image_key("evil.p/hp", "image/png").is_err());
        assert!(product_image_key("pic.png", "image/").is_err());
    }

    #[test]
    fn traversal_segments_are_stripped() {
        assert_eq!(sanitize_key("../../etc/./passwd"), "etc/passwd");
    }

    #[tokio::test]
    async fn mock_storage_presigns_or_fails() {
        let url = MockStorageService::new()
            .get_presigned_upload_url("products/a.png", "image/png")
            .await
            .unwrap();
        assert_eq!(url, "http://localhost:9000/mock-bucket/products/a.png?signature=fake");

        assert!(MockStorageService::new_failing()
            .get_presigned_upload_url("products/a.png", "image/png")
            .await
            .is_err());
    }
}
