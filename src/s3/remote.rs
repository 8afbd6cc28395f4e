use async_trait::async_trait;

use super::error::RemoteError;
use super::partition::Part;

/// Identity of a multipart upload, assigned by the service on initiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartId {
    pub key: String,
    pub upload_id: String,
}

/// Proof that a part was stored; S3 needs the entity tag to complete the upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartReceipt {
    pub part_number: i32,
    pub e_tag: String,
}

/// The four multipart operations the upload engine needs from a storage service.
///
/// `upload_part` is called concurrently from several workers with distinct part
/// numbers for the same [`MultipartId`].
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    async fn initiate(&self, key: &str) -> Result<MultipartId, RemoteError>;

    async fn upload_part(&self, id: &MultipartId, part: &Part) -> Result<PartReceipt, RemoteError>;

    /// `parts` is sorted by part number.
    async fn complete(&self, id: &MultipartId, parts: Vec<PartReceipt>) -> Result<(), RemoteError>;

    async fn abort(&self, id: &MultipartId) -> Result<(), RemoteError>;

    /// Highest part number the service accepts. Parts past it are never sent.
    fn max_parts(&self) -> Option<usize> {
        None
    }
}
