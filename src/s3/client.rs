use async_trait::async_trait;
use aws_sdk_s3 as s3;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use s3::primitives::ByteStream;
use tracing::{debug, warn};

use super::error::RemoteError;
use super::partition::Part;
use super::remote::{MultipartId, PartReceipt, RemoteStorage};

pub const MIN_PART_SIZE_5MB: usize = 5_242_880;
pub const MAX_PART_SIZE_5GB: usize = 5_368_709_120;
pub const MAX_PARTS: usize = 10_000;

/// [`RemoteStorage`] backed by an S3 bucket.
#[derive(Debug, Clone)]
pub struct S3Remote {
    client: s3::Client,
    bucket: String,
}

impl S3Remote {
    pub fn new(client: s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Logs when `part_size` is outside what S3 accepts for non-final parts.
    pub fn check_part_size(part_size: usize) {
        if part_size < MIN_PART_SIZE_5MB {
            warn!(
                part_size,
                min = MIN_PART_SIZE_5MB,
                "part size is below the S3 minimum, uploads of more than one part will be rejected"
            );
        }
        if part_size > MAX_PART_SIZE_5GB {
            warn!(part_size, max = MAX_PART_SIZE_5GB, "part size is above the S3 maximum");
        }
    }
}

#[async_trait]
impl RemoteStorage for S3Remote {
    async fn initiate(&self, key: &str) -> Result<MultipartId, RemoteError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(s3::Error::from)?;

        let upload_id = output
            .upload_id
            .ok_or(RemoteError::MissingField("upload id"))?;
        Ok(MultipartId {
            key: key.to_owned(),
            upload_id,
        })
    }

    async fn upload_part(
        &self,
        id: &MultipartId,
        part: &Part,
    ) -> Result<PartReceipt, RemoteError> {
        let output = self
            .client
            .upload_part()
            .body(ByteStream::from(part.payload.clone()))
            .content_length(part.len() as i64)
            .bucket(&self.bucket)
            .key(&id.key)
            .part_number(part.number)
            .upload_id(&id.upload_id)
            .send()
            .await
            .map_err(s3::Error::from)?;

        let e_tag = output.e_tag.ok_or(RemoteError::MissingField("ETag"))?;
        debug!(part = part.number, %e_tag, "part stored");
        Ok(PartReceipt {
            part_number: part.number,
            e_tag,
        })
    }

    async fn complete(
        &self,
        id: &MultipartId,
        parts: Vec<PartReceipt>,
    ) -> Result<(), RemoteError> {
        let completed_parts = parts
            .into_iter()
            .map(|receipt| {
                CompletedPart::builder()
                    .set_part_number(Some(receipt.part_number))
                    .set_e_tag(Some(receipt.e_tag))
                    .build()
            })
            .collect();

        let completed_multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&id.key)
            .upload_id(&id.upload_id)
            .multipart_upload(completed_multipart_upload)
            .send()
            .await
            .map_err(s3::Error::from)?;
        Ok(())
    }

    async fn abort(&self, id: &MultipartId) -> Result<(), RemoteError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&id.key)
            .upload_id(&id.upload_id)
            .send()
            .await
            .map_err(s3::Error::from)?;
        Ok(())
    }

    fn max_parts(&self) -> Option<usize> {
        Some(MAX_PARTS)
    }
}
