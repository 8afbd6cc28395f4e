//! In-memory [`RemoteStorage`] that records every call and can inject failures.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Semaphore;

use super::error::RemoteError;
use super::partition::Part;
use super::remote::{MultipartId, PartReceipt, RemoteStorage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Initiate,
    UploadPart(i32),
    Complete(Vec<i32>),
    Abort,
}

#[derive(Default)]
pub(crate) struct MemoryRemote {
    calls: Mutex<Vec<Call>>,
    stored: Mutex<BTreeMap<i32, Bytes>>,
    // part number -> number of attempts that still fail
    failures: Mutex<HashMap<i32, u32>>,
    fail_initiate: bool,
    fail_complete: bool,
    fail_abort: bool,
    gate: Option<Arc<Semaphore>>,
    max_parts: Option<usize>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryRemote {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The first `times` attempts for `part_number` fail.
    pub(crate) fn failing_part(self, part_number: i32, times: u32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(part_number, times);
        self
    }

    pub(crate) fn failing_initiate(mut self) -> Self {
        self.fail_initiate = true;
        self
    }

    pub(crate) fn failing_complete(mut self) -> Self {
        self.fail_complete = true;
        self
    }

    pub(crate) fn failing_abort(mut self) -> Self {
        self.fail_abort = true;
        self
    }

    /// Successful part uploads wait for a permit from `gate` before they finish.
    pub(crate) fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn with_max_parts(mut self, limit: usize) -> Self {
        self.max_parts = Some(limit);
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub(crate) fn completes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Complete(_)))
            .count()
    }

    pub(crate) fn aborts(&self) -> usize {
        self.count(&Call::Abort)
    }

    pub(crate) fn stored(&self) -> BTreeMap<i32, Bytes> {
        self.stored.lock().unwrap().clone()
    }

    /// Concatenation of the stored parts in part number order.
    pub(crate) fn object(&self) -> Vec<u8> {
        self.stored()
            .values()
            .flat_map(|b| b.iter().copied())
            .collect()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn should_fail(&self, part_number: i32) -> bool {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&part_number) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

fn id() -> MultipartId {
    MultipartId {
        key: "backup.img".into(),
        upload_id: "upload-1".into(),
    }
}

#[async_trait]
impl RemoteStorage for MemoryRemote {
    async fn initiate(&self, key: &str) -> Result<MultipartId, RemoteError> {
        self.record(Call::Initiate);
        if self.fail_initiate {
            return Err(RemoteError::Other("bucket not found".into()));
        }
        Ok(MultipartId {
            key: key.into(),
            ..id()
        })
    }

    async fn upload_part(
        &self,
        _id: &MultipartId,
        part: &Part,
    ) -> Result<PartReceipt, RemoteError> {
        self.record(Call::UploadPart(part.number));
        if self.should_fail(part.number) {
            return Err(RemoteError::Other(format!(
                "connection reset uploading part {}",
                part.number
            )));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            // closed gate lets everything through
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.stored
            .lock()
            .unwrap()
            .insert(part.number, part.payload.clone());
        Ok(PartReceipt {
            part_number: part.number,
            e_tag: format!("\"etag-{}\"", part.number),
        })
    }

    async fn complete(
        &self,
        _id: &MultipartId,
        parts: Vec<PartReceipt>,
    ) -> Result<(), RemoteError> {
        self.record(Call::Complete(parts.iter().map(|p| p.part_number).collect()));
        if self.fail_complete {
            return Err(RemoteError::Other("invalid part order".into()));
        }
        Ok(())
    }

    async fn abort(&self, _id: &MultipartId) -> Result<(), RemoteError> {
        self.record(Call::Abort);
        if self.fail_abort {
            return Err(RemoteError::Other("access denied".into()));
        }
        self.stored.lock().unwrap().clear();
        Ok(())
    }

    fn max_parts(&self) -> Option<usize> {
        self.max_parts
    }
}
