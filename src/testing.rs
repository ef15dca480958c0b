//! Test support: a recording, in-memory stand-in for the archive API.
//!
//! Used by the unit and integration tests to observe exactly which archive
//! calls the dispatcher makes, in which order, without any network.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

use crate::archive::ArchiveApi;
use crate::error::{RelayError, RelayResult};

/// One recorded archive call, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveCall {
    /// A container was created.
    CreateUpload {
        /// Requested container name.
        upload_name: String,
        /// The id minted for it.
        upload_id: String,
    },
    /// A dictionary payload was attached to a container.
    AddDictionary {
        /// Payload tag (`{time}_{kind}`).
        name: String,
        /// Target container.
        upload_id: String,
        /// The payload itself.
        dictionary: Value,
    },
}

#[derive(Default)]
struct RecordingState {
    calls: Vec<ArchiveCall>,
    next_upload: usize,
    fail_create: bool,
    fail_dictionary: bool,
}

/// An [`ArchiveApi`] that records calls and mints sequential upload ids
/// (`upload-0`, `upload-1`, ...). Clones share state.
#[derive(Clone, Default)]
pub struct RecordingArchive {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingArchive {
    /// Create an empty recording archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call recorded so far, in arrival order.
    pub fn calls(&self) -> Vec<ArchiveCall> {
        self.state.lock().calls.clone()
    }

    /// Number of containers created so far.
    pub fn uploads_created(&self) -> usize {
        self.state.lock().next_upload
    }

    /// Payload tags pushed so far, in arrival order.
    pub fn pushed_names(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ArchiveCall::AddDictionary { name, .. } => Some(name.clone()),
                ArchiveCall::CreateUpload { .. } => None,
            })
            .collect()
    }

    /// Make the next `create_upload` fail with a 502.
    pub fn fail_next_create(&self) {
        self.state.lock().fail_create = true;
    }

    /// Make the next `add_dictionary` fail with a 502.
    pub fn fail_next_dictionary(&self) {
        self.state.lock().fail_dictionary = true;
    }

    fn remote_failure() -> RelayError {
        RelayError::Api {
            status: reqwest::StatusCode::BAD_GATEWAY,
            body: "injected failure".to_string(),
        }
    }
}

#[async_trait]
impl ArchiveApi for RecordingArchive {
    async fn create_upload(&self, upload_name: &str) -> RelayResult<String> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_create) {
            return Err(Self::remote_failure());
        }
        let upload_id = format!("upload-{}", state.next_upload);
        state.next_upload += 1;
        state.calls.push(ArchiveCall::CreateUpload {
            upload_name: upload_name.to_string(),
            upload_id: upload_id.clone(),
        });
        Ok(upload_id)
    }

    async fn add_dictionary(
        &self,
        name: &str,
        dictionary: &Value,
        upload_id: &str,
    ) -> RelayResult<()> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_dictionary) {
            return Err(Self::remote_failure());
        }
        state.calls.push(ArchiveCall::AddDictionary {
            name: name.to_string(),
            upload_id: upload_id.to_string(),
            dictionary: dictionary.clone(),
        });
        Ok(())
    }
}
