//! Object store access.
//!
//! [`ObjectStore`] is the seam between the sync engine and the remote side.
//! [`R2Store`] implements it on top of the AWS S3 SDK pointed at an
//! S3-compatible endpoint (Cloudflare R2 in production).

use crate::error::{Result, SyncError};
use crate::types::{ConnectionParams, RemoteObject};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region, RequestChecksumCalculation};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Connection-layer timeout for every store call.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<RemoteObject>,
    /// Continuation token; `Some` only while the listing is truncated.
    pub next_token: Option<String>,
}

/// Operations the sync engine needs from an object store.
///
/// Implementations must tolerate concurrent calls from many in-flight
/// transfers.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Lists one page of objects whose key starts with `prefix`.
    async fn list_page(&self, prefix: &str, token: Option<String>) -> Result<ListPage>;

    /// Metadata for `key`, or `None` when the object does not exist.
    async fn head_object(&self, key: &str) -> Result<Option<RemoteObject>>;

    /// Uploads the whole file at `path` to `key`.
    async fn upload_file(&self, path: &Path, key: &str) -> Result<()>;

    /// Downloads `key` into `path`, replacing any existing file.
    async fn download_file(&self, key: &str, path: &Path) -> Result<()>;
}

/// S3/R2-backed [`ObjectStore`].
#[derive(Clone)]
pub struct R2Store {
    client: Client,
    bucket: String,
}

impl R2Store {
    /// Builds a client from explicit credentials against the configured endpoint.
    pub async fn connect(params: &ConnectionParams) -> Self {
        let credentials = Credentials::new(
            &params.access_key,
            &params.secret_key,
            params.token.clone(),
            None,
            "r2sync-static",
        );

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new("auto"))
            .credentials_provider(credentials)
            .load()
            .await;

        let timeout_config = aws_sdk_s3::config::timeout::TimeoutConfig::builder()
            .connect_timeout(CONNECTION_TIMEOUT)
            .read_timeout(CONNECTION_TIMEOUT)
            .build();

        let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
            .endpoint_url(&params.endpoint)
            .timeout_config(timeout_config)
            // R2 rejects some of the newer default checksum headers.
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .build();

        debug!(
            "Object store client ready for bucket={} endpoint={}",
            params.bucket, params.endpoint
        );

        Self {
            client: Client::from_conf(s3_config),
            bucket: params.bucket.clone(),
        }
    }
}

fn store_error<E: std::error::Error>(err: E) -> SyncError {
    SyncError::Store(DisplayErrorContext(err).to_string())
}

/// File name prefix of in-progress downloads. Local walks skip these.
pub(crate) const PARTIAL_PREFIX: &str = ".r2sync-part-";

static PARTIAL_SEQ: AtomicU64 = AtomicU64::new(0);

/// Sibling path a download is streamed into before being renamed over `path`.
///
/// The name has a fixed length so long target names cannot overflow the
/// file name limit.
fn partial_path(path: &Path) -> PathBuf {
    let seq = PARTIAL_SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    path.with_file_name(format!("{}{}-{}", PARTIAL_PREFIX, std::process::id(), seq))
}

#[async_trait]
impl ObjectStore for R2Store {
    async fn list_page(&self, prefix: &str, token: Option<String>) -> Result<ListPage> {
        let mut request = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix);
        if let Some(token) = token {
            request = request.continuation_token(token);
        }

        let response = request.send().await.map_err(store_error)?;

        let objects = response
            .contents()
            .iter()
            .filter_map(|obj| {
                Some(RemoteObject {
                    key: obj.key()?.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    last_modified: obj
                        .last_modified()
                        .and_then(|dt| SystemTime::try_from(*dt).ok()),
                })
            })
            .collect();

        let next_token = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(|t| t.to_string())
        } else {
            None
        };

        Ok(ListPage {
            objects,
            next_token,
        })
    }

    async fn head_object(&self, key: &str) -> Result<Option<RemoteObject>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => Ok(Some(RemoteObject {
                key: key.to_string(),
                size: response.content_length().unwrap_or(0).max(0) as u64,
                last_modified: response
                    .last_modified()
                    .and_then(|dt| SystemTime::try_from(*dt).ok()),
            })),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(None)
                } else {
                    Err(store_error(service_error))
                }
            }
        }
    }

    async fn upload_file(&self, path: &Path, key: &str) -> Result<()> {
        // Opening first surfaces local permission/missing-file errors as I/O errors.
        let file = tokio::fs::File::open(path).await?;
        let body = ByteStream::read_from()
            .file(file)
            .build()
            .await
            .map_err(store_error)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn download_file(&self, key: &str, path: &Path) -> Result<()> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(store_error)?;

        let partial = partial_path(path);
        let result = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            let mut stream = response.body.into_async_read();
            tokio::io::copy(&mut stream, &mut file).await?;
            file.flush().await?;
            tokio::fs::rename(&partial, path).await?;
            Ok::<(), SyncError>(())
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&partial).await;
        }
        result
    }
}

/// In-memory store with fault injection, for tests.
#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    struct StoredObject {
        data: Vec<u8>,
        last_modified: Option<SystemTime>,
    }

    /// Fault to inject for a key.
    #[derive(Debug, Clone)]
    pub(crate) enum Fault {
        Store(String),
        PermissionDenied,
    }

    #[derive(Default)]
    pub(crate) struct MemoryStore {
        objects: Mutex<BTreeMap<String, StoredObject>>,
        faults: Mutex<HashMap<String, Fault>>,
        head_faults: Mutex<HashMap<String, Fault>>,
        fail_listing: Mutex<Option<String>>,
        page_size: usize,
        pub(crate) list_calls: AtomicUsize,
        pub(crate) uploads: AtomicUsize,
        pub(crate) downloads: AtomicUsize,
        pub(crate) in_flight: AtomicUsize,
        pub(crate) max_in_flight: AtomicUsize,
        pub(crate) transfer_attempts: AtomicUsize,
        transfer_delay: Option<Duration>,
    }

    impl MemoryStore {
        pub(crate) fn new() -> Self {
            Self {
                page_size: 1000,
                ..Self::default()
            }
        }

        pub(crate) fn with_page_size(mut self, page_size: usize) -> Self {
            self.page_size = page_size.max(1);
            self
        }

        pub(crate) fn with_transfer_delay(mut self, delay: Duration) -> Self {
            self.transfer_delay = Some(delay);
            self
        }

        pub(crate) fn put(&self, key: &str, data: &[u8], last_modified: Option<SystemTime>) {
            self.objects.lock().unwrap().insert(
                key.to_string(),
                StoredObject {
                    data: data.to_vec(),
                    last_modified,
                },
            );
        }

        pub(crate) fn get(&self, key: &str) -> Option<Vec<u8>> {
            self.objects.lock().unwrap().get(key).map(|o| o.data.clone())
        }

        pub(crate) fn inject(&self, key: &str, fault: Fault) {
            self.faults.lock().unwrap().insert(key.to_string(), fault);
        }

        /// Makes metadata lookups for `key` fail; transfers are unaffected.
        pub(crate) fn inject_head(&self, key: &str, fault: Fault) {
            self.head_faults.lock().unwrap().insert(key.to_string(), fault);
        }

        pub(crate) fn fail_listing(&self, message: &str) {
            *self.fail_listing.lock().unwrap() = Some(message.to_string());
        }

        fn check_fault(&self, key: &str) -> Result<()> {
            Self::raise(self.faults.lock().unwrap().get(key), key)
        }

        fn raise(fault: Option<&Fault>, key: &str) -> Result<()> {
            match fault {
                Some(Fault::Store(message)) => Err(SyncError::Store(message.clone())),
                Some(Fault::PermissionDenied) => Err(SyncError::IoError(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    format!("permission denied: {}", key),
                ))),
                None => Ok(()),
            }
        }

        async fn enter_transfer(&self) {
            self.transfer_attempts.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.transfer_delay {
                tokio::time::sleep(delay).await;
            }
        }

        fn leave_transfer(&self) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn list_page(&self, prefix: &str, token: Option<String>) -> Result<ListPage> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = self.fail_listing.lock().unwrap().clone() {
                return Err(SyncError::Store(message));
            }
            let objects = self.objects.lock().unwrap();
            let mut page: Vec<RemoteObject> = objects
                .iter()
                .filter(|(key, _)| key.starts_with(prefix))
                .filter(|(key, _)| token.as_ref().map_or(true, |t| key.as_str() > t.as_str()))
                .take(self.page_size + 1)
                .map(|(key, obj)| RemoteObject {
                    key: key.clone(),
                    size: obj.data.len() as u64,
                    last_modified: obj.last_modified,
                })
                .collect();
            let next_token = if page.len() > self.page_size {
                page.truncate(self.page_size);
                page.last().map(|o| o.key.clone())
            } else {
                None
            };
            Ok(ListPage {
                objects: page,
                next_token,
            })
        }

        async fn head_object(&self, key: &str) -> Result<Option<RemoteObject>> {
            Self::raise(self.head_faults.lock().unwrap().get(key), key)?;
            Ok(self.objects.lock().unwrap().get(key).map(|obj| RemoteObject {
                key: key.to_string(),
                size: obj.data.len() as u64,
                last_modified: obj.last_modified,
            }))
        }

        async fn upload_file(&self, path: &Path, key: &str) -> Result<()> {
            self.enter_transfer().await;
            let result = async {
                self.check_fault(key)?;
                let data = tokio::fs::read(path).await?;
                self.put(key, &data, Some(SystemTime::now()));
                self.uploads.fetch_add(1, Ordering::SeqCst);
                Ok::<(), SyncError>(())
            }
            .await;
            self.leave_transfer();
            result
        }

        async fn download_file(&self, key: &str, path: &Path) -> Result<()> {
            self.enter_transfer().await;
            let result = async {
                self.check_fault(key)?;
                let data = self
                    .get(key)
                    .ok_or_else(|| SyncError::Store(format!("NoSuchKey: {}", key)))?;
                tokio::fs::write(path, data).await?;
                self.downloads.fetch_add(1, Ordering::SeqCst);
                Ok::<(), SyncError>(())
            }
            .await;
            self.leave_transfer();
            result
        }
    }
}
