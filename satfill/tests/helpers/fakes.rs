//! In-memory test doubles for the engine's seams

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use satfill::db::ExistenceCache;
use satfill::error::FetchError;
use satfill::stores::atomic::write_stream_atomic;
use satfill::stores::{RemoteStore, RenderError, Renderer, StoreKind};
use satfill::utils::SpaceProbe;
use satfill::SlotKey;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Scriptable [`RemoteStore`]
///
/// Has data for every slot unless told otherwise. Counts calls so tests can
/// assert how often the network would have been hit.
pub struct FakeStore {
    kind: StoreKind,
    absent: Mutex<HashSet<SlotKey>>,
    permanent: Mutex<HashMap<SlotKey, FetchError>>,
    /// Fetch calls that fail with a retryable error before succeeding
    transient_failures: AtomicU32,
    fetch_delay: Duration,
    /// Fetches write a first chunk, then never finish
    stalls: bool,
    panic_on: Mutex<Option<SlotKey>>,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
    close_cache_after: Mutex<Option<(usize, ExistenceCache)>>,
    pub exists_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub fetched: Mutex<Vec<SlotKey>>,
}

impl FakeStore {
    pub fn new(kind: StoreKind) -> Self {
        Self {
            kind,
            absent: Mutex::new(HashSet::new()),
            permanent: Mutex::new(HashMap::new()),
            transient_failures: AtomicU32::new(0),
            fetch_delay: Duration::ZERO,
            stalls: false,
            panic_on: Mutex::new(None),
            cancel_after: Mutex::new(None),
            close_cache_after: Mutex::new(None),
            exists_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn recent() -> Self {
        Self::new(StoreKind::Recent)
    }

    pub fn archive() -> Self {
        Self::new(StoreKind::Archive)
    }

    /// Remote has no data for `key`
    pub fn without(self, key: SlotKey) -> Self {
        self.absent.lock().unwrap().insert(key);
        self
    }

    /// Every fetch of `key` fails with `error`
    pub fn failing(self, key: SlotKey, error: FetchError) -> Self {
        self.permanent.lock().unwrap().insert(key, error);
        self
    }

    /// First `n` fetches fail with a network error
    pub fn flaky(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    /// Every fetch hangs partway through writing `dest`
    pub fn stalling(mut self) -> Self {
        self.stalls = true;
        self
    }

    /// The fetch task for `key` panics
    pub fn panicking(self, key: SlotKey) -> Self {
        *self.panic_on.lock().unwrap() = Some(key);
        self
    }

    /// Cancel `token` as the `n`th successful fetch completes
    pub fn cancel_after(self, n: usize, token: CancellationToken) -> Self {
        *self.cancel_after.lock().unwrap() = Some((n, token));
        self
    }

    /// Close `cache` underneath the run as the `n`th successful fetch completes
    pub fn close_cache_after(&self, n: usize, cache: ExistenceCache) {
        *self.close_cache_after.lock().unwrap() = Some((n, cache));
    }

    pub fn exists_count(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn fetched_keys(&self) -> Vec<SlotKey> {
        let mut keys = self.fetched.lock().unwrap().clone();
        keys.sort();
        keys
    }
}

#[async_trait]
impl RemoteStore for FakeStore {
    fn kind(&self) -> StoreKind {
        self.kind
    }

    async fn exists(&self, key: &SlotKey) -> Result<bool, FetchError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        Ok(!self.absent.lock().unwrap().contains(key))
    }

    async fn fetch(&self, key: &SlotKey, dest: &Path) -> Result<PathBuf, FetchError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }

        let panics = *self.panic_on.lock().unwrap() == Some(*key);
        if panics {
            panic!("fake store blew up fetching {}", key);
        }
        if let Some(err) = self.permanent.lock().unwrap().get(key) {
            return Err(err.clone());
        }
        if self.stalls {
            let chunks = stream::iter(vec![Ok::<_, FetchError>(b"\xFF\xD8partial".to_vec())])
                .chain(stream::pending());
            write_stream_atomic(dest, chunks).await?;
            return Ok(dest.to_path_buf());
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(FetchError::NetworkError("connection reset by peer".into()));
        }

        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(dest, format!("frame {}", key)).unwrap();

        let done = {
            let mut fetched = self.fetched.lock().unwrap();
            fetched.push(*key);
            fetched.len()
        };
        if let Some((n, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if done == *n {
                token.cancel();
            }
        }
        let to_close = self
            .close_cache_after
            .lock()
            .unwrap()
            .as_ref()
            .filter(|(n, _)| done == *n)
            .map(|(_, cache)| cache.clone());
        if let Some(cache) = to_close {
            cache.close().await;
        }
        Ok(dest.to_path_buf())
    }
}

/// Reports a fixed amount of free space
pub struct FixedSpace(pub u64);

impl SpaceProbe for FixedSpace {
    fn available_space(&self, _path: &Path) -> std::io::Result<u64> {
        Ok(self.0)
    }
}

/// Reports `scratch_bytes` for `scratch_dir` and `other_bytes` everywhere else
pub struct SplitSpace {
    pub scratch_dir: PathBuf,
    pub scratch_bytes: u64,
    pub other_bytes: u64,
}

impl SpaceProbe for SplitSpace {
    fn available_space(&self, path: &Path) -> std::io::Result<u64> {
        if path.starts_with(&self.scratch_dir) {
            Ok(self.scratch_bytes)
        } else {
            Ok(self.other_bytes)
        }
    }
}

/// Renderer that writes `<payload>.jpg`, then reports failure
#[derive(Default)]
pub struct BrokenRenderer {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Renderer for BrokenRenderer {
    async fn render(&self, raw: &Path) -> Result<PathBuf, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(raw.with_extension("jpg"), b"half a frame")
            .await
            .map_err(|source| RenderError::Spawn {
                program: "broken".into(),
                source,
            })?;
        Err(RenderError::Failed {
            code: Some(3),
            stderr: "segmentation fault".into(),
        })
    }
}

/// Renderer that copies the payload to `<payload>.jpg`
#[derive(Default)]
pub struct CopyRenderer {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Renderer for CopyRenderer {
    async fn render(&self, raw: &Path) -> Result<PathBuf, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let output = raw.with_extension("jpg");
        tokio::fs::copy(raw, &output)
            .await
            .map_err(|source| RenderError::Spawn {
                program: "copy".into(),
                source,
            })?;
        Ok(output)
    }
}
