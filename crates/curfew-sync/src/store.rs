//! # Auth Store
//!
//! Single source of truth for the session bundle.
//!
//! ## Writers & Readers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  SessionManager ──refresh──┐                                            │
//! │                            ▼                                            │
//! │  Manual upload ────────► auth.json ◄──── load() every gateway call      │
//! │  (out of band)             ▲                                            │
//! │                            └──── version() at the top of every tick     │
//! │                                                                         │
//! │  Writes: serialize ─► auth.json.tmp ─► rename()  (atomic replace)       │
//! │  Reads:  Arc<AuthArtifactBundle> snapshot, never mutated in place       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A version is a content fingerprint plus the file modification time, so an
//! external writer is detected even when its clock or the filesystem's mtime
//! granularity is coarse.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use curfew_core::AuthArtifactBundle;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Types
// =============================================================================

/// Identifies one stored bundle. Changes whenever the stored bytes change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleVersion {
    /// Generation counter (memory store) or content fingerprint (file store).
    pub stamp: u64,
    pub modified: Option<SystemTime>,
}

impl BundleVersion {
    /// Version of a store that has never been written.
    pub const fn missing() -> Self {
        Self {
            stamp: 0,
            modified: None,
        }
    }
}

/// A bundle snapshot and the version it was read at.
#[derive(Debug, Clone)]
pub struct StoredBundle {
    pub bundle: Arc<AuthArtifactBundle>,
    pub version: BundleVersion,
}

#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Current bundle. A missing or unreadable document yields an empty
    /// bundle, which is never usable.
    async fn load(&self) -> SyncResult<StoredBundle>;

    /// Replaces the bundle wholesale.
    async fn replace(&self, bundle: AuthArtifactBundle) -> SyncResult<BundleVersion>;

    /// Cheap change detection.
    async fn version(&self) -> SyncResult<BundleVersion>;
}

// =============================================================================
// File Store
// =============================================================================

/// Storage-state JSON file on disk.
pub struct FileAuthStore {
    path: PathBuf,
    cache: RwLock<Option<StoredBundle>>,
}

impl FileAuthStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "auth.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn fingerprint(bytes: &[u8]) -> u64 {
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        // Zero is reserved for "missing".
        hasher.finish().max(1)
    }

    async fn read_raw(&self) -> SyncResult<Option<(Vec<u8>, BundleVersion)>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let modified = tokio::fs::metadata(&self.path)
                    .await
                    .ok()
                    .and_then(|m| m.modified().ok());
                let version = BundleVersion {
                    stamp: Self::fingerprint(&bytes),
                    modified,
                };
                Ok(Some((bytes, version)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::StoreFailed(format!(
                "reading {}: {e}",
                self.path.display()
            ))),
        }
    }
}

#[async_trait]
impl AuthStore for FileAuthStore {
    async fn load(&self) -> SyncResult<StoredBundle> {
        let Some((bytes, version)) = self.read_raw().await? else {
            debug!(path = ?self.path, "Auth bundle file not found");
            return Ok(StoredBundle {
                bundle: Arc::new(AuthArtifactBundle::default()),
                version: BundleVersion::missing(),
            });
        };

        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.version.stamp == version.stamp {
                return Ok(StoredBundle {
                    bundle: cached.bundle.clone(),
                    version,
                });
            }
        }

        let bundle = match std::str::from_utf8(&bytes)
            .map_err(|e| e.to_string())
            .and_then(|text| AuthArtifactBundle::from_json(text).map_err(|e| e.to_string()))
        {
            Ok(bundle) => bundle,
            Err(reason) => {
                warn!(path = ?self.path, %reason, "Auth bundle unreadable, treating as empty");
                AuthArtifactBundle::default()
            }
        };

        let stored = StoredBundle {
            bundle: Arc::new(bundle),
            version,
        };
        *self.cache.write().await = Some(stored.clone());
        Ok(stored)
    }

    async fn replace(&self, bundle: AuthArtifactBundle) -> SyncResult<BundleVersion> {
        let json = bundle.to_json_pretty()?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, json.as_bytes()).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        let modified = tokio::fs::metadata(&self.path)
            .await
            .ok()
            .and_then(|m| m.modified().ok());
        let version = BundleVersion {
            stamp: Self::fingerprint(json.as_bytes()),
            modified,
        };

        *self.cache.write().await = Some(StoredBundle {
            bundle: Arc::new(bundle),
            version,
        });
        info!(path = ?self.path, "Auth bundle replaced");
        Ok(version)
    }

    async fn version(&self) -> SyncResult<BundleVersion> {
        Ok(self
            .read_raw()
            .await?
            .map(|(_, version)| version)
            .unwrap_or(BundleVersion::missing()))
    }
}

// =============================================================================
// Memory Store
// =============================================================================

/// In-process store, used by embedders that persist elsewhere and by tests.
pub struct MemoryAuthStore {
    current: RwLock<StoredBundle>,
}

impl MemoryAuthStore {
    pub fn new(bundle: AuthArtifactBundle) -> Self {
        Self {
            current: RwLock::new(StoredBundle {
                bundle: Arc::new(bundle),
                version: BundleVersion {
                    stamp: 1,
                    modified: None,
                },
            }),
        }
    }

    pub fn empty() -> Self {
        Self {
            current: RwLock::new(StoredBundle {
                bundle: Arc::new(AuthArtifactBundle::default()),
                version: BundleVersion::missing(),
            }),
        }
    }
}

#[async_trait]
impl AuthStore for MemoryAuthStore {
    async fn load(&self) -> SyncResult<StoredBundle> {
        Ok(self.current.read().await.clone())
    }

    async fn replace(&self, bundle: AuthArtifactBundle) -> SyncResult<BundleVersion> {
        let mut guard = self.current.write().await;
        let version = BundleVersion {
            stamp: guard.version.stamp + 1,
            modified: Some(SystemTime::now()),
        };
        *guard = StoredBundle {
            bundle: Arc::new(bundle),
            version,
        };
        Ok(version)
    }

    async fn version(&self) -> SyncResult<BundleVersion> {
        Ok(self.current.read().await.version)
    }
}
