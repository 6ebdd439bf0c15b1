//! Per-request session workspaces.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One inbound request's isolated output directory.
#[derive(Debug, Clone)]
pub struct Session {
    pub request_id: Uuid,
    pub workspace_dir: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Allocate a fresh session under `output_root`, creating its directory.
    pub async fn create(output_root: &Path) -> std::io::Result<Self> {
        Self::create_with_id(output_root, Uuid::new_v4()).await
    }

    /// Create the session directory for a known request id.
    ///
    /// The directory is `<output_root>/<request_id>` as an absolute path.
    pub async fn create_with_id(output_root: &Path, request_id: Uuid) -> std::io::Result<Self> {
        let dir = workspace_path(output_root, request_id);
        tokio::fs::create_dir_all(&dir).await?;
        let workspace_dir = tokio::fs::canonicalize(&dir).await?;

        tracing::debug!(
            request_id = %request_id,
            workspace = %workspace_dir.display(),
            "Created session workspace"
        );

        Ok(Self {
            request_id,
            workspace_dir,
            created_at: Utc::now(),
        })
    }
}

/// Deterministic workspace location for a request id.
pub fn workspace_path(output_root: &Path, request_id: Uuid) -> PathBuf {
    output_root.join(request_id.to_string())
}
