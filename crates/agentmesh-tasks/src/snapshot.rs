use agentmesh_core::{MeshError, MeshResult, TaskRecord};
use chrono::Utc;
use std::path::Path;

/// Serialize `records` to `path` atomically.
///
/// Writes to `<path>.tmp` then renames over the target, so a crash mid-write
/// never leaves a truncated snapshot behind.
pub async fn write_snapshot(path: &Path, records: &[TaskRecord]) -> MeshResult<()> {
    let json = serde_json::to_vec_pretty(records)?;

    let tmp = path.with_extension("tmp");
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, path).await.map_err(|e| {
        MeshError::Store(format!(
            "failed to move snapshot into place at {}: {e}",
            path.display()
        ))
    })?;

    tracing::debug!(path = %path.display(), tasks = records.len(), "snapshot written");
    Ok(())
}

/// Load a snapshot, dropping entries that expired while the process was down.
///
/// A missing file is an empty store, not an error.
pub async fn load_snapshot(path: &Path) -> MeshResult<Vec<TaskRecord>> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let records: Vec<TaskRecord> = serde_json::from_slice(&data)
        .map_err(|e| MeshError::Store(format!("corrupt snapshot at {}: {e}", path.display())))?;

    let now = Utc::now();
    let total = records.len();
    let live: Vec<TaskRecord> = records.into_iter().filter(|r| !r.is_expired(now)).collect();
    if live.len() < total {
        tracing::info!(
            dropped = total - live.len(),
            kept = live.len(),
            "dropped expired tasks while loading snapshot"
        );
    }
    Ok(live)
}
