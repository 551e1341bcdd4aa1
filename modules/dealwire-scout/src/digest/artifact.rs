use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::info;

use super::Digest;

/// Where a persisted digest ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLocation {
    pub json: String,
    pub markdown: String,
}

#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Persist the digest and its rendering. Writing the same run twice
    /// replaces the earlier files.
    async fn persist(&self, digest: &Digest, markdown: &str) -> Result<ArtifactLocation>;
}

/// Writes `digest_<run_id>.json` and `digest_<run_id>.md` into a directory.
pub struct FileArtifactSink {
    dir: PathBuf,
}

impl FileArtifactSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!("{name}.tmp"));
    let mut file = tokio::fs::File::create(&tmp)
        .await
        .with_context(|| format!("Failed to create {}", tmp.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    // Durable contents before the rename makes them visible.
    file.sync_all()
        .await
        .with_context(|| format!("Failed to sync {}", tmp.display()))?;
    drop(file);
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

#[async_trait]
impl ArtifactSink for FileArtifactSink {
    async fn persist(&self, digest: &Digest, markdown: &str) -> Result<ArtifactLocation> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let json_path = self.dir.join(format!("digest_{}.json", digest.run_id));
        let md_path = self.dir.join(format!("digest_{}.md", digest.run_id));

        let json = serde_json::to_vec_pretty(digest).context("Failed to serialize digest")?;
        write_atomic(&json_path, &json).await?;
        write_atomic(&md_path, markdown.as_bytes()).await?;

        info!(
            run_id = digest.run_id.as_str(),
            json = %json_path.display(),
            markdown = %md_path.display(),
            "Digest persisted"
        );
        Ok(ArtifactLocation {
            json: json_path.display().to_string(),
            markdown: md_path.display().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestCounts;
    use chrono::Utc;

    #[tokio::test]
    async fn writes_both_files_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileArtifactSink::new(dir.path().join("out"));
        let now = Utc::now();
        let mut digest = Digest {
            run_id: "run-9".into(),
            generated_at: now,
            period_start: now,
            period_end: now,
            sections: Vec::new(),
            is_empty: true,
            counts: DigestCounts::default(),
        };

        let location = sink.persist(&digest, "# first").await.unwrap();
        digest.counts.collected = 4;
        let again = sink.persist(&digest, "# second").await.unwrap();
        assert_eq!(location, again);

        let md = std::fs::read_to_string(&location.markdown).unwrap();
        assert_eq!(md, "# second");
        let json: Digest = serde_json::from_str(&std::fs::read_to_string(&location.json).unwrap()).unwrap();
        assert_eq!(json.counts.collected, 4);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("out"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn stale_temp_file_from_a_crashed_write_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("digest_run-3.md");
        std::fs::write(dir.path().join("digest_run-3.md.tmp"), "# half written, much longer than the new file").unwrap();

        write_atomic(&target, b"# complete").await.unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "# complete");
        assert!(!dir.path().join("digest_run-3.md.tmp").exists());
    }
}
