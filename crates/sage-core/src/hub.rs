//! Model file resolution: a local directory or the Hugging Face hub cache.

use crate::error::{Result, SageError};
use hf_hub::api::tokio::Api;
use hf_hub::{Repo, RepoType};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Resolve `files` for a model, in the order given.
///
/// With `local_dir` set every file must exist below it. Otherwise the files
/// are fetched into (or found in) the hub cache.
pub async fn resolve_model_files(
    model_id: &str,
    revision: &str,
    local_dir: Option<&Path>,
    files: &[&str],
) -> Result<Vec<PathBuf>> {
    if let Some(dir) = local_dir {
        return files
            .iter()
            .map(|file| {
                let path = dir.join(file);
                if path.exists() {
                    Ok(path)
                } else {
                    Err(SageError::ModelNotLoaded(format!(
                        "{} not found in {}",
                        file,
                        dir.display()
                    )))
                }
            })
            .collect();
    }

    info!("Resolving {} (revision {}) from the Hugging Face hub", model_id, revision);

    let api = Api::new()
        .map_err(|e| SageError::ModelNotLoaded(format!("Hub client unavailable: {}", e)))?;
    let repo = api.repo(Repo::with_revision(
        model_id.to_string(),
        RepoType::Model,
        revision.to_string(),
    ));

    let mut paths = Vec::with_capacity(files.len());
    for file in files {
        let path = repo.get(file).await.map_err(|e| {
            SageError::ModelNotLoaded(format!("Failed to fetch {}/{}: {}", model_id, file, e))
        })?;
        debug!("Resolved {} -> {}", file, path.display());
        paths.push(path);
    }

    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_local_dir_resolution() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("tokenizer.json"), "{}").unwrap();

        let paths = resolve_model_files("unused", "main", Some(dir.path()), &["tokenizer.json"])
            .await
            .unwrap();
        assert_eq!(paths, vec![dir.path().join("tokenizer.json")]);

        let missing =
            resolve_model_files("unused", "main", Some(dir.path()), &["model.safetensors"]).await;
        assert!(matches!(missing, Err(SageError::ModelNotLoaded(_))));
    }
}
