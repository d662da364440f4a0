//! §4.5 Directory walker: recursive, bidirectional traversal applying the
//! reconciler to every file under a local root mapped to a remote prefix.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::client::ApiClient;
use crate::crypto::CryptoKey;
use crate::localcache::LocalCache;
use crate::reconciler::{self, ReconcileStatus};

#[derive(Debug, Default)]
pub struct WalkSummary {
    pub files_processed: usize,
    pub chunks_transferred: usize,
}

fn to_remote_name(remote_prefix: &str, rel: &Path) -> String {
    let rel = rel.to_string_lossy().replace('\\', "/");
    let prefix = remote_prefix.trim_end_matches('/');
    if rel.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}/{rel}")
    }
}

/// Depth-first walk of `local_root`, reconciling every entry against
/// `remote_prefix/<relative path>`, then a second pass picking up
/// remote-only entries under the prefix. The first per-file failure aborts
/// the walk, except `Unsupported` entries, which the walk continues past.
/// `cache`, when given, is consulted for the first pass's remote lookups.
#[allow(clippy::too_many_arguments)]
pub async fn walk(
    client: &ApiClient,
    key: &CryptoKey,
    local_root: &Path,
    remote_prefix: &str,
    chunk_size: usize,
    extra_strict: bool,
    cache: Option<&LocalCache>,
) -> anyhow::Result<WalkSummary> {
    let mut summary = WalkSummary::default();
    let mut processed: HashSet<String> = HashSet::new();

    if local_root.exists() {
        for entry in WalkDir::new(local_root).sort_by_file_name() {
            let entry = entry?;
            let rel = entry.path().strip_prefix(local_root).unwrap_or(entry.path());
            let remote_name = to_remote_name(remote_prefix, rel);
            processed.insert(remote_name.clone());

            let result = reconciler::reconcile(
                client,
                key,
                entry.path(),
                &remote_name,
                None,
                chunk_size,
                extra_strict,
                cache,
            )
            .await?;

            if result.status != ReconcileStatus::UnsupportedType {
                summary.files_processed += 1;
                summary.chunks_transferred += result.chunks_transferred;
            }
        }
    }

    let remote_files = client.list_files().await?;
    let prefix = remote_prefix.trim_end_matches('/');
    for remote in remote_files {
        let Ok(plaintext_name) = key.decrypt_name(&remote.name) else {
            continue;
        };
        let Some(suffix) = plaintext_name.strip_prefix(prefix) else {
            continue;
        };
        if !(suffix.is_empty() || suffix.starts_with('/')) {
            // `prefix` matched as a string but not as a path component
            // boundary, e.g. prefix "/backup" against "/backup2/foo".
            continue;
        }
        if processed.contains(&plaintext_name) {
            continue;
        }

        let suffix = suffix.trim_start_matches('/');
        let local_path: PathBuf = if suffix.is_empty() {
            local_root.to_path_buf()
        } else {
            local_root.join(suffix)
        };
        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let result = reconciler::reconcile(
            client,
            key,
            &local_path,
            &plaintext_name,
            None,
            chunk_size,
            extra_strict,
            cache,
        )
        .await?;

        if result.status != ReconcileStatus::UnsupportedType {
            summary.files_processed += 1;
            summary.chunks_transferred += result.chunks_transferred;
        }
        processed.insert(plaintext_name);
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_name_joins_prefix_and_relative_path() {
        assert_eq!(to_remote_name("/backup", Path::new("a/b.txt")), "/backup/a/b.txt");
        assert_eq!(to_remote_name("/backup/", Path::new("")), "/backup");
    }

    #[test]
    fn prefix_boundary_does_not_match_sibling_directory() {
        let prefix = "/backup";
        let sibling = "/backup2/foo";
        let suffix = sibling.strip_prefix(prefix);
        assert_eq!(suffix, Some("2/foo"));
        assert!(!suffix.unwrap().is_empty() && !suffix.unwrap().starts_with('/'));
    }
}
