//! Repository discovery from a directory layout.
//!
//! Working copies are expected at `<root>/.../<owner>/<name>`, each holding a
//! version-control marker directory (`.git` by default). The owner/name pair
//! is taken from the two path components directly above the marker.

use crate::repository::{MonitoredRepository, ParseError, RepoKey};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Depth of `<owner>/<name>` below the monitoring root.
const KEY_DEPTH: usize = 2;

/// Errors that can occur during repository discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// A checkout sits where an owner/name pair cannot be derived.
    #[error("Skipping checkout at '{path}': {source}")]
    MalformedLayout {
        path: String,
        #[source]
        source: ParseError,
    },

    /// A second checkout maps to a key that was already discovered.
    #[error("Skipping checkout at '{path}': {key} is already checked out at '{existing}'")]
    DuplicateKey {
        key: RepoKey,
        path: String,
        existing: String,
    },

    /// The monitoring root could not be walked.
    #[error("Failed to walk monitoring root '{path}': {source}")]
    RootUnreadable {
        path: String,
        #[source]
        source: walkdir::Error,
    },

    /// The discovery task panicked or was cancelled.
    #[error("Discovery task did not complete: {source}")]
    WalkAborted {
        #[source]
        source: tokio::task::JoinError,
    },
}

/// A directory visited by a [`DirectoryWalker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedDirectory {
    /// Absolute (or root-prefixed) path of the directory.
    pub path: PathBuf,

    /// Whether the directory contains the version-control marker.
    pub has_marker: bool,
}

/// Enumerates the directory tree under a monitoring root.
pub trait DirectoryWalker: Send + Sync {
    /// Walks `root` recursively, reporting every directory and whether it
    /// contains `marker`. Checkouts at `<owner>/<name>` depth or deeper are not
    /// descended into; marker directories themselves are never reported.
    ///
    /// Only a failure to read `root` itself is an error; unreadable
    /// subdirectories are skipped.
    fn walk(&self, root: &Path, marker: &str) -> Result<Vec<WalkedDirectory>, DiscoveryError>;
}

/// [`DirectoryWalker`] backed by `walkdir`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkdirWalker;

impl DirectoryWalker for WalkdirWalker {
    fn walk(&self, root: &Path, marker: &str) -> Result<Vec<WalkedDirectory>, DiscoveryError> {
        let mut directories = Vec::new();
        let mut entries = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = entries.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(DiscoveryError::RootUnreadable {
                        path: root.display().to_string(),
                        source: e,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory");
                    continue;
                }
            };

            if !entry.file_type().is_dir() {
                continue;
            }

            if entry.depth() > 0 && entry.file_name() == marker {
                entries.skip_current_dir();
                continue;
            }

            let has_marker = entry.path().join(marker).is_dir();
            directories.push(WalkedDirectory {
                path: entry.path().to_path_buf(),
                has_marker,
            });

            // Above `<owner>/<name>` a marker cannot name a checkout, so keep
            // looking for the ones below it.
            if has_marker && entry.depth() >= KEY_DEPTH {
                entries.skip_current_dir();
            }
        }

        Ok(directories)
    }
}

/// Result of one discovery pass.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Repositories found, in walk order, unique by key.
    pub repositories: Vec<MonitoredRepository>,

    /// Checkouts that were skipped.
    pub errors: Vec<DiscoveryError>,
}

/// Discovers checked-out repositories under `root`.
///
/// Malformed or duplicate checkouts are logged and collected in
/// [`Discovery::errors`] without aborting the pass.
///
/// # Errors
///
/// Returns [`DiscoveryError::RootUnreadable`] if the root itself cannot be walked.
pub fn discover<W: DirectoryWalker + ?Sized>(
    walker: &W,
    root: &Path,
    marker: &str,
) -> Result<Discovery, DiscoveryError> {
    debug!(root = %root.display(), marker, "Walking monitoring root");

    let mut discovery = Discovery::default();
    let mut seen: HashMap<RepoKey, PathBuf> = HashMap::new();

    for directory in walker.walk(root, marker)? {
        if !directory.has_marker {
            continue;
        }

        let relative = directory
            .path
            .strip_prefix(root)
            .unwrap_or(&directory.path);

        let key = match RepoKey::from_relative_path(relative) {
            Ok(key) => key,
            Err(source) => {
                let error = DiscoveryError::MalformedLayout {
                    path: directory.path.display().to_string(),
                    source,
                };
                warn!(error = %error, "Discovery error");
                discovery.errors.push(error);
                continue;
            }
        };

        if let Some(existing) = seen.get(&key) {
            let error = DiscoveryError::DuplicateKey {
                key,
                path: directory.path.display().to_string(),
                existing: existing.display().to_string(),
            };
            warn!(error = %error, "Discovery error");
            discovery.errors.push(error);
            continue;
        }

        debug!(repo = %key, path = %directory.path.display(), "Found checkout");
        seen.insert(key.clone(), directory.path.clone());
        discovery
            .repositories
            .push(MonitoredRepository::new(key, directory.path));
    }

    info!(
        count = discovery.repositories.len(),
        skipped = discovery.errors.len(),
        "Discovery complete"
    );
    Ok(discovery)
}
