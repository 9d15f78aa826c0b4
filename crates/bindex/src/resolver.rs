//
// resolver.rs
//
// File discovery and content access
//
// The bundle index talks to files only through the FileResolver trait:
// enumerate candidate manifest uris, then read one uri's text. The
// workspace resolver walks a directory tree on disk; the static resolver
// serves in-memory documents for tests.
//

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use url::Url;

#[async_trait]
pub trait FileResolver: Send + Sync {
    /// All uris matching the glob, sorted. `None` means the resolver's
    /// default manifest pattern.
    async fn get_all_uris(&self, files_glob: Option<&str>) -> anyhow::Result<Vec<String>>;

    /// Full text of one uri.
    async fn resolve(&self, uri: &str) -> anyhow::Result<String>;
}

/// Resolver over a workspace directory on disk. Uris are `file://` urls.
pub struct WorkspaceResolver {
    root: PathBuf,
    exclusion_globs: Vec<String>,
}

impl WorkspaceResolver {
    pub fn new(root: impl Into<PathBuf>, exclusion_globs: Vec<String>) -> Self {
        Self {
            root: root.into(),
            exclusion_globs,
        }
    }

    /// The `**/name` globs we support reduce to a filename match; the
    /// directory part is handled by walking recursively.
    fn glob_file_name(files_glob: Option<&str>) -> String {
        let glob = files_glob.unwrap_or("**/manifest.json");
        glob.rsplit('/').next().unwrap_or(glob).to_string()
    }

}

// Exclusions match on literal path components, which covers the usual
// ignore lists (node_modules, target, .git).
fn is_excluded(path: &Path, exclusions: &[String]) -> bool {
    path.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        exclusions.iter().any(|glob| glob == name.as_ref())
    })
}

#[async_trait]
impl FileResolver for WorkspaceResolver {
    async fn get_all_uris(&self, files_glob: Option<&str>) -> anyhow::Result<Vec<String>> {
        let root = self.root.clone();
        let file_name = Self::glob_file_name(files_glob);
        let exclusions = self.exclusion_globs.clone();

        let uris = tokio::task::spawn_blocking(move || {
            let mut uris = Vec::new();
            for entry in walkdir::WalkDir::new(&root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| !is_excluded(e.path(), &exclusions))
            {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        log::warn!("skipping unreadable directory entry: {err}");
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                if entry.file_name().to_string_lossy() != file_name {
                    continue;
                }
                if let Ok(url) = Url::from_file_path(entry.path()) {
                    uris.push(url.to_string());
                }
            }
            uris.sort();
            uris
        })
        .await
        .context("workspace scan task failed")?;

        Ok(uris)
    }

    async fn resolve(&self, uri: &str) -> anyhow::Result<String> {
        let url = Url::parse(uri).with_context(|| format!("invalid uri: {uri}"))?;
        let path = url
            .to_file_path()
            .map_err(|_| anyhow!("not a file uri: {uri}"))?;
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))
    }
}

/// In-memory resolver for tests. Documents can be replaced or marked
/// failing after construction to simulate edits and unreadable files.
#[derive(Default)]
pub struct StaticResolver {
    docs: Mutex<BTreeMap<String, Option<String>>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, uri: &str, text: &str) {
        if let Ok(mut docs) = self.docs.lock() {
            docs.insert(uri.to_string(), Some(text.to_string()));
        }
    }

    /// Register a uri that is listed by get_all_uris but fails to read.
    pub fn insert_failing(&self, uri: &str) {
        if let Ok(mut docs) = self.docs.lock() {
            docs.insert(uri.to_string(), None);
        }
    }

    /// Replace the text behind a uri, as an external edit would.
    pub fn set(&self, uri: &str, text: &str) {
        self.insert(uri, text);
    }
}

#[async_trait]
impl FileResolver for StaticResolver {
    async fn get_all_uris(&self, _files_glob: Option<&str>) -> anyhow::Result<Vec<String>> {
        let docs = self
            .docs
            .lock()
            .map_err(|_| anyhow!("resolver state poisoned"))?;
        Ok(docs.keys().cloned().collect())
    }

    async fn resolve(&self, uri: &str) -> anyhow::Result<String> {
        let docs = self
            .docs
            .lock()
            .map_err(|_| anyhow!("resolver state poisoned"))?;
        match docs.get(uri) {
            Some(Some(text)) => Ok(text.clone()),
            Some(None) => Err(anyhow!("failed to read {uri}")),
            None => Err(anyhow!("unknown uri: {uri}")),
        }
    }
}
