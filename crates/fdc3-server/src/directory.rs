//! In-memory app directory loaded from JSON sources.
//!
//! Sources are file paths named in settings, each holding a JSON array of
//! directory apps. Loading favors availability over completeness: a source
//! that cannot be read or parsed is logged and skipped, never fatal.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{info, warn};

use fdc3_broker::collaborators::{CollaboratorError, Directory};
use fdc3_core::directory::DirectoryApp;

/// Process-wide app directory shared by every session broker.
pub struct InMemoryDirectory {
    apps: RwLock<Vec<DirectoryApp>>,
}

impl InMemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self {
            apps: RwLock::new(Vec::new()),
        }
    }

    /// A directory pre-populated with `apps`.
    #[must_use]
    pub fn with_apps(apps: Vec<DirectoryApp>) -> Self {
        Self {
            apps: RwLock::new(apps),
        }
    }

    /// Replace the directory contents from a list of JSON file sources.
    /// Unreadable or malformed sources are skipped with a warning.
    pub fn load_sources(&self, sources: &[String]) {
        let mut loaded: Vec<DirectoryApp> = Vec::new();
        for source in sources {
            match std::fs::read_to_string(source) {
                Ok(raw) => match serde_json::from_str::<Vec<DirectoryApp>>(&raw) {
                    Ok(mut apps) => {
                        info!(source, apps = apps.len(), "directory source loaded");
                        loaded.append(&mut apps);
                    }
                    Err(e) => warn!(source, error = %e, "skipping malformed directory source"),
                },
                Err(e) => warn!(source, error = %e, "skipping unreadable directory source"),
            }
        }
        *self.apps.write() = loaded;
    }

    /// Append a single app record (tooling and tests).
    pub fn add(&self, app: DirectoryApp) {
        self.apps.write().push(app);
    }

    /// Number of listed apps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.apps.read().len()
    }

    /// Whether the directory lists no apps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.apps.read().is_empty()
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn apps_by_id(&self, app_id: &str) -> Result<Vec<DirectoryApp>, CollaboratorError> {
        Ok(self
            .apps
            .read()
            .iter()
            .filter(|a| a.app_id == app_id)
            .cloned()
            .collect())
    }

    async fn apps_by_intent<'a>(
        &self,
        intent: &'a str,
        context_type: Option<&'a str>,
    ) -> Result<Vec<DirectoryApp>, CollaboratorError> {
        Ok(self
            .apps
            .read()
            .iter()
            .filter(|a| a.advertises(intent, context_type))
            .cloned()
            .collect())
    }

    async fn apps_by_context(
        &self,
        context_type: &str,
    ) -> Result<Vec<DirectoryApp>, CollaboratorError> {
        Ok(self
            .apps
            .read()
            .iter()
            .filter(|a| {
                a.intents.iter().any(|i| {
                    i.contexts.is_empty() || i.contexts.iter().any(|c| c == context_type)
                })
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_source(dir: &tempfile::TempDir, name: &str, body: &serde_json::Value) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, serde_json::to_string(body).unwrap()).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn loads_and_queries_sources() {
        let tmp = tempfile::tempdir().unwrap();
        let source = write_source(
            &tmp,
            "apps.json",
            &json!([{
                "appId": "charting",
                "title": "Charting",
                "intents": [{"name": "ViewChart", "contexts": ["fdc3.instrument"]}]
            }]),
        );
        let directory = InMemoryDirectory::new();
        directory.load_sources(&[source]);
        assert_eq!(directory.len(), 1);

        let by_id = directory.apps_by_id("charting").await.unwrap();
        assert_eq!(by_id.len(), 1);
        let by_intent = directory
            .apps_by_intent("ViewChart", Some("fdc3.instrument"))
            .await
            .unwrap();
        assert_eq!(by_intent.len(), 1);
        let by_context = directory.apps_by_context("fdc3.instrument").await.unwrap();
        assert_eq!(by_context.len(), 1);
        assert!(directory.apps_by_id("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_sources_are_skipped_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let good = write_source(&tmp, "good.json", &json!([{"appId": "a", "title": "A"}]));
        let bad = write_source(&tmp, "bad.json", &json!({"not": "an array"}));
        let missing = tmp.path().join("missing.json").to_string_lossy().into_owned();

        let directory = InMemoryDirectory::new();
        directory.load_sources(&[bad, missing, good]);
        assert_eq!(directory.len(), 1);
    }

    #[tokio::test]
    async fn reload_replaces_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let first = write_source(&tmp, "first.json", &json!([{"appId": "a", "title": "A"}]));
        let second = write_source(&tmp, "second.json", &json!([{"appId": "b", "title": "B"}]));

        let directory = InMemoryDirectory::new();
        directory.load_sources(&[first]);
        directory.load_sources(&[second]);
        assert!(directory.apps_by_id("a").await.unwrap().is_empty());
        assert_eq!(directory.apps_by_id("b").await.unwrap().len(), 1);
    }
}
