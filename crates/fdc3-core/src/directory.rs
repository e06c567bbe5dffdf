//! App-directory metadata types.
//!
//! The directory itself (file/URL loading, schema normalization, merging) is
//! an external collaborator; these are the shapes the broker reads from it
//! and hands to the resolver UI.

use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, InstanceId};

/// A launchable application as listed in the directory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryApp {
    /// Stable application id.
    pub app_id: String,
    /// Human-readable title.
    pub title: String,
    /// Launch URL or manifest reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Icon URL for resolver display.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Intents this app's manifest advertises.
    #[serde(default)]
    pub intents: Vec<AppIntent>,
}

impl DirectoryApp {
    /// Whether the manifest advertises `intent` for `context_type`.
    ///
    /// An intent entry with no declared context types accepts any context.
    #[must_use]
    pub fn advertises(&self, intent: &str, context_type: Option<&str>) -> bool {
        self.intents.iter().any(|i| {
            i.name == intent
                && (i.contexts.is_empty()
                    || context_type.is_none_or(|t| i.contexts.iter().any(|c| c == t)))
        })
    }
}

/// An intent advertised by a directory app.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppIntent {
    /// Intent name (e.g. `ViewChart`).
    pub name: String,
    /// Display name shown by the resolver.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Context types this intent accepts; empty means any.
    #[serde(default)]
    pub contexts: Vec<String>,
}

/// Display metadata for a channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayMetadata {
    /// Channel display name.
    pub name: String,
    /// Display color (hex).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Descriptive metadata attached to an app instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppMetadata {
    /// Human-readable title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Icon URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// A candidate offered to the resolver UI, augmented with live state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverCandidate {
    /// Application id.
    pub app_id: String,
    /// Title for display.
    pub title: String,
    /// Icon URL for display.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Running instance, if this candidate is already live.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,
    /// Channel the running instance currently occupies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
}

/// Intent → apps mapping returned by `findIntent`/`findIntentsByContext`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentAppList {
    /// Intent name.
    pub intent: String,
    /// Apps able to handle it, de-duplicated by app id.
    pub apps: Vec<ResolverCandidate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn charting() -> DirectoryApp {
        DirectoryApp {
            app_id: "charting".into(),
            title: "Charting".into(),
            url: Some("https://apps.example/charting".into()),
            icon: None,
            intents: vec![AppIntent {
                name: "ViewChart".into(),
                display_name: None,
                contexts: vec!["fdc3.instrument".into()],
            }],
        }
    }

    #[test]
    fn advertises_matching_intent_and_context() {
        let app = charting();
        assert!(app.advertises("ViewChart", Some("fdc3.instrument")));
        assert!(!app.advertises("ViewChart", Some("fdc3.contact")));
        assert!(!app.advertises("ViewNews", Some("fdc3.instrument")));
    }

    #[test]
    fn empty_context_list_accepts_any() {
        let mut app = charting();
        app.intents[0].contexts.clear();
        assert!(app.advertises("ViewChart", Some("fdc3.contact")));
        assert!(app.advertises("ViewChart", None));
    }

    #[test]
    fn unset_context_filter_matches_declared_contexts() {
        let app = charting();
        assert!(app.advertises("ViewChart", None));
    }
}
