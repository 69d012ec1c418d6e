//! Trigger events
//!
//! Runs start from one of two external events: a push to the source
//! repository or a push notification from the container registry.

use serde::{Deserialize, Serialize};

use crate::domain::image::ImageReference;

/// Push to the source repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePushEvent {
    pub branch: String,
    pub commit_ref: String,
}

/// Push notification emitted by the container registry
///
/// Every field is optional on the wire: a notification that lacks a
/// resolvable `imageUri` must still reach the release pipeline so that the
/// descriptor stage can fail closed and leave an audit record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryPushEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl RegistryPushEvent {
    /// Notification for an image that has just been written to the registry
    pub fn for_image(image: &ImageReference) -> Self {
        Self {
            image_uri: Some(image.to_string()),
            repository: Some(image.repository.clone()),
            tag: (!image.tag.is_empty()).then(|| image.tag.clone()),
            digest: image.digest.clone(),
        }
    }

    /// Tag carried by the event, either explicitly or inside `imageUri`
    pub fn resolved_tag(&self) -> Option<String> {
        if let Some(tag) = self.tag.as_ref().filter(|t| !t.is_empty()) {
            return Some(tag.clone());
        }
        self.image_uri
            .as_deref()
            .and_then(ImageReference::parse)
            .map(|image| image.tag)
            .filter(|tag| !tag.is_empty())
    }
}

/// External event that may start a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerEvent {
    SourcePush(SourcePushEvent),
    RegistryPush(RegistryPushEvent),
}

impl TriggerEvent {
    pub fn source_push(branch: impl Into<String>, commit_ref: impl Into<String>) -> Self {
        TriggerEvent::SourcePush(SourcePushEvent {
            branch: branch.into(),
            commit_ref: commit_ref.into(),
        })
    }

    pub fn registry_push(image_uri: impl Into<String>) -> Self {
        TriggerEvent::RegistryPush(RegistryPushEvent {
            image_uri: Some(image_uri.into()),
            ..Default::default()
        })
    }

    /// Short label used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerEvent::SourcePush(_) => "source_push",
            TriggerEvent::RegistryPush(_) => "registry_push",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_event_from_raw_json() {
        let event: RegistryPushEvent =
            serde_json::from_str(r#"{"imageUri": "registry.example/app:v3"}"#).unwrap();
        assert_eq!(event.image_uri.as_deref(), Some("registry.example/app:v3"));
        assert_eq!(event.resolved_tag().as_deref(), Some("v3"));
    }

    #[test]
    fn test_registry_event_without_uri() {
        let event: RegistryPushEvent = serde_json::from_str(r#"{"repository": "app"}"#).unwrap();
        assert_eq!(event.image_uri, None);
        assert_eq!(event.resolved_tag(), None);
    }

    #[test]
    fn test_explicit_tag_wins() {
        let event = RegistryPushEvent {
            image_uri: Some("registry.example/app@sha256:abc".to_string()),
            tag: Some("v4".to_string()),
            ..Default::default()
        };
        assert_eq!(event.resolved_tag().as_deref(), Some("v4"));
    }

    #[test]
    fn test_trigger_event_serialization() {
        let event = TriggerEvent::source_push("prod", "abc123");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "source_push");
        assert_eq!(json["commitRef"], "abc123");
    }
}
