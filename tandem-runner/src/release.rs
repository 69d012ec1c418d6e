//! Release descriptor derivation
//!
//! Turns a registry push notification into the deployment descriptor the
//! deploy stage consumes. Pure: no registry or service calls.

use serde_json::Value as JsonValue;
use tandem_core::domain::descriptor::DeploymentDescriptor;
use tandem_core::domain::event::RegistryPushEvent;
use tandem_core::domain::image::ImageReference;
use tandem_core::domain::pipeline::ReleaseConfig;
use tandem_core::error::ActionError;

pub struct ReleaseDescriptorBuilder {
    config: ReleaseConfig,
}

impl ReleaseDescriptorBuilder {
    pub fn new(config: ReleaseConfig) -> Self {
        Self { config }
    }

    /// Builds the descriptor for `event`
    ///
    /// Fails closed when `imageUri` is absent, blank or not a tagged or
    /// digest-pinned image reference.
    pub fn build(&self, event: &RegistryPushEvent) -> Result<DeploymentDescriptor, ActionError> {
        let uri = event
            .image_uri
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                ActionError::DescriptorBuildFailed("event carries no imageUri".to_string())
            })?;

        if ImageReference::parse(uri).is_none() {
            return Err(ActionError::DescriptorBuildFailed(format!(
                "imageUri '{}' is not a resolvable image reference",
                uri
            )));
        }

        Ok(DeploymentDescriptor {
            container_name: self.config.container_name.clone(),
            image_uri: uri.to_string(),
        })
    }

    /// Builds the descriptor from a raw notification payload
    pub fn build_from_json(&self, payload: &JsonValue) -> Result<DeploymentDescriptor, ActionError> {
        let event: RegistryPushEvent = serde_json::from_value(payload.clone()).map_err(|e| {
            ActionError::DescriptorBuildFailed(format!("malformed registry event: {}", e))
        })?;
        self.build(&event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn builder() -> ReleaseDescriptorBuilder {
        ReleaseDescriptorBuilder::new(ReleaseConfig {
            container_name: "app".to_string(),
        })
    }

    #[test]
    fn test_descriptor_from_event() {
        let descriptor = builder()
            .build_from_json(&json!({"imageUri": "registry.example/app:v3"}))
            .unwrap();

        assert_eq!(
            descriptor,
            DeploymentDescriptor {
                container_name: "app".to_string(),
                image_uri: "registry.example/app:v3".to_string(),
            }
        );
        assert_eq!(
            descriptor.to_wire().unwrap(),
            r#"[{"name":"app","imageUri":"registry.example/app:v3"}]"#
        );
    }

    #[test]
    fn test_missing_image_uri_fails_closed() {
        let err = builder()
            .build_from_json(&json!({"repository": "registry.example/app"}))
            .unwrap_err();
        assert!(matches!(err, ActionError::DescriptorBuildFailed(_)));

        let err = builder().build_from_json(&json!({"imageUri": "  "})).unwrap_err();
        assert!(matches!(err, ActionError::DescriptorBuildFailed(_)));
    }

    #[test]
    fn test_unresolvable_image_uri() {
        for uri in ["registry.example/app", "not a uri", "https://registry.example/app:v3"] {
            let err = builder().build_from_json(&json!({ "imageUri": uri })).unwrap_err();
            assert!(
                matches!(err, ActionError::DescriptorBuildFailed(_)),
                "{uri} should be rejected"
            );
        }
    }

    #[test]
    fn test_digest_pinned_uri_is_kept_verbatim() {
        let descriptor = builder()
            .build_from_json(&json!({"imageUri": "registry.example/app:v3@sha256:0123abcd"}))
            .unwrap();
        assert_eq!(descriptor.image_uri, "registry.example/app:v3@sha256:0123abcd");

        // A digest alone identifies the image
        let descriptor = builder()
            .build_from_json(&json!({"imageUri": "registry.example/app@sha256:0123abcd"}))
            .unwrap();
        assert_eq!(descriptor.image_uri, "registry.example/app@sha256:0123abcd");
    }

    #[test]
    fn test_malformed_payload() {
        let err = builder().build_from_json(&json!({"imageUri": 42})).unwrap_err();
        assert!(matches!(err, ActionError::DescriptorBuildFailed(_)));
    }
}
