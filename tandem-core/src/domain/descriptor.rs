//! Deployment descriptor
//!
//! The descriptor tells the deploy collaborator which image to run for which
//! container. On the wire it is a single-element JSON list:
//!
//! ```json
//! [{"name":"app","imageUri":"registry.example/app:v3"}]
//! ```

use serde::{Deserialize, Serialize};

/// Minimal data needed to roll a service container onto a new image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentDescriptor {
    #[serde(rename = "name", alias = "containerName")]
    pub container_name: String,
    #[serde(rename = "imageUri")]
    pub image_uri: String,
}

impl DeploymentDescriptor {
    /// Serializes the descriptor in its wire format
    pub fn to_wire(&self) -> serde_json::Result<String> {
        serde_json::to_string(std::slice::from_ref(self))
    }

    /// Parses the wire format, which must contain exactly one entry
    pub fn from_wire(bytes: &[u8]) -> Result<Self, String> {
        let mut entries: Vec<DeploymentDescriptor> =
            serde_json::from_slice(bytes).map_err(|e| format!("invalid descriptor: {}", e))?;
        match entries.len() {
            1 => Ok(entries.remove(0)),
            n => Err(format!("descriptor must contain exactly one entry, found {}", n)),
        }
    }
}
