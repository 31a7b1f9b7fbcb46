//! Cube metadata and the descriptor sidecar

use crate::layout::LayoutDescriptor;
use crate::view::ViewDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sidecar format version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorVersion {
    pub major: u16,
    pub minor: u16,
}

impl DescriptorVersion {
    pub const CURRENT: Self = Self { major: 1, minor: 0 };

    pub fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    pub fn is_compatible(&self, other: &Self) -> bool {
        self.major == other.major
    }
}

impl Default for DescriptorVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Descriptive metadata carried by every cube
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CubeMetadata {
    pub name: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last time flushed data changed
    pub modified_at: DateTime<Utc>,

    /// Custom metadata key-value pairs
    pub custom: HashMap<String, String>,
}

impl CubeMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            created_at: now,
            modified_at: now,
            custom: HashMap::new(),
        }
    }

    /// Add custom metadata
    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.custom.insert(key.into(), value.into());
    }

    /// Get custom metadata
    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.custom.get(key).map(|s| s.as_str())
    }

    /// Update modification timestamp
    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }
}

/// Everything needed to reopen a file-backed cube, written next to its data as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CubeDescriptor {
    pub version: DescriptorVersion,
    pub metadata: CubeMetadata,
    pub layout: LayoutDescriptor,
    pub view: ViewDescriptor,
}

impl CubeDescriptor {
    pub fn new(metadata: CubeMetadata, layout: LayoutDescriptor, view: ViewDescriptor) -> Self {
        Self {
            version: DescriptorVersion::default(),
            metadata,
            layout,
            view,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EncodingType, InterleaveFormat, ProcessingLocation};

    #[test]
    fn test_version_compatibility() {
        let v1_0 = DescriptorVersion::new(1, 0);
        let v1_3 = DescriptorVersion::new(1, 3);
        let v2_0 = DescriptorVersion::new(2, 0);

        assert!(v1_0.is_compatible(&v1_3));
        assert!(!v1_0.is_compatible(&v2_0));
    }

    #[test]
    fn test_metadata_touch() {
        let mut metadata = CubeMetadata::new("scene");
        metadata.add_metadata("sensor", "AVIRIS");
        assert_eq!(metadata.get_metadata("sensor"), Some("AVIRIS"));

        let created = metadata.created_at;
        metadata.touch();
        assert!(metadata.modified_at >= created);
        assert_eq!(metadata.created_at, created);
    }

    #[test]
    fn test_descriptor_json() {
        let layout =
            LayoutDescriptor::in_memory(InterleaveFormat::Bil, EncodingType::Int2S, 3, 4, 5).unwrap();
        let view = ViewDescriptor::for_layout(&layout, ProcessingLocation::InMemory);
        let descriptor = CubeDescriptor::new(CubeMetadata::new("scene"), layout.clone(), view.clone());

        let json = serde_json::to_string_pretty(&descriptor).unwrap();
        let parsed: CubeDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.layout, layout);
        assert_eq!(parsed.view, view);
        assert_eq!(parsed.metadata.name, "scene");
        assert!(parsed.version.is_compatible(&DescriptorVersion::CURRENT));
    }
}
