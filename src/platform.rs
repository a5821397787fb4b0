//! Platform descriptors and the category registry.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{ReconError, Result};

const BUILTIN_PLATFORMS: &str = include_str!("../config/platforms.json");

/// One external service that can be probed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformDescriptor {
    /// Display name, unique within a category.
    pub name: String,
    /// Host (and optional path prefix) of the platform, e.g. `ebay.com`.
    #[serde(alias = "url")]
    pub base_address: String,
    /// Whether the platform gates its content behind a login.
    #[serde(default, alias = "login_required")]
    pub requires_authentication: bool,
    /// Site search endpoint relative to the base address.
    #[serde(default, alias = "search_endpoint")]
    pub search_path: Option<String>,
    /// Category this platform belongs to. Filled from the registry key.
    #[serde(default)]
    pub category: String,
}

impl PlatformDescriptor {
    /// Creates a descriptor for a public platform without a search endpoint.
    pub fn new(
        name: impl Into<String>,
        base_address: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_address: base_address.into(),
            requires_authentication: false,
            search_path: None,
            category: category.into(),
        }
    }

    /// Sets the site search endpoint.
    pub fn with_search_path(mut self, path: impl Into<String>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    /// Marks the platform as requiring authentication.
    pub fn requiring_authentication(mut self) -> Self {
        self.requires_authentication = true;
        self
    }

    /// Returns the base address as an absolute `https://` URL.
    pub fn site_url(&self) -> String {
        let address = self.base_address.trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("https://{}", address)
        }
    }

    /// Returns the bare host used in `site:` queries.
    pub fn site_host(&self) -> &str {
        self.base_address
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
    }
}

/// Platforms grouped by category name.
#[derive(Debug, Clone, Default)]
pub struct PlatformRegistry {
    categories: BTreeMap<String, Vec<PlatformDescriptor>>,
}

impl PlatformRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the registry embedded in the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_json_str(BUILTIN_PLATFORMS)
    }

    /// Loads a registry from a JSON file mapping category to platform list.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let registry = Self::from_json_str(&raw)?;
        info!(
            "Loaded {} platforms in {} categories from {}",
            registry.len(),
            registry.categories.len(),
            path.display()
        );
        Ok(registry)
    }

    /// Parses a registry from JSON.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let parsed: BTreeMap<String, Vec<PlatformDescriptor>> = serde_json::from_str(raw)?;
        let mut registry = Self::new();
        for (category, platforms) in parsed {
            for platform in platforms {
                registry.insert(&category, platform)?;
            }
        }
        Ok(registry)
    }

    /// Adds a platform under `category`.
    ///
    /// A second platform with the same name in the same category is dropped
    /// so that no platform is probed twice in one run.
    pub fn insert(&mut self, category: &str, mut platform: PlatformDescriptor) -> Result<()> {
        let category = category.trim();
        if category.is_empty() {
            return Err(ReconError::Config("category name cannot be empty".into()));
        }
        if platform.name.trim().is_empty() {
            return Err(ReconError::Config(format!(
                "platform in category '{}' has no name",
                category
            )));
        }
        if platform.base_address.trim().is_empty() {
            return Err(ReconError::Config(format!(
                "platform '{}' has no address",
                platform.name
            )));
        }

        platform.category = category.to_string();
        let entries = self.categories.entry(category.to_string()).or_default();
        if entries.iter().any(|p| p.name == platform.name) {
            warn!(
                "Duplicate platform '{}' in category '{}', keeping the first",
                platform.name, category
            );
            return Ok(());
        }
        entries.push(platform);
        Ok(())
    }

    /// Returns the platforms of a category, if the category is known.
    pub fn platforms(&self, category: &str) -> Option<&[PlatformDescriptor]> {
        self.categories.get(category).map(Vec::as_slice)
    }

    /// Returns the category names in sorted order.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    /// Total number of platforms across categories.
    pub fn len(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes repeated platform names, keeping the first occurrence.
pub(crate) fn dedupe_by_name(platforms: &[PlatformDescriptor]) -> Vec<PlatformDescriptor> {
    let mut seen = HashSet::new();
    platforms
        .iter()
        .filter(|p| {
            let fresh = seen.insert(p.name.clone());
            if !fresh {
                warn!("Skipping duplicate platform '{}'", p.name);
            }
            fresh
        })
        .cloned()
        .collect()
}
