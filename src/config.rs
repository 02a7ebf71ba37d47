//! File-based configuration for opening a tree.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::primitives::pager::MemPageStore;
use crate::storage::btree::BTreeOptions;
use crate::types::page::{validate_page_size, PAGE_SIZE};
use crate::types::{BTreeError, Result};

/// Settings read from a TOML document. Missing keys take their defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Page size in bytes for newly created stores.
    pub page_size: usize,
    /// Free replaced pages after each insert.
    pub reclaim_replaced_pages: bool,
    /// Verify the whole tree when opening an existing store.
    pub verify_on_open: bool,
    /// `tracing` filter directive, e.g. `"bnode=debug"`.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            reclaim_replaced_pages: true,
            verify_on_open: false,
            log_filter: "warn".to_string(),
        }
    }
}

impl Config {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|err| BTreeError::Config(format!("failed to parse config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| {
            BTreeError::Config(format!("failed to read config {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Serializes the configuration back to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self)
            .map_err(|err| BTreeError::Config(format!("failed to serialize config: {err}")))
    }

    /// Checks values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        validate_page_size(self.page_size)
            .map_err(|_| BTreeError::Config(format!("page_size {} out of range", self.page_size)))?;
        if self.log_filter.trim().is_empty() {
            return Err(BTreeError::Config("log_filter must not be empty".into()));
        }
        Ok(())
    }

    /// Tree options derived from this configuration.
    pub fn btree_options(&self) -> BTreeOptions {
        BTreeOptions {
            reclaim_replaced_pages: self.reclaim_replaced_pages,
            verify_on_open: self.verify_on_open,
        }
    }

    /// Creates an in-memory store with the configured page size.
    pub fn mem_store(&self) -> Result<Arc<MemPageStore>> {
        MemPageStore::shared(self.page_size)
    }
}
