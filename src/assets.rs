use crate::types::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Capability for looking up reference images related to a predicted class.
///
/// Failures never propagate past the response interpreter; they only
/// suppress the gallery.
#[async_trait]
pub trait AssetResolver: Send + Sync {
    async fn resolve(&self, class_name: &str) -> Result<Vec<String>>;
}

/// Precompiled index from class name to a list of asset references.
#[derive(Debug, Clone, Default)]
pub struct StaticAssetIndex {
    index: HashMap<String, Vec<String>>,
}

impl StaticAssetIndex {
    pub fn new(index: HashMap<String, Vec<String>>) -> Self {
        Self { index }
    }

    pub fn insert(&mut self, class_name: impl Into<String>, assets: Vec<String>) {
        self.index.insert(class_name.into(), assets);
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[async_trait]
impl AssetResolver for StaticAssetIndex {
    async fn resolve(&self, class_name: &str) -> Result<Vec<String>> {
        Ok(self.index.get(class_name).cloned().unwrap_or_default())
    }
}
