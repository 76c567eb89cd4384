//! Named media handler registry and constructor table.

use std::collections::HashMap;
use std::sync::Arc;
use stowage_core::HandlerKind;

use crate::client::ClientFactory;
use crate::handler::BucketHandler;
use crate::traits::{MediaHandler, StorageError, StorageResult};

/// Create a media handler of the named kind.
pub async fn create_handler(
    kind: &str,
    json_config: &str,
    connector: &dyn ClientFactory,
) -> StorageResult<Arc<dyn MediaHandler>> {
    let kind: HandlerKind = kind
        .parse()
        .map_err(|e: anyhow::Error| StorageError::ConfigError(e.to_string()))?;

    match kind {
        HandlerKind::Minio | HandlerKind::S3 => {
            let handler = BucketHandler::init(json_config, connector).await?;
            Ok(Arc::new(handler))
        }
    }
}

/// Name-keyed set of media handlers.
///
/// Populated once at startup, then shared read-only behind an `Arc`.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn MediaHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler under `name`. Names are case-sensitive and unique.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn MediaHandler>,
    ) -> StorageResult<()> {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(StorageError::ConfigError(format!(
                "media handler '{}' is already registered",
                name
            )));
        }

        tracing::info!(handler = %name, "Media handler registered");
        self.handlers.insert(name, handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> StorageResult<Arc<dyn MediaHandler>> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("media handler '{}'", name)))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}
