use anyhow::Context;
use serde::Serialize;
use stowage_core::{Config, FileRecord, FileStatus};
use stowage_storage::{build_url, create_handler, HandlerRegistry, ObjectStoreConnector};

/// Log filter from RUST_LOG, defaulting to `info`. Load `.env` before calling.
pub fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Initialize tracing for CLI binaries.
pub fn init_tracing() {
    tracing_subscriber::fmt().with_env_filter(env_filter()).init();
}

/// Initialize the configured handler and register it under its name.
pub async fn build_registry(config: &Config) -> anyhow::Result<HandlerRegistry> {
    let connector = ObjectStoreConnector::local(&config.local_root);
    let handler = create_handler(&config.media_handler, &config.media_config, &connector)
        .await
        .with_context(|| format!("Failed to initialize media handler '{}'", config.media_handler))?;

    let mut registry = HandlerRegistry::new();
    registry.register(config.media_handler.clone(), handler)?;
    Ok(registry)
}

/// File extension used in public URLs for common MIME types.
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let essence = mime.split(';').next().unwrap_or_default().trim();
    match essence.to_ascii_lowercase().as_str() {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "video/mp4" => Some("mp4"),
        "audio/mpeg" => Some("mp3"),
        "application/pdf" => Some("pdf"),
        "text/plain" => Some("txt"),
        _ => None,
    }
}

/// JSON view of a stored file.
#[derive(Debug, Serialize)]
pub struct FileSummary {
    pub id: String,
    pub key: String,
    pub location: Option<String>,
    pub size: u64,
    pub mime_type: String,
    pub status: FileStatus,
    pub url: String,
}

impl FileSummary {
    pub fn new(record: &FileRecord, serve_url: &str) -> Self {
        Self {
            id: record.id.to_string(),
            key: record.id.to_base32(),
            location: record.location.clone(),
            size: record.size,
            mime_type: record.mime_type.clone(),
            status: record.status,
            url: build_url(serve_url, record.id, extension_for_mime(&record.mime_type)),
        }
    }
}
