use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Media handler kinds
///
/// Both kinds are served by the bucket handler; `s3` is accepted as an alias so
/// deployments can name the handler after the store they point it at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    Minio,
    S3,
}

impl FromStr for HandlerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "minio" => Ok(HandlerKind::Minio),
            "s3" => Ok(HandlerKind::S3),
            _ => Err(anyhow::anyhow!("Invalid media handler: {}", s)),
        }
    }
}

impl Display for HandlerKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            HandlerKind::Minio => write!(f, "minio"),
            HandlerKind::S3 => write!(f, "s3"),
        }
    }
}
