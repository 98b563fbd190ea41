use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::Documents;

/// What happens to a document whose extension is not allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadPolicy {
    /// Skip the document, log a warning, keep going.
    #[default]
    Lenient,
    /// Refuse the whole submission.
    Strict,
}

/// A file as received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Reduce a client-supplied name to `[A-Za-z0-9._-]`, with no directory parts
/// and no leading dots.
pub fn secure_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    cleaned.trim_start_matches(['.', '_']).to_string()
}

fn extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    (!stem.is_empty() && !ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

/// Plain-directory store for identity documents.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    dir: PathBuf,
    allowed: Vec<String>,
    policy: UploadPolicy,
}

impl DocumentStore {
    pub fn new(dir: PathBuf, allowed: &[String], policy: UploadPolicy) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            allowed: allowed.iter().map(|e| e.trim().to_ascii_lowercase()).collect(),
            policy,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_allowed(&self, filename: &str) -> bool {
        extension(filename).is_some_and(|ext| self.allowed.contains(&ext))
    }

    /// Write the file and return its stored name, unique per upload.
    /// A disallowed extension yields `Ok(None)` under `Lenient`.
    pub fn store(&self, upload: &Upload) -> Result<Option<String>, EngineError> {
        let safe = secure_filename(&upload.filename);
        if !self.is_allowed(&safe) {
            return match self.policy {
                UploadPolicy::Lenient => {
                    warn!("ignoring upload {:?}: extension not allowed", upload.filename);
                    Ok(None)
                }
                UploadPolicy::Strict => Err(EngineError::Validation(format!(
                    "file type not allowed: {}",
                    upload.filename
                ))),
            };
        }
        let stored = format!("{}_{safe}", Ulid::new());
        std::fs::write(self.dir.join(&stored), &upload.bytes).map_err(|e| {
            tracing::error!("writing upload {stored} failed: {e}");
            EngineError::Storage(e.to_string())
        })?;
        Ok(Some(stored))
    }

    /// Store the two documents a booking form carries.
    pub fn store_documents(
        &self,
        id_document: Option<&Upload>,
        license: Option<&Upload>,
    ) -> Result<Documents, EngineError> {
        let store_opt = |upload: Option<&Upload>| match upload {
            Some(u) => self.store(u),
            None => Ok(None),
        };
        Ok(Documents {
            id_document: store_opt(id_document)?,
            license: store_opt(license)?,
        })
    }
}
