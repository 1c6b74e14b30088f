//! Template System - ticket background selection

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Extensions tried in order before falling back to any other file.
pub const PREFERRED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("No template found in {}", .0.display())]
    NoTemplate(PathBuf),

    #[error("Template {} could not be read: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateEntry {
    pub path: PathBuf,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<[u32; 2]>,
}

/// Candidate ticket backgrounds found in a directory.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    dir: PathBuf,
    files: Vec<PathBuf>,
}

impl TemplateCatalog {
    /// List files that have an extension, sorted by name. A missing
    /// directory yields an empty catalog.
    pub fn scan(dir: &Path) -> Result<Self, std::io::Error> {
        let mut files = vec![];
        if dir.is_dir() {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.is_file() && path.extension().is_some() {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Preferred template: first png, then jpg, then jpeg, else first file.
    pub fn pick(&self) -> Result<&Path, TemplateError> {
        for wanted in PREFERRED_EXTENSIONS {
            if let Some(found) = self.files.iter().find(|p| has_extension(p, wanted)) {
                debug!(template = %found.display(), "selected preferred template");
                return Ok(found);
            }
        }
        match self.files.first() {
            Some(fallback) => {
                debug!(template = %fallback.display(), "selected fallback template");
                Ok(fallback)
            }
            None => Err(TemplateError::NoTemplate(self.dir.clone())),
        }
    }

    pub fn list(&self) -> Vec<TemplateEntry> {
        self.files
            .iter()
            .map(|path| TemplateEntry {
                path: path.clone(),
                file_name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                dimensions: image::image_dimensions(path).ok().map(|(w, h)| [w, h]),
            })
            .collect()
    }
}

fn has_extension(path: &Path, wanted: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case(wanted))
}

/// Pick the ticket template from `dir`.
pub fn pick_template(dir: &Path) -> Result<PathBuf, TemplateError> {
    let catalog =
        TemplateCatalog::scan(dir).map_err(|_| TemplateError::NoTemplate(dir.to_path_buf()))?;
    catalog.pick().map(Path::to_path_buf)
}

/// Load a template as RGBA.
pub fn load_template(path: &Path) -> Result<image::RgbaImage, TemplateError> {
    image::open(path)
        .map(|img| img.to_rgba8())
        .map_err(|source| TemplateError::Unreadable {
            path: path.to_path_buf(),
            source,
        })
}
