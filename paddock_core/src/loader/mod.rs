//! Policy directory scanning.
//!
//! Policies are described by TOML manifests and instantiated through a
//! [`PolicyCatalog`]. The loader only produces candidates; registering them
//! is the registry's job (see [`PolicyRegistry::load`]).
//!
//! [`PolicyRegistry::load`]: crate::registry::PolicyRegistry::load

mod catalog;
mod manifest;

pub use catalog::{parameters, PolicyCatalog, PolicyFactory};
pub use manifest::{PolicyManifest, PolicySpec};

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{LoaderError, PolicyError};
use crate::policy::{SharedPolicy, Staged};
use crate::stage::Stage;

/// A policy found on disk, ready to register.
#[derive(Clone)]
pub struct Candidate {
    pub name: String,
    pub kind: String,
    pub source: PathBuf,
    pub policy: SharedPolicy,
}

impl Candidate {
    /// The stage the policy asks for, if any.
    pub fn stage(&self) -> Option<Stage> {
        self.policy.stage()
    }
}

impl std::fmt::Debug for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Candidate")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("source", &self.source)
            .field("stage", &self.stage())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct PolicyLoader {
    catalog: PolicyCatalog,
}

impl Default for PolicyLoader {
    fn default() -> Self {
        Self::new(PolicyCatalog::with_builtins())
    }
}

impl PolicyLoader {
    pub fn new(catalog: PolicyCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &PolicyCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut PolicyCatalog {
        &mut self.catalog
    }

    /// Every policy described by the `*.toml` files directly inside `dir`,
    /// in file name order.
    pub fn discover(&self, dir: &Path) -> Result<Vec<Candidate>, LoaderError> {
        debug!("Discovering policies in directory: {:?}", dir);

        if !dir.is_dir() {
            return Err(LoaderError::MissingDirectory(dir.to_path_buf()));
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "toml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut candidates = Vec::new();
        for path in paths {
            candidates.extend(self.load_file(&path)?);
        }

        debug!("Discovered {} policies", candidates.len());
        Ok(candidates)
    }

    /// Every policy described by one manifest file.
    pub fn load_file(&self, path: &Path) -> Result<Vec<Candidate>, LoaderError> {
        let content = fs::read_to_string(path)?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| LoaderError::InvalidManifest {
                path: path.to_path_buf(),
                reason: "file name is not valid UTF-8".to_string(),
            })?;

        PolicyManifest::parse(path, &content)?
            .into_specs(stem)
            .into_iter()
            .map(|(name, spec)| self.instantiate(path, name, spec))
            .collect()
    }

    fn instantiate(&self, path: &Path, name: String, spec: PolicySpec) -> Result<Candidate, LoaderError> {
        let mut policy = self.catalog.build(&name, &spec.kind, &spec.params)?;

        if let Some(tag) = &spec.stage {
            let stage: Stage = tag
                .parse()
                .map_err(|_: PolicyError| PolicyError::InvalidStage(format!("{} ({})", tag, name)))?;
            policy = std::sync::Arc::new(Staged::new(policy, stage));
        }

        debug!(policy = %name, kind = %spec.kind, "Loaded policy from {:?}", path);
        Ok(Candidate {
            name,
            kind: spec.kind,
            source: path.to_path_buf(),
            policy,
        })
    }
}
