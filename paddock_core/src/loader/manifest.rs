use std::collections::BTreeMap;
use std::path::Path;

use crate::error::LoaderError;

/// One policy as written in a manifest: its kind, an optional stage and
/// whatever parameters the kind takes.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySpec {
    pub kind: String,
    pub stage: Option<String>,
    pub params: toml::Table,
}

impl PolicySpec {
    fn from_table(path: &Path, mut table: toml::Table) -> Result<Self, LoaderError> {
        let kind = match table.remove("kind") {
            Some(toml::Value::String(kind)) => kind,
            Some(_) => return Err(invalid(path, "`kind` must be a string")),
            None => return Err(invalid(path, "missing `kind`")),
        };
        let stage = match table.remove("stage") {
            Some(toml::Value::String(stage)) => Some(stage),
            Some(_) => return Err(invalid(path, "`stage` must be a string")),
            None => None,
        };

        Ok(Self {
            kind,
            stage,
            params: table,
        })
    }
}

/// Contents of one policy file.
///
/// A file either describes a single policy with a top-level `kind`, named
/// after the file, or several policies under `[policies.<name>]`.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyManifest {
    Single(PolicySpec),
    Multi(BTreeMap<String, PolicySpec>),
}

impl PolicyManifest {
    pub fn parse(path: &Path, content: &str) -> Result<Self, LoaderError> {
        let mut table: toml::Table = content.parse().map_err(|source| LoaderError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        match table.remove("policies") {
            Some(toml::Value::Table(policies)) => {
                if !table.is_empty() {
                    return Err(invalid(path, "a multi-policy file may only contain [policies]"));
                }
                let mut specs = BTreeMap::new();
                for (name, value) in policies {
                    let toml::Value::Table(spec) = value else {
                        return Err(invalid(path, &format!("policy {} must be a table", name)));
                    };
                    specs.insert(name, PolicySpec::from_table(path, spec)?);
                }
                Ok(Self::Multi(specs))
            }
            Some(_) => Err(invalid(path, "`policies` must be a table")),
            None => Ok(Self::Single(PolicySpec::from_table(path, table)?)),
        }
    }

    /// Named specs. A single-policy file is named `stem`.
    pub fn into_specs(self, stem: &str) -> Vec<(String, PolicySpec)> {
        match self {
            Self::Single(spec) => vec![(stem.to_string(), spec)],
            Self::Multi(specs) => specs.into_iter().collect(),
        }
    }
}

fn invalid(path: &Path, reason: &str) -> LoaderError {
    LoaderError::InvalidManifest {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
