use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::builtin;
use crate::error::LoaderError;
use crate::policy::SharedPolicy;

/// Builds a policy of one kind from its manifest parameters.
pub type PolicyFactory =
    Arc<dyn Fn(&str, &toml::Table) -> Result<SharedPolicy, LoaderError> + Send + Sync>;

/// Maps manifest `kind` strings to factories.
#[derive(Clone, Default)]
pub struct PolicyCatalog {
    factories: HashMap<String, PolicyFactory>,
}

impl PolicyCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog knowing every built-in kind.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        builtin::install(&mut catalog);
        catalog
    }

    /// Add or replace the factory for `kind`.
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&str, &toml::Table) -> Result<SharedPolicy, LoaderError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Instantiate the policy `name` of `kind`.
    pub fn build(&self, name: &str, kind: &str, params: &toml::Table) -> Result<SharedPolicy, LoaderError> {
        let factory = self.factories.get(kind).ok_or_else(|| LoaderError::UnknownKind {
            name: name.to_string(),
            kind: kind.to_string(),
        })?;
        factory(name, params)
    }
}

impl fmt::Debug for PolicyCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyCatalog")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Deserialize a kind's parameters into `T`.
pub fn parameters<T: DeserializeOwned>(name: &str, params: &toml::Table) -> Result<T, LoaderError> {
    toml::Value::Table(params.clone())
        .try_into()
        .map_err(|e: toml::de::Error| LoaderError::InvalidParameters {
            name: name.to_string(),
            reason: e.message().to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Outcome;
    use crate::policy::policy_fn;
    use serde::Deserialize;

    #[test]
    fn test_custom_kind() {
        let mut catalog = PolicyCatalog::new();
        assert!(!catalog.contains("always"));

        catalog.register("always", |_, _| {
            Ok(policy_fn(|_| async { Ok(Outcome::Continue) }).shared())
        });
        assert_eq!(catalog.kinds(), vec!["always"]);
        assert!(catalog.build("p", "always", &toml::Table::new()).is_ok());

        let err = catalog.build("p", "never", &toml::Table::new()).err().unwrap();
        assert_eq!(err.to_string(), "Unknown policy kind 'never' for policy p");
    }

    #[test]
    fn test_builtins_registered() {
        let catalog = PolicyCatalog::with_builtins();
        for kind in ["allow", "deny", "require-query", "annotate-response", "redirect"] {
            assert!(catalog.contains(kind), "missing {}", kind);
        }
    }

    #[test]
    fn test_parameters() {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Params {
            key: String,
        }

        let mut table = toml::Table::new();
        table.insert("key".into(), "admin".into());
        let params: Params = parameters("p", &table).unwrap();
        assert_eq!(params.key, "admin");

        table.insert("typo".into(), "x".into());
        assert!(matches!(
            parameters::<Params>("p", &table),
            Err(LoaderError::InvalidParameters { .. })
        ));
    }
}
