//! Policy registry.
//!
//! Holds the loaded policies, bucketed by stage, and wires a stage's
//! dispatcher into the host the first time a policy lands in that stage.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::error::{LoaderError, PolicyError, Result};
use crate::loader::PolicyLoader;
use crate::policy::{Policy, SharedPolicy};
use crate::stage::Stage;

/// Host hook notified when a stage needs a dispatcher.
///
/// The registry calls [`StageHost::intercept`] at most once per stage
/// between resets.
pub trait StageHost: Send + Sync {
    fn intercept(&self, stage: Stage);
}

/// Options for [`PolicyRegistry::register`].
#[derive(Clone, Copy, Debug, Default)]
pub struct RegisterOptions {
    /// Silently keep the existing policy when a name is registered twice.
    pub ignore_duplicates: bool,
}

#[derive(Default)]
struct RegistryState {
    names: HashSet<String>,
    by_stage: HashMap<Stage, HashMap<String, SharedPolicy>>,
    activated: HashSet<Stage>,
}

/// Registry of loaded policies.
///
/// A policy name appears in at most one stage bucket, and `names` is always
/// the union of the bucket keys.
pub struct PolicyRegistry {
    state: RwLock<RegistryState>,
    stage_cache: Mutex<HashMap<Vec<String>, Stage>>,
    default_stage: Stage,
    host: Option<Arc<dyn StageHost>>,
}

impl PolicyRegistry {
    /// Create a registry not attached to any host.
    pub fn new(default_stage: Stage) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            stage_cache: Mutex::new(HashMap::new()),
            default_stage,
            host: None,
        }
    }

    /// Create a registry that wires stages into `host`.
    pub fn with_host(default_stage: Stage, host: Arc<dyn StageHost>) -> Self {
        Self {
            host: Some(host),
            ..Self::new(default_stage)
        }
    }

    /// Stage used for policies that do not declare one.
    pub fn default_stage(&self) -> Stage {
        self.default_stage
    }

    /// Register a policy under `name`.
    pub fn register(&self, name: &str, policy: SharedPolicy, options: RegisterOptions) -> Result<()> {
        let stage = policy.stage().unwrap_or(self.default_stage);

        let first_for_stage = {
            let mut state = self.state.write();

            if state.names.contains(name) {
                if options.ignore_duplicates {
                    debug!(policy = name, "Ignoring duplicate policy");
                    return Ok(());
                }
                return Err(PolicyError::DuplicatePolicy(name.to_string()));
            }

            info!(policy = name, stage = %stage, "Adding a new policy");
            state
                .by_stage
                .entry(stage)
                .or_default()
                .insert(name.to_string(), policy);
            state.names.insert(name.to_string());
            state.activated.insert(stage)
        };

        self.stage_cache.lock().clear();

        if first_for_stage {
            self.wire(stage);
        }
        Ok(())
    }

    /// Register with default options.
    pub fn register_policy(&self, name: &str, policy: impl Policy + 'static) -> Result<()> {
        self.register(name, Arc::new(policy), RegisterOptions::default())
    }

    /// Activate a stage even though no registered policy lives there yet.
    ///
    /// Needed when inline policies target a stage with no registered
    /// policies. Idempotent.
    pub fn watch(&self, stage: Stage) {
        if self.state.write().activated.insert(stage) {
            self.wire(stage);
        }
    }

    fn wire(&self, stage: Stage) {
        if let Some(host) = &self.host {
            info!(stage = %stage, "Wiring stage dispatcher");
            host.intercept(stage);
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.state.read().names.contains(name)
    }

    pub fn lookup(&self, name: &str) -> Result<SharedPolicy> {
        self.entry(name)
            .map(|(_, policy)| policy)
            .ok_or_else(|| PolicyError::NotFound(name.to_string()))
    }

    /// Stage a registered policy lives in.
    pub fn stage_of(&self, name: &str) -> Option<Stage> {
        self.entry(name).map(|(stage, _)| stage)
    }

    /// Stage and policy for `name`, in one read.
    pub fn entry(&self, name: &str) -> Option<(Stage, SharedPolicy)> {
        let state = self.state.read();
        state
            .by_stage
            .iter()
            .find_map(|(stage, bucket)| bucket.get(name).map(|p| (*stage, p.clone())))
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().names.iter().cloned().collect();
        names.sort();
        names
    }

    /// Names registered at `stage`, sorted.
    pub fn policies_at(&self, stage: Stage) -> Vec<String> {
        let state = self.state.read();
        let mut names: Vec<String> = state
            .by_stage
            .get(&stage)
            .map(|bucket| bucket.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn is_activated(&self, stage: Stage) -> bool {
        self.state.read().activated.contains(&stage)
    }

    pub fn len(&self) -> usize {
        self.state.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shared stage of a group of registered policies.
    ///
    /// The first name decides the stage; every other name must live in the
    /// same stage. Results are memoized per ordered name list until the
    /// registry changes.
    pub fn aggregate_stage(&self, names: &[String]) -> Result<Stage> {
        if let Some(stage) = self.stage_cache.lock().get(names) {
            return Ok(*stage);
        }

        let first = names.first().ok_or(PolicyError::EmptyAggregate)?;
        let mut stages = Vec::with_capacity(names.len());
        for name in names {
            let stage = self
                .stage_of(name)
                .ok_or_else(|| PolicyError::UnregisteredAggregateMember(name.clone()))?;
            stages.push(stage);
        }

        let stage = stages[0];
        if stages.iter().any(|s| *s != stage) {
            return Err(PolicyError::InconsistentAggregateStage(names.to_vec()));
        }

        debug!(first = %first, stage = %stage, "Determined aggregate stage");
        self.stage_cache.lock().insert(names.to_vec(), stage);
        Ok(stage)
    }

    /// Register every policy the loader finds in `dir`.
    ///
    /// Returns how many candidates were registered (duplicates skipped under
    /// `ignore_duplicates` still count).
    pub fn load(
        &self,
        loader: &PolicyLoader,
        dir: impl AsRef<Path>,
        options: RegisterOptions,
    ) -> std::result::Result<usize, LoaderError> {
        let candidates = loader.discover(dir.as_ref()).map_err(|e| {
            error!(dir = %dir.as_ref().display(), "{}", e);
            e
        })?;

        let count = candidates.len();
        for candidate in candidates {
            if let Err(e) = self.register(&candidate.name, candidate.policy, options) {
                error!(policy = %candidate.name, "{}", e);
                return Err(e.into());
            }
        }
        Ok(count)
    }

    /// Clear every policy, every activation flag and the stage cache.
    pub fn reset(&self) {
        *self.state.write() = RegistryState::default();
        self.stage_cache.lock().clear();
        debug!("Policy registry reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Outcome;
    use crate::policy::policy_fn;

    #[derive(Default)]
    struct RecordingHost {
        wired: Mutex<Vec<Stage>>,
    }

    impl StageHost for RecordingHost {
        fn intercept(&self, stage: Stage) {
            self.wired.lock().push(stage);
        }
    }

    fn passes() -> SharedPolicy {
        policy_fn(|_| async { Ok(Outcome::Continue) }).shared()
    }

    fn post_handler() -> SharedPolicy {
        policy_fn(|_| async { Ok(Outcome::Continue) })
            .at(Stage::PostHandler)
            .shared()
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = PolicyRegistry::new(Stage::PreHandler);
        assert!(!registry.has("passes"));

        registry
            .register("passes", passes(), RegisterOptions::default())
            .unwrap();

        assert!(registry.has("passes"));
        assert!(registry.lookup("passes").is_ok());
        assert_eq!(registry.stage_of("passes"), Some(Stage::PreHandler));
        assert_eq!(registry.policies_at(Stage::PreHandler), vec!["passes"]);
        assert!(matches!(
            registry.lookup("other"),
            Err(PolicyError::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_policy() {
        let registry = PolicyRegistry::new(Stage::PreHandler);
        let original = passes();
        registry
            .register("customError", original.clone(), RegisterOptions::default())
            .unwrap();

        let err = registry
            .register("customError", passes(), RegisterOptions::default())
            .unwrap_err();
        assert_eq!(err, PolicyError::DuplicatePolicy("customError".to_string()));
        assert_eq!(err.to_string(), "Trying to add a duplicate policy: customError");

        registry
            .register(
                "customError",
                post_handler(),
                RegisterOptions {
                    ignore_duplicates: true,
                },
            )
            .unwrap();
        assert!(Arc::ptr_eq(&registry.lookup("customError").unwrap(), &original));
        assert_eq!(registry.stage_of("customError"), Some(Stage::PreHandler));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stage_wired_once() {
        let host = Arc::new(RecordingHost::default());
        let registry = PolicyRegistry::with_host(Stage::PreHandler, host.clone());

        registry.register_policy("a", policy_fn(|_| async { Ok(Outcome::Continue) })).unwrap();
        registry.register_policy("b", policy_fn(|_| async { Ok(Outcome::Continue) })).unwrap();
        registry.register("c", post_handler(), RegisterOptions::default()).unwrap();
        registry.watch(Stage::PreHandler);

        assert_eq!(*host.wired.lock(), vec![Stage::PreHandler, Stage::PostHandler]);
        assert!(registry.is_activated(Stage::PostHandler));
        assert!(!registry.is_activated(Stage::PreAuth));

        registry.watch(Stage::PreAuth);
        assert!(registry.is_activated(Stage::PreAuth));
        assert_eq!(host.wired.lock().len(), 3);
    }

    #[test]
    fn test_aggregate_stage() {
        let registry = PolicyRegistry::new(Stage::PreHandler);
        registry.register("policyA", post_handler(), RegisterOptions::default()).unwrap();
        registry.register("policyB", post_handler(), RegisterOptions::default()).unwrap();
        registry.register("policyC", passes(), RegisterOptions::default()).unwrap();

        let group = vec!["policyA".to_string(), "policyB".to_string()];
        assert_eq!(registry.aggregate_stage(&group).unwrap(), Stage::PostHandler);
        // Served from the cache the second time.
        assert_eq!(registry.aggregate_stage(&group).unwrap(), Stage::PostHandler);

        let mixed = vec!["policyA".to_string(), "policyC".to_string()];
        assert_eq!(
            registry.aggregate_stage(&mixed),
            Err(PolicyError::InconsistentAggregateStage(mixed.clone()))
        );

        let missing = vec!["policyA".to_string(), "nope".to_string()];
        assert_eq!(
            registry.aggregate_stage(&missing),
            Err(PolicyError::UnregisteredAggregateMember("nope".to_string()))
        );
        assert_eq!(registry.aggregate_stage(&[]), Err(PolicyError::EmptyAggregate));
    }

    #[test]
    fn test_reset_clears_everything() {
        let host = Arc::new(RecordingHost::default());
        let registry = PolicyRegistry::with_host(Stage::PreHandler, host.clone());
        registry.register("policyA", post_handler(), RegisterOptions::default()).unwrap();
        let group = vec!["policyA".to_string()];
        assert_eq!(registry.aggregate_stage(&group).unwrap(), Stage::PostHandler);

        registry.reset();
        assert!(registry.is_empty());
        assert!(!registry.is_activated(Stage::PostHandler));
        assert!(registry.aggregate_stage(&group).is_err());

        // Same name, different stage: the stale cache entry must be gone.
        registry.register("policyA", passes(), RegisterOptions::default()).unwrap();
        assert_eq!(registry.aggregate_stage(&group).unwrap(), Stage::PreHandler);
        assert_eq!(host.wired.lock().len(), 2);
    }
}
