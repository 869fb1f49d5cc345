//! The handler registry.
//!
//! Registrations are validated and indexed here once, before dispatch
//! starts. Keyed categories (commands, callback actions) map each key to
//! exactly one handler; the other categories keep every registration in
//! order.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use courier_core::{
    ConfigurationWarning, ContentSet, ExecutionPolicy, HandlerCategory, RegistrationError,
    RegistrationResult,
};

use crate::handler::BoxedHandlerService;
use crate::handler::service::build_service;
use crate::registration::Registration;
use crate::resources::Resources;

/// What happens when a keyed registration reuses an existing key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKeyPolicy {
    /// The newer registration wins and a warning is logged.
    #[default]
    Replace,
    /// The newer registration is refused.
    Reject,
}

/// Identifies one accepted registration, including every key it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegistrationId(u64);

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An accepted registration with its ready-to-call service stack.
pub struct RegisteredHandler {
    id: RegistrationId,
    category: HandlerCategory,
    keys: Vec<String>,
    name: Arc<str>,
    policy: ExecutionPolicy,
    filters: ContentSet,
    service: BoxedHandlerService,
}

impl RegisteredHandler {
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    pub fn category(&self) -> HandlerCategory {
        self.category
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        self.name.clone()
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    pub fn filters(&self) -> ContentSet {
        self.filters
    }

    /// Content filters match if empty or if they share any kind with the
    /// message.
    pub fn matches(&self, content: &ContentSet) -> bool {
        self.filters.is_empty() || self.filters.intersects(content)
    }

    pub(crate) fn service(&self) -> BoxedHandlerService {
        self.service.clone()
    }
}

impl fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("keys", &self.keys)
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}

/// The result of a registration that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Registered {
        id: RegistrationId,
        warnings: Vec<ConfigurationWarning>,
    },
    /// Accepted, shadowing the named handlers on one or more keys.
    Replaced {
        id: RegistrationId,
        previous: Vec<String>,
        warnings: Vec<ConfigurationWarning>,
    },
    /// Excluded because of a configuration problem; startup continues.
    Skipped(ConfigurationWarning),
}

impl RegistrationOutcome {
    pub fn id(&self) -> Option<RegistrationId> {
        match self {
            Self::Registered { id, .. } | Self::Replaced { id, .. } => Some(*id),
            Self::Skipped(_) => None,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.id().is_some()
    }

    pub fn warnings(&self) -> &[ConfigurationWarning] {
        match self {
            Self::Registered { warnings, .. } | Self::Replaced { warnings, .. } => warnings,
            Self::Skipped(warning) => std::slice::from_ref(warning),
        }
    }
}

/// Indexes handlers by category and key.
pub struct HandlerRegistry {
    resources: Arc<Resources>,
    duplicate_keys: DuplicateKeyPolicy,
    keyed: HashMap<HandlerCategory, HashMap<String, Arc<RegisteredHandler>>>,
    ordered: HashMap<HandlerCategory, Vec<Arc<RegisteredHandler>>>,
    next_id: u64,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::with_resources(Resources::new())
    }

    /// Creates a registry whose handlers may depend on `resources`.
    pub fn with_resources(resources: Resources) -> Self {
        Self {
            resources: Arc::new(resources),
            duplicate_keys: DuplicateKeyPolicy::default(),
            keyed: HashMap::new(),
            ordered: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn duplicate_keys(mut self, policy: DuplicateKeyPolicy) -> Self {
        self.duplicate_keys = policy;
        self
    }

    pub fn set_duplicate_keys(&mut self, policy: DuplicateKeyPolicy) {
        self.duplicate_keys = policy;
    }

    pub fn resources(&self) -> &Arc<Resources> {
        &self.resources
    }

    /// Adds a resource. Only registrations made afterwards can depend on it.
    pub fn provide<T: Send + Sync + 'static>(&mut self, value: T) -> &mut Self {
        Arc::make_mut(&mut self.resources).insert(value);
        self
    }

    /// Adds a shared resource, typically a trait object.
    pub fn provide_arc<T: ?Sized + Send + Sync + 'static>(&mut self, value: Arc<T>) -> &mut Self {
        Arc::make_mut(&mut self.resources).insert_arc(value);
        self
    }

    /// Validates and indexes a registration.
    ///
    /// Configuration problems that only affect one attribute (unknown or
    /// misplaced filters, a degenerate rate limit) drop that attribute and
    /// are reported in the outcome. A registration without usable keys is
    /// skipped. Unsatisfiable parameters and, under
    /// [`DuplicateKeyPolicy::Reject`], key collisions are errors.
    pub fn register(&mut self, registration: Registration) -> RegistrationResult<RegistrationOutcome> {
        let Registration {
            category,
            keys,
            handler,
            verify,
            name,
            mut policy,
            filters,
            unknown_filters,
        } = registration;

        if let Err(e) = verify(&self.resources) {
            warn!(handler = %name, category = %category, error = %e, "Handler rejected");
            return Err(RegistrationError::InvalidSignature {
                handler: name,
                reason: e.to_string(),
            });
        }

        let keys = match normalize_keys(category, keys, &name) {
            Ok(keys) => keys,
            Err(warning) => {
                warn!(handler = %name, category = %category, "{warning}");
                return Ok(RegistrationOutcome::Skipped(warning));
            }
        };

        let mut warnings = Vec::new();
        let filters = if category == HandlerCategory::AnyMessage {
            warnings.extend(unknown_filters.into_iter().map(|filter| {
                ConfigurationWarning::UnknownContentFilter {
                    handler: name.clone(),
                    filter,
                }
            }));
            filters
        } else {
            if !filters.is_empty() || !unknown_filters.is_empty() {
                warnings.push(ConfigurationWarning::FiltersIgnored {
                    handler: name.clone(),
                    category,
                });
            }
            ContentSet::empty()
        };

        if policy.rate_limit.is_some_and(|limit| limit.is_degenerate()) {
            warnings.push(ConfigurationWarning::DegenerateRateLimit {
                handler: name.clone(),
            });
            policy.rate_limit = None;
        }

        if self.duplicate_keys == DuplicateKeyPolicy::Reject {
            self.check_collisions(category, &keys, &name)?;
        }

        for warning in &warnings {
            warn!(handler = %name, category = %category, "{warning}");
        }

        self.next_id += 1;
        let id = RegistrationId(self.next_id);
        let registered = Arc::new(RegisteredHandler {
            id,
            category,
            service: build_service(handler, policy.fixed_delay),
            keys: keys.clone(),
            name: Arc::from(name.as_str()),
            policy,
            filters,
        });

        let mut previous = Vec::new();
        if category.is_keyed() {
            let bucket = self.keyed.entry(category).or_default();
            for key in keys {
                if let Some(old) = bucket.insert(key.clone(), registered.clone()) {
                    warn!(
                        category = %category,
                        key = %key,
                        previous = %old.name,
                        handler = %name,
                        "Duplicate key, replacing previous handler"
                    );
                    previous.push(old.name.to_string());
                }
            }
        } else {
            self.ordered.entry(category).or_default().push(registered);
        }

        debug!(id = %id, category = %category, handler = %name, "Handler registered");

        Ok(if previous.is_empty() {
            RegistrationOutcome::Registered { id, warnings }
        } else {
            RegistrationOutcome::Replaced {
                id,
                previous,
                warnings,
            }
        })
    }

    fn check_collisions(
        &self,
        category: HandlerCategory,
        keys: &[String],
        name: &str,
    ) -> RegistrationResult<()> {
        let Some(bucket) = self.keyed.get(&category) else {
            return Ok(());
        };
        for key in keys {
            if let Some(existing) = bucket.get(key) {
                warn!(category = %category, key = %key, handler = %name, "Duplicate key rejected");
                return Err(RegistrationError::DuplicateKey {
                    category,
                    key: key.clone(),
                    existing: existing.name.to_string(),
                    handler: name.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Number of keys bound in a keyed category, counting aliases.
    pub fn keyed_count(&self, category: HandlerCategory) -> usize {
        self.keyed.get(&category).map_or(0, HashMap::len)
    }

    /// The handler bound to `key` in a keyed category.
    pub fn lookup(&self, category: HandlerCategory, key: &str) -> Option<&Arc<RegisteredHandler>> {
        self.keyed.get(&category)?.get(key)
    }

    /// Every handler of an unkeyed category, in registration order.
    pub fn lookup_all(&self, category: HandlerCategory) -> &[Arc<RegisteredHandler>] {
        self.ordered
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// For keyed categories, whether `key` is bound. For the others, whether
    /// any handler is registered; `key` is ignored.
    pub fn has_handler(&self, category: HandlerCategory, key: Option<&str>) -> bool {
        if category.is_keyed() {
            key.is_some_and(|key| self.lookup(category, key).is_some())
        } else {
            !self.lookup_all(category).is_empty()
        }
    }

    /// Every live registration in registration order. A registration shadowed
    /// on all of its keys is no longer live.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RegisteredHandler>> {
        let mut live = BTreeMap::new();
        let keyed = self.keyed.values().flat_map(|bucket| bucket.values());
        let ordered = self.ordered.values().flatten();
        for handler in keyed.chain(ordered) {
            live.entry(handler.id).or_insert(handler);
        }
        live.into_values()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.len())
            .field("duplicate_keys", &self.duplicate_keys)
            .field("resources", &self.resources)
            .finish()
    }
}

/// Commands are matched against lower-cased names, so keys are lower-cased
/// too. Blank keys are dropped.
fn normalize_keys(
    category: HandlerCategory,
    keys: Vec<String>,
    name: &str,
) -> Result<Vec<String>, ConfigurationWarning> {
    match category {
        HandlerCategory::Command => {
            let mut normalized: Vec<String> = Vec::with_capacity(keys.len());
            for key in keys {
                let key = key.trim().to_lowercase();
                if !key.is_empty() && !normalized.contains(&key) {
                    normalized.push(key);
                }
            }
            if normalized.is_empty() {
                return Err(ConfigurationWarning::NoCommandKeys {
                    handler: name.to_string(),
                });
            }
            Ok(normalized)
        }
        HandlerCategory::CallbackAction => match keys.into_iter().next() {
            Some(action) if !action.is_empty() => Ok(vec![action]),
            _ => Err(ConfigurationWarning::EmptyCallbackAction {
                handler: name.to_string(),
            }),
        },
        _ => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use courier_core::ContentKind;

    use super::*;
    use crate::extractor::Dep;

    async fn noop() {}

    #[test]
    fn command_aliases_share_one_registration() {
        let mut registry = HandlerRegistry::new();
        let outcome = registry
            .register(Registration::command(["Ban", "kick", "ban"], noop))
            .unwrap();

        let id = outcome.id().unwrap();
        assert_eq!(registry.lookup(HandlerCategory::Command, "ban").unwrap().id(), id);
        assert_eq!(registry.lookup(HandlerCategory::Command, "kick").unwrap().id(), id);
        assert_eq!(registry.len(), 1);
        assert!(registry.has_handler(HandlerCategory::Command, Some("kick")));
        assert!(!registry.has_handler(HandlerCategory::Command, Some("mute")));
    }

    #[test]
    fn duplicate_key_replaces_by_default() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(Registration::command(["start"], noop).name("first"))
            .unwrap();
        let outcome = registry
            .register(Registration::command(["start"], noop).name("second"))
            .unwrap();

        assert!(matches!(
            &outcome,
            RegistrationOutcome::Replaced { previous, .. } if previous == &["first"]
        ));
        assert_eq!(registry.lookup(HandlerCategory::Command, "start").unwrap().name(), "second");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_key_rejected_when_configured() {
        let mut registry = HandlerRegistry::new().duplicate_keys(DuplicateKeyPolicy::Reject);
        registry
            .register(Registration::callback("approve", noop).name("first"))
            .unwrap();
        let err = registry
            .register(Registration::callback("approve", noop).name("second"))
            .unwrap_err();

        assert!(matches!(err, RegistrationError::DuplicateKey { ref existing, .. } if existing == "first"));
        assert_eq!(registry.lookup(HandlerCategory::CallbackAction, "approve").unwrap().name(), "first");
    }

    #[test]
    fn empty_keys_are_skipped() {
        let mut registry = HandlerRegistry::new();

        let outcome = registry
            .register(Registration::command(Vec::<String>::new(), noop))
            .unwrap();
        assert!(matches!(outcome, RegistrationOutcome::Skipped(ConfigurationWarning::NoCommandKeys { .. })));

        let outcome = registry.register(Registration::callback("", noop)).unwrap();
        assert!(!outcome.is_registered());
        assert!(registry.is_empty());
    }

    #[test]
    fn missing_dependency_is_invalid_signature() {
        let mut registry = HandlerRegistry::new();
        let err = registry
            .register(Registration::text(|_db: Dep<Vec<u8>>| async {}))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidSignature { .. }));

        registry.provide(vec![1u8, 2, 3]);
        assert!(registry.register(Registration::text(|_db: Dep<Vec<u8>>| async {})).is_ok());
    }

    #[test]
    fn attribute_problems_become_warnings() {
        let mut registry = HandlerRegistry::new();

        let outcome = registry
            .register(
                Registration::command(["ban"], noop)
                    .filter(ContentKind::Photo)
                    .rate_limit(0, Duration::from_secs(10)),
            )
            .unwrap();
        assert_eq!(outcome.warnings().len(), 2);
        let handler = registry.lookup(HandlerCategory::Command, "ban").unwrap();
        assert!(handler.filters().is_empty());
        assert!(handler.policy().rate_limit.is_none());

        let outcome = registry
            .register(Registration::any_message(noop).filter_names(["photo", "hologram"]))
            .unwrap();
        assert!(matches!(
            outcome.warnings(),
            [ConfigurationWarning::UnknownContentFilter { filter, .. }] if filter == "hologram"
        ));
        let handler = &registry.lookup_all(HandlerCategory::AnyMessage)[0];
        assert!(handler.matches(&ContentSet::only(ContentKind::Photo)));
        assert!(!handler.matches(&ContentSet::only(ContentKind::Video)));
    }

    #[test]
    fn unkeyed_keep_registration_order() {
        let mut registry = HandlerRegistry::new();
        for name in ["a", "b", "c"] {
            registry.register(Registration::text(noop).name(name)).unwrap();
        }

        let names: Vec<_> = registry
            .lookup_all(HandlerCategory::Text)
            .iter()
            .map(|h| h.name())
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert!(registry.has_handler(HandlerCategory::Text, None));
        assert!(!registry.has_handler(HandlerCategory::ReplyToBotMessage, None));
    }
}
