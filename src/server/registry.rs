//! Process-wide table of named pasteboards.
//!
//! The table lock only guards lookup and insert-if-absent; it is never
//! held while a pasteboard is being read or written. Each pasteboard
//! serializes its own mutations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::ipc::protocol::PasteboardDescriptor;

use super::callback::ClientId;
use super::pasteboard::Pasteboard;

/// Name of the shared pasteboard every client sees by default.
pub const GENERAL_PASTEBOARD: &str = "general";

/// Default wait for an owner to answer a provide-data callback.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Server-wide policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// How long `data_for_type` waits on the owner.
    pub callback_timeout: Duration,
    /// History depth given to newly created pasteboards.
    pub default_history: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            default_history: 0,
        }
    }
}

/// Rejected pasteboard name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("pasteboard name is empty")]
    Empty,
    #[error("pasteboard name contains control characters")]
    ControlCharacter,
}

impl NameError {
    pub fn reason(self) -> &'static str {
        "invalid_name"
    }
}

fn validate_name(name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.chars().any(char::is_control) {
        return Err(NameError::ControlCharacter);
    }
    Ok(())
}

/// Registry of named pasteboards.
///
/// Constructed explicitly and shared by handle; independent registries
/// do not see each other.
pub struct PasteboardRegistry {
    config: ServerConfig,
    pasteboards: RwLock<HashMap<String, Arc<Pasteboard>>>,
}

impl PasteboardRegistry {
    /// Create a registry with the general pasteboard already present.
    pub fn new(config: ServerConfig) -> Self {
        let registry = Self {
            config,
            pasteboards: RwLock::new(HashMap::new()),
        };
        registry.insert_if_absent(GENERAL_PASTEBOARD);
        registry
    }

    /// Look up `name`, creating it on first reference.
    pub fn pasteboard_with_name(&self, name: &str) -> Result<Arc<Pasteboard>, NameError> {
        validate_name(name)?;
        Ok(self.insert_if_absent(name))
    }

    /// Create a pasteboard under a fresh, never-before-used name.
    pub fn pasteboard_with_unique_name(&self) -> Arc<Pasteboard> {
        loop {
            let name = uuid::Uuid::new_v4().to_string();
            let mut table = self.pasteboards.write();
            if !table.contains_key(&name) {
                let pasteboard = Arc::new(self.create(&name));
                table.insert(name, pasteboard.clone());
                return pasteboard;
            }
        }
    }

    /// Existing pasteboard only; never creates.
    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<Arc<Pasteboard>> {
        self.pasteboards.read().get(name).cloned()
    }

    /// Drop every ownership and subscription held by `client`.
    pub fn client_disconnected(&self, client: ClientId) {
        let pasteboards: Vec<Arc<Pasteboard>> = self.pasteboards.read().values().cloned().collect();
        for pasteboard in pasteboards {
            pasteboard.client_disconnected(client);
        }
    }

    /// Descriptors for every pasteboard, sorted by name.
    pub fn list(&self) -> Vec<PasteboardDescriptor> {
        let pasteboards: Vec<Arc<Pasteboard>> = self.pasteboards.read().values().cloned().collect();
        let mut out: Vec<_> = pasteboards.iter().map(|p| p.descriptor()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    fn insert_if_absent(&self, name: &str) -> Arc<Pasteboard> {
        if let Some(existing) = self.pasteboards.read().get(name) {
            return existing.clone();
        }
        let mut table = self.pasteboards.write();
        table
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(pasteboard = name, "pasteboard created");
                Arc::new(self.create(name))
            })
            .clone()
    }

    fn create(&self, name: &str) -> Pasteboard {
        Pasteboard::new(
            name.to_string(),
            self.config.default_history,
            self.config.callback_timeout,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::Claim;
    use crate::server::callback::Owner;
    use crate::server::callback::testing::Recorder;
    use crate::server::types::parse_type_list;

    fn registry() -> PasteboardRegistry {
        PasteboardRegistry::new(ServerConfig::default())
    }

    #[test]
    fn general_exists_at_start() {
        let r = registry();
        let general = r.get(GENERAL_PASTEBOARD).unwrap();
        let (types, count) = general.types_and_change_count();
        assert!(types.is_empty());
        assert_eq!(count.get(), 0);
        assert!(!general.descriptor().has_owner);
    }

    #[test]
    fn lookup_returns_same_instance() {
        let r = registry();
        let a = r.pasteboard_with_name("find").unwrap();
        let b = r.pasteboard_with_name("find").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn names_are_case_sensitive() {
        let r = registry();
        let a = r.pasteboard_with_name("Find").unwrap();
        let b = r.pasteboard_with_name("find").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn empty_name_rejected_without_creation() {
        let r = registry();
        assert_eq!(r.pasteboard_with_name("").err(), Some(NameError::Empty));
        assert_eq!(
            r.pasteboard_with_name("bad\nname").err(),
            Some(NameError::ControlCharacter)
        );
        assert_eq!(r.list().len(), 1);
    }

    #[test]
    fn unique_names_never_collide() {
        let r = registry();
        let a = r.pasteboard_with_unique_name();
        let b = r.pasteboard_with_unique_name();
        assert_ne!(a.name(), b.name());
        assert!(r.get(a.name()).is_some());
    }

    #[test]
    fn default_history_applies_to_new_pasteboards() {
        let r = PasteboardRegistry::new(ServerConfig {
            default_history: 3,
            ..ServerConfig::default()
        });
        assert_eq!(r.pasteboard_with_name("drag").unwrap().descriptor().history_depth, 3);
    }

    #[test]
    fn largest_cli_history_starts_without_preallocating() {
        let r = PasteboardRegistry::new(ServerConfig {
            default_history: u32::MAX as usize,
            ..ServerConfig::default()
        });
        let general = r.pasteboard_with_name("general").unwrap();
        assert_eq!(general.descriptor().history_depth, u32::MAX);
    }

    #[test]
    fn independent_registries_are_isolated() {
        let r1 = registry();
        let r2 = registry();
        r1.pasteboard_with_name("only-in-one").unwrap();
        assert!(r2.get("only-in-one").is_none());
    }

    #[test]
    fn concurrent_first_references_create_one_instance() {
        let r = registry();
        let instances: Vec<Arc<Pasteboard>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| r.pasteboard_with_name("race").unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn disconnect_clears_ownership_everywhere() {
        let r = registry();
        let client = ClientId::new();
        let rec = Recorder::new();
        for name in ["general", "find"] {
            r.pasteboard_with_name(name)
                .unwrap()
                .declare_types(
                    parse_type_list(["text"]).unwrap(),
                    Owner::new(client, rec.clone()),
                    Claim::Force,
                )
                .unwrap();
        }
        r.client_disconnected(client);
        assert!(r.list().iter().all(|d| !d.has_owner));
        assert!(r.list().iter().all(|d| d.change_count == 1));
    }

    #[test]
    fn list_is_sorted() {
        let r = registry();
        r.pasteboard_with_name("zeta").unwrap();
        r.pasteboard_with_name("alpha").unwrap();
        let names: Vec<_> = r.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "general", "zeta"]);
    }
}
