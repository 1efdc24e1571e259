//! Host-wide command registry.

use std::collections::BTreeMap;
use std::sync::Mutex;

use kiln_workspace::ModuleId;
use tracing::debug;

use crate::error::{ContextError, ContextResult};
use crate::lock;

/// Canonical form of a command name: trimmed and lower-cased.
#[must_use]
pub fn normalize_command(name: &str) -> String {
    name.trim().to_lowercase()
}

/// A command owned by a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredCommand {
    /// Owning module.
    pub owner: ModuleId,
    /// Normalized command name.
    pub name: String,
    /// Permission required to run it, if any.
    pub permission: Option<String>,
}

/// Commands registered by all active modules, keyed by normalized name.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: Mutex<BTreeMap<String, RegisteredCommand>>,
}

impl CommandRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` for `owner`. Re-registering one's own command
    /// replaces its permission.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::InvalidName`] for a blank name and
    /// [`ContextError::CommandTaken`] if another module owns it.
    pub fn register(
        &self,
        owner: &ModuleId,
        name: &str,
        permission: Option<&str>,
    ) -> ContextResult<String> {
        let name = normalize_command(name);
        if name.is_empty() {
            return Err(ContextError::InvalidName("command name must not be blank".into()));
        }
        let mut commands = lock(&self.commands);
        if let Some(existing) = commands.get(&name)
            && &existing.owner != owner
        {
            return Err(ContextError::CommandTaken {
                command: name,
                owner: existing.owner.to_string(),
            });
        }
        debug!(module_id = %owner, command = %name, "Registered command");
        commands.insert(
            name.clone(),
            RegisteredCommand {
                owner: owner.clone(),
                name: name.clone(),
                permission: permission.map(str::to_string),
            },
        );
        Ok(name)
    }

    /// Remove a command. Returns the entry if it existed.
    pub fn unregister(&self, name: &str) -> Option<RegisteredCommand> {
        lock(&self.commands).remove(&normalize_command(name))
    }

    /// Look up a command.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<RegisteredCommand> {
        lock(&self.commands).get(&normalize_command(name)).cloned()
    }

    /// Commands owned by `owner`, sorted by name.
    #[must_use]
    pub fn owned_by(&self, owner: &ModuleId) -> Vec<String> {
        lock(&self.commands)
            .values()
            .filter(|c| &c.owner == owner)
            .map(|c| c.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_normalized() {
        let reg = CommandRegistry::new();
        let owner = ModuleId::from_static("shop");
        assert_eq!(reg.register(&owner, "  Buy ", None).unwrap(), "buy");
        assert!(reg.get("BUY").is_some());
        assert_eq!(reg.owned_by(&owner), vec!["buy"]);
    }

    #[test]
    fn other_owner_is_refused() {
        let reg = CommandRegistry::new();
        reg.register(&ModuleId::from_static("a"), "spawn", None).unwrap();
        let err = reg
            .register(&ModuleId::from_static("b"), "Spawn", None)
            .unwrap_err();
        assert!(matches!(err, ContextError::CommandTaken { .. }));
    }

    #[test]
    fn unregister_frees_the_name() {
        let reg = CommandRegistry::new();
        reg.register(&ModuleId::from_static("a"), "spawn", Some("spawn.use"))
            .unwrap();
        let removed = reg.unregister("spawn").unwrap();
        assert_eq!(removed.permission.as_deref(), Some("spawn.use"));
        reg.register(&ModuleId::from_static("b"), "spawn", None).unwrap();
    }
}
