//! A tagged-union registry for serialized Builder descriptions, replacing runtime
//! "class by name" hydration: each Builder type registers a constructor keyed by a stable
//! tag, and a serialized description carries that tag plus its constructor arguments.
//! Unknown tags are rejected at load time as a [`BuilderError::Config`].

use crate::{builder::Builder, error::BuilderError};
use serde_json::Value;
use std::collections::HashMap;

/// A constructor for one Builder type: takes the description's `args` value, returns a
/// freshly constructed (not yet connected) Builder or a config error.
pub type BuilderConstructor = fn(Value) -> Result<Box<dyn Builder>, BuilderError>;

/// Maps stable tags to [`BuilderConstructor`]s. A Runner populates this once at startup
/// from every Builder type it knows about, then resolves serialized descriptions through
/// it.
#[derive(Default)]
pub struct BuilderRegistry {
    constructors: HashMap<String, BuilderConstructor>,
}

impl BuilderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `tag`. Re-registering the same tag overwrites the
    /// previous constructor.
    pub fn register(&mut self, tag: impl Into<String>, constructor: BuilderConstructor) {
        self.constructors.insert(tag.into(), constructor);
    }

    /// Resolve a serialized description of the form `{"type": "<tag>", "args": {...}}`
    /// into a constructed Builder.
    pub fn build(&self, description: &Value) -> Result<Box<dyn Builder>, BuilderError> {
        let tag = description
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| BuilderError::Config {
                message: "serialized builder description is missing a \"type\" tag".into(),
            })?;

        let constructor = self
            .constructors
            .get(tag)
            .ok_or_else(|| BuilderError::Config {
                message: format!("no builder registered for tag {tag:?}"),
            })?;

        let args = description.get("args").cloned().unwrap_or(Value::Null);
        constructor(args)
    }
}

impl std::fmt::Debug for BuilderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuilderRegistry")
            .field("tags", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn unknown_tag_is_a_config_error() {
        let registry = BuilderRegistry::new();
        let description = serde_json::json!({"type": "no_such_builder"});
        let err = registry.build(&description).unwrap_err();
        assert_matches!(err, BuilderError::Config { .. });
    }

    #[test]
    fn missing_type_tag_is_a_config_error() {
        let registry = BuilderRegistry::new();
        let description = serde_json::json!({"args": {}});
        let err = registry.build(&description).unwrap_err();
        assert_matches!(err, BuilderError::Config { .. });
    }
}
