use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use switchboard_core::tools::{Adapter, ToolDescriptor};

use crate::error::RegistryError;

/// A registered tool: descriptor, adapter and the compiled input schema.
pub struct ToolEntry {
    pub descriptor: ToolDescriptor,
    pub adapter: Adapter,
    validator: jsonschema::Validator,
}

impl ToolEntry {
    /// Check arguments against the compiled schema, collecting every violation.
    pub fn validate(&self, args: &serde_json::Value) -> Result<(), Vec<String>> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(args)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl std::fmt::Debug for ToolEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolEntry")
            .field("descriptor", &self.descriptor)
            .field("adapter", &self.adapter)
            .finish()
    }
}

#[derive(Default)]
struct RegistryInner {
    entries: Vec<Arc<ToolEntry>>,
    by_name: HashMap<String, usize>,
}

/// Registry of available tools, shared by every session.
///
/// Written at startup, read on every negotiation and invocation. Readers
/// share the lock.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<RegistryInner>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its descriptor's name.
    ///
    /// A name that is already taken is rejected and the existing entry is
    /// left untouched.
    pub fn register(&self, adapter: Adapter) -> Result<ToolDescriptor, RegistryError> {
        let descriptor = adapter.descriptor();
        let validator = jsonschema::validator_for(&descriptor.input_schema).map_err(|e| {
            RegistryError::InvalidSchema {
                name: descriptor.name.clone(),
                reason: e.to_string(),
            }
        })?;

        let mut inner = self.inner.write();
        if inner.by_name.contains_key(&descriptor.name) {
            warn!(tool = %descriptor.name, "rejecting duplicate tool registration");
            return Err(RegistryError::DuplicateTool(descriptor.name));
        }
        let index = inner.entries.len();
        inner.by_name.insert(descriptor.name.clone(), index);
        inner.entries.push(Arc::new(ToolEntry {
            descriptor: descriptor.clone(),
            adapter,
            validator,
        }));
        debug!(tool = %descriptor.name, kind = ?descriptor.output_kind, "tool registered");
        Ok(descriptor)
    }

    pub fn lookup(&self, name: &str) -> Result<ToolDescriptor, RegistryError> {
        self.entry(name)
            .map(|e| e.descriptor.clone())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Full entry, for dispatch.
    pub fn entry(&self, name: &str) -> Option<Arc<ToolEntry>> {
        let inner = self.inner.read();
        inner
            .by_name
            .get(name)
            .map(|&i| Arc::clone(&inner.entries[i]))
    }

    /// Descriptors in registration order.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.inner
            .read()
            .entries
            .iter()
            .map(|e| e.descriptor.clone())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner
            .read()
            .entries
            .iter()
            .map(|e| e.descriptor.name.clone())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().by_name.contains_key(name)
    }

    pub fn count(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Validate arguments for a named tool.
    pub fn validate(&self, name: &str, args: &serde_json::Value) -> Result<(), RegistryValidation> {
        match self.entry(name) {
            Some(entry) => entry.validate(args).map_err(RegistryValidation::Invalid),
            None => Err(RegistryValidation::NotFound),
        }
    }
}

/// Failure of [`ToolRegistry::validate`].
#[derive(Debug, PartialEq, Eq)]
pub enum RegistryValidation {
    NotFound,
    Invalid(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{EchoTool, ScriptedStream};
    use switchboard_core::tools::OutputKind;

    fn echo(name: &str) -> Adapter {
        Adapter::Call(Arc::new(EchoTool::new(name)))
    }

    #[test]
    fn register_and_lookup() {
        let registry = ToolRegistry::new();
        let registered = registry.register(echo("weather")).unwrap();

        assert!(registry.contains("weather"));
        assert!(!registry.contains("search"));
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.lookup("weather").unwrap(), registered);
    }

    #[test]
    fn duplicate_rejected_original_kept() {
        let registry = ToolRegistry::new();
        let first = EchoTool::new("weather")
            .with_schema(serde_json::json!({"type": "object", "required": ["city_code"]}));
        registry.register(Adapter::Call(Arc::new(first))).unwrap();

        let err = registry.register(echo("weather")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTool(ref n) if n == "weather"));
        assert_eq!(registry.count(), 1);
        let kept = registry.lookup("weather").unwrap();
        assert_eq!(kept.input_schema["required"][0], "city_code");
    }

    #[test]
    fn lookup_missing() {
        let registry = ToolRegistry::new();
        let err = registry.lookup("nope").unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[test]
    fn list_in_registration_order() {
        let registry = ToolRegistry::new();
        registry.register(echo("web_search")).unwrap();
        registry.register(echo("query_weather")).unwrap();
        registry
            .register(Adapter::Stream(Arc::new(ScriptedStream::endless("camera_stream"))))
            .unwrap();

        assert_eq!(
            registry.names(),
            vec!["web_search", "query_weather", "camera_stream"]
        );
        let list = registry.list();
        assert_eq!(list[2].output_kind, OutputKind::Stream);
    }

    #[test]
    fn invalid_schema_rejected() {
        let registry = ToolRegistry::new();
        let bad = EchoTool::new("broken").with_schema(serde_json::json!({"type": 12}));
        let err = registry.register(Adapter::Call(Arc::new(bad))).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidSchema { .. }));
        assert!(!registry.contains("broken"));
    }

    #[test]
    fn validate_against_schema() {
        let registry = ToolRegistry::new();
        let tool = EchoTool::new("query_weather").with_schema(serde_json::json!({
            "type": "object",
            "properties": {"city_code": {"type": "string"}},
            "required": ["city_code"]
        }));
        registry.register(Adapter::Call(Arc::new(tool))).unwrap();

        assert!(registry
            .validate("query_weather", &serde_json::json!({"city_code": "110000"}))
            .is_ok());
        match registry.validate("query_weather", &serde_json::json!({"city_code": 5})) {
            Err(RegistryValidation::Invalid(errors)) => assert!(!errors.is_empty()),
            other => panic!("expected invalid, got {other:?}"),
        }
        assert_eq!(
            registry.validate("missing", &serde_json::json!({})),
            Err(RegistryValidation::NotFound)
        );
    }

    #[test]
    fn concurrent_readers() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(echo("weather")).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        assert!(r.lookup("weather").is_ok());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
