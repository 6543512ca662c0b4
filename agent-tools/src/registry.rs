//! Live tools, keyed by name, that agents dispatch to.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::future::Future;
use std::sync::{Arc, RwLock};

use agent_primitives::ScopeId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Result of registering or running a tool.
pub type ToolResult<T> = Result<T, ToolError>;

/// Where a registered tool came from.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolOrigin {
    /// Implemented natively and registered by the host.
    #[default]
    Builtin,
    /// Proposed as source, reviewed, and materialized from the catalog.
    Catalog,
}

/// Name, gating scopes, and provenance of a live tool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetadata {
    name: String,
    scope: ScopeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    required_scopes: Vec<ScopeId>,
    #[serde(default)]
    origin: ToolOrigin,
}

impl ToolMetadata {
    /// Builds metadata for `name`, deriving its `tool.<name>` scope.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidMetadata`] if the name is empty or does not
    /// form a valid `tool.<name>` scope.
    pub fn new(name: impl Into<String>) -> ToolResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(ToolError::InvalidMetadata {
                reason: "empty tool name".to_owned(),
            });
        }
        let scope = ScopeId::for_tool(&name).map_err(|err| ToolError::InvalidMetadata {
            reason: err.to_string(),
        })?;

        Ok(Self {
            name,
            scope,
            description: None,
            required_scopes: Vec::new(),
            origin: ToolOrigin::Builtin,
        })
    }

    /// Attaches a description shown in listings.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declares scopes required for invocation in addition to the tool's own.
    #[must_use]
    pub fn with_required_scopes(mut self, scopes: Vec<ScopeId>) -> Self {
        self.required_scopes = scopes;
        self
    }

    /// Sets where the tool came from.
    #[must_use]
    pub fn with_origin(mut self, origin: ToolOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the `tool.<name>` scope gating invocation.
    #[must_use]
    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }

    /// Description, if one was attached.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the additional scopes required for invocation.
    #[must_use]
    pub fn required_scopes(&self) -> &[ScopeId] {
        &self.required_scopes
    }

    /// Returns where the tool came from.
    #[must_use]
    pub fn origin(&self) -> ToolOrigin {
        self.origin
    }
}

/// A callable taking and returning JSON.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Runs the tool on `input`.
    async fn invoke(&self, input: Value) -> ToolResult<Value>;
}

#[async_trait]
impl<F, Fut> Tool for F
where
    F: Send + Sync + Fn(Value) -> Fut,
    Fut: Future<Output = ToolResult<Value>> + Send,
{
    async fn invoke(&self, input: Value) -> ToolResult<Value> {
        (self)(input).await
    }
}

/// Cheaply clonable reference to a live tool.
#[derive(Clone)]
pub struct ToolHandle {
    metadata: ToolMetadata,
    executor: Arc<dyn Tool>,
}

impl std::fmt::Debug for ToolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolHandle")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl ToolHandle {
    /// Metadata the tool was published with.
    #[must_use]
    pub fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    /// Runs the tool.
    ///
    /// # Errors
    ///
    /// Returns whatever the tool returns.
    pub async fn invoke(&self, input: Value) -> ToolResult<Value> {
        self.executor.invoke(input).await
    }
}

/// Name-ordered table of live tools.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<BTreeMap<String, ToolHandle>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a native tool. Unlike [`ToolRegistry::publish`], an existing
    /// tool of the same name is never replaced.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::DuplicateTool`] when the name is taken.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub fn register_tool<T>(&self, metadata: ToolMetadata, tool: T) -> ToolResult<()>
    where
        T: Tool + 'static,
    {
        let name = metadata.name().to_owned();
        match self.inner.write().expect("tool registry poisoned").entry(name) {
            Entry::Occupied(taken) => Err(ToolError::DuplicateTool {
                name: taken.key().clone(),
            }),
            Entry::Vacant(slot) => {
                debug!(tool = %slot.key(), "tool registered");
                slot.insert(ToolHandle {
                    metadata,
                    executor: Arc::new(tool),
                });
                Ok(())
            }
        }
    }

    /// Publishes a tool, replacing any existing registration with the same
    /// name. Returns the replaced handle.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub fn publish(&self, metadata: ToolMetadata, executor: Arc<dyn Tool>) -> Option<ToolHandle> {
        let mut inner = self.inner.write().expect("tool registry poisoned");
        let name = metadata.name().to_owned();
        let previous = inner.insert(name.clone(), ToolHandle { metadata, executor });
        debug!(tool = %name, replaced = previous.is_some(), "tool published");
        previous
    }

    /// Removes a tool, returning its handle if it was registered.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub fn unregister(&self, name: &str) -> Option<ToolHandle> {
        let removed = self
            .inner
            .write()
            .expect("tool registry poisoned")
            .remove(name);
        if removed.is_some() {
            debug!(tool = %name, "tool unregistered");
        }
        removed
    }

    /// Keeps only the tools whose metadata satisfies `keep`, returning the
    /// names of the tools removed.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub fn retain<F>(&self, mut keep: F) -> Vec<String>
    where
        F: FnMut(&ToolMetadata) -> bool,
    {
        let mut inner = self.inner.write().expect("tool registry poisoned");
        let mut removed = Vec::new();
        inner.retain(|name, handle| {
            let kept = keep(&handle.metadata);
            if !kept {
                removed.push(name.clone());
            }
            kept
        });
        removed
    }

    /// Looks up a live tool.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ToolHandle> {
        self.inner
            .read()
            .expect("tool registry poisoned")
            .get(name)
            .cloned()
    }

    /// Whether `name` is live.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner
            .read()
            .expect("tool registry poisoned")
            .contains_key(name)
    }

    /// Lists the names of all registered tools in sorted order.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.inner
            .read()
            .expect("tool registry poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Lists the metadata of all registered tools, sorted by name.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    #[must_use]
    pub fn list(&self) -> Vec<ToolMetadata> {
        self.inner
            .read()
            .expect("tool registry poisoned")
            .values()
            .map(|handle| handle.metadata.clone())
            .collect()
    }
}

/// Failures registering or running a tool.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool name does not form a valid scope.
    #[error("invalid tool name: {reason}")]
    InvalidMetadata {
        /// What is wrong with the name.
        reason: String,
    },

    /// A native tool of that name already exists.
    #[error("tool {name} already exists")]
    DuplicateTool {
        /// Conflicting name.
        name: String,
    },

    /// Input did not match the tool's parameters.
    #[error("invalid tool arguments: {reason}")]
    InvalidArguments {
        /// Human-readable description of the mismatch.
        reason: String,
    },

    /// Evaluation exceeded a sandbox limit.
    #[error("tool exceeded sandbox limit: {reason}")]
    LimitExceeded {
        /// Limit that was hit.
        reason: String,
    },

    /// The tool ran and failed.
    #[error("tool failed: {reason}")]
    Execution {
        /// Failure description.
        reason: String,
    },
}

impl ToolError {
    /// [`ToolError::Execution`] with `reason`.
    #[must_use]
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::Execution {
            reason: reason.into(),
        }
    }

    /// [`ToolError::InvalidArguments`] with `reason`.
    #[must_use]
    pub fn invalid_arguments(reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            reason: reason.into(),
        }
    }

    /// [`ToolError::LimitExceeded`] with `reason`.
    #[must_use]
    pub fn limit(reason: impl Into<String>) -> Self {
        Self::LimitExceeded {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn named(name: &str) -> ToolMetadata {
        ToolMetadata::new(name).unwrap()
    }

    fn identity() -> Arc<dyn Tool> {
        Arc::new(|input: Value| async move { Ok::<_, ToolError>(input) })
    }

    #[tokio::test]
    async fn native_tools_keep_their_first_registration() {
        let registry = ToolRegistry::new();
        registry
            .register_tool(named("echo"), |input: Value| async move { Ok::<_, ToolError>(input) })
            .unwrap();
        let clash = registry.register_tool(named("echo"), |_: Value| async move {
            Ok::<_, ToolError>(Value::Null)
        });
        assert!(matches!(clash, Err(ToolError::DuplicateTool { name }) if name == "echo"));

        let handle = registry.get("echo").unwrap();
        assert_eq!(handle.metadata().scope().as_str(), "tool.echo");
        assert_eq!(handle.invoke(json!({ "a": 1 })).await.unwrap(), json!({ "a": 1 }));
        assert!(registry.get("missing").is_none());
    }

    #[tokio::test]
    async fn publish_replaces_and_unregister_removes() {
        let registry = ToolRegistry::new();
        assert!(registry.publish(named("answer"), identity()).is_none());

        let seven: Arc<dyn Tool> = Arc::new(|_: Value| async move { Ok::<_, ToolError>(json!(7)) });
        assert!(registry.publish(named("answer"), seven).is_some());
        let handle = registry.get("answer").unwrap();
        assert_eq!(handle.invoke(Value::Null).await.unwrap(), json!(7));

        assert!(registry.unregister("answer").is_some());
        assert!(!registry.contains("answer"));
        assert!(registry.unregister("answer").is_none());
    }

    #[test]
    fn retain_reports_removed_tools() {
        let registry = ToolRegistry::new();
        registry.publish(named("native"), identity());
        registry.publish(named("scripted").with_origin(ToolOrigin::Catalog), identity());

        let removed = registry.retain(|meta| meta.origin() == ToolOrigin::Builtin);
        assert_eq!(removed, vec!["scripted".to_owned()]);
        assert_eq!(registry.names(), vec!["native".to_owned()]);
        assert_eq!(registry.list()[0].name(), "native");
    }

    #[test]
    fn names_must_form_scopes() {
        for bad in ["", "read file", "tab\tname"] {
            assert!(matches!(
                ToolMetadata::new(bad),
                Err(ToolError::InvalidMetadata { .. })
            ));
        }

        let meta = named("read_file")
            .with_description("reads files")
            .with_required_scopes(vec![ScopeId::new("filesystem.read").unwrap()]);
        assert_eq!(meta.description(), Some("reads files"));
        assert_eq!(meta.required_scopes()[0].as_str(), "filesystem.read");
        assert_eq!(meta.origin(), ToolOrigin::Builtin);
    }
}
