use async_trait::async_trait;
use graphcore::{StateUpdate, Tool, ToolContext, ToolError, ToolMetadata};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Registry of available tools.
///
/// Filled once at startup, then shared read-only behind an `Arc`.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool under its own name, replacing any previous entry
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            tracing::warn!("Tool {} already registered, overwriting", name);
        }
        tracing::info!("Registering tool: {}", name);
        self.tools.insert(name, tool);
    }

    /// Register a closure as a tool
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StateUpdate, ToolError>> + Send + 'static,
    {
        self.register(Arc::new(FnTool::new(name, f)));
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted
    pub fn list_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_metadata(&self, name: &str) -> Option<ToolMetadata> {
        self.tools.get(name).map(|t| t.metadata())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapter turning an async closure into a [`Tool`]
pub struct FnTool<F> {
    name: String,
    metadata: ToolMetadata,
    f: F,
}

impl<F> FnTool<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            metadata: ToolMetadata::default(),
            f,
        }
    }

    pub fn with_metadata(mut self, description: impl Into<String>, category: impl Into<String>) -> Self {
        self.metadata = ToolMetadata {
            description: description.into(),
            category: category.into(),
        };
        self
    }
}

#[async_trait]
impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StateUpdate, ToolError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, ctx: ToolContext) -> Result<StateUpdate, ToolError> {
        (self.f)(ctx).await
    }

    fn metadata(&self) -> ToolMetadata {
        self.metadata.clone()
    }
}
