use std::collections::HashMap;
use std::sync::Arc;

use axiomflow_core::traits::StepHandler;

/// Step implementations keyed by step id.
#[derive(Default, Clone)]
pub struct StepRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the implementation for `step_id`, replacing any previous one.
    pub fn register(&mut self, step_id: impl Into<String>, handler: impl StepHandler) {
        self.handlers.insert(step_id.into(), Arc::new(handler));
    }

    pub fn with(mut self, step_id: impl Into<String>, handler: impl StepHandler) -> Self {
        self.register(step_id, handler);
        self
    }

    pub fn unregister(&mut self, step_id: &str) -> bool {
        self.handlers.remove(step_id).is_some()
    }

    pub fn get(&self, step_id: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(step_id).cloned()
    }

    /// Registered step ids, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("steps", &self.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axiomflow_core::error::AxiomError;
    use axiomflow_core::types::StepRequest;

    fn request(step: &str) -> StepRequest {
        StepRequest {
            step_id: step.into(),
            action: "run".into(),
            attempt: 1,
            inputs: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_register_and_call() {
        let registry = StepRegistry::new()
            .with("b", |_req: StepRequest| async { Ok::<_, AxiomError>(serde_json::json!("b")) })
            .with("a", |req: StepRequest| async move {
                Ok::<_, AxiomError>(serde_json::json!(req.step_id))
            });

        assert_eq!(registry.list(), vec!["a", "b"]);
        let handler = registry.get("a").unwrap();
        assert_eq!(handler.call(request("a")).await.unwrap(), serde_json::json!("a"));
        assert!(registry.get("c").is_none());
    }

    #[test]
    fn test_unregister() {
        let mut registry = StepRegistry::new();
        registry.register("a", |_req: StepRequest| async {
            Ok::<_, AxiomError>(serde_json::Value::Null)
        });
        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert!(registry.is_empty());
    }
}
