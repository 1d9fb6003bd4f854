use std::collections::HashMap;
use std::sync::Arc;
use wfcore::{StepHandler, StepType};

/// Registry of step handlers, one per step kind
pub struct HandlerRegistry {
    handlers: HashMap<StepType, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, replacing any previous handler for the same kind
    pub fn register(&mut self, handler: Arc<dyn StepHandler>) {
        let step_type = handler.step_type();
        tracing::info!("Registering step handler: {}", step_type);
        self.handlers.insert(step_type, handler);
    }

    pub fn get(&self, step_type: StepType) -> Option<&Arc<dyn StepHandler>> {
        self.handlers.get(&step_type)
    }

    /// Registered step kinds in declaration order
    pub fn list_step_types(&self) -> Vec<StepType> {
        StepType::ALL
            .into_iter()
            .filter(|t| self.handlers.contains_key(t))
            .collect()
    }

    /// Step kinds without a handler; steps of these kinds fail at dispatch
    pub fn missing_step_types(&self) -> Vec<StepType> {
        StepType::ALL
            .into_iter()
            .filter(|t| !self.handlers.contains_key(t))
            .collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
