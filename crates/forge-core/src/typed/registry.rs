//! HandlerRegistry: task_type -> handler.

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{Handler, TaskHandler, TypedHandler};
use super::job::Job;
use crate::domain::TaskType;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerRegistryError {
    #[error("handler for task_type={0} is already registered")]
    AlreadyRegistered(TaskType),
}

/// Fixed set of handler variants, assembled before the orchestrator starts.
///
/// ```ignore
/// let mut handlers = HandlerRegistry::new();
/// handlers.register::<PriceCheck, _>(PriceCheckHandler)?;
/// handlers.register_dyn(TaskType::new("noop"), Arc::new(handler_fn(|_| async { Ok(Outcome::empty()) })))?;
/// ```
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<J: Job, H: Handler<J> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), HandlerRegistryError> {
        self.register_dyn(
            TaskType::new(J::TYPE),
            Arc::new(TypedHandler::<J, H>::new(handler)),
        )
    }

    pub fn register_dyn(
        &mut self,
        task_type: TaskType,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), HandlerRegistryError> {
        if self.handlers.contains_key(&task_type) {
            return Err(HandlerRegistryError::AlreadyRegistered(task_type));
        }
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    pub fn get(&self, task_type: &TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &TaskType) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Sorted, for stable output.
    pub fn registered_types(&self) -> Vec<TaskType> {
        let mut types: Vec<_> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.registered_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Outcome;
    use crate::error::HandlerError;
    use crate::typed::handler::fixtures::{Echo, EchoHandler};
    use crate::typed::handler_fn;

    #[test]
    fn register_then_get() {
        let mut registry = HandlerRegistry::new();
        registry.register::<Echo, _>(EchoHandler).unwrap();

        assert!(registry.get(&TaskType::new(Echo::TYPE)).is_some());
        assert!(registry.get(&TaskType::new("other")).is_none());
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register::<Echo, _>(EchoHandler).unwrap();
        let err = registry.register::<Echo, _>(EchoHandler).unwrap_err();
        assert_eq!(
            err,
            HandlerRegistryError::AlreadyRegistered(TaskType::new(Echo::TYPE))
        );
    }

    #[test]
    fn registered_types_are_sorted() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_dyn(
                TaskType::new("zeta"),
                Arc::new(handler_fn(|_| async { Ok::<_, HandlerError>(Outcome::empty()) })),
            )
            .unwrap();
        registry.register::<Echo, _>(EchoHandler).unwrap();

        assert_eq!(
            registry.registered_types(),
            vec![TaskType::new(Echo::TYPE), TaskType::new("zeta")]
        );
    }
}
