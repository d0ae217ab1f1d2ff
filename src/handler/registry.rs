//! Name to handler lookup shared by the orchestrator and composite handlers

use crate::handler::{ConditionalExecutor, EmitHandler, ParallelExecutor, StepHandler};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::info;

pub const CONDITIONAL_HANDLER: &str = "conditional";
pub const PARALLEL_HANDLER: &str = "parallel";
pub const EMIT_HANDLER: &str = "emit";

type HandlerMap = HashMap<String, Arc<dyn StepHandler>>;

/// Step handler registry; clones share the same table
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HandlerMap>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with `conditional`, `parallel` and `emit`
    pub fn with_builtins() -> Self {
        let handlers = Arc::new_cyclic(|weak: &Weak<RwLock<HandlerMap>>| {
            let registry = WeakHandlerRegistry {
                handlers: weak.clone(),
            };
            let mut map: HandlerMap = HashMap::new();
            map.insert(
                CONDITIONAL_HANDLER.to_string(),
                Arc::new(ConditionalExecutor::new(registry.clone())),
            );
            map.insert(
                PARALLEL_HANDLER.to_string(),
                Arc::new(ParallelExecutor::new(registry)),
            );
            map.insert(EMIT_HANDLER.to_string(), Arc::new(EmitHandler));
            RwLock::new(map)
        });
        Self { handlers }
    }

    /// Register a handler; a later registration under the same name wins
    pub async fn register(&self, name: impl Into<String>, handler: Arc<dyn StepHandler>) {
        let name = name.into();
        self.handlers.write().await.insert(name.clone(), handler);
        info!("Registered step handler: {}", name);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.handlers.read().await.contains_key(name)
    }

    /// Registered handler names, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Non-owning handle for handlers that live inside this registry
    pub fn downgrade(&self) -> WeakHandlerRegistry {
        WeakHandlerRegistry {
            handlers: Arc::downgrade(&self.handlers),
        }
    }
}

/// Registry handle held by composite handlers, avoiding a reference cycle
#[derive(Clone)]
pub struct WeakHandlerRegistry {
    handlers: Weak<RwLock<HandlerMap>>,
}

impl WeakHandlerRegistry {
    pub fn upgrade(&self) -> Option<HandlerRegistry> {
        self.handlers
            .upgrade()
            .map(|handlers| HandlerRegistry { handlers })
    }
}
