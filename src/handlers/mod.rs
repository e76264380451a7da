mod example;

pub use example::ExampleHandler;

use crate::Handler;
use std::{collections::BTreeMap, sync::Arc};

type Constructor = fn() -> Arc<dyn Handler>;

/// Maps project names to handler constructors.
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Constructor>,
}

impl HandlerRegistry {
    pub fn new() -> HandlerRegistry {
        HandlerRegistry {
            handlers: BTreeMap::new(),
        }
    }

    /// Registry with every handler that ships with the crate.
    pub fn with_builtin() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register("example", || {
            Arc::new(ExampleHandler::default()) as Arc<dyn Handler>
        });
        registry
    }

    pub fn register<S: Into<String>>(&mut self, project: S, constructor: Constructor) {
        self.handlers.insert(project.into(), constructor);
    }

    pub fn get(&self, project: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(project).map(|constructor| constructor())
    }

    pub fn projects(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        HandlerRegistry::with_builtin()
    }
}
