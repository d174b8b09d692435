//! Named notification templates, compiled once and rendered per event.

use std::collections::HashMap;

use dashmap::DashMap;
use serde_json::Value;

use crate::notification::{Notification, Templater};

use super::types::{FuncMap, TemplateError, TemplateResult};

/// Store of compiled notification templates keyed by name.
pub struct TemplateService {
    funcs: FuncMap,
    templaters: DashMap<String, Templater>,
}

impl TemplateService {
    /// Compile every definition. The first syntax error aborts construction.
    pub fn new(definitions: HashMap<String, Notification>, funcs: FuncMap) -> TemplateResult<Self> {
        let service = Self {
            funcs,
            templaters: DashMap::with_capacity(definitions.len()),
        };
        for (name, definition) in definitions {
            service.register(&name, &definition)?;
        }
        Ok(service)
    }

    /// Compile and store a definition, replacing any previous one of the same name
    pub fn register(&self, name: &str, definition: &Notification) -> TemplateResult<()> {
        let templater = definition.get_templater(name, &self.funcs)?;
        if self.templaters.insert(name.to_string(), templater).is_some() {
            tracing::debug!(template = %name, "Replaced notification template");
        }
        Ok(())
    }

    /// Remove a template by name
    pub fn remove(&self, name: &str) -> TemplateResult<()> {
        self.templaters
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templaters.contains_key(name)
    }

    /// Registered template names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templaters.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn count(&self) -> usize {
        self.templaters.len()
    }

    /// Render the named templates, in order, into a single notification.
    ///
    /// Later templates overwrite the message and grouping key of earlier ones;
    /// a chat extension is only replaced by a template that defines one.
    pub fn format_notification(&self, context: &Value, names: &[&str]) -> TemplateResult<Notification> {
        let mut notification = Notification::default();
        for name in names {
            let templater = self
                .templaters
                .get(*name)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| TemplateError::NotFound(name.to_string()))?;
            templater(&mut notification, context)?;
        }
        Ok(notification)
    }
}
