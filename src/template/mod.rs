//! Notification template engine.
//!
//! This module provides:
//! - Compilation of template text with `{{ .field }}` placeholders, function
//!   calls and `|` pipelines
//! - `{{if}}` / `{{with}}` / `{{range}}` blocks with `{{else}}`, and `$`
//!   variables
//! - An injectable function registry ([`FuncMap`]) on top of the built-ins
//! - A store of named notification templates ([`TemplateService`])
//!
//! # Example
//!
//! ```
//! use alert_relay::template::{FuncMap, Template};
//! use serde_json::json;
//!
//! let template = Template::compile("greeting", "Hello, {{ .name | upper }}!", &FuncMap::new())?;
//! assert_eq!(template.render(&json!({"name": "world"}))?, "Hello, WORLD!");
//! # Ok::<(), alert_relay::template::TemplateError>(())
//! ```

mod engine;
mod functions;
mod parse;
mod service;
mod types;

pub use engine::Template;
pub use service::TemplateService;
pub use types::{FuncMap, TemplateError, TemplateFn, TemplateResult};
