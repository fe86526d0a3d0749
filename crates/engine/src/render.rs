//! Message rendering.
//!
//! Stored templates are Jinja templates rendered with the alert JSON as the
//! context, so `{{ labels.alertname }}`, `{% if %}` / `{% for %}` blocks,
//! filters and subscripts all work. Lookups on missing keys (including chains
//! such as `{{ missing.deep.path }}`) render as an empty string. Output is not
//! HTML-escaped; the rendered text is sent to rooms as HTML.

use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value;

use herald_common::error::AppError;

/// Render `template` against `alert`.
///
/// Returns `AppError::Validation` when the template does not parse or fails
/// while rendering.
pub fn render(template: &str, alert: &Value) -> Result<String, AppError> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Chainable);
    env.render_str(template, alert)
        .map_err(|e| AppError::Validation(format!("Message template error: {e}")))
}
