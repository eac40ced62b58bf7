//! `{{path.to.value}}` prompt templates.

use lectern_error::{FlowError, FlowErrorKind, StepError};
use regex::Regex;
use serde_json::Value;

/// A prompt with placeholders resolved against a step's input record.
///
/// Placeholders are dotted paths into the record; numeric segments index
/// arrays. Strings are substituted verbatim, other values as JSON.
///
/// # Examples
///
/// ```
/// use lectern_flow::PromptTemplate;
/// use serde_json::json;
///
/// let template = PromptTemplate::new("Quiz on {{input.topic}}: {{extract.points.0}}").unwrap();
/// let context = json!({"input": {"topic": "ratios"}, "extract": {"points": ["part to whole"]}});
/// assert_eq!(
///     template.render("generate", &context).unwrap(),
///     "Quiz on ratios: part to whole"
/// );
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    text: String,
    placeholders: Vec<(String, String)>,
}

impl PromptTemplate {
    /// Parse a template, collecting its placeholders.
    pub fn new(text: impl Into<String>) -> Result<Self, FlowError> {
        let text = text.into();
        let re = Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").map_err(|e| {
            FlowError::new(FlowErrorKind::Definition(format!(
                "Invalid template regex: {}",
                e
            )))
        })?;

        let mut placeholders = Vec::new();
        for cap in re.captures_iter(&text) {
            let path = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
            if path.is_empty() {
                return Err(FlowError::new(FlowErrorKind::Definition(format!(
                    "Empty placeholder in template: {}",
                    text
                ))));
            }
            let placeholder = (cap[0].to_string(), path.to_string());
            if !placeholders.contains(&placeholder) {
                placeholders.push(placeholder);
            }
        }

        Ok(Self { text, placeholders })
    }

    /// The raw template text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Dotted paths referenced by the template.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.placeholders.iter().map(|(_, path)| path.as_str())
    }

    /// Substitute every placeholder from `context`.
    ///
    /// A missing path is a validation failure of `step`.
    pub fn render(&self, step: &str, context: &Value) -> Result<String, StepError> {
        let mut result = self.text.clone();
        for (placeholder, path) in &self.placeholders {
            let value = lookup(context, path).ok_or_else(|| {
                StepError::validation(step, format!("Template value '{}' not found", path))
            })?;
            let replacement = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            result = result.replace(placeholder, &replacement);
        }
        Ok(result)
    }
}

/// Resolve a dotted path; numeric segments index arrays.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
