use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::domain::{Recipient, TemplateId};

/// What the administrator asked to send: a stored template or text typed for this campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageSource {
    Template { template_id: TemplateId },
    Text { body: String },
}

/// Lookup of reusable message bodies maintained elsewhere.
pub trait TemplateStore: Send + Sync {
    fn fetch(&self, id: &TemplateId) -> Result<Option<String>, TemplateError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template '{0}' not found")]
    NotFound(String),
    #[error("template store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryTemplateStore {
    templates: HashMap<TemplateId, String>,
}

impl InMemoryTemplateStore {
    pub fn with_template(mut self, id: impl Into<String>, body: impl Into<String>) -> Self {
        self.templates.insert(TemplateId(id.into()), body.into());
        self
    }

    /// Load a JSON object of `template id -> body`.
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self, serde_json::Error> {
        let raw: HashMap<String, String> = serde_json::from_reader(reader)?;
        Ok(Self {
            templates: raw
                .into_iter()
                .map(|(id, body)| (TemplateId(id), body))
                .collect(),
        })
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let file = std::fs::File::open(path)?;
        Self::from_json_reader(file).map_err(std::io::Error::from)
    }
}

impl TemplateStore for InMemoryTemplateStore {
    fn fetch(&self, id: &TemplateId) -> Result<Option<String>, TemplateError> {
        Ok(self.templates.get(id).cloned())
    }
}

/// Resolves message sources and substitutes per-recipient placeholders.
#[derive(Clone)]
pub struct TemplateEngine {
    store: Arc<dyn TemplateStore>,
}

impl TemplateEngine {
    pub fn new(store: Arc<dyn TemplateStore>) -> Self {
        Self { store }
    }

    pub fn resolve(&self, source: &MessageSource) -> Result<String, TemplateError> {
        match source {
            MessageSource::Text { body } => Ok(body.clone()),
            MessageSource::Template { template_id } => self
                .store
                .fetch(template_id)?
                .ok_or_else(|| TemplateError::NotFound(template_id.0.clone())),
        }
    }

    /// Replace `{placeholder}` tokens. Unknown or empty values become an empty string so a
    /// missing optional field never stops a message from going out.
    pub fn render(template: &str, recipient: &Recipient) -> String {
        let mut rendered = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            rendered.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) if is_placeholder(&after[..close]) => {
                    rendered.push_str(&placeholder_value(&after[..close], recipient));
                    rest = &after[close + 1..];
                }
                _ => {
                    rendered.push('{');
                    rest = after;
                }
            }
        }

        rendered.push_str(rest);
        rendered
    }
}

fn is_placeholder(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn placeholder_value(token: &str, recipient: &Recipient) -> String {
    match token.to_ascii_lowercase().as_str() {
        "name" | "full_name" => recipient.display_name.clone(),
        "first_name" | "firstname" => recipient.first_name.clone(),
        "last_name" | "lastname" => recipient.last_name.clone(),
        "phone" => recipient.phone.clone(),
        other => recipient.fields.get(other).cloned().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Cursor;

    fn recipient() -> Recipient {
        let mut fields = BTreeMap::new();
        fields.insert("department".to_string(), "choir".to_string());
        Recipient {
            id: None,
            display_name: "Ama Mensah".to_string(),
            first_name: "Ama".to_string(),
            last_name: "Mensah".to_string(),
            phone: "+233244123456".to_string(),
            fields,
        }
    }

    #[test]
    fn substitutes_known_and_custom_placeholders() {
        let body = TemplateEngine::render(
            "Hello {first_name} {LAST_NAME}, {department} rehearsal is at 6pm.",
            &recipient(),
        );
        assert_eq!(body, "Hello Ama Mensah, choir rehearsal is at 6pm.");
    }

    #[test]
    fn missing_placeholder_values_become_empty() {
        let body = TemplateEngine::render("Dear {title} {name}!", &recipient());
        assert_eq!(body, "Dear  Ama Mensah!");
    }

    #[test]
    fn braces_that_are_not_placeholders_are_kept() {
        let body = TemplateEngine::render("Give {generously} :-{ } {", &recipient());
        assert_eq!(body, "Give  :-{ } {");
    }

    #[test]
    fn resolve_reports_missing_template() {
        let engine = TemplateEngine::new(Arc::new(
            InMemoryTemplateStore::default().with_template("welcome", "Welcome {name}"),
        ));
        let body = engine
            .resolve(&MessageSource::Template {
                template_id: TemplateId("welcome".to_string()),
            })
            .expect("template exists");
        assert_eq!(body, "Welcome {name}");

        let error = engine
            .resolve(&MessageSource::Template {
                template_id: TemplateId("missing".to_string()),
            })
            .expect_err("template missing");
        assert!(matches!(error, TemplateError::NotFound(id) if id == "missing"));
    }

    #[test]
    fn loads_templates_from_json() {
        let store = InMemoryTemplateStore::from_json_reader(Cursor::new(
            r#"{"birthday": "Happy birthday {first_name}!"}"#,
        ))
        .expect("json parses");
        assert_eq!(
            store
                .fetch(&TemplateId("birthday".to_string()))
                .expect("fetch"),
            Some("Happy birthday {first_name}!".to_string())
        );
    }
}
