use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use campaign_core::{CatalogError, Channel, TemplateId};

/// Template lifecycle status. Only active templates are offered to the picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStatus {
    Draft,
    Active,
    Archived,
}

/// Picker entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSummary {
    pub id: TemplateId,
    pub name: String,
}

/// Full template content, used for previews.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateContent {
    pub id: TemplateId,
    pub name: String,
    pub channel: Channel,
    pub subject: Option<String>,
    pub body: String,
}

/// Source of message templates.
#[async_trait]
pub trait TemplateCatalog: Send + Sync {
    async fn list_templates(&self, channel: Channel) -> Vec<TemplateSummary>;

    async fn get_template(&self, id: TemplateId) -> Result<TemplateContent, CatalogError>;
}

/// A template entry held by the in-memory catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogTemplate {
    pub id: TemplateId,
    pub name: String,
    pub channel: Channel,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default = "default_status")]
    pub status: TemplateStatus,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_status() -> TemplateStatus {
    TemplateStatus::Active
}

impl CatalogTemplate {
    pub fn new(id: TemplateId, name: impl Into<String>, channel: Channel) -> Self {
        Self {
            id,
            name: name.into(),
            channel,
            subject: None,
            body: String::new(),
            status: TemplateStatus::Active,
            updated_at: Utc::now(),
        }
    }
}

pub struct InMemoryCatalog {
    templates: DashMap<TemplateId, CatalogTemplate>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            templates: DashMap::new(),
        }
    }

    pub fn from_templates(templates: impl IntoIterator<Item = CatalogTemplate>) -> Self {
        let catalog = Self::new();
        for template in templates {
            catalog.register(template);
        }
        catalog
    }

    pub fn register(&self, template: CatalogTemplate) -> TemplateId {
        let id = template.id;
        self.templates.insert(id, template);
        id
    }

    /// Archive a template. Archived templates stay fetchable so existing
    /// bindings still preview, but are no longer listed.
    pub fn archive(&self, id: TemplateId) -> Result<(), CatalogError> {
        let mut entry = self
            .templates
            .get_mut(&id)
            .ok_or(CatalogError::NotFound(id))?;
        entry.status = TemplateStatus::Archived;
        entry.updated_at = Utc::now();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TemplateCatalog for InMemoryCatalog {
    async fn list_templates(&self, channel: Channel) -> Vec<TemplateSummary> {
        let mut listed: Vec<TemplateSummary> = self
            .templates
            .iter()
            .filter(|t| t.channel == channel && t.status == TemplateStatus::Active)
            .map(|t| TemplateSummary {
                id: t.id,
                name: t.name.clone(),
            })
            .collect();
        listed.sort_by_key(|t| t.id);
        debug!(%channel, count = listed.len(), "Listed catalog templates");
        listed
    }

    async fn get_template(&self, id: TemplateId) -> Result<TemplateContent, CatalogError> {
        let template = self.templates.get(&id).ok_or(CatalogError::NotFound(id))?;
        Ok(TemplateContent {
            id: template.id,
            name: template.name.clone(),
            channel: template.channel,
            subject: template.subject.clone(),
            body: template.body.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> InMemoryCatalog {
        InMemoryCatalog::from_templates([
            CatalogTemplate::new(9, "Winback email", Channel::Email),
            CatalogTemplate::new(7, "Welcome email", Channel::Email),
            CatalogTemplate::new(3, "Cart reminder", Channel::Sms),
        ])
    }

    #[tokio::test]
    async fn test_list_filters_by_channel_and_sorts() {
        let catalog = seeded();
        let email = catalog.list_templates(Channel::Email).await;
        assert_eq!(
            email.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![7, 9]
        );
        assert!(catalog.list_templates(Channel::Chat).await.is_empty());
    }

    #[tokio::test]
    async fn test_archived_templates_are_hidden_but_fetchable() {
        let catalog = seeded();
        catalog.archive(7).unwrap();

        let email = catalog.list_templates(Channel::Email).await;
        assert_eq!(email.len(), 1);

        let content = catalog.get_template(7).await.unwrap();
        assert_eq!(content.name, "Welcome email");
    }

    #[tokio::test]
    async fn test_get_unknown_template() {
        let catalog = seeded();
        assert_eq!(
            catalog.get_template(42).await,
            Err(CatalogError::NotFound(42))
        );
        assert_eq!(catalog.archive(42), Err(CatalogError::NotFound(42)));
    }
}
