//! Message template catalog for journey message bindings.
//!
//! The journey builder binds a template per channel on each step; the catalog
//! is where the picker lists candidates and where content is fetched for preview.

pub mod catalog;

pub use catalog::{CatalogTemplate, InMemoryCatalog, TemplateCatalog, TemplateContent, TemplateStatus, TemplateSummary};
