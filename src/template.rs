//! Template records, auto-selection rules, and the catalog collaborator.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

/// A scoped assertion making a template the default for requests matching
/// a project and/or title pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_pattern: Option<String>,
    #[serde(default = "default_true")]
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

/// Document describing the stored template artifact.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub rules: Vec<TemplateRule>,
}

/// A stored template artifact plus selection metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRecord {
    pub id: String,
    pub title: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub content: TemplateContent,
}

impl TemplateRecord {
    pub fn new(title: impl Into<String>, version: u32, content: TemplateContent) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            version,
            created_at: now,
            updated_at: now,
            content,
        }
    }
}

/// How specific a matching rule is: one point per constraint present.
fn rule_specificity(rule: &TemplateRule) -> u32 {
    u32::from(rule.project_id.is_some()) + u32::from(rule.title_pattern.is_some())
}

/// Whether a rule applies to the request.
///
/// An unset constraint always passes. A `titlePattern` that fails to
/// compile is treated as non-matching so a bad rule can never block
/// auto-selection.
fn rule_matches(rule: &TemplateRule, title: &str, project_id: Option<&str>) -> bool {
    let project_ok = match rule.project_id.as_deref() {
        Some(rule_project) => project_id == Some(rule_project),
        None => true,
    };
    if !project_ok {
        return false;
    }
    match rule.title_pattern.as_deref() {
        Some(pattern) => match Regex::new(pattern) {
            Ok(re) => re.is_match(title),
            Err(_) => false,
        },
        None => true,
    }
}

/// Scores one template against the request.
///
/// Each matching rule contributes `specificity + 1` (1..=3); the template
/// takes the maximum. A global default with no matching rule still scores
/// the baseline 1. Zero means the template is excluded.
fn template_score(template: &TemplateRecord, title: &str, project_id: Option<&str>) -> u32 {
    let mut score = 0;
    let mut matched = false;
    for rule in &template.content.rules {
        if rule_matches(rule, title, project_id) {
            score = score.max(rule_specificity(rule) + 1);
            matched = true;
        }
    }
    if !matched && template.content.is_default {
        score = score.max(1);
    }
    score
}

/// Selects the storage path of the best default template for a request.
///
/// Candidates are ordered by score, then version, then `updatedAt`, then
/// `createdAt`, all descending. A candidate without a storage path is
/// skipped as though it had not matched; when nothing applies the export
/// proceeds with no template.
pub fn select_template_path(
    catalog: &[TemplateRecord],
    title: &str,
    project_id: Option<&str>,
) -> Option<String> {
    let mut candidates: Vec<(&TemplateRecord, u32)> = catalog
        .iter()
        .map(|t| (t, template_score(t, title, project_id)))
        .filter(|(_, score)| *score > 0)
        .collect();
    candidates.sort_by(|(a, sa), (b, sb)| {
        sb.cmp(sa)
            .then_with(|| b.version.cmp(&a.version))
            .then_with(|| b.updated_at.cmp(&a.updated_at))
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    candidates
        .into_iter()
        .find_map(|(t, _)| t.content.storage_path.clone())
}

/// Scope of a "set default" request; empty scope means global.
#[derive(Debug, Clone, Default)]
pub struct DefaultScope {
    pub project_id: Option<String>,
    pub title_pattern: Option<String>,
}

impl DefaultScope {
    fn is_scoped(&self) -> bool {
        self.project_id.is_some() || self.title_pattern.is_some()
    }
}

/// Read access to the template store, full-scan acceptable at expected
/// catalog sizes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TemplateCatalog: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<TemplateRecord>>;
    async fn list(&self) -> Result<Vec<TemplateRecord>>;
}

/// In-memory template catalog.
///
/// Carries the full set-default lifecycle: the unscoped operation toggles
/// the global flag exclusively across the whole catalog in one batch, the
/// scoped one appends a rule (rules are never removed).
#[derive(Default)]
pub struct MemoryCatalog {
    templates: Mutex<Vec<TemplateRecord>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, template: TemplateRecord) {
        self.templates.lock().unwrap().push(template);
    }

    /// Makes a template the default, globally or for a scope.
    pub fn set_default(&self, id: &str, scope: Option<DefaultScope>) -> Result<()> {
        let mut templates = self.templates.lock().unwrap();
        if !templates.iter().any(|t| t.id == id) {
            anyhow::bail!("Template not found: {id}");
        }
        let now = Utc::now();
        match scope.filter(DefaultScope::is_scoped) {
            None => {
                // Global default is exclusive across the catalog.
                for t in templates.iter_mut() {
                    t.content.is_default = t.id == id;
                    t.updated_at = now;
                }
            }
            Some(scope) => {
                let target = templates
                    .iter_mut()
                    .find(|t| t.id == id)
                    .expect("presence checked above");
                target.content.rules.push(TemplateRule {
                    project_id: scope.project_id,
                    title_pattern: scope.title_pattern,
                    is_default: true,
                    created_at: now,
                });
                target.updated_at = now;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TemplateCatalog for MemoryCatalog {
    async fn get(&self, id: &str) -> Result<Option<TemplateRecord>> {
        Ok(self
            .templates
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<TemplateRecord>> {
        Ok(self.templates.lock().unwrap().clone())
    }
}
