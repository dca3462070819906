//! Test descriptors and selection criteria
//!
//! Descriptors are the immutable catalog view of a declared test.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Catalog entry type for runnable tests
pub const TEST_KIND: &str = "test";

/// A declared test as returned by the catalog
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDescriptor {
    pub id: String,

    #[serde(default, alias = "name")]
    pub display_name: String,

    #[serde(default)]
    pub group: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Executable run by the subprocess invoker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl TestDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Display name, falling back to the id
    pub fn name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.id
        } else {
            &self.display_name
        }
    }
}

#[cfg(test)]
impl TestDescriptor {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_command<I, S>(mut self, command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = Some(command.into());
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

impl fmt::Display for TestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{}/{}", self.group, self.id)
        }
    }
}

/// Raw catalog entry; only entries of type `test` are runnable
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(flatten)]
    pub descriptor: TestDescriptor,
}

fn default_kind() -> String {
    TEST_KIND.to_string()
}

// Entries are flat objects; `type` sits next to the descriptor fields.
impl<'de> Deserialize<'de> for CatalogEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .map_or_else(default_kind, str::to_string);
        let descriptor = TestDescriptor::deserialize(value).map_err(D::Error::custom)?;
        Ok(Self { kind, descriptor })
    }
}

impl CatalogEntry {
    #[cfg(test)]
    pub fn test(descriptor: TestDescriptor) -> Self {
        Self {
            kind: default_kind(),
            descriptor,
        }
    }

    pub fn is_test(&self) -> bool {
        self.kind == TEST_KIND
    }
}

/// Conjunctive selection filter over catalog entries
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl SelectionCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// True when no criterion was supplied
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.group.is_none() && self.namespace.is_none() && self.tags.is_empty()
    }

    /// Every supplied criterion must hold; a tag set matches when all tags are present
    pub fn matches(&self, test: &TestDescriptor) -> bool {
        self.id.as_deref().map_or(true, |id| test.id == id)
            && self.group.as_deref().map_or(true, |g| test.group == g)
            && self
                .namespace
                .as_deref()
                .map_or(true, |ns| test.namespace.as_deref() == Some(ns))
            && self.tags.iter().all(|tag| test.tags.contains(tag))
    }

    /// Query parameters for remote catalogs, always including `type=test`
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("type", TEST_KIND.to_string())];
        if let Some(id) = &self.id {
            pairs.push(("id", id.clone()));
        }
        if let Some(group) = &self.group {
            pairs.push(("group", group.clone()));
        }
        if let Some(namespace) = &self.namespace {
            pairs.push(("namespace", namespace.clone()));
        }
        if !self.tags.is_empty() {
            pairs.push(("tags", self.tags.join(",")));
        }
        pairs
    }
}

impl fmt::Display for SelectionCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(id) = &self.id {
            parts.push(format!("id={id}"));
        }
        if let Some(group) = &self.group {
            parts.push(format!("group={group}"));
        }
        if let Some(namespace) = &self.namespace {
            parts.push(format!("namespace={namespace}"));
        }
        if !self.tags.is_empty() {
            parts.push(format!("tags=[{}]", self.tags.join(",")));
        }
        if parts.is_empty() {
            write!(f, "<no criteria>")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login() -> TestDescriptor {
        TestDescriptor::new("login")
            .with_name("Login flow")
            .with_group("smoke")
            .with_namespace("app.auth")
            .with_tag("fast")
            .with_tag("auth")
    }

    #[test]
    fn test_empty_criteria() {
        assert!(SelectionCriteria::new().is_empty());
        assert!(!SelectionCriteria::new().tag("fast").is_empty());
    }

    #[test]
    fn test_criteria_are_conjunctive() {
        let test = login();
        assert!(SelectionCriteria::new().group("smoke").matches(&test));
        assert!(SelectionCriteria::new()
            .group("smoke")
            .namespace("app.auth")
            .tag("fast")
            .matches(&test));
        assert!(!SelectionCriteria::new()
            .group("smoke")
            .id("logout")
            .matches(&test));
        assert!(!SelectionCriteria::new().tag("fast").tag("slow").matches(&test));
        assert!(!SelectionCriteria::new().namespace("app").matches(&test));
    }

    #[test]
    fn test_name_falls_back_to_id() {
        assert_eq!(TestDescriptor::new("bare").name(), "bare");
        assert_eq!(login().name(), "Login flow");
    }

    #[test]
    fn test_query_pairs() {
        let pairs = SelectionCriteria::new().group("smoke").tag("a").tag("b").query_pairs();
        assert_eq!(
            pairs,
            vec![
                ("type", "test".to_string()),
                ("group", "smoke".to_string()),
                ("tags", "a,b".to_string()),
            ]
        );
    }

    #[test]
    fn test_criteria_display() {
        let criteria = SelectionCriteria::new().id("login").tag("fast");
        assert_eq!(criteria.to_string(), "id=login, tags=[fast]");
        assert_eq!(SelectionCriteria::new().to_string(), "<no criteria>");
    }

    #[test]
    fn test_catalog_entry_defaults_to_test() {
        let entry: CatalogEntry =
            serde_json::from_str(r#"{"id": "login", "name": "Login", "group": "smoke"}"#).unwrap();
        assert!(entry.is_test());
        assert_eq!(entry.descriptor.display_name, "Login");

        let entry: CatalogEntry =
            serde_json::from_str(r#"{"type": "template", "id": "base"}"#).unwrap();
        assert!(!entry.is_test());
    }
}
