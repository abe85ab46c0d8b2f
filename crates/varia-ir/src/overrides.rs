use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::template::Template;

/// Runtime values for named variables, supplied per render request or row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterOverrides(BTreeMap<String, String>);

impl ParameterOverrides {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder: add one override.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParameterOverrides {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<HashMap<String, String>> for ParameterOverrides {
    fn from(row: HashMap<String, String>) -> Self {
        row.into_iter().collect()
    }
}

/// A template with overrides applied, plus a record of which keys were used.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTemplate {
    pub template: Template,
    /// Override keys that matched at least one binding.
    pub applied: Vec<String>,
    /// Override keys that matched nothing. They are dropped without error.
    pub unmatched: Vec<String>,
}

impl ResolvedTemplate {
    /// Wrap a template that needs no overrides.
    pub fn unchanged(template: Template) -> Self {
        Self {
            template,
            applied: Vec::new(),
            unmatched: Vec::new(),
        }
    }
}

/// Merge runtime values into a copy of `template`.
///
/// Tags take the override named by their `variableName` (else `value`);
/// the base graphic and overlay layers take the override named by their
/// `variableName` (else current `fileName`) as their new document reference.
/// The input template is left untouched.
pub fn resolve(template: &Template, overrides: &ParameterOverrides) -> ResolvedTemplate {
    let mut resolved = template.clone();
    let mut applied = BTreeSet::new();

    for tag in &mut resolved.tags {
        let Some(key) = tag.binding_key().map(str::to_owned) else {
            continue;
        };
        if let Some(value) = overrides.get(&key) {
            tag.value = Some(value.to_string());
            applied.insert(key);
        }
    }

    for layer in std::iter::once(&mut resolved.graphic).chain(resolved.images.iter_mut()) {
        let key = layer.binding_key().to_owned();
        if let Some(reference) = overrides.get(&key) {
            layer.file_name = reference.to_string();
            applied.insert(key);
        }
    }

    let unmatched: Vec<String> = overrides
        .keys()
        .filter(|k| !applied.contains(*k))
        .map(str::to_owned)
        .collect();
    if !unmatched.is_empty() {
        tracing::debug!("ignoring unmatched override keys: {:?}", unmatched);
    }

    ResolvedTemplate {
        template: resolved,
        applied: applied.into_iter().collect(),
        unmatched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{Layer, Locator, TaggedVariable};

    fn sample() -> Template {
        let mut t = Template::new(Layer::new("graphics/base.svg").with_variable("graphic"));
        t.tags = vec![
            TaggedVariable::text("t1", 0).with_value("title"),
            TaggedVariable::text("t2", 1)
                .with_value("Default subtitle")
                .with_variable("subtitle"),
            TaggedVariable::color("c1", Locator::index(0)).with_variable("accent"),
        ];
        t.images = vec![
            Layer::new("images/avatar.svg").with_variable("avatar"),
            Layer::new("images/badge.svg"),
        ];
        t
    }

    #[test]
    fn test_tags_take_overrides() {
        let template = sample();
        let overrides = ParameterOverrides::new()
            .with("title", "Hello")
            .with("accent", "#00ff00");
        let resolved = resolve(&template, &overrides);

        assert_eq!(resolved.template.tags[0].value.as_deref(), Some("Hello"));
        assert_eq!(
            resolved.template.tags[1].value.as_deref(),
            Some("Default subtitle")
        );
        assert_eq!(resolved.template.tags[2].value.as_deref(), Some("#00ff00"));
        assert_eq!(resolved.applied, vec!["accent", "title"]);
        assert!(resolved.unmatched.is_empty());
    }

    #[test]
    fn test_input_not_mutated() {
        let template = sample();
        let before = template.clone();
        let _ = resolve(&template, &ParameterOverrides::new().with("title", "X"));
        assert_eq!(template, before);
    }

    #[test]
    fn test_layers_take_references() {
        let template = sample();
        let overrides = ParameterOverrides::new()
            .with("avatar", "images/row-7.svg")
            .with("images/badge.svg", "images/gold.svg")
            .with("graphic", "graphics/alt.svg");
        let resolved = resolve(&template, &overrides);

        assert_eq!(resolved.template.graphic.file_name, "graphics/alt.svg");
        assert_eq!(resolved.template.images[0].file_name, "images/row-7.svg");
        assert_eq!(resolved.template.images[1].file_name, "images/gold.svg");
    }

    #[test]
    fn test_unmatched_keys_are_recorded_not_fatal() {
        let template = sample();
        let overrides = ParameterOverrides::new()
            .with("nope", "1")
            .with("title", "T");
        let resolved = resolve(&template, &overrides);
        assert_eq!(resolved.unmatched, vec!["nope"]);
        assert_eq!(resolved.applied, vec!["title"]);
    }

    #[test]
    fn test_untouched_tag_stays_empty() {
        let mut template = Template::new(Layer::new("base.svg"));
        template.tags.push(TaggedVariable::text("t", 0).with_variable("name"));
        let resolved = resolve(&template, &ParameterOverrides::new());
        assert_eq!(resolved.template.tags[0].value, None);
    }

    #[test]
    fn test_from_row() {
        let mut row = HashMap::new();
        row.insert("title".to_string(), "Hi".to_string());
        let overrides = ParameterOverrides::from(row);
        assert_eq!(overrides.get("title"), Some("Hi"));
        assert_eq!(overrides.len(), 1);
    }
}
