//! Flattened, backend-agnostic entity representation.

use crate::Value;
use serde::{Deserialize, Serialize};

/// One named value of a flattened entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub value: Value,
    pub indexed: bool,
    /// Part of a repeated run (list element, map entry, nested list element).
    pub multiple: bool,
}

impl Property {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            indexed: false,
            multiple: false,
        }
    }

    pub fn indexed(mut self, indexed: bool) -> Self {
        self.indexed = indexed;
        self
    }

    pub fn multiple(mut self, multiple: bool) -> Self {
        self.multiple = multiple;
        self
    }
}

/// Ordered property sequence. Names may repeat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyList(Vec<Property>);

impl PropertyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    pub fn push(&mut self, property: Property) {
        self.0.push(property);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Property> {
        self.0.iter()
    }

    /// Every value stored under `name`, in order.
    pub fn values_of(&self, name: &str) -> Vec<&Value> {
        self.0
            .iter()
            .filter(|p| p.name == name)
            .map(|p| &p.value)
            .collect()
    }

    pub fn first_value(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|p| p.name == name)
    }

    /// Distinct property names in first-seen order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for p in &self.0 {
            if !names.contains(&p.name.as_str()) {
                names.push(&p.name);
            }
        }
        names
    }

    /// Drop every property that is not indexed.
    pub fn retain_indexed(&mut self) {
        self.0.retain(|p| p.indexed);
    }

    pub fn into_inner(self) -> Vec<Property> {
        self.0
    }
}

impl From<Vec<Property>> for PropertyList {
    fn from(properties: Vec<Property>) -> Self {
        Self(properties)
    }
}

impl FromIterator<Property> for PropertyList {
    fn from_iter<I: IntoIterator<Item = Property>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for PropertyList {
    type Item = Property;
    type IntoIter = std::vec::IntoIter<Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a PropertyList {
    type Item = &'a Property;
    type IntoIter = std::slice::Iter<'a, Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PropertyList {
        vec![
            Property::new("name", Value::Text("n".into())).indexed(true),
            Property::new("tags", Value::Text("a".into()))
                .indexed(true)
                .multiple(true),
            Property::new("tags", Value::Text("b".into()))
                .indexed(true)
                .multiple(true),
            Property::new("blob", Value::Bytes(vec![1, 2])),
        ]
        .into()
    }

    #[test]
    fn test_values_of_preserves_order() {
        let props = sample();
        assert_eq!(
            props.values_of("tags"),
            vec![&Value::Text("a".into()), &Value::Text("b".into())]
        );
        assert!(props.values_of("missing").is_empty());
    }

    #[test]
    fn test_names_are_distinct() {
        assert_eq!(sample().names(), vec!["name", "tags", "blob"]);
    }

    #[test]
    fn test_retain_indexed() {
        let mut props = sample();
        props.retain_indexed();
        assert_eq!(props.len(), 3);
        assert!(!props.contains("blob"));
    }
}
