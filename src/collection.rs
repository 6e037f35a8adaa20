//! Package collections a pipeline run operates on.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A distribution major version, optionally narrowed to one software
/// collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Collection {
    /// Major EL version.
    pub el: u32,
    /// Software collection name (e.g. `rh-python36`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Collection {
    /// Creates a named collection.
    pub fn new(el: u32, name: impl Into<String>) -> Self {
        Self {
            el,
            name: Some(name.into()),
        }
    }

    /// Creates a collection covering the whole distribution version.
    pub fn distribution(el: u32) -> Self {
        Self { el, name: None }
    }

    /// Returns the collection name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Every combination of EL version and collection name, EL-major order.
    ///
    /// With no names, one nameless collection per EL version is produced.
    pub fn product(els: &[u32], names: &[String]) -> Vec<Collection> {
        if names.is_empty() {
            return els.iter().map(|&el| Collection::distribution(el)).collect();
        }
        els.iter()
            .flat_map(|&el| names.iter().map(move |name| Collection::new(el, name.clone())))
            .collect()
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "el{}/{}", self.el, name),
            None => write!(f, "el{}", self.el),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_is_el_major() {
        let names = vec!["rh-python36".to_string(), "devtoolset-7".to_string()];
        let product = Collection::product(&[6, 7], &names);
        assert_eq!(
            product,
            vec![
                Collection::new(6, "rh-python36"),
                Collection::new(6, "devtoolset-7"),
                Collection::new(7, "rh-python36"),
                Collection::new(7, "devtoolset-7"),
            ]
        );
    }

    #[test]
    fn product_without_names_yields_distributions() {
        assert_eq!(
            Collection::product(&[7, 8], &[]),
            vec![Collection::distribution(7), Collection::distribution(8)]
        );
    }

    #[test]
    fn display_includes_name_when_present() {
        assert_eq!(Collection::new(7, "rh-ruby25").to_string(), "el7/rh-ruby25");
        assert_eq!(Collection::distribution(8).to_string(), "el8");
    }
}
