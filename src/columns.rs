//! Column-name table shared by every row of a reader.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Ordered column names plus a name-to-index map.
///
/// Built once per reader (after header detection) and shared with every chunk
/// and row it produces, so `row["name"]` lookups are a single hash probe.
#[derive(Debug, Default, Clone)]
pub(crate) struct ColNames {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl ColNames {
    pub(crate) fn new(names: Vec<String>) -> Self {
        let index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        ColNames { names, index }
    }

    pub(crate) fn names(&self) -> &[String] {
        &self.names
    }

    pub(crate) fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.names.len()
    }
}

/// Late-bindable shared handle: stream readers discover their column names
/// during the first chunk's header trim, after rows already hold the handle.
pub(crate) type SharedColNames = Arc<OnceLock<ColNames>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_of_resolves_in_order() {
        let cols = ColNames::new(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(cols.index_of("a"), Some(0));
        assert_eq!(cols.index_of("c"), Some(2));
        assert_eq!(cols.index_of("d"), None);
        assert_eq!(cols.len(), 3);
        assert_eq!(cols.names(), ["a", "b", "c"]);
    }

    #[test]
    fn duplicate_names_keep_last_index() {
        let cols = ColNames::new(vec!["x".into(), "x".into()]);
        assert_eq!(cols.index_of("x"), Some(1));
    }
}
