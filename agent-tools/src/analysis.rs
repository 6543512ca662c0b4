//! Static call-graph analysis between tools.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::compiler::SyntaxError;

/// Extracts the functions a piece of tool source calls directly.
pub trait DependencyAnalyzer: Send + Sync {
    /// Returns the names of every function called by `source` that it does
    /// not define itself.
    ///
    /// # Errors
    ///
    /// Returns [`SyntaxError`] when the source cannot be parsed.
    fn direct_calls(&self, source: &str) -> Result<BTreeSet<String>, SyntaxError>;
}

/// Builds the one-hop dependency map between the supplied tools.
///
/// Calls are intersected with the set of supplied tool names and
/// self-references are dropped; tools without dependencies are omitted.
/// Tools whose source fails to parse are skipped with a warning.
pub fn dependency_map<'a, A, I>(analyzer: &A, tools: I) -> BTreeMap<String, BTreeSet<String>>
where
    A: DependencyAnalyzer + ?Sized,
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let tools: Vec<(&str, &str)> = tools.into_iter().collect();
    let known: BTreeSet<&str> = tools.iter().map(|(name, _)| *name).collect();

    let mut map = BTreeMap::new();
    for (name, source) in tools {
        let calls = match analyzer.direct_calls(source) {
            Ok(calls) => calls,
            Err(err) => {
                warn!(tool = name, %err, "skipping dependency analysis");
                continue;
            }
        };

        let deps: BTreeSet<String> = calls
            .into_iter()
            .filter(|call| call != name && known.contains(call.as_str()))
            .collect();
        if !deps.is_empty() {
            map.insert(name.to_owned(), deps);
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    struct WordCalls;

    impl DependencyAnalyzer for WordCalls {
        fn direct_calls(&self, source: &str) -> Result<BTreeSet<String>, SyntaxError> {
            if source == "!" {
                return Err(SyntaxError::general("bad"));
            }
            Ok(source.split_whitespace().map(str::to_owned).collect())
        }
    }

    #[test]
    fn keeps_only_known_non_self_calls() {
        let tools = [
            ("a", "a b print"),
            ("b", "c"),
            ("c", ""),
            ("d", "!"),
        ];
        let map = dependency_map(&WordCalls, tools);

        assert_eq!(map.len(), 2);
        assert_eq!(map["a"], BTreeSet::from(["b".to_owned()]));
        assert_eq!(map["b"], BTreeSet::from(["c".to_owned()]));
        assert!(!map.contains_key("c"));
        assert!(!map.contains_key("d"));
    }
}
