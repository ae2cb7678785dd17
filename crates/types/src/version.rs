//! Dotted-integer version helpers
//!
//! Interpreter versions are compared as tuples of integers. A requested
//! version may be a prefix (`2` or `2.1`) and matches every supported version
//! sharing that prefix:
//! - `5` matches `5.1`
//! - `5.1.4` matches `5.1`
//! - `5.1` does not match `5.2`

use std::collections::BTreeSet;

use upaas_errors::VersionError;

/// Wildcard version key used in the interpreter configuration matrix
pub const ANY_VERSION: &str = "any";

/// Parsed dotted version, ordered lexicographically component by component
pub type VersionTuple = Vec<u64>;

/// Parse `"1.4.5"` into `[1, 4, 5]`.
///
/// # Errors
///
/// Returns an error if any component is not a non-negative integer.
pub fn version_to_tuple(version: &str) -> Result<VersionTuple, VersionError> {
    let version = version.trim();
    if version.is_empty() {
        return Err(VersionError::InvalidVersion {
            input: version.to_string(),
            message: "empty version".to_string(),
        });
    }
    version
        .split('.')
        .map(|part| {
            part.parse::<u64>()
                .map_err(|e| VersionError::InvalidVersion {
                    input: version.to_string(),
                    message: e.to_string(),
                })
        })
        .collect()
}

/// Render `[1, 4, 5]` as `"1.4.5"`.
#[must_use]
pub fn version_tuple_to_string(tuple: &[u64]) -> String {
    tuple
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

/// Compare two versions on their common prefix. Unparsable input never matches.
#[must_use]
pub fn version_fuzzy_compare(left: &str, right: &str) -> bool {
    let (Ok(left), Ok(right)) = (version_to_tuple(left), version_to_tuple(right)) else {
        return false;
    };
    left.iter().zip(right.iter()).all(|(l, r)| l == r)
}

/// Return every supported version matching at least one requested specifier.
///
/// The wildcard key and unparsable entries are skipped. The result is
/// ordered by version tuple, lowest first.
pub fn select_supported_versions<'a, R, S>(requested: R, supported: S) -> Vec<String>
where
    R: IntoIterator<Item = &'a str> + Clone,
    S: IntoIterator<Item = &'a str>,
{
    let mut matched: BTreeSet<(VersionTuple, String)> = BTreeSet::new();
    for candidate in supported {
        if candidate == ANY_VERSION {
            continue;
        }
        let Ok(tuple) = version_to_tuple(candidate) else {
            continue;
        };
        if requested
            .clone()
            .into_iter()
            .any(|wanted| version_fuzzy_compare(wanted, candidate))
        {
            matched.insert((tuple, candidate.to_string()));
        }
    }
    matched.into_iter().map(|(_, version)| version).collect()
}

/// Pick the highest supported version matching any requested specifier.
pub fn select_best_version<'a, R, S>(requested: R, supported: S) -> Option<String>
where
    R: IntoIterator<Item = &'a str> + Clone,
    S: IntoIterator<Item = &'a str>,
{
    select_supported_versions(requested, supported).pop()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUPPORTED: [&str; 6] = ["1.8", "1.9", "2.0", "2.1", "3.1", "any"];

    #[test]
    fn to_tuple() {
        assert_eq!(version_to_tuple("1").unwrap(), vec![1]);
        assert_eq!(version_to_tuple("1.9").unwrap(), vec![1, 9]);
        assert_eq!(version_to_tuple("1.4.5").unwrap(), vec![1, 4, 5]);
        assert!(version_to_tuple("1.x").is_err());
        assert!(version_to_tuple("").is_err());
    }

    #[test]
    fn tuple_to_string() {
        assert_eq!(version_tuple_to_string(&[1]), "1");
        assert_eq!(version_tuple_to_string(&[1, 9]), "1.9");
        assert_eq!(version_tuple_to_string(&[1, 4, 5]), "1.4.5");
    }

    #[test]
    fn fuzzy_compare() {
        assert!(version_fuzzy_compare("5", "5.1"));
        assert!(version_fuzzy_compare("5.1.4", "5.1"));
        assert!(!version_fuzzy_compare("5.1", "5.2"));
        assert!(!version_fuzzy_compare("5.1.2", "5.2"));
        assert!(!version_fuzzy_compare("any", "5.2"));
    }

    #[test]
    fn supported_versions_by_prefix() {
        let found = select_supported_versions(["2"], SUPPORTED);
        assert_eq!(found, vec!["2.0", "2.1"]);
    }

    #[test]
    fn supported_versions_exact() {
        let found = select_supported_versions(["1.8", "1.9", "2.1"], SUPPORTED);
        assert_eq!(found, vec!["1.8", "1.9", "2.1"]);
        assert_eq!(
            select_best_version(["1.8", "1.9", "2.1"], SUPPORTED).as_deref(),
            Some("2.1")
        );
    }

    #[test]
    fn best_version_orders_numerically() {
        let supported = ["2.9", "2.10", "2.2"];
        assert_eq!(
            select_best_version(["2"], supported).as_deref(),
            Some("2.10")
        );
    }

    #[test]
    fn no_match() {
        assert!(select_best_version(["4"], SUPPORTED).is_none());
    }
}
