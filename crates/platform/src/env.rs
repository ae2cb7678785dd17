//! Child process environment
//!
//! The worker's own environment table is never modified. Each command gets
//! an `EnvScope` computed from the current environment plus overrides, which
//! is applied to the child only.

use std::collections::BTreeMap;
use std::ffi::OsString;
use tracing::debug;

/// Variables kept when unsafe variables are stripped
pub const SAFE_ENVS: [&str; 10] = [
    "HOME", "LOGNAME", "USER", "TERM", "PATH", "LANG", "LC_ALL", "TZ", "SHELL", "PWD",
];

/// Complete environment for one child process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvScope {
    vars: BTreeMap<OsString, OsString>,
    stripped: Vec<OsString>,
}

impl EnvScope {
    /// Build the child environment from the current process environment.
    ///
    /// With `strip_unsafe`, every inherited variable that is neither in
    /// [`SAFE_ENVS`] nor in `overrides` is left out.
    #[must_use]
    pub fn from_current<'a, I>(overrides: I, strip_unsafe: bool) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)> + Clone,
    {
        Self::from_base(std::env::vars_os(), overrides, strip_unsafe)
    }

    /// Build the child environment from an explicit base environment
    #[must_use]
    pub fn from_base<'a, B, I>(base: B, overrides: I, strip_unsafe: bool) -> Self
    where
        B: IntoIterator<Item = (OsString, OsString)>,
        I: IntoIterator<Item = (&'a String, &'a String)> + Clone,
    {
        let mut vars = BTreeMap::new();
        let mut stripped = Vec::new();
        for (key, value) in base {
            let keep = !strip_unsafe
                || SAFE_ENVS.iter().any(|safe| key == *safe)
                || overrides.clone().into_iter().any(|(name, _)| key == name.as_str());
            if keep {
                vars.insert(key, value);
            } else {
                stripped.push(key);
            }
        }
        for (key, value) in overrides {
            vars.insert(OsString::from(key), OsString::from(value));
        }
        Self { vars, stripped }
    }

    /// Value a variable will have in the child
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&OsString> {
        self.vars.get(&OsString::from(key))
    }

    /// Inherited variables left out of the child environment
    #[must_use]
    pub fn stripped(&self) -> &[OsString] {
        &self.stripped
    }

    /// Replace the child's environment with this scope
    pub fn apply(&self, command: &mut tokio::process::Command) {
        if !self.stripped.is_empty() {
            debug!(count = self.stripped.len(), "removing unsafe environment variables");
        }
        command.env_clear();
        command.envs(&self.vars);
    }
}
