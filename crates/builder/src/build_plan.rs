//! Action, environment and package resolution
//!
//! Three layers are merged once per build, in this order:
//! 1. worker-wide settings from the `[interpreters]` section
//! 2. the interpreter tables, first `any` then the selected version
//! 3. application metadata
//!
//! Later layers replace action lists wholesale and override environment
//! variables. Packages from every layer are unioned.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};
use upaas_config::{BuildConfig, InterpreterVersionConfig, Metadata, Script};
use upaas_errors::{BuildError, Error};
use upaas_types::{select_best_version, ActionStage, Distro, ANY_VERSION};

/// Everything a build runs, resolved before the first command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    pub interpreter: String,
    pub interpreter_version: String,
    pub actions: BTreeMap<ActionStage, Vec<String>>,
    pub env: BTreeMap<String, String>,
    pub packages: BTreeSet<String>,
}

impl BuildPlan {
    /// Merge worker configuration and application metadata for a worker
    /// running `distro`
    ///
    /// # Errors
    ///
    /// Returns `BuildError::UnsupportedInterpreterVersion` if none of the
    /// requested versions is configured on this worker.
    pub fn resolve(config: &BuildConfig, metadata: &Metadata, distro: &Distro) -> Result<Self, Error> {
        let interpreter = metadata.interpreter.kind.clone();
        let interpreter_version = select_best_version(
            metadata.interpreter.versions.iter().map(String::as_str),
            config.interpreters.supported_versions(&interpreter),
        )
        .ok_or_else(|| BuildError::UnsupportedInterpreterVersion {
            interpreter: interpreter.clone(),
            requested: metadata.interpreter.versions.clone(),
        })?;
        info!(interpreter = %interpreter, version = %interpreter_version, "selected interpreter version");

        let layers: Vec<&InterpreterVersionConfig> = [ANY_VERSION, interpreter_version.as_str()]
            .into_iter()
            .filter_map(|version| config.interpreters.version(&interpreter, version))
            .collect();

        let plan = Self {
            actions: resolve_actions(config, metadata, &layers),
            env: resolve_env(config, metadata, &layers),
            packages: resolve_packages(config, metadata, &layers, distro),
            interpreter,
            interpreter_version,
        };
        plan.log();
        Ok(plan)
    }

    /// Commands of one stage, in execution order
    #[must_use]
    pub fn actions(&self, stage: ActionStage) -> &[String] {
        self.actions.get(&stage).map_or(&[], Vec::as_slice)
    }

    fn log(&self) {
        for stage in ActionStage::ALL {
            info!(stage = %stage, count = self.actions(stage).len(), "commands for '{stage}' action");
            for line in self.actions(stage).iter().flat_map(|action| action.lines()) {
                info!("- {line}");
            }
        }
        if self.env.is_empty() {
            info!("no env variables set");
        }
        for (key, value) in &self.env {
            info!("{key} = {value}");
        }
        debug!(packages = ?self.packages, "resolved OS packages");
    }
}

fn resolve_actions(
    config: &BuildConfig,
    metadata: &Metadata,
    layers: &[&InterpreterVersionConfig],
) -> BTreeMap<ActionStage, Vec<String>> {
    let replace = |current: &mut Vec<String>, script: &Script| {
        if !script.is_empty() {
            *current = script.to_vec();
        }
    };

    let mut actions: BTreeMap<ActionStage, Vec<String>> = ActionStage::ALL
        .into_iter()
        .map(|stage| (stage, Vec::new()))
        .collect();
    for (stage, current) in &mut actions {
        match stage {
            ActionStage::System => replace(current, &config.interpreters.actions.system),
            ActionStage::Finalize => replace(current, &config.interpreters.actions.finalize),
            ActionStage::Interpreter => {
                for layer in layers {
                    replace(current, &layer.actions.interpreter);
                }
            }
            ActionStage::Before | ActionStage::Main | ActionStage::After => {
                for layer in layers {
                    replace(current, application_script(&layer.actions, *stage));
                }
                let setup = &metadata.actions.setup;
                let from_app = match stage {
                    ActionStage::Before => &setup.before,
                    ActionStage::Main => &setup.main,
                    _ => &setup.after,
                };
                replace(current, from_app);
            }
        }
    }
    actions
}

fn application_script(actions: &upaas_config::InterpreterActions, stage: ActionStage) -> &Script {
    match stage {
        ActionStage::Before => &actions.before,
        ActionStage::Main => &actions.main,
        _ => &actions.after,
    }
}

fn resolve_env(
    config: &BuildConfig,
    metadata: &Metadata,
    layers: &[&InterpreterVersionConfig],
) -> BTreeMap<String, String> {
    let mut env = config.interpreters.env.clone();
    for layer in layers {
        env.extend(layer.env.clone());
    }
    env.extend(metadata.env.clone());
    env
}

fn resolve_packages(
    config: &BuildConfig,
    metadata: &Metadata,
    layers: &[&InterpreterVersionConfig],
    distro: &Distro,
) -> BTreeSet<String> {
    config
        .interpreters
        .packages
        .iter()
        .chain(layers.iter().flat_map(|layer| layer.packages.iter()))
        .chain(metadata.os_packages(&distro.name, &distro.version))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BuildConfig {
        let dir = std::env::temp_dir();
        BuildConfig::from_toml_str(&format!(
            r#"
[paths]
workdir = "{}"

[storage]
handler = "local"

[bootstrap]
timelimit = 60
commands = "true"

[commands]
timelimit = 60
install = {{ cmd = "apt-get install %package%" }}
uninstall = {{ cmd = "apt-get remove %package%" }}

[apps]
uid = 1000
gid = 1000

[interpreters]
env = {{ LANG = "C", LEVEL = "global" }}
packages = ["git-core"]

[interpreters.actions]
system = "echo system"
finalize = "echo finalize"

[interpreters.ruby.any]
env = {{ LEVEL = "any", GEM_HOME = "/gems" }}
packages = ["libxml2-dev"]

[interpreters.ruby.any.actions]
interpreter = "echo any-interpreter"
before = "echo any-before"
main = ["echo any-main"]

[interpreters.ruby."1.9.3"]
env = {{ LEVEL = "version" }}
packages = ["ruby1.9.1"]

[interpreters.ruby."1.9.3".actions]
interpreter = "echo 1.9.3-interpreter"

[interpreters.ruby."2.0.0"]
packages = ["ruby2.0"]

[interpreters.ruby."2.0.0".actions]
main = "echo 2.0-main"
"#,
            dir.display()
        ))
        .unwrap()
    }

    fn metadata(versions: &str, extra: &str) -> Metadata {
        Metadata::from_yaml_str(
            &format!(
                "interpreter:\n  type: ruby\n  versions: {versions}\nrepository:\n  clone: echo clone\n  update: echo update\n{extra}"
            ),
            None,
        )
        .unwrap()
    }

    fn debian() -> Distro {
        Distro::new("debian", "7", "x86_64")
    }

    #[test]
    fn picks_highest_matching_version() {
        let plan = BuildPlan::resolve(&config(), &metadata("[1, 2]", ""), &debian()).unwrap();
        assert_eq!(plan.interpreter_version, "2.0.0");
        assert_eq!(plan.actions(ActionStage::Main), ["echo 2.0-main"]);
        assert_eq!(plan.actions(ActionStage::Interpreter), ["echo any-interpreter"]);
    }

    #[test]
    fn version_layer_overrides_any() {
        let plan = BuildPlan::resolve(&config(), &metadata("[\"1.9\"]", ""), &debian()).unwrap();
        assert_eq!(plan.interpreter_version, "1.9.3");
        assert_eq!(plan.actions(ActionStage::System), ["echo system"]);
        assert_eq!(plan.actions(ActionStage::Finalize), ["echo finalize"]);
        assert_eq!(plan.actions(ActionStage::Interpreter), ["echo 1.9.3-interpreter"]);
        assert_eq!(plan.actions(ActionStage::Before), ["echo any-before"]);
        assert_eq!(plan.actions(ActionStage::Main), ["echo any-main"]);
        assert!(plan.actions(ActionStage::After).is_empty());
        assert_eq!(plan.env["LEVEL"], "version");
        assert_eq!(plan.env["GEM_HOME"], "/gems");
        assert_eq!(plan.env["LANG"], "C");
    }

    #[test]
    fn metadata_layer_wins() {
        let extra = "env:\n  LEVEL: app\nactions:\n  setup:\n    main:\n      - bundle install\n      - rake assets:precompile\n";
        let plan = BuildPlan::resolve(&config(), &metadata("[\"1.9.3\"]", extra), &debian()).unwrap();
        assert_eq!(plan.actions(ActionStage::Main), ["bundle install", "rake assets:precompile"]);
        assert_eq!(plan.actions(ActionStage::Before), ["echo any-before"]);
        assert_eq!(plan.env["LEVEL"], "app");
    }

    #[test]
    fn packages_are_unioned() {
        let extra = "os:\n  debian:\n    packages: [libpq-dev, git-core]\n    7:\n      packages: [libssl1.0.0]\n  ubuntu:\n    packages: [libpq5]\n";
        let plan = BuildPlan::resolve(&config(), &metadata("[\"1.9.3\"]", extra), &debian()).unwrap();
        let expected: BTreeSet<String> = ["git-core", "libxml2-dev", "ruby1.9.1", "libpq-dev", "libssl1.0.0"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(plan.packages, expected);
    }

    #[test]
    fn unsupported_version_is_user_error() {
        let err = BuildPlan::resolve(&config(), &metadata("[\"3\"]", ""), &debian()).unwrap_err();
        assert!(matches!(
            err,
            Error::Build(BuildError::UnsupportedInterpreterVersion { .. })
        ));
        assert!(err.is_user_error());
    }
}
