//! Integration tests for builder

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tokio_util::sync::CancellationToken;
    use upaas_builder::*;
    use upaas_config::{BuildConfig, Metadata};
    use upaas_errors::{BuildError, Error};
    use upaas_events::{AppEvent, BuildEvent, GeneralEvent};
    use upaas_platform::unpack;
    use upaas_store::{LocalStorage, Storage};
    use upaas_types::Distro;

    struct Env {
        workdir: TempDir,
        storage_dir: TempDir,
    }

    impl Env {
        fn new() -> Self {
            Self {
                workdir: tempdir().unwrap(),
                storage_dir: tempdir().unwrap(),
            }
        }

        fn config(&self, extra: &str) -> BuildConfig {
            let uid = nix::unistd::getuid();
            let gid = nix::unistd::getgid();
            BuildConfig::from_toml_str(&format!(
                r#"
[paths]
workdir = "{workdir}"

[storage]
handler = "local"
settings = {{ dir = "{storage}" }}

[bootstrap]
timelimit = 60
commands = ["touch bootstrapped.txt"]
packages = ["base-files"]

[commands]
timelimit = 60
install = {{ cmd = "echo installing %package%" }}
uninstall = {{ cmd = "echo removing %package%" }}

[apps]
uid = {uid}
gid = {gid}

[sandbox]
mode = "directory"

[interpreters.ruby."1.8.7"]
packages = ["ruby1.8"]

{extra}
"#,
                workdir = self.workdir.path().display(),
                storage = self.storage_dir.path().display(),
            ))
            .unwrap()
        }

        fn storage(&self) -> Arc<dyn Storage> {
            Arc::new(LocalStorage::new(self.storage_dir.path()).unwrap())
        }

        fn builder(&self, extra_config: &str, extra_metadata: &str) -> Builder {
            Builder::with_storage(
                self.config(extra_config),
                metadata(extra_metadata),
                self.storage(),
                Distro::new("testos", "1", "x86_64"),
            )
            .unwrap()
        }

        fn leftover_workspaces(&self) -> usize {
            std::fs::read_dir(self.workdir.path()).unwrap().count()
        }
    }

    fn metadata(extra: &str) -> Metadata {
        Metadata::from_yaml_str(
            &format!(
                r#"interpreter:
  type: ruby
  versions: ["1.8.7"]
repository:
  clone: mkdir -p %destination% && echo cloned > %destination%/README
  update: echo updated > README
  info:
    revision: echo new
    author: echo "dev <dev@example.com>"
    date: echo 2026-01-01
    description: echo second commit
  changelog: echo %old%..%new%
actions:
  setup:
    main: echo "${{UPAAS_FRESH_PACKAGE:-false}}" > fresh.txt
files:
  config/app.yml: "name: test\n"
{extra}"#
            ),
            None,
        )
        .unwrap()
    }

    async fn unpacked(env: &Env, key: &str) -> TempDir {
        let out = tempdir().unwrap();
        unpack(&env.storage_dir.path().join(key), out.path())
            .await
            .unwrap();
        out
    }

    fn read(root: &Path, path: &str) -> String {
        std::fs::read_to_string(root.join(path)).unwrap()
    }

    #[tokio::test]
    async fn test_fresh_build_end_to_end() {
        let env = Env::new();
        let builder = env.builder("", "");

        let results: Vec<_> = builder
            .build_package(BuildRequest::fresh())
            .into_stream()
            .collect()
            .await;
        let results: Vec<_> = results.into_iter().map(Result::unwrap).collect();

        let progress: Vec<u8> = results.iter().map(|r| r.progress).collect();
        assert!(progress.windows(2).all(|w| w[0] < w[1]), "{progress:?}");
        assert!(!progress.contains(&46));

        let last = results.last().unwrap();
        assert_eq!(last.progress, 100);
        assert_eq!(last.parent, None);
        assert_eq!(last.interpreter_version.as_deref(), Some("1.8.7"));
        assert_eq!(last.distro_name, "testos");
        assert!(last.bytes > 0);
        assert_eq!(last.storage.as_deref(), Some("local"));
        let checksum = last.checksum.clone().unwrap();
        assert!(!checksum.is_empty());
        assert_eq!(last.filename.as_deref(), Some(checksum.as_str()));
        assert!(last.revision.is_empty());

        let storage = env.storage();
        assert!(storage.exists("testos-1-x86_64.tar.gz").await.unwrap());
        assert_eq!(storage.size(&checksum).await.unwrap(), last.bytes);

        let root = unpacked(&env, &checksum).await;
        assert!(root.path().join("bootstrapped.txt").exists());
        assert_eq!(read(root.path(), "home/app/fresh.txt"), "true\n");
        assert_eq!(read(root.path(), "home/app/README"), "cloned\n");
        assert_eq!(read(root.path(), "home/app/config/app.yml"), "name: test\n");
        assert_eq!(env.leftover_workspaces(), 0);
    }

    #[tokio::test]
    async fn test_incremental_build_reads_revision() {
        let env = Env::new();
        let builder = env.builder("", "");
        let fresh = builder
            .build_package(BuildRequest::fresh())
            .run_to_completion()
            .await
            .unwrap();
        let base = fresh.checksum.unwrap();

        let request = BuildRequest::incremental(base.clone()).with_previous_revision("old");
        let mut session = builder.build_package(request);
        let mut progress = Vec::new();
        let mut last = None;
        while let Some(result) = session.next().await {
            let result = result.unwrap();
            progress.push(result.progress);
            last = Some(result);
        }
        let last = last.unwrap();
        assert!(progress.contains(&46));
        assert_eq!(last.progress, 100);
        assert_eq!(last.parent.as_deref(), Some(base.as_str()));
        assert_eq!(last.revision.id.as_deref(), Some("new"));
        assert_eq!(last.revision.author.as_deref(), Some("dev <dev@example.com>"));
        assert_eq!(last.revision.description.as_deref(), Some("second commit"));
        assert_eq!(last.revision.changelog.as_deref(), Some("old..new"));

        let root = unpacked(&env, last.filename.as_deref().unwrap()).await;
        assert_eq!(read(root.path(), "home/app/fresh.txt"), "false\n");
        assert_eq!(read(root.path(), "home/app/README"), "updated\n");
    }

    #[tokio::test]
    async fn test_corrupted_base_package_is_rejected() {
        let env = Env::new();
        let builder = env.builder("", "");
        let fresh = builder
            .build_package(BuildRequest::fresh())
            .run_to_completion()
            .await
            .unwrap();
        let base = fresh.checksum.unwrap();
        std::fs::write(env.storage_dir.path().join(&base), b"tampered").unwrap();

        let err = builder
            .build_package(BuildRequest::incremental(base))
            .run_to_completion()
            .await
            .unwrap_err();
        assert!(err.is_system_error());
        assert!(err.to_string().contains("checksum"), "{err}");
        assert_eq!(env.leftover_workspaces(), 0);
    }

    #[tokio::test]
    async fn test_same_revision_has_no_changelog() {
        let env = Env::new();
        let builder = env.builder("", "");
        let base = builder
            .build_package(BuildRequest::fresh())
            .run_to_completion()
            .await
            .unwrap()
            .checksum
            .unwrap();

        let result = builder
            .build_package(BuildRequest::incremental(base).with_previous_revision("new"))
            .run_to_completion()
            .await
            .unwrap();
        assert_eq!(result.revision.id.as_deref(), Some("new"));
        assert_eq!(result.revision.changelog, None);
    }

    #[tokio::test]
    async fn test_missing_base_package_builds_fresh() {
        let env = Env::new();
        let (tx, mut rx) = upaas_events::channel();
        let builder = env.builder("", "").with_events(tx);
        let result = builder
            .build_package(BuildRequest::incremental("0000"))
            .run_to_completion()
            .await
            .unwrap();
        assert_eq!(result.parent, None);
        assert!(result.revision.is_empty());

        let mut warned = false;
        while let Ok(event) = rx.try_recv() {
            if let AppEvent::General(GeneralEvent::Warning { context, .. }) = event {
                warned |= context.as_deref() == Some("0000");
            }
        }
        assert!(warned);
    }

    fn with_main(mut metadata: Metadata, command: &str) -> Metadata {
        metadata.actions.setup.main = upaas_config::Script::single(command);
        metadata
    }

    #[tokio::test]
    async fn test_application_failure_is_user_error() {
        let env = Env::new();
        let builder = Builder::with_storage(
            env.config(""),
            with_main(metadata("env:\n  FAIL_CODE: 3\n"), "exit $FAIL_CODE"),
            env.storage(),
            Distro::new("testos", "1", "x86_64"),
        )
        .unwrap();
        let err = builder
            .build_package(BuildRequest::fresh())
            .run_to_completion()
            .await
            .unwrap_err();
        assert!(err.is_user_error(), "{err}");
        assert!(!err.is_system_error());
        assert!(err.to_string().contains("Application actions failed"));
        assert_eq!(env.leftover_workspaces(), 0);
    }

    #[tokio::test]
    async fn test_finalize_failure_is_system_error() {
        let env = Env::new();
        let builder = env.builder("[interpreters.actions]\nfinalize = \"exit 2\"\n", "");
        let mut session = builder.build_package(BuildRequest::fresh());
        let mut last_ok = 0;
        let err = loop {
            match session.next().await.unwrap() {
                Ok(result) => last_ok = result.progress,
                Err(e) => break e,
            }
        };
        assert_eq!(last_ok, 85);
        assert!(err.is_system_error());
        assert!(err.to_string().contains("Finalize actions failed"));
        assert!(session.next().await.is_none());
        assert_eq!(env.leftover_workspaces(), 0);
    }

    #[tokio::test]
    async fn test_bootstrap_failure() {
        let env = Env::new();
        let mut config = env.config("");
        config.bootstrap.commands = upaas_config::Script::single("exit 5");
        let builder = Builder::with_storage(
            config,
            metadata(""),
            env.storage(),
            Distro::new("testos", "1", "x86_64"),
        )
        .unwrap();
        let err = builder
            .build_package(BuildRequest::fresh())
            .run_to_completion()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Build(BuildError::OsBootstrap { .. })), "{err}");
        assert!(err.is_system_error());
        assert!(!env.storage().exists("testos-1-x86_64.tar.gz").await.unwrap());
        assert_eq!(env.leftover_workspaces(), 0);
    }

    #[tokio::test]
    async fn test_unusable_cached_image_is_rebuilt() {
        let env = Env::new();
        std::fs::write(env.storage_dir.path().join("testos-1-x86_64.tar.gz"), b"not an archive").unwrap();
        let (tx, mut rx) = upaas_events::channel();
        let builder = env.builder("", "").with_events(tx);

        let result = builder
            .build_package(BuildRequest::fresh())
            .run_to_completion()
            .await
            .unwrap();
        assert_eq!(result.progress, 100);

        let mut discarded = false;
        let mut bootstrapped = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                AppEvent::Build(BuildEvent::ImageDiscarded { .. }) => discarded = true,
                AppEvent::Build(BuildEvent::BootstrapCompleted { .. }) => bootstrapped = true,
                _ => {}
            }
        }
        assert!(discarded);
        assert!(bootstrapped);
    }

    #[tokio::test]
    async fn test_expired_image_is_discarded() {
        let env = Env::new();
        let mut config = env.config("");
        config.bootstrap.maxage = 0;
        std::fs::write(env.storage_dir.path().join("testos-1-x86_64.tar.gz"), b"old").unwrap();
        let builder = Builder::with_storage(
            config,
            metadata(""),
            env.storage(),
            Distro::new("testos", "1", "x86_64"),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!builder.has_valid_os_image().await.unwrap());
        assert!(!env.storage().exists("testos-1-x86_64.tar.gz").await.unwrap());

        builder.bootstrap_os().await.unwrap();
        assert!(env.storage().exists("testos-1-x86_64.tar.gz").await.unwrap());
    }

    #[tokio::test]
    async fn test_cancellation_reaps_workspace() {
        let env = Env::new();
        let token = CancellationToken::new();
        let builder = Builder::with_storage(
            env.config(""),
            with_main(metadata(""), "sleep 30"),
            env.storage(),
            Distro::new("testos", "1", "x86_64"),
        )
        .unwrap()
        .with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            token.cancel();
        });
        let err = builder
            .build_package(BuildRequest::fresh())
            .run_to_completion()
            .await
            .unwrap_err();
        canceller.await.unwrap();
        assert!(matches!(err, Error::Cancelled), "{err}");
        assert_eq!(env.leftover_workspaces(), 0);
    }

    #[tokio::test]
    async fn test_abort_between_stages() {
        let env = Env::new();
        let builder = env.builder("", "");
        let mut session = builder.build_package(BuildRequest::fresh());
        let first = session.next().await.unwrap().unwrap();
        assert_eq!(first.progress, 10);
        assert!(session.workspace_root().unwrap().join("bootstrapped.txt").exists());
        assert_eq!(env.leftover_workspaces(), 1);

        session.abort().await.unwrap();
        assert!(session.next().await.is_none());
        assert_eq!(env.leftover_workspaces(), 0);
    }

    #[tokio::test]
    async fn test_events_follow_progress() {
        let env = Env::new();
        let (tx, mut rx) = upaas_events::channel();
        let builder = env.builder("", "").with_events(tx);
        let results: Vec<_> = builder
            .build_package(BuildRequest::fresh())
            .into_stream()
            .collect()
            .await;

        let mut progress_events = 0;
        let mut completed = None;
        while let Ok(event) = rx.try_recv() {
            match event {
                AppEvent::Build(BuildEvent::Progress { .. }) => progress_events += 1,
                AppEvent::Build(BuildEvent::Completed { filename, .. }) => completed = Some(filename),
                _ => {}
            }
        }
        assert_eq!(progress_events, results.len());
        let last = results.last().unwrap().as_ref().unwrap();
        assert_eq!(completed, last.filename);
    }

    #[tokio::test]
    async fn test_unsupported_interpreter_version() {
        let env = Env::new();
        let mut metadata = metadata("");
        metadata.interpreter.versions = vec!["3".into()];
        let err = Builder::with_storage(
            env.config(""),
            metadata,
            env.storage(),
            Distro::new("testos", "1", "x86_64"),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Build(BuildError::UnsupportedInterpreterVersion { .. })
        ));
        assert!(err.is_user_error());
    }
}
