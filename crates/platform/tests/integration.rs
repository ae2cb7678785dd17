//! Integration tests for platform

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;
    use upaas_errors::{CommandError, Error};
    use upaas_platform::*;

    #[tokio::test]
    async fn test_command_timeout_kills_child() {
        let started = Instant::now();
        let err = ShellCommand::new("sleep 2")
            .timeout(Duration::from_secs(1))
            .execute()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Command(CommandError::Timeout { seconds: 1, .. })
        ));
        assert!(started.elapsed() < Duration::from_millis(1900));
    }

    #[tokio::test]
    async fn test_command_returns_while_background_child_keeps_writing() {
        let started = Instant::now();
        let cmd = ShellCommand::new("(while true; do echo tick; sleep 0.05; done) & echo started")
            .timeout(Duration::from_secs(2));
        let run = cmd.execute();
        let out = tokio::time::timeout(Duration::from_secs(8), run)
            .await
            .expect("execute must return")
            .unwrap();
        assert_eq!(out.retcode, 0);
        assert!(out.lines.iter().any(|line| line == "started\n"));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_command_timeout_applies_to_background_output() {
        let started = Instant::now();
        let cmd = ShellCommand::new("(while true; do echo tick; sleep 0.05; done) & exit 0")
            .timeout(Duration::from_millis(300));
        let run = cmd.execute();
        let err = tokio::time::timeout(Duration::from_secs(8), run)
            .await
            .expect("execute must return")
            .unwrap_err();
        assert!(matches!(err, Error::Command(CommandError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_command_cwd_leaves_caller_untouched() {
        let dir = tempdir().unwrap();
        let before = std::env::current_dir().unwrap();
        let out = ShellCommand::new("pwd")
            .cwd(dir.path())
            .execute()
            .await
            .unwrap();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(out.lines, vec![format!("{}\n", expected.display())]);
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[tokio::test]
    async fn test_command_cancel() {
        let token = tokio_util::sync::CancellationToken::new();
        let command = ShellCommand::new("sleep 5").cancel(token.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });
        let err = command.execute().await.unwrap_err();
        canceller.await.unwrap();
        assert!(matches!(
            err,
            Error::Command(CommandError::Failed {
                exit_code: None,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_strip_unsafe_env_keeps_explicit_vars() {
        let out = ShellCommand::new("echo ${CARGO_PKG_NAME:-stripped} $MYENV")
            .env("MYENV", "kept")
            .strip_unsafe_env(true)
            .execute()
            .await
            .unwrap();
        assert_eq!(out.text(), "stripped kept");
    }

    #[tokio::test]
    async fn test_reaper_kills_processes_and_removes_dir() {
        let root = tempdir().unwrap();
        let dir = root.path().join("build");
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("nested/file.txt"), "data").unwrap();

        let mut child = std::process::Command::new("sleep")
            .arg("60")
            .current_dir(&dir)
            .spawn()
            .unwrap();
        let pid = i32::try_from(child.id()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(directory_pids(&dir).contains(&pid));

        Reaper::new()
            .with_term_timeout(Duration::from_secs(5))
            .kill_and_remove_dir(&dir)
            .await
            .unwrap();
        assert!(!dir.exists());
        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_reaper_ignores_missing_dir() {
        kill_and_remove_dir(Path::new("/nonexistent/upaas-reaper"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_pack_and_unpack_tree() {
        let src = tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("home/app")).unwrap();
        std::fs::write(src.path().join("home/app/README"), "hello").unwrap();
        std::os::unix::fs::symlink("README", src.path().join("home/app/link")).unwrap();

        let out = tempdir().unwrap();
        let archive = out.path().join("package.tar.gz");
        let bytes = pack(src.path(), &archive).await.unwrap();
        assert!(bytes > 0);
        assert_eq!(std::fs::metadata(&archive).unwrap().len(), bytes);

        let dest = tempdir().unwrap();
        unpack(&archive, dest.path()).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dest.path().join("home/app/README")).unwrap(),
            "hello"
        );
        assert_eq!(
            std::fs::read_link(dest.path().join("home/app/link")).unwrap(),
            Path::new("README")
        );
    }

    #[tokio::test]
    async fn test_unpack_missing_archive_fails() {
        let dest = tempdir().unwrap();
        let err = unpack(Path::new("/nonexistent/image.tar.gz"), dest.path())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Platform(_)));
    }

    #[tokio::test]
    async fn test_detect_distro_uses_target_arch() {
        let distro = detect_distro().await;
        assert_eq!(distro.arch, std::env::consts::ARCH);
        assert!(distro.image_filename().ends_with(".tar.gz"));
    }
}
