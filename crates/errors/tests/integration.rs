//! Integration tests for error types

#[cfg(test)]
mod tests {
    use upaas_errors::*;

    #[test]
    fn test_error_conversion() {
        let cmd_err = CommandError::Timeout {
            command: "sleep 2".into(),
            seconds: 1,
        };
        let err: Error = cmd_err.into();
        assert!(matches!(err, Error::Command(_)));
        assert!(err.is_system_error());
        assert!(!err.is_user_error());
    }

    #[test]
    fn test_error_display() {
        let err = StorageError::FileNotFound {
            path: "/srv/images/debian-8-amd64.tar.gz".into(),
        };
        assert_eq!(
            err.to_string(),
            "file not found: /srv/images/debian-8-amd64.tar.gz"
        );
    }

    #[test]
    fn test_error_clone() {
        let err = BuildError::user("install failed");
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "test");
        let storage_err: StorageError = io_err.into();
        assert!(matches!(storage_err, StorageError::IoError { .. }));

        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let storage_err =
            StorageError::from_io_with_path(&missing, std::path::Path::new("/tmp/x"));
        assert!(storage_err.is_not_found());
    }

    #[test]
    fn test_build_error_classification() {
        let user: Error = BuildError::user("app action failed").into();
        assert!(user.is_user_error());
        assert!(!user.is_system_error());
        assert!(!user.is_retryable());

        let unsupported: Error = BuildError::UnsupportedInterpreterVersion {
            interpreter: "ruby".into(),
            requested: vec!["3.9".into()],
        }
        .into();
        assert!(unsupported.is_user_error());

        let system: Error = BuildError::system("archive failed").into();
        assert!(system.is_system_error());
        assert!(system.is_retryable());

        let bootstrap: Error = BuildError::OsBootstrap {
            message: "debootstrap".into(),
        }
        .into();
        assert!(bootstrap.is_system_error());
    }

    #[test]
    fn test_cancelled_is_neither_user_nor_system() {
        let err = Error::Cancelled;
        assert!(!err.is_user_error());
        assert!(!err.is_system_error());
        assert_eq!(err.user_code(), Some("error.cancelled"));
    }

    #[test]
    fn test_platform_error_becomes_system_build_error() {
        let err = PlatformError::UnmountFailed {
            path: "/proc".into(),
            message: "busy".into(),
        };
        let build: BuildError = err.into();
        assert!(!build.is_user_error());
    }

    #[test]
    fn test_command_exit_code() {
        let err = CommandError::Failed {
            command: "exit 3".into(),
            exit_code: Some(3),
            message: "exit status 3".into(),
        };
        assert_eq!(err.exit_code(), Some(3));
        assert!(!err.is_timeout());
    }
}
