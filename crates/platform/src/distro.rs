//! Distribution detection for the running worker

use tracing::debug;
use upaas_types::Distro;

/// Files consulted for the distribution identity, in order
pub const OS_RELEASE_PATHS: [&str; 2] = ["/etc/os-release", "/usr/lib/os-release"];

/// Identity of the distribution this process runs on. Name and version come
/// from `os-release`, the architecture from the compiled target.
pub async fn detect_distro() -> Distro {
    for path in OS_RELEASE_PATHS {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => return Distro::from_os_release(&content, std::env::consts::ARCH),
            Err(e) => debug!(path, error = %e, "cannot read os-release"),
        }
    }
    Distro::from_os_release("", std::env::consts::ARCH)
}

