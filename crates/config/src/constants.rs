//! Fixed names and locations used when locating configuration

/// File name of the builder configuration
pub const CONFIG_FILENAME: &str = "builder.toml";

/// Environment variable pointing at a directory holding `builder.toml`
pub const CONFIG_DIR_ENV: &str = "UPAAS_CONFIG_DIR";

/// System-wide configuration directory, searched last
pub const SYSTEM_CONFIG_DIR: &str = "/etc/upaas";

/// Default application home inside the build root
pub const DEFAULT_APP_HOME: &str = "/home/app";

/// Default maximum age of a cached OS image, in days
pub const DEFAULT_IMAGE_MAX_AGE_DAYS: u64 = 7;

/// Placeholder replaced with the package name in install/uninstall templates
pub const PACKAGE_PLACEHOLDER: &str = "%package%";
