#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Platform layer for the upaas package builder
//!
//! This crate wraps the Linux specific operations a build worker needs:
//! - Shell command execution with timeouts and merged output
//! - Filesystem jails (`chroot(2)` or plain directory sandboxes)
//! - Mount table inspection and unmounting
//! - Process discovery and termination for a directory tree
//! - Archive packing and unpacking
//! - Distribution detection

pub mod archive;
pub mod chroot;
pub mod command;
pub mod distro;
pub mod env;
pub mod mounts;
pub mod process;
pub mod reaper;
pub mod sandbox;

pub use archive::{pack, unpack};
pub use chroot::ChrootGuard;
pub use command::{execute, CommandOutput, ShellCommand};
pub use distro::detect_distro;
pub use env::{EnvScope, SAFE_ENVS};
pub use mounts::{mounted_under, umount_filesystems};
pub use process::{directory_pids, is_pid_running, kill_pid, pid_command, wait_for_pid};
pub use reaper::{kill_and_remove_dir, Reaper};
pub use sandbox::{Sandbox, SandboxScope};
