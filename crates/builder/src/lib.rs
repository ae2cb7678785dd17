#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]
//! Application package building for upaas
//!
//! This crate resolves what a build runs from the worker configuration and
//! the application metadata, then drives the staged pipeline: base image,
//! system and interpreter actions, repository sync, application actions,
//! archive and upload. Progress is reported after every stage.

mod bootstrap;
mod build_plan;
mod builder;
mod context;
mod session;
mod workspace;

pub use bootstrap::{OsImageBuilder, WORKDIR_PLACEHOLDER};
pub use build_plan::BuildPlan;
pub use builder::{BuildRequest, Builder};
pub use context::BuildContext;
pub use session::{
    BuildSession, Stage, DESTINATION_PLACEHOLDER, FRESH_PACKAGE_ENV, NEW_REVISION_PLACEHOLDER,
    OLD_REVISION_PLACEHOLDER,
};
pub use workspace::Workspace;
