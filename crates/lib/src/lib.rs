//! # fuzzer-imagectl
//!
//! Manage container images for building Linux kernel fuzzers with GCC and
//! Clang toolchains. Each image targets exactly one compiler on its matching
//! Ubuntu base and is tagged under the `fuzzer-build-container` namespace,
//! so the container engine itself remains the single source of truth about
//! what is built.
//!
//! The tool works against either Docker or Podman through a small adapter
//! over the engine command line; see [`runtime`].

mod cli;
mod compilers;
mod image;
mod list;
pub mod runtime;

use anyhow::Result;

pub use cli::{Action, CliOpts, Config, Selection};
pub use compilers::{CompilerFamily, CompilerSpec, COMPILERS};
pub use image::{BuildRequest, ManagedImage, UserIdentity};
pub use runtime::Engine;

use runtime::{HostRunner, Runtime};

/// Image tag namespace reserved by this tool.
pub const IMAGE_NAMESPACE: &str = "fuzzer-build-container";

/// Execute the action selected by the validated configuration.
pub fn run(config: Config) -> Result<()> {
    match config.engine {
        Engine::Docker => println!("Using the Docker container engine"),
        Engine::Podman => {
            let who = UserIdentity::current()?;
            println!(
                "Using the Podman container engine; images belong to \"{}\" (uid {})",
                who.user, who.uid
            );
        }
    }

    let runtime = Runtime::new(config.engine, HostRunner)?;

    match config.action {
        Action::List => list::print_images(&runtime),
        Action::Build {
            selection,
            fuzzer,
            quiet,
            deps,
        } => {
            let request = BuildRequest {
                identity: UserIdentity::current()?,
                quiet,
                additional_deps: deps,
            };
            image::build_images(&runtime, &selection.specs(), &fuzzer, &request)?;
            list::print_images(&runtime)
        }
        Action::Remove { selection, fuzzer } => {
            image::remove_images(&runtime, &selection.specs(), &fuzzer)?;
            list::print_images(&runtime)
        }
    }
}
