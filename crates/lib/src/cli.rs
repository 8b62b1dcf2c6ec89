//! CLI argument definitions and validation
//!
//! Raw flags are validated into a [`Config`] before anything is asked of
//! the container runtime, so configuration errors never leave partial
//! state behind.

use anyhow::{anyhow, ensure, Result};
use clap::Parser;

use crate::compilers::{self, CompilerSpec};
use crate::runtime::Engine;

/// Manage container images for building Linux kernel fuzzers.
///
/// Images are built per compiler (GCC or Clang, never bundled together)
/// on the matching Ubuntu base, and tagged under the
/// `fuzzer-build-container` namespace.
#[derive(Debug, Parser, PartialEq, Eq)]
#[clap(name = "fuzzer-imagectl", version)]
pub struct CliOpts {
    /// Force use of the Docker container engine (default)
    #[clap(short, long)]
    pub docker: bool,

    /// Force use of the Podman container engine instead of Docker
    #[clap(short, long)]
    pub podman: bool,

    /// List all fuzzer-build-container images
    #[clap(short, long)]
    pub list: bool,

    /// Build a container image for the given compiler, or for all
    /// supported compilers when no value is given
    #[clap(short, long, value_name = "COMPILER", num_args = 0..=1, default_missing_value = "all")]
    pub build: Option<String>,

    /// Suppress the container image build output (only with --build)
    #[clap(short, long)]
    pub quiet: bool,

    /// Remove container images for the given compiler, or for all
    /// supported compilers when no value is given
    #[clap(short, long, value_name = "COMPILER", num_args = 0..=1, default_missing_value = "all")]
    pub remove: Option<String>,

    /// Fuzzer name (required for --build and --remove)
    #[clap(short, long, value_name = "NAME")]
    pub fuzzer: Option<String>,

    /// Additional apt packages to install, comma-separated (only with
    /// --build)
    #[clap(long, value_name = "PACKAGES")]
    pub deps: Option<String>,
}

/// Which compilers an action applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Every supported compiler
    All,
    /// A single compiler
    One(&'static CompilerSpec),
}

impl Selection {
    /// The compiler specs covered by this selection, in table order.
    pub fn specs(&self) -> Vec<&'static CompilerSpec> {
        match self {
            Selection::All => compilers::COMPILERS.iter().collect(),
            Selection::One(spec) => vec![spec],
        }
    }

    fn parse(compiler: &str) -> Result<Self> {
        if compiler == "all" {
            return Ok(Selection::All);
        }
        compilers::find(compiler)
            .map(Selection::One)
            .ok_or_else(|| anyhow!("Unknown compiler \"{compiler}\""))
    }
}

/// The single action selected for this invocation.
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    /// List images in the reserved namespace
    List,
    /// Build one or all images
    Build {
        /// Compilers to build for
        selection: Selection,
        /// Fuzzer name, part of the image tag
        fuzzer: String,
        /// Suppress streamed build output
        quiet: bool,
        /// Extra apt packages, space separated
        deps: Option<String>,
    },
    /// Remove one or all images
    Remove {
        /// Compilers to remove images for
        selection: Selection,
        /// Fuzzer name, part of the image tag
        fuzzer: String,
    },
}

/// Process-wide configuration, validated once at startup and immutable
/// afterwards.
#[derive(Debug, PartialEq, Eq)]
pub struct Config {
    /// Selected container engine
    pub engine: Engine,
    /// The action to perform
    pub action: Action,
}

impl CliOpts {
    /// Whether any of the action flags was given.
    pub fn requests_action(&self) -> bool {
        self.list || self.build.is_some() || self.remove.is_some()
    }

    /// Check flag consistency and resolve the options into a [`Config`].
    ///
    /// Every error produced here is a configuration error: nothing has
    /// been asked of the container runtime yet.
    pub fn validate(self) -> Result<Config> {
        ensure!(
            !(self.docker && self.podman),
            "Multiple container engines specified"
        );
        let engine = if self.podman {
            Engine::Podman
        } else {
            Engine::Docker
        };

        ensure!(
            self.requests_action(),
            "One of --list, --build or --remove is required"
        );
        ensure!(
            self.build.is_some() || !self.quiet,
            "\"--quiet\" should be used only with the \"--build\" option"
        );
        ensure!(
            self.build.is_some() || self.deps.is_none(),
            "\"--deps\" should be used only with the \"--build\" option"
        );

        let action = match (self.list, self.build.as_deref(), self.remove.as_deref()) {
            (true, None, None) => Action::List,
            (false, Some(compiler), None) => Action::Build {
                selection: Selection::parse(compiler)?,
                fuzzer: self
                    .fuzzer
                    .ok_or_else(|| anyhow!("--fuzzer is required for --build"))?,
                quiet: self.quiet,
                // apt-get wants a space separated package list
                deps: self.deps.map(|d| d.replace(',', " ")),
            },
            (false, None, Some(compiler)) => Action::Remove {
                selection: Selection::parse(compiler)?,
                fuzzer: self
                    .fuzzer
                    .ok_or_else(|| anyhow!("--fuzzer is required for --remove"))?,
            },
            _ => anyhow::bail!("Invalid combination of options"),
        };

        Ok(Config { engine, action })
    }
}
