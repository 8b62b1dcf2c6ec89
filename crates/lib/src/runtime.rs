//! Adapter over the container engine command line
//!
//! All interaction with Docker or Podman goes through [`Runtime`], which
//! owns the resolved invocation prefix (possibly `sudo <engine>`) and
//! normalizes the engines' query output into structured results. Engine
//! quirks, like Podman reporting the same image twice in `images` output,
//! are handled here so lifecycle code never sees them.

use std::io;
use std::process::Command;

use anyhow::{Context, Result};

use crate::IMAGE_NAMESPACE;

/// Supported container engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// Docker (the default)
    Docker,
    /// Podman
    Podman,
}

impl Engine {
    /// The engine's binary name.
    pub fn binary(&self) -> &'static str {
        match self {
            Engine::Docker => "docker",
            Engine::Podman => "podman",
        }
    }
}

/// Captured result of an external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code, -1 if terminated by a signal
    pub status: i32,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with status zero.
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Seam over external process execution.
///
/// Production code runs real processes via [`HostRunner`]; tests substitute
/// a scripted runner so lifecycle behavior can be asserted without a
/// container engine installed.
pub trait CommandRunner {
    /// Run `argv`, capturing stdout and stderr.
    fn run_captured(&self, argv: &[String]) -> io::Result<CommandOutput>;

    /// Run `argv` with stdio inherited from this process, returning the
    /// exit code.
    fn run_streamed(&self, argv: &[String]) -> io::Result<i32>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run_captured(&self, argv: &[String]) -> io::Result<CommandOutput> {
        (**self).run_captured(argv)
    }

    fn run_streamed(&self, argv: &[String]) -> io::Result<i32> {
        (**self).run_streamed(argv)
    }
}

/// Runs commands on the host via `std::process::Command`.
#[derive(Debug, Default)]
pub struct HostRunner;

impl CommandRunner for HostRunner {
    fn run_captured(&self, argv: &[String]) -> io::Result<CommandOutput> {
        let out = Command::new(&argv[0]).args(&argv[1..]).output()?;
        Ok(CommandOutput {
            status: out.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }

    fn run_streamed(&self, argv: &[String]) -> io::Result<i32> {
        let status = Command::new(&argv[0]).args(&argv[1..]).status()?;
        Ok(status.code().unwrap_or(-1))
    }
}

/// A tag/ID pair from the engine's image listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageListing {
    /// Namespaced image tag
    pub tag: String,
    /// Image ID as reported by the engine, `-` when missing
    pub id: String,
}

/// Adapter over one container engine.
///
/// The invocation prefix is resolved once at construction and reused for
/// every subsequent command in the process.
#[derive(Debug)]
pub struct Runtime<R> {
    engine: Engine,
    prefix: Vec<String>,
    runner: R,
}

impl<R: CommandRunner> Runtime<R> {
    /// Resolve the invocation prefix for `engine` and construct the adapter.
    ///
    /// Probes the engine with a no-op `ps` query. A Docker permission
    /// failure is retried with a `sudo` prefix, which is adopted if the
    /// probe then succeeds. A missing binary or any other failure is fatal.
    pub fn new(engine: Engine, runner: R) -> Result<Self> {
        let probe = vec![engine.binary().to_string(), "ps".to_string()];
        let out = match runner.run_captured(&probe) {
            Ok(out) => out,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                anyhow::bail!("The {} container engine is not installed", engine.binary())
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to execute {}", engine.binary()))
            }
        };

        let prefix = if out.success() {
            vec![engine.binary().to_string()]
        } else if engine == Engine::Docker && out.stderr.contains("permission denied") {
            println!("Using \"sudo\" for working with Docker containers");
            let sudo_probe = vec![
                "sudo".to_string(),
                engine.binary().to_string(),
                "ps".to_string(),
            ];
            let sudo_out = runner
                .run_captured(&sudo_probe)
                .context("Failed to execute sudo")?;
            if !sudo_out.success() {
                anyhow::bail!(
                    "Probing \"sudo {} ps\" failed:\n{}",
                    engine.binary(),
                    sudo_out.stderr
                );
            }
            vec!["sudo".to_string(), engine.binary().to_string()]
        } else {
            anyhow::bail!(
                "Probing \"{} ps\" gives an unknown error:\n{}",
                engine.binary(),
                out.stderr
            );
        };

        Ok(Self {
            engine,
            prefix,
            runner,
        })
    }

    /// The engine this adapter talks to.
    pub fn engine(&self) -> Engine {
        self.engine
    }

    fn command<S: AsRef<str>>(&self, args: &[S]) -> Vec<String> {
        self.prefix
            .iter()
            .cloned()
            .chain(args.iter().map(|a| a.as_ref().to_string()))
            .collect()
    }

    fn run_query(&self, argv: &[String]) -> Result<CommandOutput> {
        tracing::debug!(
            "Executing: {}",
            shlex::try_join(argv.iter().map(String::as_str)).unwrap_or_default()
        );
        self.runner
            .run_captured(argv)
            .with_context(|| format!("Failed to execute {}", self.engine.binary()))
    }

    /// Find the image ID for `tag`, or `None` if no such image is built.
    pub fn find_image_id(&self, tag: &str) -> Result<Option<String>> {
        let argv = self.command(&["images", tag, "--format", "{{.ID}}"]);
        let out = self.run_query(&argv)?;
        if !out.success() {
            anyhow::bail!(
                "{} returned {}:\n{}",
                self.engine.binary(),
                out.status,
                out.stderr
            );
        }
        // Some Podman versions report the same image more than once here;
        // only the first token is authoritative.
        Ok(out.stdout.split_whitespace().next().map(str::to_owned))
    }

    /// Resolve a possibly short image ID to its full canonical form.
    ///
    /// Returns `None` when the engine reports no ID for an ID that was just
    /// resolved, which means the image vanished between lookup and inspect.
    /// Podman cannot filter containers by a short ancestor ID, so removal
    /// always goes through this.
    pub fn inspect_full_id(&self, id: &str) -> Result<Option<String>> {
        let argv = self.command(&["inspect", id, "--format", "{{.ID}}"]);
        let out = self.run_query(&argv)?;
        if !out.success() {
            anyhow::bail!(
                "Inspecting image {} failed with status {}:\n{}",
                id,
                out.status,
                out.stderr
            );
        }
        let full_id = out.stdout.trim();
        if full_id.is_empty() {
            return Ok(None);
        }
        Ok(Some(full_id.to_string()))
    }

    /// List containers (running or stopped) instantiated from `full_id`.
    pub fn list_containers_using(&self, full_id: &str) -> Result<Vec<String>> {
        let filter = format!("ancestor={full_id}");
        let argv = self.command(&[
            "ps",
            "-a",
            "--filter",
            filter.as_str(),
            "--format",
            "{{.ID}}",
        ]);
        let out = self.run_query(&argv)?;
        if !out.success() {
            anyhow::bail!(
                "Querying containers for image {} failed with status {}:\n{}",
                full_id,
                out.status,
                out.stderr
            );
        }
        Ok(out
            .stdout
            .split_whitespace()
            .map(str::to_owned)
            .collect())
    }

    /// Force-remove an image by ID. Only called when no containers
    /// reference it.
    pub fn remove_image(&self, id: &str) -> Result<()> {
        let argv = self.command(&["rmi", "-f", id]);
        tracing::debug!(
            "Executing: {}",
            shlex::try_join(argv.iter().map(String::as_str)).unwrap_or_default()
        );
        let status = self
            .runner
            .run_streamed(&argv)
            .with_context(|| format!("Failed to execute {}", self.engine.binary()))?;
        if status != 0 {
            anyhow::bail!("Removing image {} failed with exit code {}", id, status);
        }
        Ok(())
    }

    /// Run an image build with the given `build ...` arguments, streaming
    /// the engine's output to the user.
    pub fn build(&self, args: &[String]) -> Result<()> {
        let argv = self.command(args);
        tracing::debug!(
            "Executing: {}",
            shlex::try_join(argv.iter().map(String::as_str)).unwrap_or_default()
        );
        let status = self
            .runner
            .run_streamed(&argv)
            .with_context(|| format!("Failed to execute {}", self.engine.binary()))?;
        if status != 0 {
            anyhow::bail!(
                "{} build failed with exit code {}",
                self.engine.binary(),
                status
            );
        }
        Ok(())
    }

    /// List every image whose tag is under the tool's reserved namespace.
    pub fn list_managed_images(&self) -> Result<Vec<ImageListing>> {
        let argv = self.command(&[
            "images",
            "--format",
            "{{.Repository}}:{{.Tag}} {{.ID}}",
        ]);
        let out = self.run_query(&argv)?;
        if !out.success() {
            anyhow::bail!(
                "{} returned {}:\n{}",
                self.engine.binary(),
                out.status,
                out.stderr
            );
        }
        let prefix = format!("{IMAGE_NAMESPACE}:");
        let mut images = Vec::new();
        for line in out.stdout.lines() {
            if !line.starts_with(&prefix) {
                continue;
            }
            let mut parts = line.split_whitespace();
            let Some(tag) = parts.next() else { continue };
            let id = parts.next().unwrap_or("-");
            images.push(ImageListing {
                tag: tag.to_string(),
                id: id.to_string(),
            });
        }
        Ok(images)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A scripted [`CommandRunner`] for exercising the adapter and the
    //! lifecycle code without a container engine.

    use std::cell::RefCell;
    use std::io;

    use super::{CommandOutput, CommandRunner};

    #[derive(Debug)]
    enum Response {
        Output(CommandOutput),
        NotFound,
    }

    #[derive(Debug)]
    struct Rule {
        tokens: Vec<String>,
        response: Response,
        // None = unlimited
        remaining: Option<usize>,
    }

    /// Scripted command runner. Rules are matched in registration order
    /// against the full argv; a rule matches when every one of its tokens
    /// appears in the argv. Unmatched commands succeed with empty output.
    /// Every invocation is recorded.
    #[derive(Debug, Default)]
    pub(crate) struct FakeRunner {
        rules: RefCell<Vec<Rule>>,
        calls: RefCell<Vec<Vec<String>>>,
    }

    impl FakeRunner {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        fn push(&self, tokens: &[&str], response: Response, remaining: Option<usize>) {
            self.rules.borrow_mut().push(Rule {
                tokens: tokens.iter().map(|t| t.to_string()).collect(),
                response,
                remaining,
            });
        }

        /// Respond to every command containing all `tokens` with `stdout`.
        pub(crate) fn on(&self, tokens: &[&str], stdout: &str) {
            self.push(
                tokens,
                Response::Output(CommandOutput {
                    status: 0,
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                }),
                None,
            );
        }

        /// Like `on`, but the rule is consumed after one match.
        pub(crate) fn on_once(&self, tokens: &[&str], stdout: &str) {
            self.push(
                tokens,
                Response::Output(CommandOutput {
                    status: 0,
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                }),
                Some(1),
            );
        }

        /// Respond to matching commands with a non-zero exit.
        pub(crate) fn fail(&self, tokens: &[&str], status: i32, stderr: &str) {
            self.push(
                tokens,
                Response::Output(CommandOutput {
                    status,
                    stdout: String::new(),
                    stderr: stderr.to_string(),
                }),
                None,
            );
        }

        /// Respond to matching commands as if the binary did not exist.
        pub(crate) fn missing(&self, tokens: &[&str]) {
            self.push(tokens, Response::NotFound, None);
        }

        /// All recorded invocations.
        pub(crate) fn calls(&self) -> Vec<Vec<String>> {
            self.calls.borrow().clone()
        }

        /// Number of recorded invocations containing `token`.
        pub(crate) fn count_calls_with(&self, token: &str) -> usize {
            self.calls
                .borrow()
                .iter()
                .filter(|argv| argv.iter().any(|a| a == token))
                .count()
        }

        fn respond(&self, argv: &[String]) -> io::Result<CommandOutput> {
            self.calls.borrow_mut().push(argv.to_vec());
            let mut rules = self.rules.borrow_mut();
            for rule in rules.iter_mut() {
                if rule.remaining == Some(0) {
                    continue;
                }
                if !rule.tokens.iter().all(|t| argv.contains(t)) {
                    continue;
                }
                if let Some(remaining) = rule.remaining.as_mut() {
                    *remaining -= 1;
                }
                return match &rule.response {
                    Response::Output(out) => Ok(out.clone()),
                    Response::NotFound => Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        "No such file or directory",
                    )),
                };
            }
            Ok(CommandOutput {
                status: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    impl CommandRunner for FakeRunner {
        fn run_captured(&self, argv: &[String]) -> io::Result<CommandOutput> {
            self.respond(argv)
        }

        fn run_streamed(&self, argv: &[String]) -> io::Result<i32> {
            self.respond(argv).map(|out| out.status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeRunner;
    use super::*;

    #[test]
    fn test_prefix_plain() {
        let runner = FakeRunner::new();
        let runtime = Runtime::new(Engine::Docker, &runner).unwrap();
        assert_eq!(runtime.command(&["images"]), vec!["docker", "images"]);
        assert_eq!(runner.calls()[0], vec!["docker", "ps"]);
    }

    #[test]
    fn test_prefix_sudo_fallback() {
        let runner = FakeRunner::new();
        // Registered first so it wins for the escalated probe; the failure
        // rule below also matches argv containing "docker ps".
        runner.on(&["sudo", "docker", "ps"], "");
        runner.fail(
            &["docker", "ps"],
            1,
            "permission denied while trying to connect to the Docker daemon socket",
        );
        let runtime = Runtime::new(Engine::Docker, &runner).unwrap();
        assert_eq!(
            runtime.command(&["images"]),
            vec!["sudo", "docker", "images"]
        );
        // Second probe ran under sudo
        assert_eq!(runner.calls()[1][0], "sudo");
    }

    #[test]
    fn test_no_sudo_fallback_for_podman() {
        let runner = FakeRunner::new();
        runner.fail(&["podman", "ps"], 1, "permission denied");
        let err = Runtime::new(Engine::Podman, &runner).unwrap_err();
        assert!(err.to_string().contains("unknown error"), "{err:#}");
        // Never escalated
        assert_eq!(runner.count_calls_with("sudo"), 0);
    }

    #[test]
    fn test_missing_engine_is_fatal() {
        let runner = FakeRunner::new();
        runner.missing(&["docker"]);
        let err = Runtime::new(Engine::Docker, &runner).unwrap_err();
        assert!(err.to_string().contains("not installed"), "{err:#}");
    }

    #[test]
    fn test_failed_sudo_probe_is_fatal() {
        let runner = FakeRunner::new();
        runner.fail(&["docker", "ps"], 1, "permission denied");
        runner.fail(&["sudo"], 1, "sudo: a password is required");
        let err = Runtime::new(Engine::Docker, &runner).unwrap_err();
        assert!(err.to_string().contains("sudo docker ps"), "{err:#}");
    }

    #[test]
    fn test_find_image_id_takes_first_token() {
        let runner = FakeRunner::new();
        // Podman may report the same image twice
        runner.on(&["images"], "1a2b3c4d5e6f\n1a2b3c4d5e6f\n");
        let runtime = Runtime::new(Engine::Podman, &runner).unwrap();
        let id = runtime
            .find_image_id("fuzzer-build-container:syzkaller-gcc-12")
            .unwrap();
        assert_eq!(id.as_deref(), Some("1a2b3c4d5e6f"));
    }

    #[test]
    fn test_find_image_id_absent() {
        let runner = FakeRunner::new();
        let runtime = Runtime::new(Engine::Docker, &runner).unwrap();
        let id = runtime
            .find_image_id("fuzzer-build-container:syzkaller-gcc-12")
            .unwrap();
        assert_eq!(id, None);
    }

    #[test]
    fn test_find_image_id_query_failure_is_fatal() {
        let runner = FakeRunner::new();
        runner.fail(&["images"], 125, "cannot connect");
        let runtime = Runtime::new(Engine::Docker, &runner).unwrap();
        let err = runtime
            .find_image_id("fuzzer-build-container:syzkaller-gcc-12")
            .unwrap_err();
        assert!(err.to_string().contains("returned 125"), "{err:#}");
    }

    #[test]
    fn test_inspect_full_id_empty_means_gone() {
        let runner = FakeRunner::new();
        runner.on(&["inspect"], "\n");
        let runtime = Runtime::new(Engine::Docker, &runner).unwrap();
        assert_eq!(runtime.inspect_full_id("1a2b3c4d5e6f").unwrap(), None);
    }

    #[test]
    fn test_list_managed_images_filters_namespace() {
        let runner = FakeRunner::new();
        runner.on(
            &["images", "{{.Repository}}:{{.Tag}} {{.ID}}"],
            "ubuntu:24.04 f0e1d2c3b4a5\n\
             fuzzer-build-container:syzkaller-gcc-12 1a2b3c4d5e6f\n\
             fuzzer-build-container:syzkaller-clang-9 6f5e4d3c2b1a\n",
        );
        let runtime = Runtime::new(Engine::Docker, &runner).unwrap();
        let images = runtime.list_managed_images().unwrap();
        assert_eq!(
            images,
            vec![
                ImageListing {
                    tag: "fuzzer-build-container:syzkaller-gcc-12".to_string(),
                    id: "1a2b3c4d5e6f".to_string(),
                },
                ImageListing {
                    tag: "fuzzer-build-container:syzkaller-clang-9".to_string(),
                    id: "6f5e4d3c2b1a".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_list_containers_using() {
        let runner = FakeRunner::new();
        runner.on(&["ps", "-a"], "aaa111\nbbb222\n");
        let runtime = Runtime::new(Engine::Docker, &runner).unwrap();
        let containers = runtime.list_containers_using("sha256:full").unwrap();
        assert_eq!(containers, vec!["aaa111", "bbb222"]);
        // The ancestor filter uses the full ID we were given
        assert!(runner
            .calls()
            .iter()
            .any(|argv| argv.contains(&"ancestor=sha256:full".to_string())));
    }
}
