//! Image lifecycle: idempotent builds and guarded removal
//!
//! Each compiler maps to exactly one image tag; the engine is queried for
//! the current ID rather than tracking state locally, so repeated runs
//! always act on ground truth. Removal never touches an image that still
//! has containers instantiated from it.

use anyhow::{Context, Result};

use crate::compilers::CompilerSpec;
use crate::runtime::{CommandRunner, Runtime};
use crate::IMAGE_NAMESPACE;

/// Identity of the invoking user, injected into the image via build args
/// so the in-image user matches the host user.
#[derive(Debug)]
pub struct UserIdentity {
    /// Numeric user ID
    pub uid: u32,
    /// Numeric group ID
    pub gid: u32,
    /// User name
    pub user: String,
    /// Group name
    pub group: String,
}

impl UserIdentity {
    /// Resolve the identity of the current process.
    pub fn current() -> Result<Self> {
        let uid = rustix::process::getuid().as_raw();
        let gid = rustix::process::getgid().as_raw();
        let user = uzers::get_user_by_uid(uid)
            .with_context(|| format!("No passwd entry for uid {uid}"))?
            .name()
            .to_string_lossy()
            .into_owned();
        let group = uzers::get_group_by_gid(gid)
            .with_context(|| format!("No group entry for gid {gid}"))?
            .name()
            .to_string_lossy()
            .into_owned();
        Ok(Self {
            uid,
            gid,
            user,
            group,
        })
    }
}

/// Per-run build parameters shared by every image in a batch.
#[derive(Debug)]
pub struct BuildRequest {
    /// Identity to create inside the image
    pub identity: UserIdentity,
    /// Pass the engine's quiet flag, suppressing streamed build output
    pub quiet: bool,
    /// Extra apt packages, space separated
    pub additional_deps: Option<String>,
}

/// One compiler's image, tracked against the engine's ground truth.
#[derive(Debug)]
pub struct ManagedImage {
    spec: &'static CompilerSpec,
    tag: String,
    id: Option<String>,
}

impl ManagedImage {
    /// Derive the tag for `spec` and resolve its current image ID.
    pub fn new<R: CommandRunner>(
        runtime: &Runtime<R>,
        spec: &'static CompilerSpec,
        fuzzer: &str,
    ) -> Result<Self> {
        let tag = format!("{IMAGE_NAMESPACE}:{fuzzer}-{}", spec.id);
        let id = runtime.find_image_id(&tag)?;
        Ok(Self { spec, tag, id })
    }

    /// Current image ID, if the image is built.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The image tag.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Build the image unless it already exists.
    ///
    /// A second build for the same tag is a no-op. A failed engine build is
    /// fatal and is not retried; the engine's own output is the diagnostic.
    pub fn build<R: CommandRunner>(
        &mut self,
        runtime: &Runtime<R>,
        request: &BuildRequest,
    ) -> Result<()> {
        if let Some(id) = &self.id {
            println!("\nThe container image {} exists: {}", self.tag, id);
            return Ok(());
        }

        println!(
            "\nBuilding container image for {} (Ubuntu {})",
            self.spec.id, self.spec.ubuntu
        );

        let mut args = vec![
            "build".to_string(),
            "--build-arg".to_string(),
            format!("UBUNTU_VERSION={}", self.spec.ubuntu),
            "--build-arg".to_string(),
            format!("UNAME={}", request.identity.user),
            "--build-arg".to_string(),
            format!("GNAME={}", request.identity.group),
            "--build-arg".to_string(),
            format!("UID={}", request.identity.uid),
            "--build-arg".to_string(),
            format!("GID={}", request.identity.gid),
            // GCC_VERSION and CLANG_VERSION are mutually exclusive; only
            // the relevant family's version is passed.
            "--build-arg".to_string(),
            format!(
                "{}={}",
                self.spec.family.version_build_arg(),
                self.spec.version
            ),
        ];

        if let Some(deps) = &request.additional_deps {
            args.push("--build-arg".to_string());
            args.push(format!("ADDITIONAL_DEPS={deps}"));
        }

        args.push("-t".to_string());
        args.push(self.tag.clone());

        if request.quiet {
            println!("Quiet mode, please wait...");
            args.push("-q".to_string());
        }

        // Build context directory
        args.push(".".to_string());

        runtime.build(&args)?;
        self.id = runtime.find_image_id(&self.tag)?;
        Ok(())
    }

    /// Remove the image if it exists and no container references it.
    ///
    /// An image that vanished between lookup and inspect is treated as
    /// already removed. An in-use image is left alone with a warning; the
    /// caller sees the still-present ID and tallies the failure.
    pub fn remove<R: CommandRunner>(&mut self, runtime: &Runtime<R>) -> Result<()> {
        let Some(id) = self.id.clone() else {
            println!("\nNo container image for {}", self.spec.id);
            return Ok(());
        };

        println!("\nRemoving container image {} for {}", id, self.spec.id);

        let Some(full_id) = runtime.inspect_full_id(&id)? else {
            // Lost a race: something else removed the image first.
            println!("The image {id} is already removed");
            self.id = runtime.find_image_id(&self.tag)?;
            return Ok(());
        };

        let containers = runtime.list_containers_using(&full_id)?;
        if containers.is_empty() {
            runtime.remove_image(&id)?;
        } else {
            println!(
                "WARNING: not removing the image {}, containers use it: {}",
                id,
                containers.join(", ")
            );
        }

        // Re-resolve to reflect whatever actually happened
        self.id = runtime.find_image_id(&self.tag)?;
        Ok(())
    }
}

/// Build images for every compiler in `specs`, in order.
///
/// The first build failure aborts the rest of the batch; later builds are
/// assumed to depend on the same infrastructure being healthy.
pub fn build_images<R: CommandRunner>(
    runtime: &Runtime<R>,
    specs: &[&'static CompilerSpec],
    fuzzer: &str,
    request: &BuildRequest,
) -> Result<()> {
    for spec in specs.iter().copied() {
        let mut image = ManagedImage::new(runtime, spec, fuzzer)?;
        image.build(runtime, request)?;
    }
    Ok(())
}

/// Remove images for every compiler in `specs`, in order.
///
/// In-use images and benign races do not abort the batch; they are tallied
/// and the count of images still present afterwards is returned.
pub fn remove_images<R: CommandRunner>(
    runtime: &Runtime<R>,
    specs: &[&'static CompilerSpec],
    fuzzer: &str,
) -> Result<usize> {
    let mut failed = 0;
    for spec in specs.iter().copied() {
        let mut image = ManagedImage::new(runtime, spec, fuzzer)?;
        image.remove(runtime)?;
        if image.id().is_some() {
            failed += 1;
        }
    }
    if failed > 0 {
        println!("\nWARNING: failed to remove {failed} container image(s), see the log above");
    }
    Ok(failed)
}
