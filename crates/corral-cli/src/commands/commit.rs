//! `corral commit`: Save a container's filesystem as an image.

use clap::Args;
use corral_common::config::RuntimeConfig;
use corral_runtime::Runtime;

/// Arguments for the `commit` command.
#[derive(Args, Debug)]
pub struct CommitArgs {
    /// Container id, id prefix or name.
    pub container: String,

    /// Name of the new image.
    pub image: String,
}

/// Executes the `commit` command and prints the image digest.
///
/// # Errors
///
/// Returns an error if the container has no workspace or the image name
/// is invalid or taken.
pub fn execute(args: CommitArgs, config: RuntimeConfig) -> anyhow::Result<()> {
    let artifact = Runtime::new(config)?.commit(&args.container, &args.image)?;
    println!("sha256:{}", artifact.digest);
    tracing::debug!(path = %artifact.path.display(), "image written");
    Ok(())
}
