//! Subcommands
//!
//! Each command resolves its URIs through one shared [`Resolver`], so
//! connections to the same server are pooled across the whole invocation.

use anyhow::Context;
use clap::Subcommand;
use rp_core::{HttpConfig, PackageResources, Resolver, ResourcePath};

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

mod cat;
mod cp;
mod ls;
mod mkdir;
mod put;
mod rm;
mod stat;

/// Package name under which the CLI's own files are served as `resource://`
pub const CLI_PACKAGE: &str = "respath-cli";

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the contents of a resource
    Cat(cat::CatArgs),

    /// Write stdin or a local file to a resource
    Put(put::PutArgs),

    /// Show metadata for one or more resources
    Stat(stat::StatArgs),

    /// List a directory
    Ls(ls::LsArgs),

    /// Delete resources
    Rm(rm::RmArgs),

    /// Copy or move a resource, across schemes if needed
    Cp(cp::CpArgs),

    /// Create a directory and its parents
    Mkdir(mkdir::MkdirArgs),
}

pub async fn execute(command: Commands, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let resolver = match build_resolver() {
        Ok(r) => r,
        Err(e) => {
            formatter.error(&format!("{e:#}"));
            return ExitCode::UsageError;
        }
    };

    match command {
        Commands::Cat(args) => cat::execute(args, &resolver, &formatter).await,
        Commands::Put(args) => put::execute(args, &resolver, &formatter).await,
        Commands::Stat(args) => stat::execute(args, &resolver, &formatter).await,
        Commands::Ls(args) => ls::execute(args, &resolver, &formatter).await,
        Commands::Rm(args) => rm::execute(args, &resolver, &formatter).await,
        Commands::Cp(args) => cp::execute(args, &resolver, &formatter).await,
        Commands::Mkdir(args) => mkdir::execute(args, &resolver, &formatter).await,
    }
}

fn build_resolver() -> anyhow::Result<Resolver> {
    let config = HttpConfig::from_env().context("Invalid LSST_HTTP_* environment")?;
    tracing::debug!(config = ?config, "Loaded configuration");
    Ok(rp_http::resolver_with_resources(config, bundled_resources()))
}

/// Files shipped inside the binary
fn bundled_resources() -> PackageResources {
    PackageResources::new().with_file(
        CLI_PACKAGE,
        "README.md",
        include_str!("../../../../README.md"),
    )
}

/// Resolve a command-line path, reporting failures the usual way
pub(crate) fn resolve(
    resolver: &Resolver,
    formatter: &Formatter,
    input: &str,
) -> Result<ResourcePath, ExitCode> {
    resolver
        .resolve(input)
        .map_err(|e| formatter.fail(&format!("Cannot use '{input}'"), &e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bundled_readme_is_readable() {
        let resolver = Resolver::builder()
            .with_package_resources(bundled_resources())
            .build();
        let path = resolver
            .resolve(&format!("resource://{CLI_PACKAGE}/README.md"))
            .unwrap();
        assert!(path.exists().await.unwrap());
        assert!(!path.read(None).await.unwrap().is_empty());
    }
}
