//! rm command - delete resources

use clap::Args;
use futures::stream::{self, StreamExt};
use rp_core::{ListOptions, ResourcePath, Resolver, Result};
use serde::Serialize;

use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Deletes in flight at once during a recursive removal
const DELETE_CONCURRENCY: usize = 8;

#[derive(Args, Debug)]
pub struct RmArgs {
    /// Resources to delete
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Delete every file below each directory
    #[arg(short, long)]
    pub recursive: bool,

    /// Ignore resources that do not exist
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
struct RmOutput {
    deleted: Vec<String>,
}

pub async fn execute(args: RmArgs, resolver: &Resolver, formatter: &Formatter) -> ExitCode {
    let mut deleted = Vec::new();

    for input in &args.paths {
        let path = match super::resolve(resolver, formatter, input) {
            Ok(p) => p,
            Err(code) => return code,
        };

        let targets = if args.recursive {
            match files_below(resolver, &path).await {
                Ok(t) => t,
                Err(e) if args.force && e.is_not_found() => continue,
                Err(e) => return formatter.fail(&format!("Failed to list {path}"), &e),
            }
        } else {
            vec![path]
        };

        let results: Vec<(String, Result<()>)> = stream::iter(targets)
            .map(|target| async move {
                let result = target.delete().await;
                (target.to_string(), result)
            })
            .buffer_unordered(DELETE_CONCURRENCY)
            .collect()
            .await;

        for (uri, result) in results {
            match result {
                Ok(()) => {
                    formatter.success(&format!("Removed {uri}"));
                    deleted.push(uri);
                }
                Err(e) if args.force && e.is_not_found() => {
                    tracing::debug!(uri = %uri, "Already absent");
                }
                Err(e) => return formatter.fail(&format!("Failed to remove {uri}"), &e),
            }
        }
    }

    if formatter.is_json() {
        deleted.sort();
        formatter.json(&RmOutput { deleted });
    }
    ExitCode::Success
}

/// Every file under `path`, treated as a directory
async fn files_below(resolver: &Resolver, path: &ResourcePath) -> Result<Vec<ResourcePath>> {
    let dir = resolver.resolve_uri(path.uri().as_directory())?;
    let mut files = Vec::new();
    let mut continuation_token = None;

    loop {
        let result = dir
            .list(ListOptions {
                recursive: true,
                continuation_token: continuation_token.take(),
                ..Default::default()
            })
            .await?;
        for item in result.items.iter().filter(|i| !i.is_dir) {
            files.push(dir.join(&item.key)?);
        }
        match result.continuation_token {
            Some(token) if result.truncated => continuation_token = Some(token),
            _ => return Ok(files),
        }
    }
}
