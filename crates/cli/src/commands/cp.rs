//! cp command - copy or move a resource
//!
//! Works across schemes: a local file can be copied to WebDAV or s3 and
//! back. Server-side copy is used when both ends live on the same server.

use clap::Args;
use rp_core::{Resolver, TransferMode};
use serde::Serialize;

use crate::exit_code::ExitCode;
use crate::output::Formatter;

#[derive(Args, Debug)]
pub struct CpArgs {
    /// Source resource
    pub source: String,

    /// Destination; a trailing '/' copies into that directory
    pub target: String,

    /// Delete the source after copying
    #[arg(long = "move")]
    pub move_source: bool,

    /// Replace the destination if it exists
    #[arg(short = 'f', long)]
    pub overwrite: bool,
}

#[derive(Debug, Serialize)]
struct CpOutput {
    source: String,
    target: String,
    mode: TransferMode,
}

pub async fn execute(args: CpArgs, resolver: &Resolver, formatter: &Formatter) -> ExitCode {
    let source = match super::resolve(resolver, formatter, &args.source) {
        Ok(p) => p,
        Err(code) => return code,
    };
    let mut target = match super::resolve(resolver, formatter, &args.target) {
        Ok(p) => p,
        Err(code) => return code,
    };

    if source.uri().is_dir_like() {
        formatter.error(&format!("{source} is a directory"));
        return ExitCode::UsageError;
    }
    if target.uri().is_dir_like() {
        target = match target.join(source.uri().basename()) {
            Ok(t) => t,
            Err(e) => return formatter.fail(&format!("Cannot copy into {target}"), &e),
        };
    }

    let mode = if args.move_source {
        TransferMode::Move
    } else {
        TransferMode::Copy
    };
    if let Err(e) = target.transfer_from(&source, mode, args.overwrite).await {
        return formatter.fail(&format!("Failed to transfer {source} to {target}"), &e);
    }

    if formatter.is_json() {
        formatter.json(&CpOutput {
            source: source.to_string(),
            target: target.to_string(),
            mode,
        });
    } else {
        let verb = match mode {
            TransferMode::Copy => "Copied",
            TransferMode::Move => "Moved",
        };
        formatter.success(&format!("{verb} {source} to {target}"));
    }
    ExitCode::Success
}
