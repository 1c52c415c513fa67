//! put command - write stdin or a local file to any resource

use std::path::PathBuf;

use bytes::Bytes;
use clap::Args;
use rp_core::Resolver;
use serde::Serialize;
use tokio::io::AsyncReadExt;

use crate::exit_code::ExitCode;
use crate::output::Formatter;

#[derive(Args, Debug)]
pub struct PutArgs {
    /// Destination resource
    pub target: String,

    /// Read the payload from this local file instead of stdin
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Replace the destination if it exists
    #[arg(short = 'f', long)]
    pub overwrite: bool,
}

#[derive(Debug, Serialize)]
struct PutOutput {
    target: String,
    size_bytes: u64,
    size_human: String,
}

pub async fn execute(args: PutArgs, resolver: &Resolver, formatter: &Formatter) -> ExitCode {
    let path = match super::resolve(resolver, formatter, &args.target) {
        Ok(p) => p,
        Err(code) => return code,
    };

    let data = match read_payload(args.file.as_ref()).await {
        Ok(d) => d,
        Err(e) => {
            let source = args
                .file
                .as_ref()
                .map_or_else(|| "stdin".to_string(), |f| f.display().to_string());
            formatter.error(&format!("Failed to read {source}: {e}"));
            return if e.kind() == std::io::ErrorKind::NotFound {
                ExitCode::NotFound
            } else {
                ExitCode::GeneralError
            };
        }
    };
    let size = data.len() as u64;

    if let Err(e) = path.write(data, args.overwrite).await {
        return formatter.fail(&format!("Failed to write {path}"), &e);
    }

    if formatter.is_json() {
        formatter.json(&PutOutput {
            target: path.to_string(),
            size_bytes: size,
            size_human: humansize::format_size(size, humansize::BINARY),
        });
    } else {
        formatter.success(&format!(
            "Wrote {} to {}",
            humansize::format_size(size, humansize::BINARY),
            path
        ));
    }
    ExitCode::Success
}

async fn read_payload(file: Option<&PathBuf>) -> std::io::Result<Bytes> {
    match file {
        Some(file) => tokio::fs::read(file).await.map(Bytes::from),
        None => {
            let mut buf = Vec::new();
            tokio::io::stdin().read_to_end(&mut buf).await?;
            Ok(Bytes::from(buf))
        }
    }
}
