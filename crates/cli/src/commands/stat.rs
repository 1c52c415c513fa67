//! stat command - show resource metadata
//!
//! Paths are queried concurrently; output keeps the argument order.

use clap::Args;
use futures::future::join_all;
use rp_core::{ObjectInfo, Resolver};
use serde::Serialize;

use crate::exit_code::ExitCode;
use crate::output::Formatter;

#[derive(Args, Debug)]
pub struct StatArgs {
    /// Resources to inspect
    #[arg(required = true)]
    pub paths: Vec<String>,
}

#[derive(Debug, Serialize)]
struct StatOutput {
    uri: String,
    #[serde(flatten)]
    info: ObjectInfo,
}

pub async fn execute(args: StatArgs, resolver: &Resolver, formatter: &Formatter) -> ExitCode {
    let mut paths = Vec::with_capacity(args.paths.len());
    for input in &args.paths {
        match super::resolve(resolver, formatter, input) {
            Ok(p) => paths.push(p),
            Err(code) => return code,
        }
    }

    let results = join_all(paths.iter().map(|p| p.stat())).await;

    let mut exit = ExitCode::Success;
    let mut found = Vec::new();
    for (path, result) in paths.iter().zip(results) {
        match result {
            Ok(info) => found.push(StatOutput {
                uri: path.to_string(),
                info,
            }),
            Err(e) => exit = formatter.fail(&format!("Failed to stat {path}"), &e),
        }
    }

    if formatter.is_json() {
        formatter.json(&found);
    } else {
        for (i, entry) in found.iter().enumerate() {
            if i > 0 {
                formatter.println("");
            }
            print_entry(formatter, entry);
        }
    }
    exit
}

fn print_entry(formatter: &Formatter, entry: &StatOutput) {
    let info = &entry.info;
    let kind = if info.is_dir { "directory" } else { "file" };
    let size = match info.size_bytes {
        Some(bytes) => format!(
            "{} ({bytes} bytes)",
            humansize::format_size(bytes, humansize::BINARY)
        ),
        None => "-".to_string(),
    };

    let mut rows = vec![
        ("URI", entry.uri.clone()),
        ("Type", kind.to_string()),
        ("Size", formatter.style_size(&size)),
    ];
    if let Some(ts) = info.last_modified {
        rows.push(("Modified", formatter.style_date(&formatter.format_time(Some(ts)))));
    }
    if let Some(etag) = &info.etag {
        rows.push(("ETag", etag.clone()));
    }
    if let Some(content_type) = &info.content_type {
        rows.push(("Content", content_type.clone()));
    }

    for (key, value) in rows {
        formatter.println(&format!("{:<10} {value}", formatter.style_key(&format!("{key}:"))));
    }
}
