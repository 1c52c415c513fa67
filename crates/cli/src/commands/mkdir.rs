//! mkdir command - create directories

use clap::Args;
use rp_core::Resolver;

use crate::exit_code::ExitCode;
use crate::output::Formatter;

#[derive(Args, Debug)]
pub struct MkdirArgs {
    /// Directories to create; a trailing '/' is implied
    #[arg(required = true)]
    pub paths: Vec<String>,
}

pub async fn execute(args: MkdirArgs, resolver: &Resolver, formatter: &Formatter) -> ExitCode {
    let mut created = Vec::new();

    for input in &args.paths {
        let path = match super::resolve(resolver, formatter, input) {
            Ok(p) => p,
            Err(code) => return code,
        };
        let dir = match resolver.resolve_uri(path.uri().as_directory()) {
            Ok(d) => d,
            Err(e) => return formatter.fail(&format!("Cannot use {path}"), &e),
        };
        if let Err(e) = dir.mkdir().await {
            return formatter.fail(&format!("Failed to create {dir}"), &e);
        }
        formatter.success(&format!("Created {dir}"));
        created.push(dir.to_string());
    }

    if formatter.is_json() {
        formatter.json(&serde_json::json!({ "created": created }));
    }
    ExitCode::Success
}
