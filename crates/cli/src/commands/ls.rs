//! ls command - list a directory
//!
//! Pages are fetched until the listing is complete or `--limit` entries
//! have been collected.

use clap::Args;
use rp_core::{ListOptions, ObjectInfo, ResourcePath, Resolver, Result};
use serde::Serialize;

use crate::exit_code::ExitCode;
use crate::output::Formatter;

#[derive(Args, Debug)]
pub struct LsArgs {
    /// Directory to list; a trailing '/' is implied
    pub path: String,

    /// List every file below the directory
    #[arg(short, long)]
    pub recursive: bool,

    /// Only entries whose name starts with this prefix
    #[arg(long)]
    pub prefix: Option<String>,

    /// Entries requested per page
    #[arg(long, default_value = "1000")]
    pub page_size: usize,

    /// Stop after this many entries
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct LsOutput {
    uri: String,
    items: Vec<ObjectInfo>,
    truncated: bool,
}

pub async fn execute(args: LsArgs, resolver: &Resolver, formatter: &Formatter) -> ExitCode {
    let path = match super::resolve(resolver, formatter, &args.path) {
        Ok(p) => p,
        Err(code) => return code,
    };
    let dir = match resolver.resolve_uri(path.uri().as_directory()) {
        Ok(d) => d,
        Err(e) => return formatter.fail(&format!("Cannot list {path}"), &e),
    };

    let (items, truncated) = match list_all(&dir, &args).await {
        Ok(r) => r,
        Err(e) => return formatter.fail(&format!("Failed to list {dir}"), &e),
    };

    if formatter.is_json() {
        formatter.json(&LsOutput {
            uri: dir.to_string(),
            items,
            truncated,
        });
        return ExitCode::Success;
    }

    for item in &items {
        let name = if item.is_dir {
            formatter.style_dir(&item.key)
        } else {
            item.key.clone()
        };
        formatter.println(&format!(
            "[{}] {} {name}",
            formatter.style_date(&formatter.format_time(item.last_modified)),
            formatter.style_size(&formatter.format_size(item.size_bytes)),
        ));
    }
    if truncated {
        formatter.warning(&format!("Listing stopped after {} entries", items.len()));
    }
    ExitCode::Success
}

async fn list_all(dir: &ResourcePath, args: &LsArgs) -> Result<(Vec<ObjectInfo>, bool)> {
    let mut items = Vec::new();
    let mut continuation_token = None;

    loop {
        let page_size = match args.limit {
            Some(limit) => args.page_size.min(limit - items.len()).max(1),
            None => args.page_size.max(1),
        };
        let options = ListOptions {
            prefix: args.prefix.clone(),
            recursive: args.recursive,
            max_keys: Some(page_size),
            continuation_token: continuation_token.take(),
        };

        let result = dir.list(options).await?;
        tracing::debug!(
            uri = %dir,
            entries = result.items.len(),
            truncated = result.truncated,
            "Fetched listing page"
        );
        items.extend(result.items);

        if !result.truncated {
            return Ok((items, false));
        }
        if args.limit.is_some_and(|limit| items.len() >= limit) {
            return Ok((items, true));
        }
        match result.continuation_token {
            Some(token) => continuation_token = Some(token),
            None => return Ok((items, true)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(path: &str) -> LsArgs {
        LsArgs {
            path: path.to_string(),
            recursive: false,
            prefix: None,
            page_size: 2,
            limit: None,
        }
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.txt", "b.txt", "c.txt", "sub/d.txt", "sub/e.txt"] {
            let path = dir.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, name).unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_pages_are_concatenated() {
        let dir = fixture();
        let resolver = Resolver::local();
        let root = resolver
            .resolve(&format!("{}/", dir.path().display()))
            .unwrap();

        let (items, truncated) = list_all(&root, &args("")).await.unwrap();
        let keys: Vec<_> = items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, ["a.txt", "b.txt", "c.txt", "sub/"]);
        assert!(!truncated);
    }

    #[tokio::test]
    async fn test_recursive_with_limit() {
        let dir = fixture();
        let resolver = Resolver::local();
        let root = resolver
            .resolve(&format!("{}/", dir.path().display()))
            .unwrap();

        let mut options = args("");
        options.recursive = true;
        options.limit = Some(3);
        let (items, truncated) = list_all(&root, &options).await.unwrap();
        assert_eq!(items.len(), 3);
        assert!(truncated);

        options.limit = None;
        options.prefix = Some("sub/".to_string());
        let (items, _) = list_all(&root, &options).await.unwrap();
        let keys: Vec<_> = items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, ["sub/d.txt", "sub/e.txt"]);
    }
}
