//! cat command - print the contents of a resource

use clap::Args;
use rp_core::{ByteRange, Resolver};
use tokio::io::AsyncWriteExt;

use crate::exit_code::ExitCode;
use crate::output::Formatter;

#[derive(Args, Debug)]
pub struct CatArgs {
    /// Resources to print, in order
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Only print bytes START-END (inclusive) or START- to the end
    #[arg(long, value_name = "START-END")]
    pub range: Option<ByteRange>,
}

/// Contents go to stdout untouched; `--json` only affects error reporting
pub async fn execute(args: CatArgs, resolver: &Resolver, formatter: &Formatter) -> ExitCode {
    let mut stdout = tokio::io::stdout();

    for input in &args.paths {
        let path = match super::resolve(resolver, formatter, input) {
            Ok(p) => p,
            Err(code) => return code,
        };
        let data = match path.read(args.range).await {
            Ok(d) => d,
            Err(e) => return formatter.fail(&format!("Failed to read {path}"), &e),
        };
        tracing::debug!(uri = %path, bytes = data.len(), "Read resource");

        if let Err(e) = stdout.write_all(&data).await {
            formatter.error(&format!("Failed to write to stdout: {e}"));
            return ExitCode::GeneralError;
        }
    }

    if let Err(e) = stdout.flush().await {
        formatter.error(&format!("Failed to write to stdout: {e}"));
        return ExitCode::GeneralError;
    }
    ExitCode::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputConfig;

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.txt");
        let args = CatArgs {
            paths: vec![missing.display().to_string()],
            range: None,
        };
        let formatter = Formatter::new(OutputConfig {
            quiet: true,
            ..Default::default()
        });
        let code = execute(args, &Resolver::local(), &formatter).await;
        assert_eq!(code, ExitCode::NotFound);
    }

    #[test]
    fn test_range_argument_parses() {
        use clap::Parser;

        #[derive(Parser)]
        struct Wrapper {
            #[command(flatten)]
            cat: CatArgs,
        }

        let parsed = Wrapper::try_parse_from(["cat", "/tmp/a", "--range", "10-19"]).unwrap();
        assert_eq!(parsed.cat.range, Some(ByteRange::new(10, Some(19)).unwrap()));
        assert!(Wrapper::try_parse_from(["cat", "/tmp/a", "--range", "9-3"]).is_err());
    }
}
