//! Human-readable and JSON rendering
//!
//! In JSON mode every command prints exactly one JSON document on stdout and
//! errors go to stderr as `{"error": ..., "exit_code": ...}`.

use console::Style;
use jiff::Timestamp;
use serde::Serialize;

use super::OutputConfig;
use crate::exit_code::ExitCode;

/// Styles applied to listing and status output
#[derive(Debug, Clone)]
struct Theme {
    dir: Style,
    size: Style,
    date: Style,
    key: Style,
    success: Style,
    error: Style,
    warning: Style,
}

impl Theme {
    fn new(colored: bool) -> Self {
        let style = |styled: Style| if colored { styled } else { Style::new() };
        Self {
            dir: style(Style::new().blue().bold()),
            size: style(Style::new().green()),
            date: style(Style::new().dim()),
            key: style(Style::new().cyan()),
            success: style(Style::new().green()),
            error: style(Style::new().red()),
            warning: style(Style::new().yellow()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Formatter {
    config: OutputConfig,
    theme: Theme,
}

impl Formatter {
    pub fn new(config: OutputConfig) -> Self {
        Self {
            theme: Theme::new(!config.no_color && !config.json),
            config,
        }
    }

    pub fn is_json(&self) -> bool {
        self.config.json
    }

    pub fn style_dir(&self, text: &str) -> String {
        self.theme.dir.apply_to(text).to_string()
    }

    pub fn style_size(&self, text: &str) -> String {
        self.theme.size.apply_to(text).to_string()
    }

    pub fn style_date(&self, text: &str) -> String {
        self.theme.date.apply_to(text).to_string()
    }

    pub fn style_key(&self, text: &str) -> String {
        self.theme.key.apply_to(text).to_string()
    }

    /// Right-aligned binary size, or a dash when unknown
    pub fn format_size(&self, size: Option<u64>) -> String {
        match size {
            Some(bytes) => format!("{:>10}", humansize::format_size(bytes, humansize::BINARY)),
            None => format!("{:>10}", "-"),
        }
    }

    /// Second-precision UTC timestamp, or padding when unknown
    pub fn format_time(&self, time: Option<Timestamp>) -> String {
        match time {
            Some(ts) => ts.strftime("%Y-%m-%d %H:%M:%S").to_string(),
            None => " ".repeat(19),
        }
    }

    pub fn success(&self, message: &str) {
        if self.config.quiet || self.config.json {
            return;
        }
        let checkmark = self.theme.success.apply_to("✓");
        println!("{checkmark} {message}");
    }

    /// Printed even in quiet mode
    pub fn error(&self, message: &str) {
        if self.config.json {
            let error = serde_json::json!({ "error": message });
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&error).unwrap_or_else(|_| message.to_string())
            );
        } else {
            let cross = self.theme.error.apply_to("✗");
            eprintln!("{cross} {message}");
        }
    }

    /// Report a backend failure and pick the matching exit code
    pub fn fail(&self, context: &str, error: &rp_core::Error) -> ExitCode {
        let code = ExitCode::from_error(error);
        if self.config.json {
            let body = serde_json::json!({
                "error": format!("{context}: {error}"),
                "status": error.status(),
                "exit_code": code.as_u8(),
            });
            match serde_json::to_string_pretty(&body) {
                Ok(json) => eprintln!("{json}"),
                Err(_) => eprintln!("{context}: {error}"),
            }
        } else {
            let cross = self.theme.error.apply_to("✗");
            eprintln!("{cross} {context}: {error}");
        }
        code
    }

    pub fn warning(&self, message: &str) {
        if self.config.quiet || self.config.json {
            return;
        }
        let icon = self.theme.warning.apply_to("⚠");
        eprintln!("{icon} {message}");
    }

    /// Print a JSON document, ignoring quiet mode
    pub fn json<T: Serialize>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Error serializing output: {e}"),
        }
    }

    pub fn println(&self, message: &str) {
        if self.config.quiet {
            return;
        }
        println!("{message}");
    }
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new(OutputConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatter_default() {
        let formatter = Formatter::default();
        assert!(!formatter.is_json());
        assert!(!formatter.config.quiet);
    }

    #[test]
    fn test_json_mode_disables_colors() {
        let formatter = Formatter::new(OutputConfig {
            json: true,
            ..Default::default()
        });
        assert!(formatter.is_json());
        assert_eq!(formatter.style_dir("data/"), "data/");
    }

    #[test]
    fn test_size_and_time_columns() {
        let formatter = Formatter::new(OutputConfig {
            no_color: true,
            ..Default::default()
        });
        assert_eq!(formatter.format_size(Some(2048)).trim(), "2 KiB");
        assert_eq!(formatter.format_size(None).trim(), "-");

        let ts: Timestamp = "2015-10-21T07:28:00Z".parse().unwrap();
        assert_eq!(formatter.format_time(Some(ts)), "2015-10-21 07:28:00");
        assert_eq!(formatter.format_time(None).len(), 19);
    }

    #[test]
    fn test_fail_maps_exit_code() {
        let formatter = Formatter::new(OutputConfig {
            json: true,
            ..Default::default()
        });
        let err = rp_core::Error::permanent(404, "https://h/a", "missing");
        assert_eq!(formatter.fail("Failed to read", &err), ExitCode::NotFound);
    }
}
