//! Terminal and JSON output

mod formatter;

pub use formatter::Formatter;

/// Output switches shared by every command
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    pub json: bool,
    pub no_color: bool,
    pub quiet: bool,
}
