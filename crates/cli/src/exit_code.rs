//! Process exit codes
//!
//! Scripts branch on these, so the numeric values are stable.

use rp_core::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    /// Bad arguments, malformed URI or invalid configuration
    UsageError = 2,
    /// Transport failures that outlived the retry budget
    NetworkError = 3,
    AuthError = 4,
    NotFound = 5,
    /// Destination exists and overwrite was not requested
    Conflict = 6,
    UnsupportedFeature = 7,
}

impl ExitCode {
    pub fn from_error(error: &Error) -> Self {
        if error.is_not_found() {
            return ExitCode::NotFound;
        }
        match error {
            Error::InvalidUri(_) | Error::Config(_) => ExitCode::UsageError,
            Error::AuthConfiguration(_) => ExitCode::AuthError,
            Error::PoolExhausted { .. }
            | Error::TransientTransport { .. }
            | Error::RetriesExhausted { .. } => ExitCode::NetworkError,
            Error::PermanentRequest { status: 401 | 403, .. } => ExitCode::AuthError,
            Error::PermanentRequest { status: 409 | 412, .. } => ExitCode::Conflict,
            Error::AlreadyExists(_) => ExitCode::Conflict,
            Error::Unsupported(_) => ExitCode::UnsupportedFeature,
            Error::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => ExitCode::AuthError,
            Error::PermanentRequest { .. } | Error::Io(_) => ExitCode::GeneralError,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.as_u8())
    }
}
