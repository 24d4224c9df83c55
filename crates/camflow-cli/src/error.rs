// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::fmt;
use std::process::ExitCode;

/// CLI-specific error type with exit code mapping
#[derive(Debug)]
pub enum CliError {
    /// Invalid command-line arguments
    InvalidArgs(String),
    /// Camera or media device not found
    CameraNotFound(String),
    /// Device held by another user
    DeviceBusy(String),
    /// Operation timed out
    Timeout(String),
    /// General error from the CamFlow library
    General(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::InvalidArgs(msg) => write!(f, "Invalid arguments: {}", msg),
            CliError::CameraNotFound(msg) => write!(f, "Camera not found: {}", msg),
            CliError::DeviceBusy(msg) => write!(f, "Device busy: {}", msg),
            CliError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            CliError::General(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CliError::InvalidArgs(_) => ExitCode::from(2),
            CliError::CameraNotFound(_) => ExitCode::from(3),
            CliError::DeviceBusy(_) => ExitCode::from(4),
            CliError::Timeout(_) => ExitCode::from(6),
            CliError::General(_) => ExitCode::from(1),
        }
    }
}

/// Map camflow::Error to CliError with appropriate exit codes
impl From<camflow::Error> for CliError {
    fn from(err: camflow::Error) -> Self {
        use camflow::Error;

        match err {
            Error::NoDevice => {
                CliError::CameraNotFound("no matching media device".to_string())
            }
            Error::Busy => CliError::DeviceBusy("device already acquired".to_string()),
            Error::InvalidArgument(msg) => CliError::InvalidArgs(msg),
            Error::InvalidState(msg) => CliError::General(format!("invalid state: {}", msg)),
            Error::NoEntry => CliError::General("request lacks a stream buffer".to_string()),
            Error::Io(io_err) => match io_err.kind() {
                std::io::ErrorKind::NotFound => {
                    CliError::CameraNotFound(format!("device not found: {}", io_err))
                }
                std::io::ErrorKind::PermissionDenied => {
                    CliError::CameraNotFound(format!("permission denied: {}", io_err))
                }
                std::io::ErrorKind::TimedOut => {
                    CliError::Timeout(format!("operation timed out: {}", io_err))
                }
                _ => CliError::General(format!("I/O error: {}", io_err)),
            },
        }
    }
}

/// Helper function to convert result to exit code
pub fn result_to_exit_code<T>(result: Result<T, CliError>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::InvalidArgs("test".into()).exit_code(), ExitCode::from(2));
        assert_eq!(CliError::CameraNotFound("test".into()).exit_code(), ExitCode::from(3));
        assert_eq!(CliError::DeviceBusy("test".into()).exit_code(), ExitCode::from(4));
        assert_eq!(CliError::Timeout("test".into()).exit_code(), ExitCode::from(6));
        assert_eq!(CliError::General("test".into()).exit_code(), ExitCode::from(1));
    }

    #[test]
    fn test_error_display() {
        let err = CliError::CameraNotFound("imx219 0".to_string());
        assert_eq!(format!("{}", err), "Camera not found: imx219 0");
    }

    #[test]
    fn test_library_error_mapping() {
        let err = CliError::from(camflow::Error::Busy);
        assert!(matches!(err, CliError::DeviceBusy(_)));

        let err = CliError::from(camflow::Error::InvalidArgument("width".into()));
        assert!(matches!(err, CliError::InvalidArgs(_)));
    }
}
