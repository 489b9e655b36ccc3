// Consistent exit codes for the fencerun CLI.
//
//   0 = success
//   1 = general error
//   2 = usage/argument error
//   3 = file or codeblock not found
//   4 = codeblock already running
//   5 = the codeblock's command failed

use std::process;

use fencerun_daemon::error::EngineError;

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    NotFound = 3,
    AlreadyRunning = 4,
    CommandFailed = 5,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(engine_err) = cause.downcast_ref::<EngineError>() {
                return Self::from_engine_error(engine_err);
            }
            if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
                return match io_err.kind() {
                    std::io::ErrorKind::NotFound => Self::NotFound,
                    _ => Self::Error,
                };
            }
        }
        Self::Error
    }

    pub fn from_engine_error(err: &EngineError) -> Self {
        match err {
            EngineError::NotFound(_) => Self::NotFound,
            EngineError::AlreadyRunning { .. } => Self::AlreadyRunning,
            EngineError::Spawn { .. } | EngineError::Runtime { .. } => Self::CommandFailed,
            EngineError::UnsupportedLanguage(_) => Self::Usage,
            _ => Self::Error,
        }
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_values() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::Error.code(), 1);
        assert_eq!(ExitCode::Usage.code(), 2);
        assert_eq!(ExitCode::NotFound.code(), 3);
        assert_eq!(ExitCode::AlreadyRunning.code(), 4);
        assert_eq!(ExitCode::CommandFailed.code(), 5);
    }

    #[test]
    fn engine_errors_in_chain_are_mapped() {
        let err = anyhow::Error::new(EngineError::AlreadyRunning { id: "42".into() });
        assert_eq!(ExitCode::from_error(&err), ExitCode::AlreadyRunning);

        let err = anyhow::Error::new(EngineError::NotFound("no codeblock at line 3".into()))
            .context("run failed");
        assert_eq!(ExitCode::from_error(&err), ExitCode::NotFound);

        let err = anyhow::Error::new(EngineError::Spawn { program: "bash".into(), message: "denied".into() });
        assert_eq!(ExitCode::from_error(&err), ExitCode::CommandFailed);
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = anyhow::Error::new(std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"))
            .context("failed to read `notes.md`");
        assert_eq!(ExitCode::from_error(&err), ExitCode::NotFound);
    }

    #[test]
    fn from_error_generic_is_error() {
        let err = anyhow::anyhow!("something went wrong");
        assert_eq!(ExitCode::from_error(&err), ExitCode::Error);
    }

    #[test]
    fn exit_code_to_process_exit_code() {
        let code: process::ExitCode = ExitCode::CommandFailed.into();
        let _ = code;
    }
}
