use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{} exists and is not a directory.", .0.display())]
    NotADirectory(PathBuf),
    #[error("couldn't run {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command returned non-zero code ({status}): {command}\n{stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("interrupted: {0}")]
    Interrupted(String),
    #[error("ssh public key {} is missing", .0.display())]
    MissingPublicKey(PathBuf),
    #[error("couldn't parse service principal credentials from {}", .path.display())]
    Credentials {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("exhausted {0} attempts")]
    ExhaustedAttempts(usize),
    #[error("'{0}' is not a valid cluster name (lowercase letters, digits and '-', 3-63 chars, starting with a letter)")]
    InvalidName(String),
    #[error("io error on {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Process exit status this error should end the run with.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::CommandFailed { status, .. } if *status != 0 => *status,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Error;
    use std::path::PathBuf;

    #[test]
    fn failed_command_propagates_status() {
        let err = Error::CommandFailed {
            command: "az group create".into(),
            status: 3,
            stderr: String::new(),
        };
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn path_conflict_exits_with_one() {
        let err = Error::NotADirectory(PathBuf::from("prod"));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.to_string(), "prod exists and is not a directory.");
    }
}
