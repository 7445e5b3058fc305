pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
    /// A non-success status that is not worth retrying.
    #[error("server error: {context} returned {status}")]
    ServerError {
        status: reqwest::StatusCode,
        context: &'static str,
    },
    #[error("block transfer rejected after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
    /// Two files in one run share a name, and with it a file id.
    #[error("duplicate file name: {0}")]
    DuplicateFile(String),
    #[error("hash worker error: {0}")]
    WorkerError(String),
    #[error("config error: {0}")]
    ConfigError(String),
}

impl Error {
    pub fn server(status: reqwest::StatusCode, context: &'static str) -> Self {
        Self::ServerError { status, context }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_message() {
        let err = Error::server(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "block transfer");

        assert_eq!(
            err.to_string(),
            "server error: block transfer returned 500 Internal Server Error"
        );
    }

    #[test]
    fn test_duplicate_file_message() {
        let err = Error::DuplicateFile("report.pdf".into());

        assert_eq!(err.to_string(), "duplicate file name: report.pdf");
    }

    #[test]
    fn test_io_error_conversion() {
        let err: Error = std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into();

        assert!(matches!(err, Error::IoError(_)));
    }
}
