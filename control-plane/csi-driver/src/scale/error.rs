use snafu::Snafu;

/// Remote error codes reported when the object being created is already there.
const ALREADY_EXISTS_CODES: [&str; 2] = ["EFSSP1102C", "EFSSG0762C"];
/// Remote error codes reported when the fileset or path does not exist.
const NOT_FOUND_CODES: [&str; 2] = ["EFSSG0072C", "EFSSP1023C"];

/// Errors returned by a Storage Scale connector.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum ConnectorError {
    #[snafu(display("None of the REST endpoints [{}] is reachable: {}", endpoints, source))]
    Unreachable {
        endpoints: String,
        source: reqwest::Error,
    },
    #[snafu(display("REST request to {} failed: {}", url, source))]
    Request { url: String, source: reqwest::Error },
    #[snafu(display("Unauthenticated REST request to {}: {}", url, message))]
    Unauthenticated { url: String, message: String },
    #[snafu(display("REST request to {} is not permitted: {}", url, message))]
    PermissionDenied { url: String, message: String },
    #[snafu(display("Not found: {}", message))]
    NotFound { message: String },
    #[snafu(display("REST request to {} failed with status {}: {}", url, status, message))]
    Api {
        url: String,
        status: u16,
        message: String,
    },
    #[snafu(display("Invalid REST response from {}: {}", url, message))]
    InvalidResponse { url: String, message: String },
    #[snafu(display("Job {} failed: {}", job_id, stderr))]
    JobFailed { job_id: u64, stderr: String },
    #[snafu(display(
        "Job {} did not complete within {}",
        job_id,
        humantime::format_duration(*timeout)
    ))]
    JobTimeout {
        job_id: u64,
        timeout: std::time::Duration,
    },
    #[snafu(display("Invalid connector configuration: {}", message))]
    Config { message: String },
}

impl ConnectorError {
    /// Whether the remote side reported that the object already exists.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::Api { message, .. } => has_code(message, &ALREADY_EXISTS_CODES),
            Self::JobFailed { stderr, .. } => {
                has_code(stderr, &ALREADY_EXISTS_CODES)
                    || stderr.to_lowercase().contains("already exists")
            }
            _ => false,
        }
    }

    /// Whether the remote side reported that the object does not exist.
    /// Authentication and authorization failures never count.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Api {
                status, message, ..
            } => *status == 404 || has_code(message, &NOT_FOUND_CODES),
            Self::JobFailed { stderr, .. } => {
                has_code(stderr, &NOT_FOUND_CODES)
                    || stderr.to_lowercase().contains("does not exist")
            }
            _ => false,
        }
    }
}

fn has_code(message: &str, codes: &[&str]) -> bool {
    codes.iter().any(|code| message.contains(code))
}

impl From<ConnectorError> for tonic::Status {
    fn from(error: ConnectorError) -> Self {
        match error {
            ConnectorError::Unauthenticated { .. } => {
                tonic::Status::unauthenticated(error.to_string())
            }
            ConnectorError::PermissionDenied { .. } => {
                tonic::Status::permission_denied(error.to_string())
            }
            error => tonic::Status::internal(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_exists() {
        let error = ConnectorError::JobFailed {
            job_id: 1,
            stderr: "EFSSP1102C: Fileset pvc-1 already exists.".into(),
        };
        assert!(error.is_already_exists());
        assert!(!error.is_not_found());

        let error = ConnectorError::Api {
            url: "filesystems/fs1/symlink/x".into(),
            status: 400,
            message: "EFSSG0762C The path is in use".into(),
        };
        assert!(error.is_already_exists());

        let error = ConnectorError::Config {
            message: "already exists".into(),
        };
        assert!(!error.is_already_exists());
    }

    #[test]
    fn not_found() {
        assert!(ConnectorError::NotFound {
            message: "fileset".into()
        }
        .is_not_found());
        assert!(ConnectorError::JobFailed {
            job_id: 7,
            stderr: "Fileset pvc-1 does not exist".into()
        }
        .is_not_found());
        assert!(!ConnectorError::JobTimeout {
            job_id: 7,
            timeout: std::time::Duration::from_secs(1)
        }
        .is_not_found());
        assert!(ConnectorError::Api {
            url: "filesystems/fs1/filesets/pvc-1".into(),
            status: 400,
            message: "EFSSG0072C File set pvc-1 could not be found.".into(),
        }
        .is_not_found());
    }

    #[test]
    fn remote_text_is_not_a_classification() {
        let error = ConnectorError::Unauthenticated {
            url: "cluster".into(),
            message: "User not found".into(),
        };
        assert!(!error.is_not_found());
        assert!(!error.is_already_exists());
        let error = ConnectorError::PermissionDenied {
            url: "cluster".into(),
            message: "Role already exists for another user".into(),
        };
        assert!(!error.is_not_found());
        assert!(!error.is_already_exists());

        let error = ConnectorError::Api {
            url: "filesystems/fs1/filesets/pvc-1".into(),
            status: 500,
            message: "EFSSG0000C: quota entry not found for node class".into(),
        };
        assert!(!error.is_not_found());
        let error = ConnectorError::Api {
            url: "filesystems/fs1/filesets".into(),
            status: 500,
            message: "Fileset already exists in the cache".into(),
        };
        assert!(!error.is_already_exists());
    }

    #[test]
    fn status_codes() {
        let status = tonic::Status::from(ConnectorError::Unauthenticated {
            url: "cluster".into(),
            message: "bad password".into(),
        });
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
        let status = tonic::Status::from(ConnectorError::PermissionDenied {
            url: "cluster".into(),
            message: "role".into(),
        });
        assert_eq!(status.code(), tonic::Code::PermissionDenied);
        let status = tonic::Status::from(ConnectorError::JobFailed {
            job_id: 3,
            stderr: "boom".into(),
        });
        assert_eq!(status.code(), tonic::Code::Internal);
        assert!(status.message().contains("boom"));
    }
}
