#[derive(Debug, thiserror::Error)]
pub enum OciError {
    #[error("oci CLI not found: install https://docs.oracle.com/iaas/Content/API/SDKDocs/cliinstall.htm")]
    NotFound { source: std::io::Error },

    #[error("oci command failed: {args:?}\n{stderr}")]
    CommandFailed { args: Vec<String>, stderr: String },

    #[error("oci output was not valid UTF-8")]
    InvalidUtf8 { source: std::string::FromUtf8Error },
}
