use thiserror::Error;

/// Outcomes that end a run before a document is produced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("input error: {0}")]
    Input(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("the correction service rejected the credential ({0}); check your API key")]
    Auth(String),

    #[error("output error: {0}")]
    Output(String),
}

impl RunError {
    pub fn input(err: impl std::fmt::Display) -> Self {
        RunError::Input(err.to_string())
    }

    pub fn output(err: impl std::fmt::Display) -> Self {
        RunError::Output(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_message_points_at_the_credential() {
        let err = RunError::Auth("HTTP 401".into());
        assert!(err.to_string().contains("API key"));
    }
}
