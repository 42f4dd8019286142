/// Fatal collector errors, mapped onto process exit codes for the
/// orchestrator. Everything else is handled in place and never crosses
/// a cycle boundary.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("configuration error: {0}")]
    Config(anyhow::Error),

    #[error("datastore error: {0}")]
    Datastore(String),

    #[error("internal error: {0}")]
    Internal(anyhow::Error),
}

impl FatalError {
    pub fn exit_code(&self) -> i32 {
        match self {
            FatalError::Config(_) => 1,
            FatalError::Datastore(_) => 2,
            FatalError::Internal(_) => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_the_cli_contract() {
        assert_eq!(FatalError::Config(anyhow::anyhow!("x")).exit_code(), 1);
        assert_eq!(FatalError::Datastore("x".into()).exit_code(), 2);
        assert_eq!(FatalError::Internal(anyhow::anyhow!("x")).exit_code(), 3);
    }
}
