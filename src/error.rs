pub type HalationResult<T> = Result<T, HalationError>;

#[derive(thiserror::Error, Debug)]
pub enum HalationError {
    /// Broken build or machine configuration (kernel failed to compile, a
    /// render context failed to initialize). Not recoverable per call.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("render error: {0}")]
    Render(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HalationError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    /// Whether the error reflects a broken installation rather than bad
    /// per-render input.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            HalationError::config("x")
                .to_string()
                .contains("configuration error:")
        );
        assert!(
            HalationError::validation("x")
                .to_string()
                .contains("validation error:")
        );
        assert!(
            HalationError::render("x")
                .to_string()
                .contains("render error:")
        );
        assert!(
            HalationError::encode("x")
                .to_string()
                .contains("encode error:")
        );
        assert!(
            HalationError::resource("x")
                .to_string()
                .contains("resource error:")
        );
    }

    #[test]
    fn only_config_is_fatal() {
        assert!(HalationError::config("x").is_fatal());
        assert!(!HalationError::render("x").is_fatal());
        assert!(!HalationError::encode("x").is_fatal());
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = HalationError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
