/// Fatal code-generation errors.
///
/// Most front-end oddities are warnings (the generator pushes a placeholder
/// and keeps going); the errors here are the ones where the emitted container
/// would not be safe to run.
#[derive(Debug, Clone)]
pub enum CompileError {
    /// A label was referenced but never defined, e.g. a call to a function
    /// that is never declared. Patching the reference is impossible, so no
    /// container is produced.
    UndefinedLabel { name: String },
    /// Internal compiler error (shouldn't happen in normal use)
    Internal(String),
}

impl CompileError {
    pub fn undefined_label(name: impl Into<String>) -> Self {
        CompileError::UndefinedLabel { name: name.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CompileError::Internal(message.into())
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::UndefinedLabel { name } => {
                write!(f, "compile error: undefined label '{}'", name)
            }
            CompileError::Internal(message) => {
                write!(f, "compile error: internal error: {}", message)
            }
        }
    }
}

impl std::error::Error for CompileError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined_label_display() {
        let err = CompileError::undefined_label("fact_P1");
        let msg = err.to_string();
        assert!(msg.contains("undefined label"));
        assert!(msg.contains("fact_P1"));
    }

    #[test]
    fn test_error_implements_std_error() {
        let err = CompileError::internal("test");
        let _: &dyn std::error::Error = &err;
    }
}
