/// A fatal parse diagnostic: message, position, and a window of the tokens
/// around the failure point.
#[derive(Debug)]
pub struct ParserError {
    pub message: String,
    pub line: usize,
    pub col: usize,
    pub context: Vec<String>,
}

impl std::fmt::Display for ParserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Parse error at line {} col {}: {}",
            self.line, self.col, self.message
        )?;
        if !self.context.is_empty() {
            write!(f, "\n  near: {}", self.context.join(" "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ParserError {}
