//! Domain error types.

/// A script parse error, located by 1-based line number.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error on line {line}: {message}")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
}

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }

    /// Format the error with the offending source line quoted beneath it.
    pub fn display_with_context(&self, source: &str) -> String {
        match source.lines().nth(self.line.saturating_sub(1)) {
            Some(text) => format!(
                "{err}\n{line:>4} | {text}",
                err = self,
                line = self.line,
                text = text
            ),
            None => self.to_string(),
        }
    }
}

/// Top-level error type for pinetrader.
#[derive(Debug, thiserror::Error)]
pub enum PinetraderError {
    #[error(transparent)]
    ScriptParse(#[from] ParseError),

    #[error("insufficient data for {symbol}: have {bars} bars, need {minimum}")]
    InsufficientData {
        symbol: String,
        bars: usize,
        minimum: usize,
    },

    #[error("invalid parameter {parameter}: {reason}")]
    InvalidParameter { parameter: String, reason: String },

    #[error("bar {index} is not after the previous bar")]
    UnorderedBars { index: usize },

    #[error("live execution is not implemented; enable simulation_mode")]
    LiveExecutionUnsupported,

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PinetraderError {
    pub fn invalid_parameter(parameter: &str, reason: impl Into<String>) -> Self {
        PinetraderError::InvalidParameter {
            parameter: parameter.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<&PinetraderError> for std::process::ExitCode {
    fn from(err: &PinetraderError) -> Self {
        let code: u8 = match err {
            PinetraderError::Io(_) | PinetraderError::Json(_) => 1,
            PinetraderError::ConfigParse { .. }
            | PinetraderError::ConfigMissing { .. }
            | PinetraderError::ConfigInvalid { .. } => 2,
            PinetraderError::Data { .. } | PinetraderError::UnorderedBars { .. } => 3,
            PinetraderError::ScriptParse(_) => 4,
            PinetraderError::InsufficientData { .. } => 5,
            PinetraderError::InvalidParameter { .. } => 6,
            PinetraderError::LiveExecutionUnsupported => 7,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display() {
        let err = ParseError::new(3, "unknown function 'foo'");
        assert_eq!(err.to_string(), "parse error on line 3: unknown function 'foo'");
    }

    #[test]
    fn display_with_context_quotes_line() {
        let source = "fast = sma(close, 10)\nslow = foo(close, 20)\n";
        let err = ParseError::new(2, "unknown function 'foo'");
        let ctx = err.display_with_context(source);
        assert!(ctx.contains("line 2"));
        assert!(ctx.contains("slow = foo(close, 20)"));
    }

    #[test]
    fn display_with_context_out_of_range() {
        let err = ParseError::new(10, "boom");
        assert_eq!(err.display_with_context("one line"), err.to_string());
    }

    #[test]
    fn invalid_parameter_names_parameter() {
        let err = PinetraderError::invalid_parameter("initial_capital", "must be positive");
        assert_eq!(
            err.to_string(),
            "invalid parameter initial_capital: must be positive"
        );
    }

    #[test]
    fn script_parse_from_parse_error() {
        let err: PinetraderError = ParseError::new(1, "x").into();
        assert!(matches!(err, PinetraderError::ScriptParse(ParseError { line: 1, .. })));
    }
}
