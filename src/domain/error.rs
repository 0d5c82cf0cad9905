//! Domain error types.

/// Top-level error type for fibcycles.
#[derive(Debug, thiserror::Error)]
pub enum FibCyclesError {
    #[error("insufficient data for {context}: have {bars} bars, need {minimum}")]
    InsufficientData {
        context: String,
        bars: usize,
        minimum: usize,
    },

    #[error("invalid configuration {key}: {reason}")]
    InvalidConfiguration { key: String, reason: String },

    #[error("invalid price series: {reason}")]
    InvalidSeries { reason: String },

    #[error("no data for {symbol} on {timeframe}")]
    NoData { symbol: String, timeframe: String },

    #[error("data source error: {reason}")]
    DataSource { reason: String },

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

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FibCyclesError {
    pub fn invalid_config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        FibCyclesError::InvalidConfiguration {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn insufficient(context: impl Into<String>, bars: usize, minimum: usize) -> Self {
        FibCyclesError::InsufficientData {
            context: context.into(),
            bars,
            minimum,
        }
    }

    /// True for errors a batch caller should skip rather than report loudly.
    pub fn is_insufficient_data(&self) -> bool {
        matches!(
            self,
            FibCyclesError::InsufficientData { .. } | FibCyclesError::NoData { .. }
        )
    }
}

impl From<&FibCyclesError> for std::process::ExitCode {
    fn from(err: &FibCyclesError) -> Self {
        let code: u8 = match err {
            FibCyclesError::Io(_) => 1,
            FibCyclesError::ConfigParse { .. }
            | FibCyclesError::ConfigMissing { .. }
            | FibCyclesError::ConfigInvalid { .. }
            | FibCyclesError::InvalidConfiguration { .. } => 2,
            FibCyclesError::DataSource { .. } => 3,
            FibCyclesError::InvalidSeries { .. }
            | FibCyclesError::NoData { .. }
            | FibCyclesError::InsufficientData { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_data_message() {
        let err = FibCyclesError::insufficient("cycle detection", 120, 500);
        assert_eq!(
            err.to_string(),
            "insufficient data for cycle detection: have 120 bars, need 500"
        );
        assert!(err.is_insufficient_data());
    }

    #[test]
    fn invalid_configuration_is_not_skippable() {
        let err = FibCyclesError::invalid_config("cycles.method", "unknown method 'foo'");
        assert!(!err.is_insufficient_data());
        assert_eq!(
            err.to_string(),
            "invalid configuration cycles.method: unknown method 'foo'"
        );
    }

    #[test]
    fn no_data_is_skippable() {
        let err = FibCyclesError::NoData {
            symbol: "INFY".into(),
            timeframe: "daily".into(),
        };
        assert!(err.is_insufficient_data());
    }
}
