//! INI file configuration adapter.

use crate::domain::error::FibCyclesError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, FibCyclesError> {
        let path = path.as_ref();
        let mut config = Ini::new();
        config.load(path).map_err(|reason| FibCyclesError::ConfigParse {
            file: path.display().to_string(),
            reason,
        })?;
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, FibCyclesError> {
        let mut config = Ini::new();
        config
            .read(content.to_string())
            .map_err(|reason| FibCyclesError::ConfigParse {
                file: "<string>".to_string(),
                reason,
            })?;
        Ok(Self { config })
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        }
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config.get(section, key)
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.config
            .getint(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.config
            .getfloat(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.config
            .get(section, key)
            .as_ref()
            .and_then(|v| Self::parse_bool(v))
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn from_string_parses_config() {
        let content = r#"
[cycles]
method = combined
max_period = 144

[backtest]
strategy = multi_cycle
"#;
        let adapter = FileConfigAdapter::from_string(content).unwrap();
        assert_eq!(
            adapter.get_string("cycles", "method"),
            Some("combined".to_string())
        );
        assert_eq!(adapter.get_int("cycles", "max_period", 250), 144);
        assert_eq!(
            adapter.get_string("backtest", "strategy"),
            Some("multi_cycle".to_string())
        );
    }

    #[test]
    fn get_string_returns_none_for_missing_key() {
        let adapter = FileConfigAdapter::from_string("[cycles]\nmin_period = 20\n").unwrap();
        assert_eq!(adapter.get_string("cycles", "missing"), None);
        assert_eq!(adapter.get_string("missing_section", "key"), None);
    }

    #[test]
    fn get_int_returns_default_for_missing_or_non_numeric() {
        let adapter = FileConfigAdapter::from_string("[scan]\nworkers = abc\n").unwrap();
        assert_eq!(adapter.get_int("scan", "workers", 5), 5);
        assert_eq!(adapter.get_int("scan", "batch_size", 10), 10);
    }

    #[test]
    fn get_double_returns_value() {
        let adapter = FileConfigAdapter::from_string("[signal]\nvolume_threshold = 1.75\n").unwrap();
        assert_eq!(adapter.get_double("signal", "volume_threshold", 1.5), 1.75);
        assert_eq!(adapter.get_double("signal", "missing", 99.9), 99.9);
    }

    #[test]
    fn get_bool_values() {
        let adapter =
            FileConfigAdapter::from_string("[fld]\na = true\nb = no\nc = 1\nd = maybe\n").unwrap();
        assert!(adapter.get_bool("fld", "a", false));
        assert!(!adapter.get_bool("fld", "b", true));
        assert!(adapter.get_bool("fld", "c", false));
        assert!(adapter.get_bool("fld", "d", true));
        assert!(!adapter.get_bool("fld", "missing", false));
    }

    #[test]
    fn from_file_reads_config() {
        let file = create_temp_config("[regime]\nlookback = 150\n");
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(adapter.get_int("regime", "lookback", 100), 150);
    }

    #[test]
    fn from_file_returns_error_for_missing_file() {
        let result = FileConfigAdapter::from_file("/nonexistent/path/config.ini");
        assert!(matches!(result, Err(FibCyclesError::ConfigParse { .. })));
    }
}
