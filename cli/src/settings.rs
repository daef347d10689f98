use std::path::Path;

use serde::Deserialize;

use runtime::{CompilerConfig, DriveConfig};

/// Contents of a `--config` file. Every table is optional.
///
/// ```toml
/// [compiler]
/// legacy_keywords = false
/// countdown_cues = [10, 3, 2, 1]
///
/// [drive]
/// tick_ms = 500
/// effort_secs = 40
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub compiler: CompilerConfig,
    pub drive: DriveConfig,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read '{}': {}", path.display(), e))?;
        toml::from_str(&text).map_err(|e| format!("invalid config '{}': {}", path.display(), e.message()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_tables_fall_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[drive]\neffort_secs = 40").expect("write");

        let settings = Settings::load(file.path()).expect("loads");
        assert_eq!(settings.drive.effort_secs, 40.0);
        assert_eq!(settings.drive.tick_ms, 1000);
        assert_eq!(settings.compiler, CompilerConfig::default());
    }

    #[test]
    fn unknown_tables_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[audio]\nvolume = 3").expect("write");
        let err = Settings::load(file.path()).expect_err("unknown table");
        assert!(err.contains("invalid config"));
    }
}
