use serde::Deserialize;

/// Knobs that shape how statements are compiled into blocks.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    /// Fall back to scanning Effort/Action text for `AMRAP` / `EMOM` when a
    /// statement carries no hint. Disable once every statement arrives hinted.
    pub legacy_keywords: bool,
    /// Attach a SoundBehavior to every timed block.
    pub sound: bool,
    /// Attach a HistoryBehavior to every block.
    pub history: bool,
    /// Remaining-seconds marks that produce a countdown cue.
    pub countdown_cues: Vec<u32>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            legacy_keywords: true,
            sound: true,
            history: true,
            countdown_cues: vec![3, 2, 1],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: CompilerConfig = toml::from_str("legacy_keywords = false").expect("parse");
        assert!(!config.legacy_keywords);
        assert!(config.sound);
        assert_eq!(config.countdown_cues, vec![3, 2, 1]);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<CompilerConfig>("volume = 11").is_err());
    }
}
