//! Serde shapes of the TOML hand-off format, before validation.

use serde::Deserialize;
use toml::Spanned;

#[derive(Debug, Deserialize)]
pub(crate) struct RawDocument {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "statement")]
    pub statements: Vec<Spanned<RawStatement>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawStatement {
    #[serde(default)]
    pub hints: Vec<String>,
    #[serde(default)]
    pub fragments: Vec<RawFragment>,
    #[serde(default)]
    pub children: Vec<Spanned<RawStatement>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum RawFragment {
    Timer {
        duration: RawDuration,
        #[serde(default)]
        direction: RawDirection,
    },
    Rounds {
        #[serde(default)]
        count: Option<u32>,
        #[serde(default)]
        scheme: Vec<u32>,
    },
    Effort {
        value: String,
    },
    Action {
        value: String,
    },
    Rep {
        value: u32,
    },
    Resistance {
        amount: f64,
        unit: String,
    },
    Distance {
        amount: f64,
        unit: String,
    },
}

/// Integer seconds or clock text such as `"1:30"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawDuration {
    Seconds(i64),
    Clock(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum RawDirection {
    #[default]
    Down,
    Up,
}

/// Parse `h:mm:ss`, `m:ss` or `:ss` into milliseconds. A leading `-` negates.
pub(crate) fn parse_clock(text: &str) -> Option<i64> {
    let text = text.trim();
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    if body.is_empty() {
        return None;
    }

    let parts: Vec<&str> = body.split(':').collect();
    if parts.len() > 3 {
        return None;
    }

    let mut total: i64 = 0;
    for part in &parts {
        let value = if part.is_empty() {
            0
        } else {
            part.parse::<i64>().ok()?
        };
        if value < 0 {
            return None;
        }
        total = total.checked_mul(60)?.checked_add(value)?;
    }

    let millis = total.checked_mul(1000)?;
    Some(if negative { -millis } else { millis })
}

#[cfg(test)]
mod tests {
    use super::parse_clock;

    #[test]
    fn clock_forms() {
        assert_eq!(parse_clock("1:30"), Some(90_000));
        assert_eq!(parse_clock(":45"), Some(45_000));
        assert_eq!(parse_clock("1:00:00"), Some(3_600_000));
        assert_eq!(parse_clock("20"), Some(20_000));
        assert_eq!(parse_clock("-0:30"), Some(-30_000));
        assert_eq!(parse_clock("1:2:3:4"), None);
        assert_eq!(parse_clock("abc"), None);
        assert_eq!(parse_clock(""), None);
    }
}
