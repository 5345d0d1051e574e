pub fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|part| {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}

pub fn parse_csv_var(name: &str) -> Option<Vec<String>> {
    std::env::var(name).ok().map(|raw| parse_csv(&raw))
}

/// Parse a boolean value from a raw string, accepting common env-style forms.
///
/// Accepted truthy values (case-insensitive): `"1"`, `"true"`, `"yes"`, `"on"`.
/// Accepted falsy values: `"0"`, `"false"`, `"no"`, `"off"`.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// A variable that is set but whose value does not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidVar {
    pub name: String,
    pub value: String,
}

impl InvalidVar {
    fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// Blank values count as unset.
pub fn parse_bool_value(
    name: &str,
    raw: &str,
) -> Result<Option<bool>, InvalidVar> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    parse_bool(raw)
        .map(Some)
        .ok_or_else(|| InvalidVar::new(name, raw))
}

/// Blank values count as unset.
pub fn parse_number_value<T: std::str::FromStr>(
    name: &str,
    raw: &str,
) -> Result<Option<T>, InvalidVar> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|_| InvalidVar::new(name, raw))
}

pub fn parse_bool_var(name: &str) -> Result<Option<bool>, InvalidVar> {
    match std::env::var(name) {
        Ok(raw) => parse_bool_value(name, &raw),
        Err(_) => Ok(None),
    }
}

pub fn parse_number_var<T: std::str::FromStr>(
    name: &str,
) -> Result<Option<T>, InvalidVar> {
    match std::env::var(name) {
        Ok(raw) => parse_number_value(name, &raw),
        Err(_) => Ok(None),
    }
}

/// First non-blank value among the named variables.
pub fn first_var(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .filter(|value| !value.trim().is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_drops_blank_entries() {
        assert_eq!(parse_csv(" a, ,b ,"), vec!["a", "b"]);
        assert!(parse_csv("").is_empty());
    }

    #[test]
    fn bool_accepts_env_forms() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn number_rejects_typos_instead_of_defaulting() {
        assert_eq!(
            parse_number_value::<u32>("BATCH_CAPACITY", " 20 "),
            Ok(Some(20))
        );
        assert_eq!(parse_number_value::<u32>("BATCH_CAPACITY", "  "), Ok(None));
        assert_eq!(
            parse_number_value::<u32>("BATCH_CAPACITY", "2O"),
            Err(InvalidVar {
                name: "BATCH_CAPACITY".into(),
                value: "2O".into(),
            })
        );
        assert!(parse_number_value::<u16>("SMTP_PORT", "70000").is_err());
    }

    #[test]
    fn bool_value_rejects_unknown_words() {
        assert_eq!(parse_bool_value("SMTP_VERIFY", "on"), Ok(Some(true)));
        assert_eq!(parse_bool_value("SMTP_VERIFY", ""), Ok(None));
        assert!(parse_bool_value("SMTP_VERIFY", "sometimes").is_err());
    }
}
