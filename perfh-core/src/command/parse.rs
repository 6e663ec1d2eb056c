use std::str::FromStr;

/// Control verbs understood by the command processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Verb {
    Start,
    End,
    Alter,
    Report,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid value for -{key}: `{value}`")]
pub struct OptionError {
    pub key: String,
    pub value: String,
}

/// A command line split into its verb and `-key [value]` options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    verb: String,
    options: Vec<(String, Option<String>)>,
}

impl Command {
    /// Returns `None` for blank input.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace().peekable();
        let verb = tokens.next()?.to_string();

        let mut options = Vec::new();
        while let Some(token) = tokens.next() {
            let Some(key) = option_key(token) else {
                tracing::debug!(token, "ignoring stray command token");
                continue;
            };
            let value = match tokens.peek() {
                Some(next) if option_key(next).is_none() => tokens.next().map(str::to_string),
                _ => None,
            };
            options.push((key.to_string(), value));
        }

        Some(Self { verb, options })
    }

    pub fn verb_text(&self) -> &str {
        &self.verb
    }

    pub fn verb(&self) -> Option<Verb> {
        Verb::from_str(&self.verb).ok()
    }

    /// `Some(None)` for a bare flag, `Some(Some(v))` for `-key v`.
    pub fn option(&self, key: &str) -> Option<Option<&str>> {
        self.options
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_deref())
    }

    pub fn has_flag(&self, key: &str) -> bool {
        self.option(key).is_some()
    }

    pub fn value<T: FromStr>(&self, key: &str) -> Result<Option<T>, OptionError> {
        match self.option(key) {
            None => Ok(None),
            Some(None) => Err(OptionError {
                key: key.to_string(),
                value: String::new(),
            }),
            Some(Some(raw)) => raw.parse::<T>().map(Some).map_err(|_| OptionError {
                key: key.to_string(),
                value: raw.to_string(),
            }),
        }
    }
}

/// `-nt` and `--nt` name an option; `-5` is a value.
fn option_key(token: &str) -> Option<&str> {
    let key = token.trim_start_matches('-');
    if key.len() == token.len() || key.is_empty() || token.parse::<f64>().is_ok() {
        return None;
    }
    Some(key)
}
