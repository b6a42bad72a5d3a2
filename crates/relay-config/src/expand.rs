//! `~/` and `$VAR` placeholder expansion.
//!
//! Unknown variables are left verbatim, so `$NOT_SET` stays `$NOT_SET`.

use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("placeholder pattern is valid")
});

/// Expand against the process environment and the current user's home.
pub fn expand(input: &str) -> String {
    expand_with(input, dirs::home_dir().as_deref(), |name| {
        std::env::var(name).ok()
    })
}

/// Expand `~/` first, then `$VAR` and `${VAR}` placeholders.
pub fn expand_with<F>(input: &str, home: Option<&Path>, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    expand_vars(&expand_home(input, home), lookup)
}

/// Replace a leading `~` or `~/` with the home directory.
pub fn expand_home(input: &str, home: Option<&Path>) -> String {
    let Some(home) = home else {
        return input.to_string();
    };
    if input == "~" {
        return home.display().to_string();
    }
    match input.strip_prefix("~/") {
        Some(rest) => home.join(rest).display().to_string(),
        None => input.to_string(),
    }
}

/// Replace `$VAR` and `${VAR}` with values from `lookup`.
pub fn expand_vars<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains('$') {
        return input.to_string();
    }
    VAR_PATTERN
        .replace_all(input, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            lookup(name).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
