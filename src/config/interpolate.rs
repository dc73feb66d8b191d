//! `${VAR[:default]}` interpolation for configuration text.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use tracing::warn;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // A literal pattern; compiling it cannot fail.
        Regex::new(r"\$\{([^}:]+)(?::([^}]*))?\}").unwrap_or_else(|_| unreachable!())
    })
}

/// Replace every `${NAME[:default]}` token in `input`.
///
/// Lookup order: process environment, then `builtins`, then the inline
/// default. A token that resolves nowhere and has no default is left as-is;
/// the first such token is logged once per call.
#[must_use]
pub fn interpolate(input: &str, builtins: &HashMap<String, String>) -> String {
    interpolate_with(input, |name| std::env::var(name).ok(), builtins)
}

/// [`interpolate`] with an explicit environment lookup.
pub fn interpolate_with<F>(input: &str, env: F, builtins: &HashMap<String, String>) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut warned = false;
    token_pattern()
        .replace_all(input, |caps: &Captures<'_>| {
            let name = &caps[1];
            if let Some(value) = env(name).or_else(|| builtins.get(name).cloned()) {
                return value;
            }
            if let Some(default) = caps.get(2) {
                return default.as_str().to_string();
            }
            if !warned {
                warn!(
                    first_missing = name,
                    "Missing variable(s) with no default while interpolating config"
                );
                warned = true;
            }
            caps[0].to_string()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builtins() -> HashMap<String, String> {
        HashMap::from([("data".to_string(), "/srv/codex".to_string())])
    }

    fn env(name: &str) -> Option<String> {
        match name {
            "CODEX_BACKEND" => Some("sqlite".to_string()),
            "data" => Some("/from/env".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_env_wins_over_builtin_and_default() {
        let out = interpolate_with("${CODEX_BACKEND:flatfile}", env, &builtins());
        assert_eq!(out, "sqlite");
        assert_eq!(interpolate_with("${data}", env, &builtins()), "/from/env");
    }

    #[test]
    fn test_builtin_then_default() {
        let none = |_: &str| None;
        assert_eq!(
            interpolate_with("path: ${data}/codex.db", none, &builtins()),
            "path: /srv/codex/codex.db"
        );
        assert_eq!(interpolate_with("${MISSING:42}", none, &builtins()), "42");
        assert_eq!(interpolate_with("${MISSING:}", none, &builtins()), "");
    }

    #[test]
    fn test_unresolved_left_as_is() {
        let none = |_: &str| None;
        let input = "a: ${NOPE}\nb: ${ALSO_NOPE}\nc: plain";
        assert_eq!(interpolate_with(input, none, &builtins()), input);
    }

    #[test]
    fn test_dollar_without_braces_untouched() {
        let none = |_: &str| None;
        assert_eq!(interpolate_with("cost: $5 ${", none, &builtins()), "cost: $5 ${");
    }
}
