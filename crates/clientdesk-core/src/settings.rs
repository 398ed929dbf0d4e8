//! Flag and environment lookups shared by the hub and the CLI.

/// `1`, `true`, `yes` and `on` in any case.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn env_true(key: &str) -> bool {
    std::env::var(key).map(|value| is_truthy(&value)).unwrap_or(false)
}

/// Trimmed flag value when set, otherwise the non-blank environment value.
pub fn resolve_setting(flag: &str, env_key: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.trim().to_string());
    }
    std::env::var(env_key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
