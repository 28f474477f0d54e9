//! Placeholder expansion for config values.
//!
//! `${env:NAME}` is replaced with the value of environment variable `NAME`
//! (empty when unset). Tilde expansion is left to `shellexpand`.

/// Replace every `${env:NAME}` placeholder in `input`.
pub fn expand_env_placeholders(input: &str) -> String {
    const OPEN: &str = "${env:";

    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                out.push_str(&std::env::var(name).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated: keep verbatim.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_known_variable() {
        std::env::set_var("EARNWATCH_EXPAND_TEST", "value");
        assert_eq!(
            expand_env_placeholders("a-${env:EARNWATCH_EXPAND_TEST}-b"),
            "a-value-b"
        );
    }

    #[test]
    fn unset_variable_expands_to_empty() {
        assert_eq!(
            expand_env_placeholders("x${env:EARNWATCH_SURELY_UNSET_VAR}y"),
            "xy"
        );
    }

    #[test]
    fn unterminated_placeholder_is_kept() {
        assert_eq!(expand_env_placeholders("abc${env:OOPS"), "abc${env:OOPS");
    }

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(expand_env_placeholders("https://feed.example"), "https://feed.example");
    }
}
