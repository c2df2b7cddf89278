//! Environment variable interpolation for config files.
//!
//! Supports the following syntax:
//! - `$VAR` or `${VAR}` - substitute with env var value, error if missing
//! - `${VAR:-default}` - use default if VAR is unset OR empty
//! - `${VAR-default}` - use default only if VAR is unset (empty is OK)
//! - `$$` - escape sequence for literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$                           # Escape sequence $$
        |
        \$\{                           # Opening ${
            ([A-Za-z_][A-Za-z0-9_]*)   # Variable name (1)
            (?:(:?-)([^}]*))?          # Default marker (2) and value (3)
        \}
        |
        \$([A-Za-z_][A-Za-z0-9_]*)     # Unbraced $VAR (4)
        ",
    )
    .expect("Invalid regex pattern")
});

/// Interpolate environment variables in `input`.
///
/// Errors are accumulated so every missing variable is reported at once.
pub fn interpolate(input: &str) -> Result<String, Vec<String>> {
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN.replace_all(input, |caps: &Captures| {
        let whole = &caps[0];
        if whole == "$$" {
            return "$".to_string();
        }

        let Some(name) = caps.get(1).or_else(|| caps.get(4)).map(|m| m.as_str()) else {
            return whole.to_string();
        };
        let marker = caps.get(2).map(|m| m.as_str());
        let default = caps.get(3).map(|m| m.as_str());

        match (env::var(name), default) {
            (Ok(value), _) if value.contains(['\n', '\r']) => {
                errors.push(format!(
                    "environment variable '{name}' contains newlines, which is not allowed"
                ));
                whole.to_string()
            }
            (Ok(value), Some(default)) if value.is_empty() && marker == Some(":-") => {
                default.to_string()
            }
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.to_string(),
            (Err(_), None) => {
                errors.push(format!("environment variable '{name}' is not set"));
                whole.to_string()
            }
        }
    });

    if errors.is_empty() {
        Ok(text.into_owned())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_env_vars<F, R>(vars: &[(&str, Option<&str>)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let originals: Vec<_> = vars.iter().map(|(k, _)| (*k, env::var(k).ok())).collect();

        // SAFETY: each test uses its own variable names and restores them afterwards
        for (key, value) in vars {
            match value {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }

        let result = f();

        // SAFETY: restoring original environment state
        for (key, original) in originals {
            match original {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }

        result
    }

    #[test]
    fn test_plain_and_braced_substitution() {
        with_env_vars(&[("FLURRY_TEST_BUCKET", Some("exports"))], || {
            assert_eq!(
                interpolate("url: s3://$FLURRY_TEST_BUCKET/${FLURRY_TEST_BUCKET}").unwrap(),
                "url: s3://exports/exports"
            );
        });
    }

    #[test]
    fn test_missing_variables_accumulate() {
        with_env_vars(
            &[("FLURRY_TEST_MISS1", None), ("FLURRY_TEST_MISS2", None)],
            || {
                let errors = interpolate("a: $FLURRY_TEST_MISS1, b: ${FLURRY_TEST_MISS2}").unwrap_err();
                assert_eq!(errors.len(), 2);
                assert!(errors[0].contains("FLURRY_TEST_MISS1"));
                assert!(errors[1].contains("not set"));
            },
        );
    }

    #[test]
    fn test_defaults() {
        with_env_vars(
            &[("FLURRY_TEST_UNSET", None), ("FLURRY_TEST_EMPTY", Some(""))],
            || {
                assert_eq!(
                    interpolate("${FLURRY_TEST_UNSET:-gzip}").unwrap(),
                    "gzip"
                );
                assert_eq!(
                    interpolate("${FLURRY_TEST_EMPTY:-gzip}").unwrap(),
                    "gzip"
                );
                assert_eq!(interpolate("${FLURRY_TEST_EMPTY-gzip}").unwrap(), "");
                assert_eq!(interpolate("${FLURRY_TEST_UNSET-gzip}").unwrap(), "gzip");
            },
        );
    }

    #[test]
    fn test_escape_leaves_template_braces_alone() {
        // Key templates use `{{ }}` and must pass through untouched.
        assert_eq!(
            interpolate("prefix: \"{{topic}}/$$\"").unwrap(),
            "prefix: \"{{topic}}/$\""
        );
    }

    #[test]
    fn test_newline_injection_blocked() {
        with_env_vars(&[("FLURRY_TEST_INJECT", Some("a\r\nurl: evil"))], || {
            let errors = interpolate("secret: $FLURRY_TEST_INJECT").unwrap_err();
            assert!(errors[0].contains("newlines"));
        });
    }

    #[test]
    fn test_yaml_credentials_example() {
        with_env_vars(
            &[
                ("FLURRY_TEST_KEY_ID", Some("AKIA123")),
                ("FLURRY_TEST_SECRET", Some("secret")),
                ("FLURRY_TEST_REGION", None),
            ],
            || {
                let yaml = r#"
storage:
  url: "s3://exports"
  access_key_id: ${FLURRY_TEST_KEY_ID}
  secret_access_key: ${FLURRY_TEST_SECRET}
  region: ${FLURRY_TEST_REGION:-us-east-1}
"#;
                let text = interpolate(yaml).unwrap();
                assert!(text.contains("access_key_id: AKIA123"));
                assert!(text.contains("secret_access_key: secret"));
                assert!(text.contains("region: us-east-1"));
            },
        );
    }
}
