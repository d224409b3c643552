// ABOUTME: Environment variable interpolation for config values.
// ABOUTME: Expands ${VAR} and ${VAR:-default} references inside strings.

use crate::error::{Error, Result};

/// Expand every `${VAR}` in `value` from the process environment.
///
/// `${VAR:-fallback}` uses `fallback` when `VAR` is unset or empty. A bare
/// `$` not followed by `{` is kept as-is.
pub fn interpolate(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| Error::InvalidConfig(format!("unterminated ${{ in {value:?}")))?;
        let reference = &after[..end];
        out.push_str(&lookup(reference)?);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn lookup(reference: &str) -> Result<String> {
    let (name, fallback) = match reference.split_once(":-") {
        Some((name, fallback)) => (name, Some(fallback)),
        None => (reference, None),
    };
    if name.is_empty() {
        return Err(Error::InvalidConfig("empty ${} reference".to_string()));
    }
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => fallback
            .map(str::to_string)
            .ok_or_else(|| Error::MissingEnvVar(name.to_string())),
    }
}
