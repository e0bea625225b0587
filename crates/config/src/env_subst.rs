/// Replace `${ENV_VAR}` and `${ENV_VAR:-fallback}` placeholders in raw config text.
///
/// A placeholder without a fallback whose variable is unset is left as-is.
pub fn substitute_env(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated, emit the remainder literally.
            result.push_str(&rest[start..]);
            return result;
        };
        let body = &after[..end];
        result.push_str(&resolve(body));
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    result
}

fn resolve(body: &str) -> String {
    let (name, fallback) = match body.split_once(":-") {
        Some((name, fallback)) => (name, Some(fallback)),
        None => (body, None),
    };

    if name.is_empty() {
        return format!("${{{body}}}");
    }

    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val,
        _ => match fallback {
            Some(f) => f.to_string(),
            None => format!("${{{body}}}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_var() {
        let Ok(path) = std::env::var("PATH") else {
            return;
        };
        assert_eq!(substitute_env("key=${PATH}"), format!("key={path}"));
        assert_eq!(substitute_env("key=${PATH:-unused}"), format!("key={path}"));
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(
            substitute_env("${WAHUB_NONEXISTENT_XYZ}"),
            "${WAHUB_NONEXISTENT_XYZ}"
        );
    }

    #[test]
    fn uses_fallback_for_unset_var() {
        assert_eq!(
            substitute_env("port = ${WAHUB_NONEXISTENT_PORT:-3000}"),
            "port = 3000"
        );
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(substitute_env("a ${B"), "a ${B");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
