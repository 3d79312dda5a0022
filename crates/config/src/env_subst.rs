/// Expand `${NAME}` and `${NAME:-fallback}` placeholders in raw config text.
///
/// Placeholders whose variable is unset and that carry no fallback are kept
/// verbatim so the parse error (if any) points at the original text.
pub fn substitute_env(input: &str) -> String {
    expand(input, |name| std::env::var(name).ok())
}

fn expand(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated placeholder: copy the remainder untouched.
            out.push_str(&rest[start..]);
            return out;
        };

        let body = &after[..end];
        let (name, fallback) = match body.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (body, None),
        };

        match (name.is_empty(), lookup(name), fallback) {
            (false, Some(value), _) => out.push_str(&value),
            (false, None, Some(fallback)) => out.push_str(fallback),
            _ => {
                out.push_str("${");
                out.push_str(body);
                out.push('}');
            },
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        (name == "BOTHERD_PORT").then(|| "9000".to_string())
    }

    #[test]
    fn replaces_known_variable() {
        assert_eq!(expand("port = ${BOTHERD_PORT}", lookup), "port = 9000");
    }

    #[test]
    fn uses_fallback_when_unset() {
        assert_eq!(expand("bind = \"${BIND:-0.0.0.0}\"", lookup), "bind = \"0.0.0.0\"");
    }

    #[test]
    fn keeps_unknown_placeholder() {
        assert_eq!(expand("${NOPE}", lookup), "${NOPE}");
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(expand("a ${BOTHERD_PORT", lookup), "a ${BOTHERD_PORT");
    }
}
