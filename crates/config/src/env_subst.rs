//! `${VAR}` expansion for config files.

/// Expand `${VAR}` placeholders against the process environment.
///
/// A placeholder whose variable is unset stays verbatim, so a downstream
/// validation failure points at the unexpanded name rather than at a
/// silently-empty value.
pub fn substitute_env(input: &str) -> String {
    expand(input, |name| std::env::var(name).ok())
}

/// Slice-based scan over `${...}` placeholders with a pluggable lookup, so
/// tests never touch the process environment. Only `[A-Za-z0-9_]+` counts as
/// a variable name; anything else (including an unterminated `${`) passes
/// through untouched.
fn expand(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let name_end = after.find('}');
        let name = name_end.map(|end| &after[..end]).filter(|name| {
            !name.is_empty()
                && name
                    .bytes()
                    .all(|b| b == b'_' || b.is_ascii_alphanumeric())
        });

        match name {
            Some(name) => {
                match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    },
                }
                rest = &after[name.len() + 1..];
            },
            None => {
                // Not a placeholder; emit the `${` and rescan from there.
                out.push_str("${");
                rest = after;
            },
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "HOST" => Some("gw.internal".into()),
            "PORT" => Some("19710".into()),
            _ => None,
        }
    }

    #[test]
    fn expands_a_placeholder() {
        assert_eq!(expand("url = ${HOST}", lookup), "url = gw.internal");
    }

    #[test]
    fn expands_several_in_one_value() {
        assert_eq!(
            expand("nexus_url = \"wss://${HOST}:${PORT}/ws\"", lookup),
            "nexus_url = \"wss://gw.internal:19710/ws\""
        );
    }

    #[test]
    fn unset_variable_stays_verbatim() {
        assert_eq!(expand("key = ${MISSING}", lookup), "key = ${MISSING}");
    }

    #[test]
    fn unterminated_placeholder_passes_through() {
        assert_eq!(expand("key = ${HOST", lookup), "key = ${HOST");
    }

    #[test]
    fn non_name_content_is_not_a_placeholder() {
        assert_eq!(expand("${not a var}", lookup), "${not a var}");
        assert_eq!(expand("${}", lookup), "${}");
    }

    #[test]
    fn bare_dollar_untouched() {
        assert_eq!(expand("cost is $5 {really}", lookup), "cost is $5 {really}");
    }
}
