/// Replace `${VAR}` placeholders in raw config text with environment values.
///
/// Unset variables and malformed placeholders are left untouched, so a
/// literal `${` in a path survives.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    },
                }
                rest = &after[end + 1..];
            },
            _ => {
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
            "HOME" => Some("/home/me".to_string()),
            "DB" => Some("projects.db".to_string()),
            _ => None,
        }
    }

    #[test]
    fn substitutes_known_vars() {
        assert_eq!(
            substitute_env_with("root = \"${HOME}/code\"\npath = \"${DB}\"", lookup),
            "root = \"/home/me/code\"\npath = \"projects.db\""
        );
    }

    #[test]
    fn leaves_unknown_and_malformed_placeholders() {
        assert_eq!(substitute_env_with("${NOPE}/x", lookup), "${NOPE}/x");
        assert_eq!(substitute_env_with("a ${} b", lookup), "a ${} b");
        assert_eq!(substitute_env_with("dangling ${HOME", lookup), "dangling ${HOME");
    }

    #[test]
    fn plain_text_is_unchanged() {
        assert_eq!(substitute_env("max_depth = 3"), "max_depth = 3");
    }
}
