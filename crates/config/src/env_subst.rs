/// Expand `${VAR}` and `${VAR:-fallback}` placeholders in raw config text.
///
/// A placeholder whose variable is unset and has no fallback is left as-is,
/// so the parser reports it in context instead of silently seeing "".
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated: keep the remainder literally.
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

    fn fake(name: &str) -> Option<String> {
        (name == "KAFKA_BROKERS").then(|| "kafka-1:9092".to_string())
    }

    #[test]
    fn substitutes_known_var() {
        assert_eq!(
            substitute_with("brokers = \"${KAFKA_BROKERS}\"", fake),
            "brokers = \"kafka-1:9092\""
        );
    }

    #[test]
    fn set_var_wins_over_fallback() {
        assert_eq!(
            substitute_with("${KAFKA_BROKERS:-localhost:9092}", fake),
            "kafka-1:9092"
        );
    }

    #[test]
    fn fallback_used_when_unset() {
        assert_eq!(substitute_with("port = ${PORT:-8081}", fake), "port = 8081");
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(
            substitute_env("${BIDFEED_NONEXISTENT_XYZ}"),
            "${BIDFEED_NONEXISTENT_XYZ}"
        );
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(substitute_with("a ${OPEN", fake), "a ${OPEN");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
