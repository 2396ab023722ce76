//! The `argcargv` line-tokenizing contract (§4.1 of the spec).
//!
//! Arguments are whitespace-separated; a double-quoted run is one argument
//! regardless of whitespace inside it; a backslash escapes the following
//! character verbatim (including a quote or another backslash); an empty
//! line yields zero arguments.

/// Splits a single protocol line into its argument vector.
pub fn split(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut current = String::new();
        let mut in_quotes = false;
        loop {
            match chars.next() {
                None => break,
                Some('"') => in_quotes = !in_quotes,
                Some('\\') => {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                }
                Some(c) if c.is_whitespace() && !in_quotes => {
                    // Put the delimiter back by stopping; the outer loop's
                    // leading-whitespace skip handles the rest.
                    break;
                }
                Some(c) => current.push(c),
            }
        }
        args.push(current);
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_plain_whitespace() {
        assert_eq!(split("LOGIN cosign=ABC ticket"), vec!["LOGIN", "cosign=ABC", "ticket"]);
    }

    #[test]
    fn empty_line_yields_zero_args() {
        assert!(split("").is_empty());
        assert!(split("   ").is_empty());
    }

    #[test]
    fn double_quotes_group_one_argument() {
        assert_eq!(
            split(r#"REGISTER "Example Realm" cosign=ABC"#),
            vec!["REGISTER", "Example Realm", "cosign=ABC"]
        );
    }

    #[test]
    fn backslash_escapes_the_next_character() {
        assert_eq!(split(r#"LOGIN cosign=A\ B"#), vec!["LOGIN", "cosign=A B"]);
        assert_eq!(split(r#"LOGIN "a\"b""#), vec!["LOGIN", "a\"b"]);
    }
}
