//! Text helpers shared by the router and the admin console.

/// Length of a public key in hex characters.
pub const IDENTITY_LENGTH: usize = 64;

/// Nicknames longer than this are cut and suffixed with `..`.
const DISPLAY_NAME_MAX_LENGTH: usize = 22;

/// Whether `candidate` has the shape of a public key.
pub fn is_identity(candidate: &str) -> bool {
    candidate.len() == IDENTITY_LENGTH && candidate.chars().all(|c| c.is_ascii_hexdigit())
}

/// Makes a nickname safe to store and print: non-ASCII characters become
/// `\u{..}` escapes, quotes are dropped, long names are truncated.
pub fn sanitize_display_name(raw: &str) -> String {
    let escaped: String = raw
        .chars()
        .filter(|c| *c != '"')
        .flat_map(|c| {
            if c.is_ascii() && !c.is_ascii_control() {
                vec![c]
            } else {
                c.escape_unicode().collect()
            }
        })
        .collect();

    if escaped.chars().count() > DISPLAY_NAME_MAX_LENGTH {
        let cut: String = escaped.chars().take(DISPLAY_NAME_MAX_LENGTH).collect();
        format!("{cut}..")
    } else {
        escaped
    }
}

/// Four decimals at most, without trailing zeros.
pub fn format_points(value: f64) -> String {
    let fixed = format!("{value:.4}");
    fixed.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Joins lines into replies no longer than `limit` bytes. A single line
/// longer than the limit becomes its own reply.
pub fn chunk_lines<I, S>(lines: I, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in lines {
        let line = line.as_ref();
        if !current.is_empty() && current.len() + 1 + line.len() > limit {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_display_name() {
        assert_eq!(sanitize_display_name("bob"), "bob");
        assert_eq!(sanitize_display_name("say \"hi\""), "say hi");
        assert_eq!(sanitize_display_name("Пётр"), "\\u{41f}\\u{451}\\u{442}\\..");
        assert_eq!(sanitize_display_name("é"), "\\u{e9}");
        assert_eq!(
            sanitize_display_name("abcdefghijklmnopqrstuvwxyz"),
            "abcdefghijklmnopqrstuv.."
        );
    }

    #[test]
    fn test_format_points() {
        assert_eq!(format_points(100.0), "100");
        assert_eq!(format_points(0.0), "0");
        assert_eq!(format_points(2.5), "2.5");
        assert_eq!(format_points(1.0 / 3.0), "0.3333");
    }

    #[test]
    fn test_chunk_lines() {
        let chunks = chunk_lines(["aaaa", "bbbb", "cccc"], 9);
        assert_eq!(chunks, vec!["aaaa\nbbbb".to_string(), "cccc".to_string()]);
        assert!(chunk_lines(Vec::<String>::new(), 10).is_empty());
    }

    #[test]
    fn test_is_identity() {
        assert!(is_identity(&"A".repeat(64)));
        assert!(!is_identity(&"A".repeat(63)));
        assert!(!is_identity(&"Z".repeat(64)));
    }
}
