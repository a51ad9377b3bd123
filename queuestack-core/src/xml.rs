//! XML helpers

pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Whether `c` may appear in an XML 1.0 document
pub fn is_xml_char(c: char) -> bool {
    matches!(
        c,
        '\u{9}' | '\u{A}' | '\u{D}'
            | '\u{20}'..='\u{D7FF}'
            | '\u{E000}'..='\u{FFFD}'
            | '\u{10000}'..='\u{10FFFF}'
    )
}

/// First character of `s` that XML 1.0 cannot carry
pub fn first_invalid_char(s: &str) -> Option<char> {
    s.chars().find(|c| !is_xml_char(*c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml(r#"<a href="x">'&'</a>"#), "&lt;a href=&quot;x&quot;&gt;&apos;&amp;&apos;&lt;/a&gt;");
        assert_eq!(escape_xml("plain"), "plain");
    }

    #[test]
    fn test_xml_chars() {
        assert_eq!(first_invalid_char("tab\tnew\nline\r ok é 😀"), None);
        assert_eq!(first_invalid_char("a\u{1}b"), Some('\u{1}'));
        assert_eq!(first_invalid_char("\u{FFFE}"), Some('\u{FFFE}'));
        assert!(!is_xml_char('\u{1F}'));
        assert!(is_xml_char('\u{10FFFF}'));
    }
}
