/// Make a client-supplied file name safe to embed in an object key.
///
/// Object keys are `owner/{millis}-{name}`; anything that could change the
/// key structure (separators, control bytes) is replaced with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ' | '(' | ')') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        // Keep keys comfortably under S3's 1024-byte limit
        trimmed.chars().take(200).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_untouched() {
        assert_eq!(sanitize_file_name("report-v2.pdf"), "report-v2.pdf");
        assert_eq!(sanitize_file_name("photo (1).jpg"), "photo (1).jpg");
    }

    #[test]
    fn test_separators_replaced() {
        assert_eq!(sanitize_file_name("a/b\\c.txt"), "a_b_c.txt");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "_.._etc_passwd");
    }

    #[test]
    fn test_empty_name_fallback() {
        assert_eq!(sanitize_file_name(""), "unnamed");
        assert_eq!(sanitize_file_name("..."), "unnamed");
    }
}
