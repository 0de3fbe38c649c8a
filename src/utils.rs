//! Small helpers shared across the pipeline.
//!
//! - CSV line codec for the queue and ledger files
//! - Filename sanitising for images and articles
//! - Log-friendly string truncation
//! - Output directory validation

use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Split one CSV line into its fields.
///
/// Fields are separated by commas. A field may be wrapped in double quotes, in
/// which case commas inside it are literal and `""` stands for one quote.
/// Whitespace around a quoted field is ignored.
///
/// Returns `None` when a quoted field is never closed or when text follows a
/// closing quote, which the queue treats as malformed. A blank line yields no
/// fields at all.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(split_fields(r#""My Topic","A short description""#).unwrap().len(), 2);
/// assert_eq!(split_fields("bad,line,with,too,many,fields").unwrap().len(), 6);
/// ```
pub fn split_fields(line: &str) -> Option<Vec<String>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Some(Vec::new());
    }

    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| *c == ' ' || *c == '\t') {
            chars.next();
        }

        let mut field = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                if c == '"' {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        closed = true;
                        break;
                    }
                } else {
                    field.push(c);
                }
            }
            if !closed {
                return None;
            }
            while chars.peek().is_some_and(|c| *c == ' ' || *c == '\t') {
                chars.next();
            }
            match chars.next() {
                None => {
                    fields.push(field);
                    return Some(fields);
                }
                Some(',') => fields.push(field),
                Some(_) => return None,
            }
        } else {
            loop {
                match chars.next() {
                    None => {
                        fields.push(field.trim_end().to_string());
                        return Some(fields);
                    }
                    Some(',') => {
                        fields.push(field.trim_end().to_string());
                        break;
                    }
                    Some(c) => field.push(c),
                }
            }
        }
    }
}

/// Join fields into one CSV line, quoting every field.
pub fn quote_all<S: AsRef<str>>(fields: &[S]) -> String {
    fields
        .iter()
        .map(|f| format!("\"{}\"", f.as_ref().replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Replace path separators in a title with `-` so it stays a single path
/// (or URL) segment.
pub fn flatten_separators(title: &str) -> String {
    title.replace(['/', '\\'], "-")
}

/// Stem used for image files: `{date}_{title}` with spaces as underscores,
/// single quotes dropped and path separators flattened.
pub fn image_stem(date: &str, title: &str) -> String {
    format!("{}_{}", date, flatten_separators(title).replace(' ', "_").replace('\'', ""))
}

/// Article filename: `{date}-{title}.md` with spaces as underscores, path
/// separators flattened and quotes, commas and periods dropped.
pub fn article_filename(date: &str, title: &str) -> String {
    let title: String = flatten_separators(title)
        .replace(' ', "_")
        .chars()
        .filter(|c| !matches!(c, '"' | ',' | '.' | '\''))
        .collect();
    format!("{}-{}.md", date, title)
}

/// Public URL of a file published with the site: `site_url` followed by the
/// file's path, without a leading `./` or `/`.
pub fn public_url(site_url: &str, path: &Path) -> String {
    let path = path.to_string_lossy().replace('\\', "/");
    let relative = path.trim_start_matches("./").trim_start_matches('/');
    format!("{}{}", site_url, relative)
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes (on a char boundary) with
/// `"…(+N bytes)"` appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a scratch file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let scratch_path = path.join("..__write_check__");
    stdfs::File::create(&scratch_path)?;
    let _ = stdfs::remove_file(&scratch_path);
    info!("Directory is writable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_quoted_pair() {
        let fields = split_fields(r#""My Topic","A short description""#).unwrap();
        assert_eq!(fields, vec!["My Topic", "A short description"]);
    }

    #[test]
    fn test_split_unquoted_fields() {
        let fields = split_fields("bad,line,with,too,many,fields").unwrap();
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[0], "bad");
        assert_eq!(fields[5], "fields");
    }

    #[test]
    fn test_split_keeps_commas_and_escaped_quotes_inside_quotes() {
        let fields = split_fields(r#""Rust, safely","Say ""hello"" to it""#).unwrap();
        assert_eq!(fields, vec!["Rust, safely", r#"Say "hello" to it"#]);
    }

    #[test]
    fn test_split_blank_line_has_no_fields() {
        assert_eq!(split_fields("").unwrap().len(), 0);
        assert_eq!(split_fields("   \r\n").unwrap().len(), 0);
    }

    #[test]
    fn test_split_rejects_broken_quoting() {
        assert!(split_fields(r#""never closed,foo"#).is_none());
        assert!(split_fields(r#""closed"junk,foo"#).is_none());
    }

    #[test]
    fn test_split_trailing_comma_adds_empty_field() {
        assert_eq!(split_fields("a,").unwrap(), vec!["a", ""]);
    }

    #[test]
    fn test_quote_all_escapes_quotes() {
        assert_eq!(
            quote_all(&["https://x.test/a.html", "He said \"hi\"", "d"]),
            r#""https://x.test/a.html","He said ""hi""","d""#
        );
        let line = quote_all(&["a, b", "c"]);
        assert_eq!(split_fields(&line).unwrap(), vec!["a, b", "c"]);
    }

    #[test]
    fn test_image_stem() {
        assert_eq!(image_stem("2025-05-06", "Don't Panic Now"), "2025-05-06_Dont_Panic_Now");
    }

    #[test]
    fn test_article_filename() {
        assert_eq!(
            article_filename("2025-05-06", "Rust, \"Fast\" and Safe v1.0"),
            "2025-05-06-Rust_Fast_and_Safe_v10.md"
        );
    }

    #[test]
    fn test_titles_with_path_separators_stay_one_segment() {
        assert_eq!(flatten_separators("TCP/IP in Rust"), "TCP-IP in Rust");
        assert_eq!(image_stem("2025-05-06", "TCP/IP in Rust"), "2025-05-06_TCP-IP_in_Rust");
        assert_eq!(
            article_filename("2025-05-06", "C:\\tools/../etc"),
            "2025-05-06-C:-tools--etc.md"
        );
        assert!(!article_filename("2025-05-06", "a/b\\c").contains(['/', '\\']));
    }

    #[test]
    fn test_public_url() {
        let site = "https://blog.example.com/";
        assert_eq!(
            public_url(site, Path::new("./assets/images/a.png")),
            "https://blog.example.com/assets/images/a.png"
        );
        assert_eq!(
            public_url(site, Path::new("/srv/site/files/manual.pdf")),
            "https://blog.example.com/srv/site/files/manual.pdf"
        );
    }

    #[test]
    fn test_truncate_for_log_short_string() {
        assert_eq!(truncate_for_log("Hello, world!", 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundaries() {
        let s = "ééééé";
        let result = truncate_for_log(s, 3);
        assert!(result.starts_with('é'));
        assert!(result.contains("bytes)"));
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a/b");
        ensure_writable_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
        assert!(!nested.join("..__write_check__").exists());
    }
}
