//! HTML compaction applied between capture and storage.
//!
//! A bounded heuristic, not an HTML parser: comments are stripped (except
//! conditional forms), whitespace runs collapse to a single space, and the
//! content of ignored tags is copied byte-for-byte. Oversized payloads and
//! pathological results fall back to the original input unchanged, so a
//! failed compaction can never corrupt or drop output.

use std::borrow::Cow;

use crate::config::MinifyMode;

/// Tags whose content is never compacted.
pub const DEFAULT_IGNORE_TAGS: [&str; 2] = ["textarea", "pre"];

/// Payloads above this size are stored as captured.
const SIZE_LIMIT_BYTES: usize = 700_000;

/// Compact `html` according to `mode`.
///
/// `ignore_tags` lists tag names (lowercase) whose content is preserved
/// byte-for-byte; `script` is added implicitly unless the mode permits
/// inline-script compaction.
pub fn apply<'a>(html: &'a str, mode: MinifyMode, ignore_tags: &[String]) -> Cow<'a, str> {
    if mode == MinifyMode::Disabled {
        return Cow::Borrowed(html);
    }
    if html.len() > SIZE_LIMIT_BYTES {
        return Cow::Borrowed(html);
    }

    let mut ignore: Vec<&str> = ignore_tags.iter().map(String::as_str).collect();
    if mode != MinifyMode::HtmlJs && !ignore.iter().any(|tag| *tag == "script") {
        ignore.push("script");
    }

    let cleaned = scan(html.as_bytes(), &ignore);

    // A collapse that ate the whole document means the heuristic misfired.
    if cleaned.len() <= 1 {
        return Cow::Borrowed(html);
    }

    match String::from_utf8(cleaned) {
        Ok(out) => Cow::Owned(out),
        Err(_) => Cow::Borrowed(html),
    }
}

fn scan(bytes: &[u8], ignore: &[&str]) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if b == b'<' {
            if bytes[i..].starts_with(b"<!--") {
                i = emit_comment(bytes, i, &mut out);
                continue;
            }
            if is_tag_start(bytes, i) {
                i = emit_tag(bytes, i, ignore, &mut out);
                continue;
            }
        }

        if is_ws(b) {
            push_space(&mut out);
        } else {
            out.push(b);
        }
        i += 1;
    }

    out
}

/// Strip the comment at `start`, keeping conditional forms (`<!--[...`)
/// verbatim. Returns the index after the comment.
fn emit_comment(bytes: &[u8], start: usize, out: &mut Vec<u8>) -> usize {
    let body = start + 4;
    let Some(terminator) = find(bytes, body, b"-->") else {
        // Unterminated comment; keep the tail untouched.
        out.extend_from_slice(&bytes[start..]);
        return bytes.len();
    };
    let end = terminator + 3;

    if bytes.get(body) == Some(&b'[') {
        out.extend_from_slice(&bytes[start..end]);
    }
    end
}

/// Emit the tag at `start` with internal whitespace collapsed; when it opens
/// an ignored element, additionally emit that element's content verbatim
/// through its matching close tag. Returns the index after everything
/// emitted.
fn emit_tag(bytes: &[u8], start: usize, ignore: &[&str], out: &mut Vec<u8>) -> usize {
    let mut j = start + 1;
    let closing = bytes[j] == b'/';
    if closing {
        j += 1;
    }
    let name_start = j;
    while j < bytes.len() && is_name_byte(bytes[j]) {
        j += 1;
    }
    let name: Vec<u8> = bytes[name_start..j]
        .iter()
        .map(u8::to_ascii_lowercase)
        .collect();

    // Scan to the closing '>' without tripping over quoted attribute values.
    let mut k = j;
    let mut quote: Option<u8> = None;
    while k < bytes.len() {
        let b = bytes[k];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => break,
            None => {}
        }
        k += 1;
    }
    if k >= bytes.len() {
        out.extend_from_slice(&bytes[start..]);
        return bytes.len();
    }

    for &b in &bytes[start..=k] {
        if is_ws(b) {
            push_space(out);
        } else {
            out.push(b);
        }
    }

    let self_closing = bytes[k - 1] == b'/';
    let mut i = k + 1;

    if closing || self_closing || !ignore.iter().any(|tag| tag.as_bytes() == name) {
        return i;
    }

    // Ignored element: copy everything verbatim until the matching close tag
    // (nesting of the same tag is tracked, so a pre inside a pre survives).
    let mut depth = 1usize;
    while i < bytes.len() {
        if bytes[i] != b'<' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        if matches_close_tag(bytes, i, &name) {
            depth -= 1;
            let close_end = find(bytes, i, b">").map_or(bytes.len(), |pos| pos + 1);
            out.extend_from_slice(&bytes[i..close_end]);
            i = close_end;
            if depth == 0 {
                return i;
            }
        } else {
            if matches_open_tag(bytes, i, &name) {
                depth += 1;
            }
            out.push(bytes[i]);
            i += 1;
        }
    }
    i
}

fn matches_close_tag(bytes: &[u8], at: usize, name: &[u8]) -> bool {
    if !bytes[at..].starts_with(b"</") || !starts_with_ci(&bytes[at + 2..], name) {
        return false;
    }
    match bytes.get(at + 2 + name.len()) {
        Some(&b'>') | None => true,
        Some(b) => is_ws(*b),
    }
}

fn matches_open_tag(bytes: &[u8], at: usize, name: &[u8]) -> bool {
    let after = at + 1 + name.len();
    bytes[at] == b'<'
        && starts_with_ci(&bytes[at + 1..], name)
        && bytes
            .get(after)
            .is_some_and(|b| is_ws(*b) || *b == b'>' || *b == b'/')
}

fn starts_with_ci(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.len() >= needle.len()
        && haystack
            .iter()
            .zip(needle)
            .all(|(a, b)| a.to_ascii_lowercase() == *b)
}

fn find(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from > bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| from + pos)
}

fn is_tag_start(bytes: &[u8], at: usize) -> bool {
    match bytes.get(at + 1) {
        Some(&b'/') => bytes.get(at + 2).is_some_and(u8::is_ascii_alphabetic),
        Some(b) => b.is_ascii_alphabetic(),
        None => false,
    }
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-'
}

fn is_ws(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | b'\x0c')
}

fn push_space(out: &mut Vec<u8>) {
    if out.last() != Some(&b' ') {
        out.push(b' ');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ignore(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|tag| tag.to_string()).collect()
    }

    #[test]
    fn disabled_mode_is_byte_identical() {
        let html = "<html>\n  <body>   text  </body>\n</html>";
        let out = apply(html, MinifyMode::Disabled, &ignore(&DEFAULT_IGNORE_TAGS));
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(out, html);
    }

    #[test]
    fn whitespace_runs_collapse() {
        let html = "<p>hello   \n\t world</p>";
        let out = apply(html, MinifyMode::Html, &ignore(&DEFAULT_IGNORE_TAGS));
        assert_eq!(out, "<p>hello world</p>");
    }

    #[test]
    fn comments_are_stripped() {
        let html = "<p>a</p><!-- gone --><p>b</p>";
        let out = apply(html, MinifyMode::Html, &ignore(&DEFAULT_IGNORE_TAGS));
        assert_eq!(out, "<p>a</p><p>b</p>");
    }

    #[test]
    fn conditional_comments_survive() {
        let html = "<!--[if IE]><link href=\"ie.css\"><![endif]--><p>x</p>";
        let out = apply(html, MinifyMode::Html, &ignore(&DEFAULT_IGNORE_TAGS));
        assert_eq!(
            out,
            "<!--[if IE]><link href=\"ie.css\"><![endif]--><p>x</p>"
        );
    }

    #[test]
    fn pre_content_is_preserved_byte_for_byte() {
        let html = "<div>  x  </div><pre>  a   b  </pre><div>  y  </div>";
        let out = apply(html, MinifyMode::Html, &ignore(&["pre"]));
        assert!(out.contains("<pre>  a   b  </pre>"));
        assert!(!out.contains("  x  "));
    }

    #[test]
    fn script_ignored_unless_js_mode() {
        let html = "<script>\nvar a   = 1;\n</script>";
        let html_only = apply(html, MinifyMode::Html, &ignore(&DEFAULT_IGNORE_TAGS));
        assert_eq!(html_only, html);

        let with_js = apply(html, MinifyMode::HtmlJs, &ignore(&DEFAULT_IGNORE_TAGS));
        assert_eq!(with_js, "<script> var a = 1; </script>");
    }

    #[test]
    fn nested_ignored_tags_track_depth() {
        let html = "<pre>outer <pre>inner  x</pre>  tail</pre><p>  z</p>";
        let out = apply(html, MinifyMode::Html, &ignore(&["pre"]));
        assert!(out.contains("<pre>outer <pre>inner  x</pre>  tail</pre>"));
    }

    #[test]
    fn oversized_input_is_untouched() {
        let html = format!("<p>{}</p>", "a  b ".repeat(150_000));
        assert!(html.len() > 700_000);
        let out = apply(&html, MinifyMode::Html, &ignore(&DEFAULT_IGNORE_TAGS));
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn catastrophic_collapse_returns_original() {
        // A document that is pure whitespace collapses to a single space; the
        // sanity check hands back the original instead.
        let html = " \n\t \n ";
        let out = apply(html, MinifyMode::Html, &ignore(&DEFAULT_IGNORE_TAGS));
        assert_eq!(out, html);
    }

    #[test]
    fn attribute_whitespace_collapses_inside_tags() {
        let html = "<a   href=\"/x\"\n   class=\"y\">link</a>";
        let out = apply(html, MinifyMode::Html, &ignore(&DEFAULT_IGNORE_TAGS));
        assert_eq!(out, "<a href=\"/x\" class=\"y\">link</a>");
    }

    #[test]
    fn tag_case_is_insensitive_for_ignores() {
        let html = "<PRE>  keep  </PRE>";
        let out = apply(html, MinifyMode::Html, &ignore(&["pre"]));
        assert_eq!(out, "<PRE>  keep  </PRE>");
    }
}
