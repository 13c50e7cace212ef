//! Lightweight lexical helpers for migration SQL.
//!
//! Nothing here builds an AST. Detectors work on raw text with regexes;
//! these helpers give them comment-free input, statement boundaries and
//! identifier normalization.

use std::sync::LazyLock;

use regex_lite::Regex;

static INLINE_BLOCK_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\*.*?\*/").expect("valid regex"));

/// Remove comments from a single line.
///
/// Block comments are only removed when they open and close on the same
/// line. A comment spanning several lines is left in place, so text on its
/// inner lines is still visible to line-based detectors.
pub fn strip_line_comments(line: &str) -> String {
    let without_blocks = INLINE_BLOCK_COMMENT_RE.replace_all(line, " ");
    match without_blocks.find("--") {
        Some(idx) => without_blocks[..idx].to_string(),
        None => without_blocks.into_owned(),
    }
}

/// Replace every comment in `sql` with spaces, keeping byte offsets and
/// newlines intact. String literals and dollar-quoted bodies are untouched.
pub fn blank_comments(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut out = bytes.to_vec();
    let mut i = 0;

    let blank = |out: &mut Vec<u8>, from: usize, to: usize| {
        for b in &mut out[from..to] {
            if *b != b'\n' {
                *b = b' ';
            }
        }
    };

    while i < len {
        match bytes[i] {
            b'-' if i + 1 < len && bytes[i + 1] == b'-' => {
                let start = i;
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
                blank(&mut out, start, i);
            }
            b'/' if i + 1 < len && bytes[i + 1] == b'*' => {
                let start = i;
                i = skip_block_comment(bytes, i);
                blank(&mut out, start, i);
            }
            b'\'' => i = skip_string_literal(bytes, i),
            b'$' => i = skip_dollar_quoted(sql, i),
            _ => i += 1,
        }
    }

    String::from_utf8(out).unwrap_or_else(|_| sql.to_string())
}

/// Split SQL into individual statements, respecting dollar-quoted blocks,
/// string literals, and comments.
pub fn split_statements(sql: &str) -> Vec<&str> {
    statement_spans(sql).into_iter().map(|(_, s)| s).collect()
}

/// Like [`split_statements`], but each statement comes with the byte offset
/// where its trimmed text starts in `sql`.
pub fn statement_spans(sql: &str) -> Vec<(usize, &str)> {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < len {
        match bytes[i] {
            b'-' if i + 1 < len && bytes[i + 1] == b'-' => {
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if i + 1 < len && bytes[i + 1] == b'*' => i = skip_block_comment(bytes, i),
            b'\'' => i = skip_string_literal(bytes, i),
            b'$' => i = skip_dollar_quoted(sql, i),
            b';' => {
                push_span(sql, start, i, &mut statements);
                i += 1;
                start = i;
            }
            _ => i += 1,
        }
    }

    push_span(sql, start, len, &mut statements);

    statements
}

fn push_span<'a>(sql: &'a str, from: usize, to: usize, out: &mut Vec<(usize, &'a str)>) {
    let raw = &sql[from..to];
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        let lead = raw.len() - raw.trim_start().len();
        out.push((from + lead, trimmed));
    }
}

/// Advance past a (possibly nested) block comment starting at `i`.
fn skip_block_comment(bytes: &[u8], mut i: usize) -> usize {
    let len = bytes.len();
    i += 2;
    let mut depth = 1;
    while i < len && depth > 0 {
        if i + 1 < len && bytes[i] == b'/' && bytes[i + 1] == b'*' {
            depth += 1;
            i += 2;
        } else if i + 1 < len && bytes[i] == b'*' && bytes[i + 1] == b'/' {
            depth -= 1;
            i += 2;
        } else {
            i += 1;
        }
    }
    i
}

/// Advance past a string literal (standard or `E'...'`) starting at `i`.
fn skip_string_literal(bytes: &[u8], mut i: usize) -> usize {
    let len = bytes.len();
    let is_escape_string = i > 0
        && (bytes[i - 1] == b'E' || bytes[i - 1] == b'e')
        && (i < 2 || !(bytes[i - 2].is_ascii_alphanumeric() || bytes[i - 2] == b'_'));
    i += 1;
    while i < len {
        if is_escape_string && bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == b'\'' {
            if i + 1 < len && bytes[i + 1] == b'\'' {
                i += 2;
            } else {
                return i + 1;
            }
        } else {
            i += 1;
        }
    }
    len
}

/// Advance past a dollar-quoted body (`$$...$$`, `$tag$...$tag$`) starting at `i`.
/// A lone `$` (e.g. a positional parameter) advances by the tag scan only.
fn skip_dollar_quoted(sql: &str, mut i: usize) -> usize {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let tag_start = i;
    i += 1;
    while i < len && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    if i < len && bytes[i] == b'$' {
        let tag = &sql[tag_start..=i];
        i += 1;
        while i < len {
            if bytes[i] == b'$' && sql[i..].starts_with(tag) {
                return i + tag.len();
            }
            i += 1;
        }
        return len;
    }
    i
}

/// Normalize a possibly schema-qualified, possibly quoted identifier to the
/// bare lower-cased relation name: `"Public"."Orders"` becomes `orders`.
pub fn normalize_identifier(raw: &str) -> String {
    let last = raw.rsplit('.').next().unwrap_or(raw);
    last.trim().trim_matches('"').to_lowercase()
}

/// 1-based line number of a byte offset.
pub fn line_number_at(sql: &str, offset: usize) -> usize {
    let end = offset.min(sql.len());
    sql.as_bytes()[..end].iter().filter(|b| **b == b'\n').count() + 1
}

/// Regex fragment matching an optionally schema-qualified identifier, quoted
/// or bare. Captures nothing on its own.
pub const QUALIFIED_IDENT: &str = r#"(?:(?:"[^"]+"|\w+)\s*\.\s*)?(?:"[^"]+"|\w+)"#;
