//! Foreign key columns without a supporting index.
//!
//! PostgreSQL indexes the referenced side of a foreign key (it must be a key)
//! but never the referencing side. Joins and `ON DELETE` cascades on an
//! unindexed referencing column scan the whole child table.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex_lite::Regex;

use super::rls::CREATE_TABLE_RE;
use super::Detector;
use crate::diagnostics::{Code, Diagnostic, ValidationWarning, WarningCode};
use crate::sql_parser::{
    blank_comments, line_number_at, normalize_identifier, statement_spans, QUALIFIED_IDENT,
};

static ALTER_TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?is)^ALTER\s+TABLE\s+(?:IF\s+EXISTS\s+)?(?:ONLY\s+)?({})\s+(.*)$",
        QUALIFIED_IDENT
    ))
    .expect("valid regex")
});

static ADD_ACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^ADD\s+(?:COLUMN\s+)?(?:IF\s+NOT\s+EXISTS\s+)?(.*)$").expect("valid regex")
});

static TABLE_FK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)^(?:CONSTRAINT\s+(?:"[^"]+"|\w+)\s+)?FOREIGN\s+KEY\s*\(([^)]*)\)\s*REFERENCES\b"#)
        .expect("valid regex")
});

static TABLE_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)^(?:CONSTRAINT\s+(?:"[^"]+"|\w+)\s+)?(?:PRIMARY\s+KEY|UNIQUE)\s*(?:NULLS\s+(?:NOT\s+)?DISTINCT\s*)?\(([^)]*)\)"#)
        .expect("valid regex")
});

static TABLE_CONSTRAINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:CONSTRAINT|CHECK|EXCLUDE|LIKE|PRIMARY|UNIQUE|FOREIGN)\b")
        .expect("valid regex")
});

static COLUMN_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^("[^"]+"|\w+)"#).expect("valid regex"));

static REFERENCES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bREFERENCES\b").expect("valid regex"));

static INLINE_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bPRIMARY\s+KEY\b|\bUNIQUE\b").expect("valid regex"));

static CREATE_INDEX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r#"(?is)\bCREATE\s+(?:UNIQUE\s+)?INDEX\s+(?:CONCURRENTLY\s+)?(?:IF\s+NOT\s+EXISTS\s+)?(?:(?:"[^"]+"|\w+)\s+)?ON\s+(?:ONLY\s+)?({})\s*(?:USING\s+\w+\s*)?\(\s*("[^"]+"|\w+)"#,
        QUALIFIED_IDENT
    ))
    .expect("valid regex")
});

/// Warns for foreign key columns that no index leads with.
pub struct MissingForeignKeyIndex;

const CODES: &[Code] = &[Code::Warning(WarningCode::MissingIndexFk)];

impl Detector for MissingForeignKeyIndex {
    fn name(&self) -> &'static str {
        "missing-fk-index"
    }

    fn codes(&self) -> &'static [Code] {
        CODES
    }

    fn detect(&self, sql: &str) -> Vec<Diagnostic> {
        detect_missing_fk_indexes(sql)
            .into_iter()
            .map(Diagnostic::from)
            .collect()
    }
}

/// One element of a table body or one `ALTER TABLE` action.
#[derive(Debug, PartialEq, Eq)]
enum Element {
    /// A column definition. `references` marks an inline `REFERENCES`,
    /// `keyed` an inline `PRIMARY KEY` / `UNIQUE`.
    Column {
        name: String,
        references: bool,
        keyed: bool,
    },
    /// `FOREIGN KEY (cols) REFERENCES ...`
    ForeignKey { columns: Vec<String> },
    /// `PRIMARY KEY (cols)` / `UNIQUE (cols)`, which build an index.
    Key { columns: Vec<String> },
    Other,
}

#[derive(Debug)]
struct ForeignKey {
    table: String,
    column: String,
    line: usize,
}

/// Return one warning per foreign key column with no index leading on it.
///
/// Coverage comes from `CREATE INDEX` statements anywhere in the migration
/// and from primary key / unique constraints on the same column.
pub fn detect_missing_fk_indexes(sql: &str) -> Vec<ValidationWarning> {
    let text = blank_comments(sql);
    let mut foreign_keys: Vec<ForeignKey> = Vec::new();
    let mut covered: HashSet<(String, String)> = HashSet::new();

    for (offset, stmt) in statement_spans(&text) {
        let (table, elements) = if let Some(parsed) = create_table_elements(stmt) {
            parsed
        } else if let Some(parsed) = alter_table_elements(stmt) {
            parsed
        } else {
            continue;
        };

        for (element_offset, element) in elements {
            let line = line_number_at(&text, offset + element_offset);
            match element {
                Element::Column {
                    name,
                    references,
                    keyed,
                } => {
                    if keyed {
                        covered.insert((table.clone(), name.clone()));
                    }
                    if references {
                        foreign_keys.push(ForeignKey {
                            table: table.clone(),
                            column: name,
                            line,
                        });
                    }
                }
                Element::ForeignKey { columns } => {
                    if let Some(first) = columns.into_iter().next() {
                        foreign_keys.push(ForeignKey {
                            table: table.clone(),
                            column: first,
                            line,
                        });
                    }
                }
                Element::Key { columns } => {
                    if let Some(first) = columns.into_iter().next() {
                        covered.insert((table.clone(), first));
                    }
                }
                Element::Other => {}
            }
        }
    }

    for caps in CREATE_INDEX_RE.captures_iter(&text) {
        if let (Some(t), Some(c)) = (caps.get(1), caps.get(2)) {
            covered.insert((normalize_identifier(t.as_str()), normalize_identifier(c.as_str())));
        }
    }

    let mut reported = HashSet::new();
    foreign_keys
        .into_iter()
        .filter(|fk| !covered.contains(&(fk.table.clone(), fk.column.clone())))
        .filter(|fk| reported.insert((fk.table.clone(), fk.column.clone())))
        .map(|fk| ValidationWarning {
            code: WarningCode::MissingIndexFk,
            message: format!(
                "Foreign key column '{}.{}' has no index",
                fk.table, fk.column
            ),
            line: Some(fk.line),
            suggestion: Some(format!(
                "CREATE INDEX idx_{table}_{column} ON {table} ({column});",
                table = fk.table,
                column = fk.column
            )),
        })
        .collect()
}

/// Parse `CREATE TABLE name ( ... )` into its table name and body elements.
/// Offsets are relative to the start of `stmt`.
fn create_table_elements(stmt: &str) -> Option<(String, Vec<(usize, Element)>)> {
    let caps = CREATE_TABLE_RE.captures(stmt)?;
    if caps.get(0)?.start() != 0 {
        return None;
    }
    let name = caps.get(1)?;
    let table = normalize_identifier(name.as_str());

    let open = name.end() + stmt[name.end()..].find('(')?;
    let close = matching_paren(stmt, open)?;
    let body_start = open + 1;
    let elements = split_top_level(&stmt[body_start..close])
        .into_iter()
        .map(|(off, part)| (body_start + off, classify(part)))
        .collect();
    Some((table, elements))
}

/// Parse the `ADD ...` actions of an `ALTER TABLE` statement.
fn alter_table_elements(stmt: &str) -> Option<(String, Vec<(usize, Element)>)> {
    let caps = ALTER_TABLE_RE.captures(stmt)?;
    let table = normalize_identifier(caps.get(1)?.as_str());
    let actions = caps.get(2)?;

    let elements = split_top_level(actions.as_str())
        .into_iter()
        .filter_map(|(off, action)| {
            let add = ADD_ACTION_RE.captures(action)?;
            let rest = add.get(1)?;
            Some((actions.start() + off + rest.start(), classify(rest.as_str())))
        })
        .collect();
    Some((table, elements))
}

fn classify(part: &str) -> Element {
    if let Some(caps) = TABLE_FK_RE.captures(part) {
        return Element::ForeignKey {
            columns: column_list(caps.get(1).map_or("", |m| m.as_str())),
        };
    }
    if let Some(caps) = TABLE_KEY_RE.captures(part) {
        return Element::Key {
            columns: column_list(caps.get(1).map_or("", |m| m.as_str())),
        };
    }
    if TABLE_CONSTRAINT_RE.is_match(part) {
        return Element::Other;
    }
    match COLUMN_NAME_RE.find(part) {
        Some(m) => {
            let rest = &part[m.end()..];
            Element::Column {
                name: normalize_identifier(m.as_str()),
                references: REFERENCES_RE.is_match(rest),
                keyed: INLINE_KEY_RE.is_match(rest),
            }
        }
        None => Element::Other,
    }
}

fn column_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(normalize_identifier)
        .filter(|c| !c.is_empty())
        .collect()
}

/// Index of the `)` matching the `(` at `open`.
fn matching_paren(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_quote = false;
    for (i, b) in s.bytes().enumerate().skip(open) {
        match b {
            b'\'' => in_quote = !in_quote,
            b'(' if !in_quote => depth += 1,
            b')' if !in_quote => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on commas that are not nested in parentheses or quotes. Each part
/// is trimmed and paired with its offset in `s`.
fn split_top_level(s: &str) -> Vec<(usize, &str)> {
    let mut ranges = Vec::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut start = 0;

    for (i, b) in s.bytes().enumerate() {
        match b {
            b'\'' => in_quote = !in_quote,
            b'(' if !in_quote => depth += 1,
            b')' if !in_quote => depth = depth.saturating_sub(1),
            b',' if !in_quote && depth == 0 => {
                ranges.push((start, i));
                start = i + 1;
            }
            _ => {}
        }
    }
    ranges.push((start, s.len()));

    ranges
        .into_iter()
        .filter_map(|(from, to)| {
            let raw = &s[from..to];
            let trimmed = raw.trim();
            (!trimmed.is_empty()).then(|| (from + raw.len() - raw.trim_start().len(), trimmed))
        })
        .collect()
}
