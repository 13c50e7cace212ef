//! Diagnostic model shared by every detector.

use serde::{Deserialize, Serialize};

/// Codes for findings that block a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// `DROP TABLE` removes a table and all of its rows.
    DropTable,
    /// `DROP COLUMN` removes a column and its data.
    DropColumn,
    /// `TRUNCATE` deletes every row of a table.
    Truncate,
}

/// Codes for advisory findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningCode {
    /// A table is created without enabling row level security.
    MissingRls,
    /// A foreign key column has no supporting index.
    MissingIndexFk,
    /// A column type change has no explicit `USING` cast.
    TypeChange,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 3] = [ErrorCode::DropTable, ErrorCode::DropColumn, ErrorCode::Truncate];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DropTable => "DROP_TABLE",
            ErrorCode::DropColumn => "DROP_COLUMN",
            ErrorCode::Truncate => "TRUNCATE",
        }
    }
}

impl WarningCode {
    pub const ALL: [WarningCode; 3] = [
        WarningCode::MissingRls,
        WarningCode::MissingIndexFk,
        WarningCode::TypeChange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WarningCode::MissingRls => "MISSING_RLS",
            WarningCode::MissingIndexFk => "MISSING_INDEX_FK",
            WarningCode::TypeChange => "TYPE_CHANGE",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for WarningCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Either kind of diagnostic code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Error(ErrorCode),
    Warning(WarningCode),
}

impl Code {
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Error(c) => c.as_str(),
            Code::Warning(c) => c.as_str(),
        }
    }
}

/// A hazard severe enough to block a migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub code: ErrorCode,
    pub message: String,
    /// 1-based line number, when the detector can place the finding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// An advisory finding. Same shape as [`ValidationError`], never blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationWarning {
    pub code: WarningCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// A single detector finding of either severity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    Error(ValidationError),
    Warning(ValidationWarning),
}

impl Diagnostic {
    pub fn code(&self) -> Code {
        match self {
            Diagnostic::Error(e) => Code::Error(e.code),
            Diagnostic::Warning(w) => Code::Warning(w.code),
        }
    }
}

impl From<ValidationError> for Diagnostic {
    fn from(e: ValidationError) -> Self {
        Diagnostic::Error(e)
    }
}

impl From<ValidationWarning> for Diagnostic {
    fn from(w: ValidationWarning) -> Self {
        Diagnostic::Warning(w)
    }
}
