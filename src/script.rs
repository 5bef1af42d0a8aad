//! Sequencing and logging for multi-statement SQL scripts.

use chrono::Local;
use snafu::Snafu;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Errors returned when preparing a script.
#[derive(Debug, Snafu)]
pub enum Error {
    /// The script could not be tokenized.
    #[snafu(display("error tokenizing SQL script: {}", message))]
    Split { message: String },
}

/// Split a SQL script into its individual statements.
///
/// Statements are separated on semicolons using a SQL tokenizer, so semicolons inside string
/// literals, quoted identifiers and comments do not split. Empty statements (including
/// comment-only ones) are dropped, and a trailing statement without a terminating semicolon is
/// kept.
pub fn split_statements(sql: &str) -> Result<Vec<String>, Error> {
    let tokens = Tokenizer::new(&PostgreSqlDialect {}, sql)
        .tokenize()
        .map_err(|err| Error::Split {
            message: err.to_string(),
        })?;

    let mut statements = vec![];
    let mut current = String::new();
    let mut has_content = false;
    for token in tokens {
        match token {
            Token::SemiColon => {
                if has_content {
                    statements.push(current.trim().to_string());
                }
                current.clear();
                has_content = false;
            }
            token => {
                if !matches!(token, Token::Whitespace(_)) {
                    has_content = true;
                }
                current.push_str(&token.to_string());
            }
        }
    }
    if has_content {
        statements.push(current.trim().to_string());
    }
    Ok(statements)
}

/// An append-only log of executed SQL statements.
///
/// Each recorded statement becomes one line in the log file, prefixed with a
/// `%Y-%m-%d %H:%M:%S` timestamp. The file is opened lazily on the first record, so creating a
/// log never touches the filesystem.
#[derive(Debug)]
pub struct ScriptLog {
    path: PathBuf,
    file: Option<File>,
}

impl ScriptLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    /// The path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one statement to the log.
    pub fn record(&mut self, statement: &str) -> io::Result<()> {
        let mut file = match self.file.take() {
            Some(file) => file,
            None => {
                tracing::info!("writing SQL statement log to {}", self.path.display());
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?
            }
        };
        let result = writeln!(
            file,
            "{} {statement}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        self.file = Some(file);
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::NaiveDateTime;
    use std::fs;

    #[test]
    fn test_split_statements() {
        let stmts = split_statements(
            "CREATE TABLE t (x int4);\nINSERT INTO t VALUES (1);\nSELECT * FROM t",
        )
        .unwrap();
        assert_eq!(
            stmts,
            [
                "CREATE TABLE t (x int4)",
                "INSERT INTO t VALUES (1)",
                "SELECT * FROM t",
            ]
        );
    }

    #[test]
    fn test_split_respects_quoting() {
        // Semicolons inside string literals and quoted identifiers are not separators.
        let stmts =
            split_statements("INSERT INTO t VALUES ('a;b'); SELECT \"col;on\" FROM t;").unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("'a;b'"));
        assert!(stmts[1].contains("\"col;on\""));
    }

    #[test]
    fn test_split_drops_empty_statements() {
        let stmts = split_statements(";;\n-- just a comment\n;SELECT 1;").unwrap();
        assert_eq!(stmts, ["SELECT 1"]);
    }

    #[test]
    fn test_script_log_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statements.log");
        let mut log = ScriptLog::new(&path);
        log.record("CREATE TABLE t (x int4)").unwrap();
        log.record("DROP TABLE t").unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines = contents.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        for (line, statement) in lines.iter().zip(["CREATE TABLE t (x int4)", "DROP TABLE t"]) {
            let (timestamp, logged) = line.split_at(19);
            NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S").unwrap();
            assert_eq!(logged.trim_start(), statement);
        }
    }

    #[test]
    fn test_script_log_is_lazy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statements.log");
        let _log = ScriptLog::new(&path);
        assert!(!path.exists());
    }
}
