//! Parsing and lookup of Postgres password files.
//!
//! A pgpass file holds one `hostname:port:database:username:password` entry per line. Any of
//! the first four fields may be `*`, which matches anything. `#` comments and blank lines are
//! skipped, and a literal `:` or `\` in a field is escaped with a backslash.

use snafu::{ResultExt, Snafu};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Errors returned while reading a pgpass file.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("error reading {}: {}", path.display(), source))]
    Io { path: PathBuf, source: io::Error },

    #[snafu(display(
        "malformed pgpass entry on line {} (expected 5 fields, found {})",
        line,
        found
    ))]
    Malformed { line: usize, found: usize },
}

/// One entry of a pgpass file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub host: String,
    /// The port as written in the file, which may be the wildcard `*`.
    pub port: String,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl Entry {
    /// Whether this entry applies to the given connection parameters.
    pub fn matches(&self, host: &str, port: u16, database: &str, user: &str) -> bool {
        field_matches(&self.host, host)
            && field_matches(&self.port, &port.to_string())
            && field_matches(&self.database, database)
            && field_matches(&self.user, user)
    }
}

fn field_matches(entry: &str, candidate: &str) -> bool {
    entry == "*" || entry == candidate
}

/// The contents of a pgpass file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PgPass {
    entries: Vec<Entry>,
}

impl PgPass {
    /// Read and parse a pgpass file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).context(IoSnafu { path })?;
        Self::parse(&contents)
    }

    /// Parse pgpass-format contents.
    pub fn parse(contents: &str) -> Result<Self, Error> {
        let mut entries = vec![];
        for (i, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = split_fields(line);
            if fields.len() != 5 {
                return Err(Error::Malformed {
                    line: i + 1,
                    found: fields.len(),
                });
            }
            let password = fields.pop().unwrap();
            let user = fields.pop().unwrap();
            let database = fields.pop().unwrap();
            let port = fields.pop().unwrap();
            let host = fields.pop().unwrap();
            entries.push(Entry {
                host,
                port,
                database,
                user,
                password,
            });
        }
        Ok(Self { entries })
    }

    /// The entries of the file, in order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Find the first entry matching the given connection parameters.
    pub fn lookup(&self, host: &str, port: u16, database: &str, user: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|entry| entry.matches(host, port, database, user))
    }
}

/// Split a pgpass line on unescaped colons.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = vec![String::new()];
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    fields.last_mut().unwrap().push(escaped);
                }
            }
            ':' => fields.push(String::new()),
            c => fields.last_mut().unwrap().push(c),
        }
    }
    fields
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse() {
        let pgpass = PgPass::parse(
            "# production\n\
             db.example.com:5432:app:deploy:hunter2\n\
             \n\
             localhost:*:*:postgres:local\n",
        )
        .unwrap();
        assert_eq!(pgpass.entries().len(), 2);
        assert_eq!(pgpass.entries()[0].host, "db.example.com");
        assert_eq!(pgpass.entries()[0].password, "hunter2");
        assert_eq!(pgpass.entries()[1].port, "*");
    }

    #[test]
    fn test_parse_escapes() {
        let pgpass = PgPass::parse(r"localhost:5432:odd\:name:user:p\\ss\:word").unwrap();
        let entry = &pgpass.entries()[0];
        assert_eq!(entry.database, "odd:name");
        assert_eq!(entry.password, r"p\ss:word");
    }

    #[test]
    fn test_parse_malformed() {
        let err = PgPass::parse("localhost:5432:app:user").unwrap_err();
        assert!(matches!(err, Error::Malformed { line: 1, found: 4 }));

        let err = PgPass::parse("ok:5432:app:user:pw\nhost:1:2:3:4:5").unwrap_err();
        assert!(matches!(err, Error::Malformed { line: 2, found: 6 }));
    }

    #[test]
    fn test_lookup() {
        let pgpass = PgPass::parse(
            "db.example.com:5432:app:deploy:prod-pw\n\
             *:*:app:deploy:fallback-pw\n\
             *:*:*:*:any-pw\n",
        )
        .unwrap();

        // The first matching entry wins.
        assert_eq!(
            pgpass
                .lookup("db.example.com", 5432, "app", "deploy")
                .unwrap()
                .password,
            "prod-pw"
        );
        assert_eq!(
            pgpass
                .lookup("other.example.com", 5433, "app", "deploy")
                .unwrap()
                .password,
            "fallback-pw"
        );
        assert_eq!(
            pgpass.lookup("anywhere", 1, "db", "user").unwrap().password,
            "any-pw"
        );

        let pgpass = PgPass::parse("db.example.com:5432:app:deploy:pw").unwrap();
        assert!(pgpass.lookup("db.example.com", 5433, "app", "deploy").is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let err = PgPass::load("/nonexistent/pgpass").unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
