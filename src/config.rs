//! Database connection options.

use crate::client::PostgresClient;
use crate::db::postgres::{Config, Connection};
use crate::pgpass::PgPass;
use anyhow::Error;
use clap::Args;
use std::path::{Path, PathBuf};

/// Database connection options.
#[derive(Clone, Debug, Args)]
pub struct Options {
    /// Hostname of the Postgres server.
    #[clap(long, env = "SQLT_DB_HOST", default_value = "localhost")]
    pub db_host: String,

    /// Port the Postgres server listens on.
    #[clap(long, env = "SQLT_DB_PORT", default_value = "5432")]
    pub db_port: u16,

    /// Name of the database to connect to.
    #[clap(long, env = "SQLT_DB_NAME", default_value = "postgres")]
    pub db_name: String,

    /// User as which to connect to the database.
    #[clap(long, env = "SQLT_DB_USER", default_value = "postgres")]
    pub db_user: String,

    /// Password for connecting to the database.
    ///
    /// When absent, the pgpass file is consulted; if it has no matching entry either, the
    /// connection is attempted without a password.
    #[clap(long, env = "SQLT_DB_PASSWORD")]
    pub db_password: Option<String>,

    /// Path to a pgpass-format credentials file. Defaults to ~/.pgpass when that file exists.
    #[clap(long, env = "SQLT_PGPASS")]
    pub pgpass: Option<PathBuf>,
}

impl Options {
    /// Resolve the password for these options.
    ///
    /// An explicit password takes precedence over the pgpass file.
    pub fn password(&self) -> Result<Option<String>, Error> {
        if let Some(password) = &self.db_password {
            return Ok(Some(password.clone()));
        }
        let path = match &self.pgpass {
            Some(path) => path.clone(),
            None => match default_pgpass_path() {
                Some(path) => path,
                None => return Ok(None),
            },
        };
        let pgpass = PgPass::load(&path)?;
        let entry = pgpass.lookup(&self.db_host, self.db_port, &self.db_name, &self.db_user);
        if entry.is_none() {
            tracing::debug!(
                "no entry for {}@{}:{}/{} in {}",
                self.db_user,
                self.db_host,
                self.db_port,
                self.db_name,
                path.display()
            );
        }
        Ok(entry.map(|entry| entry.password.clone()))
    }

    /// The connection [`Config`] described by these options.
    pub fn config(&self) -> Result<Config, Error> {
        let mut config = Config::default();
        config
            .host(&self.db_host)
            .port(self.db_port)
            .dbname(&self.db_name)
            .user(&self.db_user);
        if let Some(password) = self.password()? {
            config.password(password);
        }
        Ok(config)
    }

    /// Connect to the database.
    pub async fn connect(&self) -> Result<PostgresClient, Error> {
        Ok(Connection::new(self.config()?).await?.into())
    }
}

fn default_pgpass_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    let path = Path::new(&home).join(".pgpass");
    path.is_file().then_some(path)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    fn options() -> Options {
        Options {
            db_host: "db.example.com".into(),
            db_port: 5432,
            db_name: "app".into(),
            db_user: "deploy".into(),
            db_password: None,
            pgpass: None,
        }
    }

    #[test]
    fn test_explicit_password_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pgpass");
        fs::write(&path, "db.example.com:5432:app:deploy:from-file\n").unwrap();

        let mut options = options();
        options.pgpass = Some(path);
        assert_eq!(options.password().unwrap().as_deref(), Some("from-file"));

        options.db_password = Some("explicit".into());
        assert_eq!(options.password().unwrap().as_deref(), Some("explicit"));
    }

    #[test]
    fn test_password_from_pgpass_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pgpass");
        fs::write(&path, "other.example.com:5432:app:deploy:other\n").unwrap();

        let mut options = options();
        options.pgpass = Some(path);
        // No matching entry: connect without a password.
        assert_eq!(options.password().unwrap(), None);
    }

    #[test]
    fn test_missing_pgpass_file_is_an_error() {
        let mut options = options();
        options.pgpass = Some("/nonexistent/pgpass".into());
        assert!(options.password().is_err());
    }
}
