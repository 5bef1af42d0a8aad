//! Database backups with `pg_dump` and per-table CSV export.

use crate::client::PostgresClient;
use crate::config::Options;
use crate::db::postgres::{self, CopyOptions};
use csv::{QuoteStyle, ReaderBuilder, WriterBuilder};
use snafu::{ResultExt, Snafu};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Errors returned by backup operations.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("no {} binary found on PATH", name))]
    MissingBinary { name: String },

    #[snafu(display("{} failed: {}", name, stderr))]
    CommandFailed { name: String, stderr: String },

    #[snafu(display("I/O error on {}: {}", path.display(), source))]
    Io { path: PathBuf, source: std::io::Error },

    #[snafu(display("{}", source))]
    Sql { source: postgres::Error },

    #[snafu(display("CSV error: {}", source))]
    Csv { source: csv::Error },

    #[snafu(display("error resolving password: {}", message))]
    Password { message: String },
}

/// Find an executable by name on the `PATH`.
pub fn find_binary(name: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|path| path.is_file())
}

/// Wrap `pg_dump` and save an entire database's contents to a directory.
///
/// Returns the path of the written `<dbname>.sql` file.
pub fn dump(options: &Options, backup_dir: impl AsRef<Path>) -> Result<PathBuf, Error> {
    let backup_dir = backup_dir.as_ref();
    let bin = find_binary("pg_dump").ok_or_else(|| Error::MissingBinary {
        name: "pg_dump".to_string(),
    })?;
    let output_path = backup_dir.join(format!("{}.sql", options.db_name));
    tracing::info!(
        "dumping database {} to {}",
        options.db_name,
        output_path.display()
    );

    let outfile = fs::File::create(&output_path).context(IoSnafu { path: &output_path })?;
    let mut cmd = Command::new(&bin);
    cmd.arg("--host")
        .arg(&options.db_host)
        .arg("--port")
        .arg(options.db_port.to_string())
        .arg("--username")
        .arg(&options.db_user)
        .arg("--no-password")
        .arg(&options.db_name)
        .stdout(Stdio::from(outfile))
        .stderr(Stdio::piped());
    let password = options.password().map_err(|err| Error::Password {
        message: err.to_string(),
    })?;
    if let Some(password) = password {
        cmd.env("PGPASSWORD", password);
    }

    let output = cmd.output().context(IoSnafu { path: &bin })?;
    if !output.status.success() {
        return Err(Error::CommandFailed {
            name: "pg_dump".to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output_path)
}

/// Options for [`dump_tables`].
#[derive(Clone, Debug)]
pub struct DumpTablesOptions {
    /// Only export tables in this schema.
    pub schema: Option<String>,
    /// The field delimiter of the exported files.
    pub delimiter: char,
    /// Whether each file starts with a header line naming the columns.
    pub header: bool,
    /// Rewrite non-comma exports as comma-separated CSV with non-numeric fields quoted.
    pub coerce_csv: bool,
}

impl Default for DumpTablesOptions {
    fn default() -> Self {
        Self {
            schema: None,
            delimiter: ',',
            header: true,
            coerce_csv: false,
        }
    }
}

/// Export every base table in the database to a `<schema>.<table>.csv` file in `backup_dir`.
///
/// Returns the paths of the written files.
pub async fn dump_tables(
    client: &PostgresClient,
    backup_dir: impl AsRef<Path>,
    options: DumpTablesOptions,
) -> Result<Vec<PathBuf>, Error> {
    let backup_dir = backup_dir.as_ref();
    let tables = client
        .list_tables(options.schema.as_deref())
        .await
        .context(SqlSnafu)?;
    tracing::info!(
        "dumping {} tables to {}",
        tables.len(),
        backup_dir.display()
    );

    let mut written = vec![];
    for table in tables {
        let path = backup_dir.join(format!("{}.{}.csv", table.schema, table.name));
        let mut file = tokio::fs::File::create(&path)
            .await
            .context(IoSnafu { path: &path })?;
        client
            .db()
            .copy_out_csv(
                &table.relation(),
                &mut file,
                CopyOptions {
                    delimiter: options.delimiter,
                    header: options.header,
                },
            )
            .await
            .context(SqlSnafu)?;
        written.push(path);
    }

    if options.coerce_csv {
        if options.delimiter == ',' {
            tracing::warn!("coerce_csv requested but the delimiter is already a comma");
        } else {
            for path in &written {
                rewrite_csv(path, options.delimiter)?;
            }
        }
    }
    Ok(written)
}

/// Rewrite a delimiter-separated file in place as comma-separated CSV with non-numeric fields
/// quoted.
fn rewrite_csv(path: &Path, delimiter: char) -> Result<(), Error> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .context(CsvSnafu)?;

    let tmp = path.with_extension("csv.tmp");
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::NonNumeric)
        .flexible(true)
        .from_path(&tmp)
        .context(CsvSnafu)?;
    for record in reader.records() {
        let record = record.context(CsvSnafu)?;
        writer.write_record(&record).context(CsvSnafu)?;
    }
    writer.flush().context(IoSnafu { path: &tmp })?;
    drop(writer);

    fs::rename(&tmp, path).context(IoSnafu { path })?;
    Ok(())
}
