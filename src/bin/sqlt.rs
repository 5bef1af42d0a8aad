use clap::Parser;
use sql_query_tools::{
    config::Options,
    db::{Relation, Row as _},
    dump::{self, DumpTablesOptions},
    init_logging,
    script::ScriptLog,
};
use std::fs;
use std::path::PathBuf;

/// Convenience toolkit for reading from and writing to Postgres databases.
#[derive(Parser)]
enum Command {
    /// List the base tables in the database.
    Tables {
        /// Only list tables in SCHEMA.
        #[clap(short, long, name = "SCHEMA")]
        schema: Option<String>,

        /// Print the result as JSON.
        #[clap(long)]
        json: bool,

        #[clap(flatten)]
        db: Options,
    },
    /// List the views in the database.
    Views {
        /// Only list views in SCHEMA.
        #[clap(short, long, name = "SCHEMA")]
        schema: Option<String>,

        /// Print the result as JSON.
        #[clap(long)]
        json: bool,

        #[clap(flatten)]
        db: Options,
    },
    /// List the triggers in the database.
    Triggers {
        /// Only list triggers in SCHEMA.
        #[clap(short, long, name = "SCHEMA")]
        schema: Option<String>,

        /// Print the result as JSON.
        #[clap(long)]
        json: bool,

        #[clap(flatten)]
        db: Options,
    },
    /// Describe the columns of a table or view.
    Columns {
        /// The table to describe, optionally schema-qualified.
        #[clap(name = "TABLE")]
        table: Relation,

        /// Print the result as JSON.
        #[clap(long)]
        json: bool,

        #[clap(flatten)]
        db: Options,
    },
    /// Run a query and print the resulting rows.
    Query {
        /// The SQL query to run.
        #[clap(name = "SQL")]
        sql: String,

        /// Field separator for the output.
        #[clap(short, long, default_value = "\t")]
        separator: String,

        #[clap(flatten)]
        db: Options,
    },
    /// Execute a SQL script inside a single transaction.
    Exec {
        /// Path to the script to execute.
        #[clap(name = "FILE", required_unless_present = "command", conflicts_with = "command")]
        file: Option<PathBuf>,

        /// Inline SQL to execute instead of a script file.
        #[clap(short, long)]
        command: Option<String>,

        /// Append each executed statement, timestamped, to this log file.
        #[clap(short, long, name = "LOG")]
        log: Option<PathBuf>,

        #[clap(flatten)]
        db: Options,
    },
    /// Save the entire database to a directory with pg_dump.
    Dump {
        /// Directory to write the dump into.
        #[clap(short, long, name = "DIR", default_value = ".")]
        out: PathBuf,

        #[clap(flatten)]
        db: Options,
    },
    /// Export every base table to a delimiter-separated file.
    DumpTables {
        /// Directory to write the exports into.
        #[clap(short, long, name = "DIR", default_value = ".")]
        out: PathBuf,

        /// Only export tables in SCHEMA.
        #[clap(short, long, name = "SCHEMA")]
        schema: Option<String>,

        /// Field delimiter of the exported files.
        #[clap(short, long, default_value = ",")]
        delimiter: char,

        /// Skip the header line naming the columns.
        #[clap(long)]
        no_header: bool,

        /// Rewrite non-comma exports as quoted, comma-separated CSV.
        #[clap(long)]
        coerce_csv: bool,

        #[clap(flatten)]
        db: Options,
    },
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    init_logging();

    match Command::parse() {
        Command::Tables { schema, json, db } => {
            let client = db.connect().await?;
            let tables = client.list_tables(schema.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tables)?);
            } else {
                for table in tables {
                    println!("{}.{}", table.schema, table.name);
                }
            }
        }
        Command::Views { schema, json, db } => {
            let client = db.connect().await?;
            let views = client.list_views(schema.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&views)?);
            } else {
                for view in views {
                    println!("{}.{}", view.schema, view.name);
                }
            }
        }
        Command::Triggers { schema, json, db } => {
            let client = db.connect().await?;
            let triggers = client.list_triggers(schema.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&triggers)?);
            } else {
                for trigger in triggers {
                    println!(
                        "{}.{}\t{}\t{} {}",
                        trigger.table_schema,
                        trigger.table_name,
                        trigger.name,
                        trigger.activation,
                        trigger.events
                    );
                }
            }
        }
        Command::Columns { table, json, db } => {
            let client = db.connect().await?;
            let columns = client.columns(&table).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&columns)?);
            } else {
                for column in columns {
                    let nullable = if column.is_nullable { "" } else { " not null" };
                    println!("{}\t{}{}", column.name, column.data_type, nullable);
                }
            }
        }
        Command::Query { sql, separator, db } => {
            let client = db.connect().await?;
            let rows = client.read_sql(&sql, &[]).await?;
            if let Some(first) = rows.first() {
                let names = first.names();
                println!("{}", names.join(&separator));
                for row in &rows {
                    let values = names
                        .iter()
                        .map(|name| row.column(name).map(|value| value.to_string()))
                        .collect::<Result<Vec<_>, _>>()?;
                    println!("{}", values.join(&separator));
                }
            }
        }
        Command::Exec {
            file,
            command,
            log,
            db,
        } => {
            let sql = match (file, command) {
                (Some(file), None) => fs::read_to_string(file)?,
                (None, Some(command)) => command,
                _ => unreachable!("clap enforces exactly one of FILE and --command"),
            };
            let mut log = log.map(ScriptLog::new);
            let mut client = db.connect().await?;
            let affected = client.run_script(&sql, log.as_mut()).await?;
            tracing::info!("{affected} rows affected");
        }
        Command::Dump { out, db } => {
            let path = dump::dump(&db, &out)?;
            println!("{}", path.display());
        }
        Command::DumpTables {
            out,
            schema,
            delimiter,
            no_header,
            coerce_csv,
            db,
        } => {
            let client = db.connect().await?;
            let written = dump::dump_tables(
                &client,
                &out,
                DumpTablesOptions {
                    schema,
                    delimiter,
                    header: !no_header,
                    coerce_csv,
                },
            )
            .await?;
            for path in written {
                println!("{}", path.display());
            }
        }
    }

    Ok(())
}
