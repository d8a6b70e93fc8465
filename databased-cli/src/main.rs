use clap::{Parser, Subcommand, ValueEnum};
use databased::{Document, Fields, Store, StoreConfig};
use std::path::PathBuf;
use std::process;

/// databased CLI: manage and query a databased store from the command line
#[derive(Parser)]
#[command(name = "databased", version, about)]
struct Cli {
    /// Project directory containing the `databased` data directory
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new database
    CreateDatabase {
        /// Database name
        name: String,
    },

    /// Create a new collection inside a database
    CreateCollection {
        /// Collection name
        name: String,
        /// Database name
        database: String,
    },

    /// Copy a database and its indexes to a backup directory
    BackupDatabase {
        /// Database name
        name: String,
        /// Backup root (default: `backup_path` from databased/settings.json)
        #[arg(long)]
        to: Option<PathBuf>,
    },

    /// List databases
    Databases,

    /// List collections in a database
    Collections {
        /// Database name
        database: String,
    },

    /// Get a single document
    Get {
        database: String,
        collection: String,
        id: String,
    },

    /// Replace a document (e.g. --field name=Alice --field age=31)
    Set {
        database: String,
        collection: String,
        id: String,
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Merge fields into a document, creating it if absent
    Update {
        database: String,
        collection: String,
        id: String,
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Delete a document and its index entries
    Delete {
        database: String,
        collection: String,
        id: String,
    },

    /// List documents in a collection
    List {
        database: String,
        collection: String,
        /// Maximum number of documents to return
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Query a collection through a property index (e.g. query app users age '>' 30)
    Query {
        database: String,
        collection: String,
        property: String,
        /// One of ==, !=, >, <, <=, >=
        operator: String,
        /// Value to compare against, parsed as JSON when possible
        value: String,
        /// Maximum number of documents to return
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show the index entries for a property
    Index {
        database: String,
        collection: String,
        property: String,
    },

    /// Rebuild every property index of a collection from its documents
    RebuildIndex {
        database: String,
        collection: String,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    log::debug!("Using project directory {}", cli.project_dir.display());
    let store = Store::new(StoreConfig::new(&cli.project_dir));

    let output = match cli.command {
        Command::CreateDatabase { name } => {
            let outcome = store.create_database(&name)?;
            serde_json::json!({ "database": name, "created": outcome.is_created() })
        }

        Command::CreateCollection { name, database } => {
            let outcome = store.create_collection(&database, &name)?;
            serde_json::json!({
                "database": database,
                "collection": name,
                "created": outcome.is_created(),
            })
        }

        Command::BackupDatabase { name, to } => {
            let destination = match to {
                Some(root) => store.backup_database(&name, &root)?,
                None => store.backup_database_with_settings(&name)?,
            };
            serde_json::json!({
                "ok": true,
                "database": name,
                "backup": destination.display().to_string(),
            })
        }

        Command::Databases => serde_json::to_value(store.list_databases()?)?,

        Command::Collections { database } => serde_json::to_value(store.list_collections(&database)?)?,

        Command::Get {
            database,
            collection,
            id,
        } => {
            let snapshot = store.get_doc(&database, &collection, &id)?;
            match snapshot.data() {
                Some(data) => serde_json::Value::Object(data.clone()),
                None => serde_json::json!({ "exists": false, "id": id }),
            }
        }

        Command::Set {
            database,
            collection,
            id,
            fields,
        } => {
            store.set_doc(&database, &collection, &id, fields_to_map(&fields))?;
            serde_json::json!({ "ok": true, "id": id })
        }

        Command::Update {
            database,
            collection,
            id,
            fields,
        } => {
            store.update_doc(&database, &collection, &id, fields_to_map(&fields))?;
            serde_json::json!({ "ok": true, "id": id })
        }

        Command::Delete {
            database,
            collection,
            id,
        } => {
            store.delete_doc(&database, &collection, &id)?;
            serde_json::json!({ "ok": true, "deleted": id })
        }

        Command::List {
            database,
            collection,
            limit,
        } => documents_to_value(store.get_collection(&database, &collection, limit)?),

        Command::Query {
            database,
            collection,
            property,
            operator,
            value,
            limit,
        } => {
            let condition = databased::where_(&property, &operator, parse_value(&value))?;
            documents_to_value(store.query(&database, &collection, &condition, limit)?)
        }

        Command::Index {
            database,
            collection,
            property,
        } => match store.load_index(&database, &collection, &property)? {
            Some(index) => {
                let mut map = serde_json::Map::new();
                for (key, entry) in index.iter() {
                    map.insert(key.to_string(), serde_json::to_value(entry)?);
                }
                serde_json::Value::Object(map)
            }
            None => serde_json::json!({}),
        },

        Command::RebuildIndex {
            database,
            collection,
        } => {
            let entries = store.rebuild_indexes(&database, &collection)?;
            serde_json::json!({ "ok": true, "entries": entries })
        }
    };

    print_output(&output, &cli.format)?;
    Ok(())
}

fn print_output(
    value: &serde_json::Value,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

/// Parse a command-line value as JSON (numbers, booleans, arrays, objects),
/// falling back to a plain string.
fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn fields_to_map(fields: &[(String, String)]) -> Fields {
    fields
        .iter()
        .map(|(key, val)| (key.clone(), parse_value(val)))
        .collect()
}

fn documents_to_value(docs: Vec<Document>) -> serde_json::Value {
    let items = docs
        .into_iter()
        .map(|doc| {
            let mut obj = serde_json::Map::new();
            obj.insert("id".into(), serde_json::Value::String(doc.id));
            obj.extend(doc.data);
            serde_json::Value::Object(obj)
        })
        .collect();
    serde_json::Value::Array(items)
}
