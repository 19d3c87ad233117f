use brickdb::relations::RelationData;
use brickdb::schema::TableKind;
use brickdb::{
    DocumentPayload, DocumentTarget, Filter, ListQuery, LoggingHook, PromotionRequest, ReadScope,
    Store, VersionSelector, VersionType,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::process;

/// brickdb CLI: manage versioned brick content from the command line
#[derive(Parser)]
#[command(name = "brickdb", version, about)]
struct Cli {
    /// Path to the SQLite database file
    #[arg(long, default_value = "brickdb.sqlite")]
    db: String,

    /// Path to the collection config
    #[arg(long, default_value = "brickdb.yaml")]
    config: String,

    /// Static media/user data for reference validation (YAML)
    #[arg(long)]
    relations: Option<String>,

    /// Acting user id recorded on writes
    #[arg(long)]
    user: Option<i64>,

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
    /// Show the derived tables of a collection
    Tables {
        collection: String,
    },

    /// Create a version: a new document, or a new version of an existing one
    Create {
        collection: String,
        /// Payload file (JSON or YAML)
        #[arg(long)]
        payload: String,
        /// Existing document id
        #[arg(long)]
        document: Option<i64>,
    },

    /// Replace the content of a document's draft or published version
    Save {
        collection: String,
        document: i64,
        #[arg(long)]
        payload: String,
        #[arg(long = "type", default_value = "draft")]
        version_type: String,
    },

    /// Read one version of a document
    Get {
        collection: String,
        document: i64,
        /// draft, published, latest or revision:<id>
        #[arg(long, default_value = "latest")]
        version: String,
        /// Include soft-deleted documents
        #[arg(long)]
        admin: bool,
    },

    /// List documents with their included fields
    List {
        collection: String,
        #[arg(long, default_value = "published")]
        version: String,
        /// Filters on filterable fields (e.g. --filter page_title=like:%news%)
        #[arg(long = "filter")]
        filters: Vec<String>,
        #[arg(long)]
        locale: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        admin: bool,
    },

    /// List the revisions of a document, newest first
    Revisions {
        collection: String,
        document: i64,
        #[arg(long)]
        admin: bool,
    },

    /// Every version of a document with its promotion lineage
    History {
        collection: String,
        document: i64,
        #[arg(long)]
        admin: bool,
    },

    /// Promote a version to draft or published
    Promote {
        collection: String,
        document: i64,
        version: i64,
        #[arg(long)]
        to: String,
        /// Allow a revision as the source
        #[arg(long)]
        bypass_revision_check: bool,
    },

    /// Restore a revision into the draft or published slot
    Restore {
        collection: String,
        document: i64,
        revision: i64,
        #[arg(long, default_value = "draft")]
        to: String,
    },

    /// Validate a payload without writing it
    Validate {
        collection: String,
        #[arg(long)]
        payload: String,
    },

    /// Soft-delete a document
    Delete {
        collection: String,
        document: i64,
    },

    /// Show config hash, per-collection counts and derived tables
    Status,
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
    let mut store = Store::open(&cli.db, &cli.config)?;
    store.add_hook(Box::new(LoggingHook));
    if let Some(path) = &cli.relations {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read relations file '{path}': {e}"))?;
        let data: RelationData = serde_yaml::from_str(&text)?;
        store.set_relation_source(Box::new(data));
    }
    let user = cli.user;

    match cli.command {
        Command::Tables { collection } => {
            let schema = store.schema().collection(&collection)?;
            let tables: Vec<_> = schema
                .tables()
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "kind": table_kind(&t.kind),
                        "priority": t.priority,
                        "columns": t.columns.iter().map(|c| &c.name).collect::<Vec<_>>(),
                    })
                })
                .collect();
            print_output(&tables, &cli.format)?;
        }

        Command::Create {
            collection,
            payload,
            document,
        } => {
            let payload = read_payload(&payload)?;
            let target = document.map_or(DocumentTarget::New, DocumentTarget::Existing);
            let version = if store.schema().collection(&collection)?.use_drafts {
                store.create_draft(&collection, target, &payload, user)?
            } else {
                store.create_published(&collection, target, &payload, user)?
            };
            print_output(&version, &cli.format)?;
        }

        Command::Save {
            collection,
            document,
            payload,
            version_type,
        } => {
            let payload = read_payload(&payload)?;
            let version_type: VersionType = version_type.parse()?;
            let version =
                store.replace_content(&collection, document, version_type, &payload, user)?;
            print_output(&version, &cli.format)?;
        }

        Command::Get {
            collection,
            document,
            version,
            admin,
        } => {
            let selector: VersionSelector = version.parse()?;
            let snapshot = store.fetch(&collection, document, selector, scope(admin))?;
            print_output(&snapshot, &cli.format)?;
        }

        Command::List {
            collection,
            version,
            filters,
            locale,
            limit,
            offset,
            admin,
        } => {
            let query = ListQuery {
                version: version.parse()?,
                filters: filters
                    .iter()
                    .map(|f| f.parse::<Filter>())
                    .collect::<brickdb::Result<_>>()?,
                scope: scope(admin),
                locale,
                limit,
                offset,
            };
            let docs = store.list_documents(&collection, &query)?;
            print_output(&docs, &cli.format)?;
        }

        Command::Revisions {
            collection,
            document,
            admin,
        } => {
            let revisions = store.list_revisions(&collection, document, scope(admin))?;
            print_output(&revisions, &cli.format)?;
        }

        Command::History {
            collection,
            document,
            admin,
        } => {
            let versions = store.history(&collection, document, scope(admin))?;
            print_output(&versions, &cli.format)?;
        }

        Command::Promote {
            collection,
            document,
            version,
            to,
            bypass_revision_check,
        } => {
            let report = store.promote(&PromotionRequest {
                collection_key: collection,
                document_id: document,
                from_version_id: version,
                to: to.parse()?,
                user_id: user,
                bypass_revision_check,
            })?;
            print_output(&report, &cli.format)?;
        }

        Command::Restore {
            collection,
            document,
            revision,
            to,
        } => {
            let report = store.restore(&collection, document, revision, to.parse()?, user)?;
            print_output(&report, &cli.format)?;
        }

        Command::Validate {
            collection,
            payload,
        } => {
            let payload = read_payload(&payload)?;
            let report = store.validate(&collection, &payload)?;
            print_output(
                &serde_json::json!({
                    "valid": report.is_ok(),
                    "error_count": report.error_count(),
                    "errors": report
                        .errors()
                        .into_iter()
                        .map(|(path, message)| serde_json::json!({ "path": path, "message": message }))
                        .collect::<Vec<_>>(),
                }),
                &cli.format,
            )?;
        }

        Command::Delete {
            collection,
            document,
        } => {
            let record = store.soft_delete(&collection, document, user)?;
            print_output(&record, &cli.format)?;
        }

        Command::Status => {
            let result = store.status()?;
            print_output(&result, &cli.format)?;
        }
    }

    Ok(())
}

fn scope(admin: bool) -> ReadScope {
    if admin {
        ReadScope::Admin
    } else {
        ReadScope::Public
    }
}

fn table_kind(kind: &TableKind) -> String {
    match kind {
        TableKind::Document => "document".to_string(),
        TableKind::Versions => "versions".to_string(),
        TableKind::Brick { brick_key, brick_type } => format!("{} brick {brick_key}", brick_type.as_str()),
        TableKind::Repeater { brick_key, path } => {
            format!("repeater {brick_key}.{}", path.join("."))
        }
    }
}

/// Payload files are JSON or YAML; YAML is a superset so one parser covers both.
fn read_payload(path: &str) -> Result<DocumentPayload, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read payload file '{path}': {e}"))?;
    Ok(serde_yaml::from_str(&text)?)
}

fn print_output<T: Serialize>(
    value: &T,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}
