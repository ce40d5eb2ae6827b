//! catref CLI
//!
//! Command-line interface for reading and describing catalog references.

use std::process::ExitCode;

use catref::{Context, Reference, ReferenceError, Transport};
use clap::{Parser, Subcommand};
use serde_json::json;

#[derive(Parser)]
#[command(name = "catref")]
#[command(about = "Read and describe relational catalog references")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read one page of rows from a reference URI
    Read {
        /// Data URI: <service>/catalog/<id>/entity/<schema>:<table>[/filters]
        uri: String,

        /// Page size
        #[arg(long, default_value_t = 25)]
        limit: usize,

        /// Presentation context (compact, detailed, entry, ...)
        #[arg(long, short, default_value = "compact")]
        context: String,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Describe a reference: table, visible columns, permissions
    Describe {
        /// Data URI: <service>/catalog/<id>/entity/<schema>:<table>[/filters]
        uri: String,

        /// Presentation context (compact, detailed, entry, ...)
        #[arg(long, short, default_value = "detailed")]
        context: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Read {
            uri,
            limit,
            context,
            pretty,
        } => run_read(&uri, limit, &context, pretty),
        Commands::Describe { uri, context } => run_describe(&uri, &context),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn parse_context(name: &str) -> Result<Context, u8> {
    Context::parse(name).ok_or_else(|| {
        eprintln!("Error: unknown context \"{}\"", name);
        1u8
    })
}

fn fail(err: &ReferenceError) -> u8 {
    eprintln!("Error: {}", err);
    err.exit_code() as u8
}

fn run_read(uri: &str, limit: usize, context: &str, pretty: bool) -> Result<(), u8> {
    let context = parse_context(context)?;
    let transport = Transport::new().map_err(|e| fail(&e.into()))?;

    let reference = Reference::resolve(&transport, uri)
        .map_err(|e| fail(&e))?
        .contextualize(context);
    let page = reference.read(&transport, limit).map_err(|e| fail(&e))?;

    let columns: Vec<String> = reference.columns().iter().map(|c| c.name()).collect();
    let rows: Vec<serde_json::Value> = page
        .tuples()
        .iter()
        .map(|t| serde_json::Value::Object(t.data().clone()))
        .collect();
    let output = json!({
        "uri": reference.uri(),
        "columns": columns,
        "rows": rows,
        "has_next": page.has_next,
        "has_previous": page.has_previous,
        "etag": page.etag,
    });

    let rendered = if pretty {
        serde_json::to_string_pretty(&output)
    } else {
        serde_json::to_string(&output)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;
    println!("{}", rendered);
    Ok(())
}

fn run_describe(uri: &str, context: &str) -> Result<(), u8> {
    let context = parse_context(context)?;
    let transport = Transport::new().map_err(|e| fail(&e.into()))?;

    let reference = Reference::resolve(&transport, uri)
        .map_err(|e| fail(&e))?
        .contextualize(context);

    let columns: Vec<serde_json::Value> = reference
        .columns()
        .iter()
        .map(|c| {
            json!({
                "name": c.name(),
                "display_name": c.display_name(),
                "pseudo": c.is_pseudo(),
                "aggregate": c.has_aggregate(),
            })
        })
        .collect();
    let related: Vec<String> = reference
        .related()
        .iter()
        .map(|r| r.display_name().to_string())
        .collect();

    let permission = |p: catref::Permission| {
        json!({"allowed": p.allowed, "reason": p.reason})
    };
    let output = json!({
        "uri": reference.uri(),
        "table": reference.table().qualified_name(),
        "display_name": reference.display_name(),
        "context": context.as_str(),
        "columns": columns,
        "related": related,
        "permissions": {
            "create": permission(reference.can_create()),
            "update": permission(reference.can_update()),
            "delete": permission(reference.can_delete()),
        },
        "secondary_requests": reference.active_list().requests.len(),
    });

    println!(
        "{}",
        serde_json::to_string_pretty(&output).map_err(|e| {
            eprintln!("Error serializing output: {}", e);
            2u8
        })?
    );
    Ok(())
}
