//! `resource-search`: explain, validate and run searches from a resource file.
//!
//! Usage:
//!   resource-search explain --resource posts.yaml --payload search.json
//!   resource-search validate --resource posts.yaml --query 'filter[title]=*very*'
//!   resource-search search --resource posts.yaml --payload search.json

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use resource_search::{
    BasicSearchAdapter, PgSearchService, ResourceFile, ResourceSearch, ScopeHandlers, SearchConfig,
    SearchError, SeaQuery,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the validated request and the SQL it compiles to.
    Explain(Input),
    /// Validate a payload and print the error report.
    Validate(Input),
    /// Run a search against PostgreSQL (`DATABASE_URL`) and print the page.
    Search(Input),
}

#[derive(Args, Debug)]
struct Input {
    /// YAML file with `schema` and `resource` sections.
    #[arg(long)]
    resource: PathBuf,

    /// JSON search payload.
    #[arg(long, conflicts_with = "query")]
    payload: Option<PathBuf>,

    /// Basic query string, e.g. `filter[title]=*very*&sort=-title`.
    #[arg(long)]
    query: Option<String>,

    /// TOML search configuration; environment variables are used when absent.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Explain(input) => explain(&input),
        Command::Validate(input) => validate(&input),
        Command::Search(input) => search(&input).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,resource_search=info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

struct Loaded {
    file: ResourceFile,
    config: Arc<SearchConfig>,
    payload: Value,
    /// The parsed query string, when one was given instead of a payload.
    basic: Option<Value>,
}

fn load(input: &Input) -> Result<Loaded> {
    let source = read(&input.resource)?;
    let file = ResourceFile::from_yaml(&source)?;

    let config = match &input.config {
        Some(path) => SearchConfig::from_toml_str(&read(path)?)?,
        None => SearchConfig::from_env()?,
    };

    let adapter = BasicSearchAdapter::new();
    let basic = match (&input.payload, &input.query) {
        (None, Some(query)) => Some(adapter.parse_query_string(query)),
        _ => None,
    };
    let payload = match (&input.payload, &basic) {
        (Some(path), _) => serde_json::from_str(&read(path)?)
            .with_context(|| format!("invalid JSON payload in {}", path.display()))?,
        (None, Some(basic)) => adapter.to_advanced(basic),
        (None, None) => json!({}),
    };

    Ok(Loaded {
        file,
        config: Arc::new(config),
        payload,
        basic,
    })
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn build(loaded: &Loaded) -> Result<ResourceSearch> {
    let search = ResourceSearch::new(
        &loaded.file.resource,
        Arc::new(loaded.file.schema.clone()),
        Arc::clone(&loaded.config),
    )?;
    Ok(search)
}

/// Print a client error report and turn it into a failure.
fn rejected(err: SearchError) -> anyhow::Error {
    if err.is_client_error() {
        let body = json!({ "message": err.to_string(), "errors": err.report().messages() });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
        anyhow::anyhow!("search payload rejected")
    } else {
        anyhow::Error::new(err)
    }
}

fn explain(input: &Input) -> Result<()> {
    let loaded = load(input)?;
    let search = build(&loaded)?;
    let entity = search.entity()?;

    // Scopes are implemented in application code; here they only show up by name.
    let scopes = search
        .registries()
        .scopes
        .iter()
        .fold(ScopeHandlers::new(), |handlers, scope| {
            handlers.register(scope.internal_name(), |_: &mut SeaQuery, _| Ok(()))
        });
    let mut query = SeaQuery::new(entity.table.clone()).with_scopes(Arc::new(scopes));

    let prepared = match &loaded.basic {
        Some(basic) => search.prepare_basic(&mut query, basic),
        None => search.prepare(&mut query, &loaded.payload),
    }
    .map_err(rejected)?;

    let output = json!({
        "request": prepared.request,
        "scopes": prepared.request.scopes.iter().map(|scope| &scope.name).collect::<Vec<_>>(),
        "relations": prepared.relations,
        "pagination": {
            "mode": prepared.plan.mode(),
            "size": prepared.plan.size(),
            "exact_total": prepared.plan.want_exact_total(),
        },
        "sql": query.to_sql(),
        "count_sql": prepared.count_query.as_ref().map(SeaQuery::to_count_sql),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn validate(input: &Input) -> Result<()> {
    let loaded = load(input)?;
    let search = build(&loaded)?;

    let request = search.validate(&loaded.payload).map_err(rejected)?;
    println!("{}", serde_json::to_string_pretty(&request)?);
    Ok(())
}

async fn search(input: &Input) -> Result<()> {
    let loaded = load(input)?;
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .context("failed to connect to database")?;

    let service = PgSearchService::new(
        pool,
        Arc::new(loaded.file.schema.clone()),
        Arc::clone(&loaded.config),
    );
    service.register("resource", &loaded.file.resource, ScopeHandlers::new())?;

    let page = match &loaded.basic {
        Some(basic) => service.basic_search("resource", basic).await,
        None => service.search("resource", &loaded.payload).await,
    }
    .map_err(rejected)?;
    println!("{}", serde_json::to_string_pretty(&page)?);
    Ok(())
}
