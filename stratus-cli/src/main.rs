use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;

use stratus_core::provider::Provider;
use stratus_core::resource::{Resource, ResourceId, State, Value};
use stratus_core::schema::ResourceSchema;
use stratus_provider_aws::config::normalize_region;
use stratus_provider_aws::schemas;
use stratus_provider_aws::{AwsProvider, ProviderConfig};

#[derive(Parser)]
#[command(name = "stratus-aws")]
#[command(about = "Drive the Stratus AWS provider one resource at a time", long_about = None)]
struct Cli {
    /// Provider configuration as a JSON file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// AWS Region (ignored when --config is given)
    #[arg(long, global = true, env = "AWS_REGION")]
    region: Option<String>,

    /// Shared config profile
    #[arg(long, global = true, env = "AWS_PROFILE")]
    profile: Option<String>,

    /// Log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show resource schemas
    Schema {
        /// Only show this resource type
        #[arg(long = "type")]
        resource_type: Option<String>,
    },
    /// Validate attributes against a resource schema without calling AWS
    Validate {
        resource_type: String,
        /// Path to a JSON object of attributes
        #[arg(long)]
        attrs: PathBuf,
    },
    /// Read a resource, or a data source when no identifier is given
    Read {
        resource_type: String,
        name: String,
        /// Remote identifier
        #[arg(long)]
        id: Option<String>,
        /// Last recorded state, used to carry configuration-only attributes
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Create a resource
    Create {
        resource_type: String,
        name: String,
        #[arg(long)]
        attrs: PathBuf,
    },
    /// Update a resource in place
    Update {
        resource_type: String,
        name: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        attrs: PathBuf,
        /// Last recorded state; read from AWS when omitted
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Delete a resource
    Delete {
        resource_type: String,
        name: String,
        #[arg(long)]
        id: String,
        /// Last recorded state; read from AWS when omitted
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Adopt an existing remote object
    Import {
        resource_type: String,
        name: String,
        import_id: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

async fn run(cli: Cli) -> Result<(), String> {
    match &cli.command {
        Commands::Schema { resource_type } => run_schema(resource_type.as_deref()),
        Commands::Validate {
            resource_type,
            attrs,
        } => {
            let attributes = load_attributes(attrs)?;
            validate_attributes(resource_type, &attributes)?;
            eprintln!("{}", "✓ Configuration is valid.".green().bold());
            Ok(())
        }
        Commands::Read {
            resource_type,
            name,
            id,
            state,
        } => {
            let provider = connect(&cli).await?;
            let resource_id = ResourceId::new(resource_type, name);
            let state = match (id, state) {
                (Some(id), Some(path)) => {
                    let prior = load_state(path)?;
                    provider.refresh(&resource_id, id, &prior).await
                }
                (id, _) => provider.read(&resource_id, id.as_deref()).await,
            }
            .map_err(|e| e.to_string())?;
            print_state(&state)
        }
        Commands::Create {
            resource_type,
            name,
            attrs,
        } => {
            let resource = load_resource(resource_type, name, attrs)?;
            let provider = connect(&cli).await?;
            eprintln!("{} {}", "Creating".cyan().bold(), describe(&resource.id));
            let state = match provider.create(&resource).await {
                Ok(state) => state,
                Err(e) => {
                    if let Some(partial) = e.partial_state() {
                        eprintln!(
                            "  {} {} was created but did not become ready; record its state to delete it later",
                            "!".yellow().bold(),
                            describe(&resource.id)
                        );
                        print_state(partial)?;
                    }
                    return Err(e.to_string());
                }
            };
            eprintln!("  {} {}", "✓".green(), describe(&resource.id));
            print_state(&state)
        }
        Commands::Update {
            resource_type,
            name,
            id,
            attrs,
            state,
        } => {
            let resource = load_resource(resource_type, name, attrs)?;
            let provider = connect(&cli).await?;
            let from = recorded_state(&provider, &resource.id, id, state.as_deref()).await?;
            eprintln!("{} {}", "Updating".cyan().bold(), describe(&resource.id));
            let state = provider
                .update(&resource.id, id, &from, &resource)
                .await
                .map_err(|e| e.to_string())?;
            eprintln!("  {} {}", "✓".green(), describe(&resource.id));
            print_state(&state)
        }
        Commands::Delete {
            resource_type,
            name,
            id,
            state,
        } => {
            let provider = connect(&cli).await?;
            let resource_id = ResourceId::new(resource_type, name);
            let from = recorded_state(&provider, &resource_id, id, state.as_deref()).await?;
            if !from.exists {
                eprintln!("{}", "Resource does not exist, nothing to delete.".yellow());
                return Ok(());
            }
            eprintln!("{} {}", "Deleting".red().bold(), describe(&resource_id));
            provider
                .delete(&resource_id, id, &from)
                .await
                .map_err(|e| e.to_string())?;
            eprintln!("  {} {}", "✓".green(), describe(&resource_id));
            Ok(())
        }
        Commands::Import {
            resource_type,
            name,
            import_id,
        } => {
            let provider = connect(&cli).await?;
            let resource_id = ResourceId::new(resource_type, name);
            let state = provider
                .import(&resource_id, import_id)
                .await
                .map_err(|e| e.to_string())?;
            if !state.exists {
                return Err(format!(
                    "cannot import non-existent remote object ({})",
                    import_id
                ));
            }
            print_state(&state)
        }
    }
}

async fn connect(cli: &Cli) -> Result<AwsProvider, String> {
    let config = provider_config(cli)?;
    log::debug!("Configuring AWS provider for {}", config.region);
    AwsProvider::new(&config).await.map_err(|e| e.to_string())
}

fn provider_config(cli: &Cli) -> Result<ProviderConfig, String> {
    if let Some(path) = &cli.config {
        let json = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        return ProviderConfig::from_json(&json).map_err(|e| e.to_string());
    }

    let region = cli
        .region
        .as_deref()
        .ok_or("No region configured: pass --region, set AWS_REGION, or use --config")?;
    let mut config = ProviderConfig::new(normalize_region(region));
    config.profile = cli.profile.clone();
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

async fn recorded_state(
    provider: &AwsProvider,
    id: &ResourceId,
    identifier: &str,
    path: Option<&Path>,
) -> Result<State, String> {
    match path {
        Some(path) => load_state(path),
        None => provider
            .read(id, Some(identifier))
            .await
            .map_err(|e| e.to_string()),
    }
}

fn get_schemas() -> HashMap<String, ResourceSchema> {
    schemas::all_schemas()
        .into_iter()
        .map(|schema| (schema.resource_type.clone(), schema))
        .collect()
}

fn validate_attributes(
    resource_type: &str,
    attributes: &HashMap<String, Value>,
) -> Result<(), String> {
    let schemas = get_schemas();
    let schema = schemas
        .get(resource_type)
        .ok_or_else(|| format!("Unknown resource type: {}", resource_type))?;

    schema.validate(attributes).map_err(|errors| {
        let mut messages: Vec<String> = errors
            .iter()
            .map(|e| format!("{}: {}", resource_type, e))
            .collect();
        messages.sort();
        messages.join("\n")
    })
}

fn load_json(path: &Path) -> Result<serde_json::Value, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&content).map_err(|e| format!("Failed to parse {}: {}", path.display(), e))
}

fn attributes_from_json(json: &serde_json::Value) -> Result<HashMap<String, Value>, String> {
    match Value::from_json(json) {
        Some(Value::Map(attributes)) => Ok(attributes),
        _ => Err("expected a JSON object of attributes".to_string()),
    }
}

fn load_attributes(path: &Path) -> Result<HashMap<String, Value>, String> {
    attributes_from_json(&load_json(path)?).map_err(|e| format!("{}: {}", path.display(), e))
}

fn load_resource(resource_type: &str, name: &str, path: &Path) -> Result<Resource, String> {
    let attributes = load_attributes(path)?;
    validate_attributes(resource_type, &attributes)?;
    let mut resource = Resource::new(resource_type, name);
    resource.attributes = attributes;
    Ok(resource)
}

/// JSON shape shared by command output and `--state` input
fn state_to_json(state: &State) -> serde_json::Value {
    serde_json::json!({
        "resource_type": state.id.resource_type,
        "name": state.id.name,
        "identifier": state.identifier,
        "exists": state.exists,
        "attributes": Value::Map(state.attributes.clone()).to_json(),
    })
}

fn state_from_json(json: &serde_json::Value) -> Result<State, String> {
    let field = |name: &str| {
        json.get(name)
            .and_then(|v| v.as_str())
            .ok_or_else(|| format!("state is missing '{}'", name))
    };
    let id = ResourceId::new(field("resource_type")?, field("name")?);

    let exists = json.get("exists").and_then(|v| v.as_bool()).unwrap_or(true);
    if !exists {
        return Ok(State::not_found(id));
    }

    let attributes = match json.get("attributes") {
        Some(attributes) => attributes_from_json(attributes)?,
        None => HashMap::new(),
    };
    let mut state = State::existing(id, attributes);
    if let Some(identifier) = json.get("identifier").and_then(|v| v.as_str()) {
        state = state.with_identifier(identifier);
    }
    Ok(state)
}

fn load_state(path: &Path) -> Result<State, String> {
    state_from_json(&load_json(path)?).map_err(|e| format!("{}: {}", path.display(), e))
}

fn print_state(state: &State) -> Result<(), String> {
    let json = serde_json::to_string_pretty(&state_to_json(state)).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

fn describe(id: &ResourceId) -> String {
    format!("{}.{}", id.resource_type, id.name)
}

fn run_schema(resource_type: Option<&str>) -> Result<(), String> {
    let mut schemas: Vec<ResourceSchema> = schemas::all_schemas();
    schemas.sort_by(|a, b| a.resource_type.cmp(&b.resource_type));
    if let Some(resource_type) = resource_type {
        schemas.retain(|s| s.resource_type == resource_type);
        if schemas.is_empty() {
            return Err(format!("Unknown resource type: {}", resource_type));
        }
    }

    for schema in &schemas {
        print!("{}", format_schema(schema));
    }
    Ok(())
}

fn format_schema(schema: &ResourceSchema) -> String {
    let kind = if schema.data_source {
        "data source"
    } else {
        "resource"
    };
    let mut out = format!("{} ({})\n", schema.resource_type.bold(), kind);
    if let Some(description) = &schema.description {
        out.push_str(&format!("  {}\n", description));
    }

    let mut attributes: Vec<_> = schema.attributes.values().collect();
    attributes.sort_by(|a, b| a.name.cmp(&b.name));
    for attr in attributes {
        let mut flags = Vec::new();
        if attr.required {
            flags.push("required");
        }
        if attr.computed {
            flags.push("computed");
        }
        if attr.force_new {
            flags.push("forces replacement");
        }
        out.push_str(&format!("  {}: {}", attr.name.cyan(), attr.attr_type));
        if !flags.is_empty() {
            out.push_str(&format!(" [{}]", flags.join(", ")));
        }
        out.push('\n');
    }
    out
}
