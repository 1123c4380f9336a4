//! Main entry point for CLI command to inspect compiled collection schemas.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use clap::Parser;
use clap::Subcommand;

use crate::compiler::Scope;
use crate::configuration::Configuration;
use crate::configuration::generate_config_schema;
use crate::graphql;
use crate::json_ext::Object;
use crate::schema::SchemaOverview;
use crate::services::OperationPlanner;
use crate::snapshot::SchemaRegistry;
use crate::subscriber;

/// Options for the command line.
#[derive(Parser, Debug)]
#[clap(
    name = "collection-graphql",
    about = "Compiles collection schemas to GraphQL and plans queries against them"
)]
pub struct Opt {
    /// Log level (off|error|warn|info|debug|trace). Overrides `logging.level`.
    #[clap(long = "log", global = true, env = "COLLECTION_GRAPHQL_LOG")]
    log_level: Option<String>,

    /// Configuration location relative to the current directory.
    #[clap(
        short,
        long = "config",
        global = true,
        env = "COLLECTION_GRAPHQL_CONFIG_PATH"
    )]
    config_path: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prints the GraphQL schema of a scope.
    Sdl {
        /// Schema overview (YAML or JSON).
        #[clap(long)]
        schema: PathBuf,

        #[clap(long, value_enum, default_value_t)]
        scope: Scope,
    },
    /// Prints the collection reads a query would perform.
    Plan {
        /// Schema overview (YAML or JSON).
        #[clap(long)]
        schema: PathBuf,

        /// GraphQL document.
        #[clap(long)]
        query: PathBuf,

        /// JSON object of variable values.
        #[clap(long)]
        variables: Option<PathBuf>,

        #[clap(long)]
        operation_name: Option<String>,

        #[clap(long, value_enum, default_value_t)]
        scope: Scope,
    },
    /// Prints the JSON schema of the configuration.
    ConfigSchema,
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("could not read {}", path.display()))
}

fn load_overview(path: &Path) -> Result<SchemaOverview> {
    serde_yaml::from_str(&read(path)?)
        .with_context(|| format!("could not parse schema overview {}", path.display()))
}

fn load_variables(path: Option<&Path>) -> Result<Object> {
    let Some(path) = path else {
        return Ok(Object::new());
    };
    let variables: serde_json_bytes::Value = serde_json::from_str(&read(path)?)
        .with_context(|| format!("could not parse variables {}", path.display()))?;
    match variables {
        serde_json_bytes::Value::Object(variables) => Ok(variables),
        serde_json_bytes::Value::Null => Ok(Object::new()),
        _ => Err(anyhow!("variables must be a JSON object")),
    }
}

impl Opt {
    pub fn run(self) -> Result<()> {
        if let Command::ConfigSchema = self.command {
            let schema = generate_config_schema();
            println!("{}", serde_json::to_string_pretty(&schema)?);
            return Ok(());
        }

        let configuration = match &self.config_path {
            Some(path) => Configuration::from_file(path)?,
            None => Configuration::default(),
        };
        let mut logging = configuration.logging.clone();
        if let Some(level) = self.log_level {
            logging.level = level;
        }
        subscriber::init(&logging).context("could not set up logging")?;

        match self.command {
            Command::Sdl { schema, scope } => {
                let registry = SchemaRegistry::new(load_overview(&schema)?)?;
                print!("{}", registry.snapshot().sdl(scope));
            }
            Command::Plan {
                schema,
                query,
                variables,
                operation_name,
                scope,
            } => {
                let registry = Arc::new(SchemaRegistry::new(load_overview(&schema)?)?);
                let request = graphql::Request::builder()
                    .query(read(&query)?)
                    .and_operation_name(operation_name)
                    .variables(load_variables(variables.as_deref())?)
                    .build();
                let planner = OperationPlanner::new(registry).with_configuration(&configuration);
                match planner.plan(&request, scope) {
                    Ok(planned) => println!("{}", serde_json::to_string_pretty(&planned)?),
                    Err(errors) => {
                        eprintln!("{}", serde_json::to_string_pretty(&errors)?);
                        return Err(anyhow!("could not plan the operation"));
                    }
                }
            }
            Command::ConfigSchema => {}
        }
        Ok(())
    }
}

/// Runs the command line.
pub fn main() -> Result<()> {
    Opt::parse().run()
}
