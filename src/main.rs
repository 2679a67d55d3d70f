use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use tracing::{error, warn};

use entity_knowledge_extractor::{
    config::{Configuration, LlmSettings, Mode},
    core::{ExtractionResult, LlmClient},
    generate_from_topic, process_text,
    utils::{validate_result, OutputFormat, ResultSerializer},
};

#[derive(Parser)]
#[command(
    name = "entity_knowledge_extractor",
    about = "Extract entities and relationships from text and link them to Wikipedia, Wikidata and DBpedia",
    long_about = None,
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a linked knowledge graph from a text
    Extract {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,

        /// Text file to read
        #[arg(short, long, conflicts_with = "text", required_unless_present = "text")]
        input: Option<PathBuf>,

        /// Inline text instead of a file
        #[arg(short, long)]
        text: Option<String>,

        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "json")]
        format: OutputFormatArg,

        /// Model to use (overrides config)
        #[arg(long)]
        model: Option<String>,

        /// Report structural issues in the result
        #[arg(long)]
        validate: bool,
    },

    /// Generate a linked compendium for a topic
    Generate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,

        /// Topic to generate entities for
        #[arg(short, long)]
        topic: String,

        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "json")]
        format: OutputFormatArg,

        /// Model to use (overrides config)
        #[arg(long)]
        model: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Check the LLM server connection
    CheckServer {
        /// Take server URL and key from this configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Server base URL
        #[arg(long, default_value = "https://api.openai.com")]
        server_url: String,

        /// API key for the server
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },

    /// Generate example configuration
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long)]
        output: PathBuf,

        /// Configuration format (yaml or json)
        #[arg(short, long, default_value = "yaml")]
        format: ConfigFormat,
    },
}

#[derive(clap::ValueEnum, Clone, Copy)]
enum OutputFormatArg {
    Json,
    Graph,
    Lines,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(format: OutputFormatArg) -> Self {
        match format {
            OutputFormatArg::Json => Self::Json,
            OutputFormatArg::Graph => Self::Graph,
            OutputFormatArg::Lines => Self::Lines,
        }
    }
}

#[derive(clap::ValueEnum, Clone)]
enum ConfigFormat {
    Yaml,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.debug {
        tracing::Level::DEBUG
    } else if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Extract {
            config,
            input,
            text,
            output,
            format,
            model,
            validate,
        } => extract_command(config, input, text, output, format, model, validate).await,
        Commands::Generate {
            config,
            topic,
            output,
            format,
            model,
        } => generate_command(config, topic, output, format, model).await,
        Commands::Validate { config } => validate_command(config).await,
        Commands::CheckServer {
            config,
            server_url,
            api_key,
        } => check_server_command(config, server_url, api_key).await,
        Commands::GenerateConfig { output, format } => generate_config_command(output, format).await,
    }
}

fn load_config(path: &Path, model_override: Option<String>) -> Result<Configuration> {
    let mut config = Configuration::from_file(path)?.with_env_overrides();
    if let Some(model) = model_override {
        config.llm_settings.model = model;
    }
    config.validate()?;
    Ok(config)
}

async fn extract_command(
    config_path: PathBuf,
    input: Option<PathBuf>,
    text: Option<String>,
    output: Option<PathBuf>,
    format: OutputFormatArg,
    model_override: Option<String>,
    validate: bool,
) -> Result<()> {
    eprintln!("{}", "Starting extraction...".bright_blue().bold());

    let mut config = load_config(&config_path, model_override)?;
    config.mode = Mode::Extract;

    let text = match (input, text) {
        (Some(path), _) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read input file: {}", path.display()))?,
        (None, Some(text)) => text,
        (None, None) => anyhow::bail!("Either --input or --text is required"),
    };

    eprintln!(" Configuration: {}", config.name.bright_green());
    eprintln!(" Language: {}", config.language.display_name());
    eprintln!(" Text length: {} characters", text.chars().count());

    warn_without_credentials(&config);
    let result = process_text(&text, &config).await;

    if validate {
        let issues = validate_result(&result);
        if !issues.is_empty() {
            warn!(" Validation issues: {}", issues.join(", "));
        }
    }

    write_result(&result, output, format).await?;
    print_summary(&result);
    Ok(())
}

async fn generate_command(
    config_path: PathBuf,
    topic: String,
    output: Option<PathBuf>,
    format: OutputFormatArg,
    model_override: Option<String>,
) -> Result<()> {
    eprintln!("{}", "Starting generation...".bright_blue().bold());

    let mut config = load_config(&config_path, model_override)?;
    config.mode = Mode::Generate;

    eprintln!(" Configuration: {}", config.name.bright_green());
    eprintln!(" Topic: {}", topic.bright_cyan());

    warn_without_credentials(&config);
    let result = generate_from_topic(&topic, &config).await;

    write_result(&result, output, format).await?;
    print_summary(&result);
    Ok(())
}

fn warn_without_credentials(config: &Configuration) {
    if config.llm_settings.api_key.is_none() {
        eprintln!(
            " {} no API key set; the result will be empty",
            "Warning:".bright_yellow()
        );
    }
}

async fn write_result(result: &ExtractionResult, output: Option<PathBuf>, format: OutputFormatArg) -> Result<()> {
    let serialized = ResultSerializer::serialize(result, format.into())?;
    match output {
        Some(path) => {
            tokio::fs::write(&path, &serialized)
                .await
                .with_context(|| format!("Failed to write output: {}", path.display()))?;
            eprintln!(" Result written to: {}", path.display().to_string().bright_green());
        }
        None => println!("{}", serialized),
    }
    Ok(())
}

fn print_summary(result: &ExtractionResult) {
    let linked = result.entities().iter().filter(|e| !e.links.is_empty()).count();
    let implicit = result.relationships().iter().filter(|r| !r.inferred.is_explicit()).count();

    eprintln!("\n{}", " Summary".bright_green().bold());
    eprintln!(
        " Entities: {} ({} linked)",
        result.entities().len().to_string().bright_cyan(),
        linked
    );
    eprintln!(
        " Relationships: {} ({} implicit)",
        result.relationships().len().to_string().bright_cyan(),
        implicit
    );
    eprintln!(" Processing time: {:.2}s", result.processing_time_seconds);
}

async fn validate_command(config_path: PathBuf) -> Result<()> {
    println!("{}", " Validating configuration...".bright_blue().bold());

    let config = match Configuration::from_file(&config_path) {
        Ok(config) => config.with_env_overrides(),
        Err(e) => {
            error!(" Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    if let Err(e) = config.validate() {
        error!(" Configuration validation failed: {}", e);
        return Err(e);
    }

    println!(" Configuration is valid!");
    println!(" Name: {}", config.name.bright_green());
    println!(" Mode: {:?}", config.mode);
    println!(" Language: {}", config.language.display_name());
    println!(" Model: {}", config.llm_settings.model);
    println!(
        " Knowledge bases: wikipedia={} wikidata={} dbpedia={}",
        config.knowledge_bases.use_wikipedia,
        config.knowledge_bases.use_wikidata,
        config.knowledge_bases.use_dbpedia
    );
    if config.llm_settings.api_key.is_none() {
        println!(" {} no API key set; extraction will produce empty results", "Warning:".bright_yellow());
    }
    Ok(())
}

async fn check_server_command(
    config_path: Option<PathBuf>,
    server_url: String,
    api_key: Option<String>,
) -> Result<()> {
    println!("{}", " Checking LLM server...".bright_blue().bold());

    let settings = match config_path {
        Some(path) => Configuration::from_file(&path)?.with_env_overrides().llm_settings,
        None => LlmSettings {
            base_url: server_url,
            api_key,
            ..Default::default()
        },
    };
    let client = LlmClient::from_settings(&settings)?;

    if client.check_health().await {
        println!(" Server is healthy at {}", settings.base_url.bright_green());
    } else {
        println!(" Server is not responding at {}", settings.base_url.bright_red());
        return Ok(());
    }

    match client.list_models().await {
        Ok(models) => {
            println!(" Available models:");
            for model in models {
                println!("  • {}", model.bright_cyan());
            }
        }
        Err(e) => {
            warn!(" Could not list models: {}", e);
        }
    }

    Ok(())
}

async fn generate_config_command(output_path: PathBuf, format: ConfigFormat) -> Result<()> {
    println!("{}", " Generating example configuration...".bright_blue().bold());

    let config = Configuration::example();

    let content = match format {
        ConfigFormat::Yaml => serde_yaml::to_string(&config)?,
        ConfigFormat::Json => serde_json::to_string_pretty(&config)?,
    };

    tokio::fs::write(&output_path, content).await?;

    println!(
        " Example configuration generated at: {}",
        output_path.display().to_string().bright_green()
    );
    println!(" Set OPENAI_API_KEY or edit llm_settings.api_key before running");

    Ok(())
}
