// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]
// Add other lints specific to this module that you want to allow but not auto-fix

use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use log::{error, info, warn, Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use sqlwai::app_config::{self, Config, TranslationProvider};
use sqlwai::query::QueryMode;
use sqlwai::{classify, Controller};

/// CLI Wrapper for TranslationProvider to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliTranslationProvider {
    Ollama,
    OpenAI,
    OpenRouter,
    Anthropic,
    LMStudio,
}

impl From<CliTranslationProvider> for TranslationProvider {
    fn from(cli_provider: CliTranslationProvider) -> Self {
        match cli_provider {
            CliTranslationProvider::Ollama => TranslationProvider::Ollama,
            CliTranslationProvider::OpenAI => TranslationProvider::OpenAI,
            CliTranslationProvider::OpenRouter => TranslationProvider::OpenRouter,
            CliTranslationProvider::Anthropic => TranslationProvider::Anthropic,
            CliTranslationProvider::LMStudio => TranslationProvider::LMStudio,
        }
    }
}

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve clients over newline-delimited JSON on TCP
    Serve {
        /// Address to listen on (overrides server.bind_address)
        #[arg(short, long)]
        bind: Option<String>,

        /// Directory scanned for database files (overrides server.database_dir)
        #[arg(short, long)]
        database_dir: Option<PathBuf>,

        /// Extra database files to load before scanning the directory
        #[arg(value_name = "DB_FILE")]
        files: Vec<PathBuf>,
    },

    /// Run a single query against a database file and print the result as JSON
    Query {
        /// Database file to query
        #[arg(value_name = "DB_FILE")]
        database: PathBuf,

        /// Treat TEXT as a natural-language question
        #[arg(short, long)]
        nl: bool,

        /// Execute statements that only raised warnings
        #[arg(short, long)]
        override_warnings: bool,

        /// Print every cell in full instead of the display form
        #[arg(short, long)]
        export: bool,

        /// SQL statement, or question with --nl
        #[arg(value_name = "TEXT")]
        text: String,
    },

    /// Classify a SQL statement without executing it
    Classify {
        #[arg(value_name = "SQL")]
        sql: String,
    },

    /// Generate shell completions for sqlwai
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// SQLwAI - SQL with AI
///
/// Query SQLite databases with raw SQL or plain-language questions, with every
/// statement screened by a safety classifier before it runs.
#[derive(Parser, Debug)]
#[command(name = "sqlwai")]
#[command(author = "SQLwAI Team")]
#[command(version = "0.1.0")]
#[command(about = "Natural-language SQL gateway for SQLite databases")]
#[command(long_about = "SQLwAI serves SQLite databases to long-lived client sessions and translates plain-language questions into SQL using AI providers.

EXAMPLES:
    sqlwai serve                                   # Serve databases from the default directory
    sqlwai serve -b 0.0.0.0:5057 ./chinook.db      # Serve one extra file on all interfaces
    sqlwai query shop.db \"SELECT * FROM items\"     # Run one statement
    sqlwai query --nl shop.db \"How many items?\"    # Ask a question
    sqlwai query -e shop.db \"SELECT * FROM items\"  # Print cells untruncated
    sqlwai classify \"DELETE FROM items\"            # Show the safety verdict
    sqlwai completions bash > sqlwai.bash          # Generate bash completions

CONFIGURATION:
    Configuration is stored in conf.json by default. You can specify a different
    config file with --config. If the config file doesn't exist, a default one
    will be created automatically.

SUPPORTED PROVIDERS:
    ollama     - Local Ollama server (default: llama3.2:3b)
    openai     - OpenAI API (requires API key)
    openrouter - OpenRouter gateway (requires API key)
    anthropic  - Anthropic Claude API (requires API key)
    lmstudio   - LM Studio local server (OpenAI-compatible on http://localhost:1234/v1)")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    /// Translation provider to use
    #[arg(short, long, value_enum, global = true)]
    provider: Option<CliTranslationProvider>,

    /// Model name to use for translation
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Configuration file path
    #[arg(short, long = "config", default_value = "conf.json", global = true)]
    config_path: String,

    /// Set logging level
    #[arg(short, long, value_enum, global = true)]
    log_level: Option<CliLogLevel>,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = Box::new(CustomLogger::new(level));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: ANSI colour for log level
    fn colour_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "1;31",
            Level::Warn => "1;33",
            Level::Info => "1;32",
            Level::Debug => "1;36",
            Level::Trace => "1;35",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let mut stderr = std::io::stderr();
            let _ = writeln!(
                stderr,
                "\x1B[{}m{} {:<5} {}\x1B[0m",
                Self::colour_for_level(record.level()),
                now,
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // The logger lets everything through; the effective level is set via set_max_level
    CustomLogger::init(LevelFilter::Trace)?;
    log::set_max_level(LevelFilter::Info);

    let cli = CommandLineOptions::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = CommandLineOptions::command();
            generate(shell, &mut cmd, "sqlwai", &mut std::io::stdout());
            Ok(())
        }
        Commands::Classify { ref sql } => {
            let verdict = classify(sql);
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            Ok(())
        }
        Commands::Serve {
            ref bind,
            ref database_dir,
            ref files,
        } => {
            let mut config = load_config(&cli)?;
            if let Some(bind) = bind {
                config.server.bind_address = bind.clone();
            }
            if let Some(dir) = database_dir {
                config.server.database_dir = Some(dir.clone());
            }
            let bind_address = config.server.bind_address.clone();

            let controller = Controller::with_config(config)?;
            let count = controller.load_databases(files, database_dir.as_deref())?;
            if count == 0 {
                warn!("No databases loaded; clients will not be able to run queries");
            }

            controller
                .serve(&bind_address, async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for shutdown signal: {}", e);
                    }
                })
                .await
        }
        Commands::Query {
            ref database,
            nl,
            override_warnings,
            export,
            ref text,
        } => {
            let config = load_config(&cli)?;
            let controller = Controller::with_config(config)?;
            let handle = controller
                .registry()
                .load_file(database)
                .with_context(|| format!("Failed to load database {}", database.display()))?;

            let mode = if nl { QueryMode::NaturalLanguage } else { QueryMode::RawSql };
            let printed = if export {
                controller
                    .export_query(handle.id(), mode, text, override_warnings)
                    .await
                    .map(|table| serde_json::to_string_pretty(&table))
            } else {
                controller
                    .run_query(handle.id(), mode, text, override_warnings)
                    .await
                    .map(|result| serde_json::to_string_pretty(&result))
            };
            match printed {
                Ok(json) => {
                    println!("{}", json?);
                    Ok(())
                }
                Err(e) => {
                    for reason in e.reasons() {
                        info!("  - {}", reason);
                    }
                    Err(anyhow!("{} ({})", e.reason(), e.kind().as_str()))
                }
            }
        }
    }
}

/// Load the configuration file, creating a default one when missing, then
/// apply command line overrides and validate
fn load_config(options: &CommandLineOptions) -> Result<Config> {
    // If log level is set via command line, apply it immediately
    if let Some(cmd_log_level) = &options.log_level {
        let level: app_config::LogLevel = cmd_log_level.clone().into();
        log::set_max_level(level.to_level_filter());
    }

    let config_path = &options.config_path;
    let mut config = if Path::new(config_path).exists() {
        let file = File::open(config_path).context(format!("Failed to open config file: {}", config_path))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).context(format!("Failed to parse config file: {}", config_path))?
    } else {
        warn!("Config file not found at '{}', creating default config.", config_path);

        let config = Config::default();
        let config_json =
            serde_json::to_string_pretty(&config).context("Failed to serialize default config to JSON")?;
        std::fs::write(config_path, config_json)
            .context(format!("Failed to write default config to file: {}", config_path))?;
        config
    };

    if let Some(provider) = &options.provider {
        config.translation.provider = provider.clone().into();
    }
    if let Some(model) = &options.model {
        config.translation.set_model(model);
    }
    if let Some(log_level) = &options.log_level {
        config.log_level = log_level.clone().into();
    }

    config.validate().context("Configuration validation failed")?;

    if options.log_level.is_none() {
        log::set_max_level(config.log_level.to_level_filter());
    }

    Ok(config)
}
