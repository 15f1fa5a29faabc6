/*!
 * # SQLwAI - SQL with AI
 *
 * A Rust library for querying SQLite databases with raw SQL or natural
 * language, over long-lived client sessions.
 *
 * ## Features
 *
 * - Natural-language to SQL translation using various AI providers:
 *   - Ollama (local LLM)
 *   - OpenAI-compatible APIs (OpenAI, OpenRouter, LM Studio)
 *   - Anthropic API
 * - Structural safety classification of every statement before execution
 * - Bounded, interruptible execution with typed engine errors
 * - Sessions that survive reconnects, with per-database rooms and change
 *   notifications
 * - Per-session query history and related-query suggestions
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `app_config`: Configuration management
 * - `app_controller`: Wires the components of a running instance
 * - `database`: Loaded databases, schema snapshots and statement execution
 * - `validation`: The safety classifier
 * - `translation`: Prompt construction and the [`Translator`] seam
 * - `providers`: Client implementations for various LLM providers:
 *   - `providers::ollama`: Ollama API client
 *   - `providers::openai`: OpenAI-compatible API client
 *   - `providers::anthropic`: Anthropic API client
 *   - `providers::mock`: Deterministic provider for tests
 * - `query`: Orchestration, result formatting, history and suggestions
 * - `session`: Session lifecycle, rooms and transports
 * - `server`: Wire protocol, dispatcher and TCP listener
 * - `errors`: Custom error types for the application
 *
 * ## License
 *
 * This project is licensed under the MIT License
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod app_controller;
pub mod database;
pub mod errors;
pub mod providers;
pub mod query;
pub mod server;
pub mod session;
pub mod translation;
pub mod validation;

// Re-export main types for easier usage
pub use app_config::Config;
pub use app_controller::Controller;
pub use errors::{AppError, ErrorKind, ProviderError, QueryError, TranslationError};
pub use query::{QueryMode, QueryOrchestrator, QueryRequest, QueryResult};
pub use session::SessionManager;
pub use translation::Translator;
pub use validation::{classify, RiskLevel, SafetyVerdict, StatementKind};
