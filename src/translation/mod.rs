/*!
 * Natural-language to SQL translation.
 *
 * - `prompts`: schema-bearing system prompt construction
 * - `translator`: the [`Translator`] seam and its LLM-backed implementation
 */

pub mod prompts;
pub mod translator;

// Re-export main types
pub use prompts::SqlPromptBuilder;
pub use translator::{clean_response, LlmTranslator, Translation, Translator};
