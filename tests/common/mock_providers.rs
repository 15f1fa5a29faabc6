/*!
 * Canned translator replies for the mock provider
 */

use sqlwai::providers::mock::{MockProvider, MockRequest};

/// Answers questions about German customers with a filtered, bounded select
pub fn germany_reply(request: &MockRequest) -> String {
    if request.prompt.to_lowercase().contains("germany") {
        "```sql\nSELECT name, country FROM customers WHERE country = 'Germany' LIMIT 50;\n```\nExplanation: customers located in Germany".to_string()
    } else {
        "```sql\nSELECT COUNT(*) AS total FROM customers LIMIT 1\n```".to_string()
    }
}

/// Replies with a destructive statement regardless of the question
pub fn destructive_reply(_request: &MockRequest) -> String {
    "DROP TABLE customers".to_string()
}

/// Mock provider that translates the chinook questions used in the tests
pub fn chinook_provider() -> MockProvider {
    MockProvider::working().with_custom_response(germany_reply)
}

/// Like [`chinook_provider`], but the first request hangs for `delay_ms`
pub fn slow_chinook_provider(delay_ms: u64) -> MockProvider {
    MockProvider::stalling(1, delay_ms).with_custom_response(germany_reply)
}
