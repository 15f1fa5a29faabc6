/*!
 * Minimal SQL tokenizer used by the safety classifier.
 *
 * This is not a parser. It only knows enough of SQLite's lexical rules to
 * tell keywords and punctuation apart from string literals, quoted
 * identifiers and comments, so that a `;` or `WHERE` inside a literal is
 * never mistaken for structure.
 *
 * Word boundaries follow SQLite's tokenizer: only ASCII space, `\t`, `\n`,
 * `\f` and `\r` separate tokens, and every character at or above U+0080 is
 * an identifier character. Keywords are matched ASCII case-insensitively.
 */

/// A lexical token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Bare identifier or keyword, uppercased
    Word(String),
    /// String literal, blob literal or quoted identifier
    Quoted,
    /// Numeric literal
    Number,
    /// Any other single character
    Punct(char),
}

impl Token {
    /// Check whether the token is the given keyword (expects uppercase input)
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(w) if w == keyword)
    }

    pub fn is_punct(&self, c: char) -> bool {
        matches!(self, Token::Punct(p) if *p == c)
    }
}

/// A token together with its parenthesis nesting depth
#[derive(Debug, Clone, PartialEq)]
pub struct DepthToken {
    pub token: Token,
    pub depth: usize,
}

/// Split SQL text into tokens, dropping whitespace and comments
pub fn tokenize(sql: &str) -> Vec<Token> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if is_separator(c) {
            i += 1;
            continue;
        }

        // -- line comment
        if c == '-' && chars.get(i + 1) == Some(&'-') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        // /* block comment */, unterminated comments run to the end
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i = (i + 2).min(chars.len());
            continue;
        }

        // X'..' blob literal
        if (c == 'x' || c == 'X') && chars.get(i + 1) == Some(&'\'') {
            i = skip_quoted(&chars, i + 1, '\'');
            tokens.push(Token::Quoted);
            continue;
        }

        match c {
            '\'' | '"' | '`' => {
                i = skip_quoted(&chars, i, c);
                tokens.push(Token::Quoted);
            }
            '[' => {
                while i < chars.len() && chars[i] != ']' {
                    i += 1;
                }
                i = (i + 1).min(chars.len());
                tokens.push(Token::Quoted);
            }
            c if c.is_ascii_digit() => {
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Number);
            }
            c if starts_identifier(c) => {
                let start = i;
                while i < chars.len() && continues_identifier(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(Token::Word(word.to_ascii_uppercase()));
            }
            other => {
                tokens.push(Token::Punct(other));
                i += 1;
            }
        }
    }

    tokens
}

/// Whitespace as SQLite sees it. U+00A0, U+2028 and friends are not.
fn is_separator(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\x0C' | '\r')
}

fn starts_identifier(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || !c.is_ascii()
}

fn continues_identifier(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || !c.is_ascii()
}

/// Skip a quoted run starting at `start` (the opening quote). A doubled quote
/// character is an escape. Returns the index just past the closing quote.
fn skip_quoted(chars: &[char], start: usize, quote: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

/// Annotate tokens with their parenthesis depth. Unbalanced closing
/// parentheses saturate at zero.
pub fn with_depth(tokens: Vec<Token>) -> Vec<DepthToken> {
    let mut depth = 0usize;
    tokens
        .into_iter()
        .map(|token| {
            if token.is_punct(')') {
                depth = depth.saturating_sub(1);
            }
            let annotated = DepthToken {
                token: token.clone(),
                depth,
            };
            if token.is_punct('(') {
                depth += 1;
            }
            annotated
        })
        .collect()
}

/// Split a token stream into statements on `;`. Empty statements (runs of
/// terminators) are dropped, so a trailing terminator yields a single
/// statement.
pub fn split_statements(tokens: Vec<Token>) -> Vec<Vec<Token>> {
    let mut statements = Vec::new();
    let mut current = Vec::new();
    for token in tokens {
        if token.is_punct(';') {
            if !current.is_empty() {
                statements.push(std::mem::take(&mut current));
            }
        } else {
            current.push(token);
        }
    }
    if !current.is_empty() {
        statements.push(current);
    }
    statements
}
