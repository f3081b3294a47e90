//! Evaluation of the MSBuild condition subset that shows up around
//! properties and imports: quoted comparisons, `and`/`or`/`!`,
//! parentheses, `Exists(...)` and `HasTrailingSlash(...)`.
//!
//! Anything else (version comparisons, property functions) yields `None`.

use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Str(String),
    Word(String),
    Eq,
    Ne,
    And,
    Or,
    Not,
    LParen,
    RParen,
    Unsupported,
}

/// Evaluate an already-expanded condition. Relative `Exists` paths are
/// resolved against `base_dir`.
pub fn evaluate(condition: &str, base_dir: &Path) -> Option<bool> {
    if condition.trim().is_empty() {
        return Some(true);
    }
    let tokens = tokenize(condition)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        base_dir,
    };
    let value = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return None;
    }
    Some(value)
}

fn tokenize(text: &str) -> Option<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '\'' => {
                let end = chars[i + 1..].iter().position(|&c| c == '\'')? + i + 1;
                tokens.push(Token::Str(chars[i + 1..end].iter().collect()));
                i = end + 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '<' | '>' => {
                tokens.push(Token::Unsupported);
                i += 1;
            }
            _ => {
                let start = i;
                while i < chars.len()
                    && !chars[i].is_whitespace()
                    && !matches!(chars[i], '\'' | '(' | ')' | '=' | '!' | '<' | '>')
                {
                    i += 1;
                }
                if start == i {
                    return None;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    _ => Token::Word(word),
                });
            }
        }
    }
    Some(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    base_dir: &'a Path,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn or_expr(&mut self) -> Option<bool> {
        let mut value = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.and_expr()?;
            value = value || rhs;
        }
        Some(value)
    }

    fn and_expr(&mut self) -> Option<bool> {
        let mut value = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.unary()?;
            value = value && rhs;
        }
        Some(value)
    }

    fn unary(&mut self) -> Option<bool> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return self.unary().map(|v| !v);
        }
        self.primary()
    }

    fn primary(&mut self) -> Option<bool> {
        match self.next()? {
            Token::LParen => {
                let value = self.or_expr()?;
                (self.next()? == Token::RParen).then_some(value)
            }
            Token::Word(name) if self.peek() == Some(&Token::LParen) => {
                self.pos += 1;
                let argument = match self.next()? {
                    Token::Str(s) | Token::Word(s) => s,
                    _ => return None,
                };
                if self.next()? != Token::RParen {
                    return None;
                }
                self.function(&name, &argument)
            }
            Token::Str(lhs) | Token::Word(lhs) => match self.peek() {
                Some(Token::Eq) | Some(Token::Ne) => {
                    let negate = self.next()? == Token::Ne;
                    let rhs = match self.next()? {
                        Token::Str(s) | Token::Word(s) => s,
                        _ => return None,
                    };
                    Some(lhs.trim().eq_ignore_ascii_case(rhs.trim()) != negate)
                }
                _ => boolean(&lhs),
            },
            _ => None,
        }
    }

    fn function(&self, name: &str, argument: &str) -> Option<bool> {
        let argument = argument.trim();
        match name.to_ascii_lowercase().as_str() {
            "exists" => {
                if argument.is_empty() {
                    return Some(false);
                }
                let path = Path::new(argument);
                let path = if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    self.base_dir.join(path)
                };
                Some(path.exists())
            }
            "hastrailingslash" => Some(argument.ends_with('/') || argument.ends_with('\\')),
            _ => None,
        }
    }
}

fn boolean(word: &str) -> Option<bool> {
    match word.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" => Some(true),
        "false" | "off" | "no" => Some(false),
        _ => None,
    }
}
