//! `<?if?>` / `<?elseif?>` expression evaluation.
//!
//! Operands are quoted strings or bare words. A bare word that names a
//! defined variable stands for its value; on its own it tests whether the
//! variable is defined.

use std::cmp::Ordering;

use wx_core::{MessageCode, SourceLineNumber, WixError};

use crate::variables::Variables;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Operator(&'static str),
    Quoted(String),
    Word(String),
}

const OPERATORS: [&str; 7] = ["<=", ">=", "!=", "~=", "=", "<", ">"];

pub fn evaluate_condition(
    expression: &str,
    variables: &Variables,
    location: &SourceLineNumber,
) -> Result<bool, WixError> {
    let tokens = tokenize(expression).map_err(|detail| invalid(expression, &detail, location))?;
    let mut parser = Parser {
        tokens: &tokens,
        position: 0,
        variables,
    };
    let value = parser
        .or()
        .map_err(|detail| invalid(expression, &detail, location))?;
    if parser.position != tokens.len() {
        return Err(invalid(expression, "unexpected trailing tokens", location));
    }
    Ok(value)
}

fn invalid(expression: &str, detail: &str, location: &SourceLineNumber) -> WixError {
    WixError::with_location(
        MessageCode::InvalidCondition,
        format!("Invalid condition '{}': {}.", expression, detail),
        location.clone(),
    )
}

fn tokenize(expression: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut rest = expression.trim_start();
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('(') {
            tokens.push(Token::Open);
            rest = after;
        } else if let Some(after) = rest.strip_prefix(')') {
            tokens.push(Token::Close);
            rest = after;
        } else if let Some(after) = rest.strip_prefix('"') {
            let end = after.find('"').ok_or("unterminated string")?;
            tokens.push(Token::Quoted(after[..end].to_string()));
            rest = &after[end + 1..];
        } else if let Some(operator) = OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            tokens.push(Token::Operator(*operator));
            rest = &rest[operator.len()..];
        } else {
            let end = rest
                .find(|c: char| c.is_whitespace() || "()\"=!<>~".contains(c))
                .unwrap_or(rest.len());
            if end == 0 {
                return Err(format!("unexpected character '{}'", &rest[..1]));
            }
            tokens.push(Token::Word(rest[..end].to_string()));
            rest = &rest[end..];
        }
        rest = rest.trim_start();
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    position: usize,
    variables: &'a Variables,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn or(&mut self) -> Result<bool, String> {
        let mut value = self.and()?;
        while self.keyword("OR") {
            self.position += 1;
            let right = self.and()?;
            value = value || right;
        }
        Ok(value)
    }

    fn and(&mut self) -> Result<bool, String> {
        let mut value = self.not()?;
        while self.keyword("AND") {
            self.position += 1;
            let right = self.not()?;
            value = value && right;
        }
        Ok(value)
    }

    fn not(&mut self) -> Result<bool, String> {
        if self.keyword("NOT") {
            self.position += 1;
            return Ok(!self.not()?);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<bool, String> {
        match self.next() {
            Some(Token::Open) => {
                let value = self.or()?;
                match self.next() {
                    Some(Token::Close) => Ok(value),
                    _ => Err("missing ')'".to_string()),
                }
            }
            Some(Token::Quoted(left)) => self.comparison(left, None),
            Some(Token::Word(word)) => {
                let value = self.variables.lookup(&word);
                if let Some(Token::Operator(_)) = self.peek() {
                    let left = value.unwrap_or_else(|| word.clone());
                    return self.comparison(left, Some(word));
                }
                Ok(value.is_some())
            }
            Some(token) => Err(format!("unexpected {:?}", token)),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn comparison(&mut self, left: String, word: Option<String>) -> Result<bool, String> {
        let operator = match self.next() {
            Some(Token::Operator(operator)) => operator,
            _ => {
                return Err(match word {
                    Some(word) => format!("expected an operator after '{}'", word),
                    None => format!("expected an operator after \"{}\"", left),
                })
            }
        };
        let right = match self.next() {
            Some(Token::Quoted(value)) => value,
            Some(Token::Word(word)) => self.variables.lookup(&word).unwrap_or(word),
            _ => return Err(format!("expected an operand after '{}'", operator)),
        };

        match operator {
            "=" => Ok(left == right),
            "!=" => Ok(left != right),
            "~=" => Ok(left.eq_ignore_ascii_case(&right)),
            _ => {
                let ordering = compare_numbers(&left, &right)?;
                Ok(match operator {
                    "<" => ordering == Ordering::Less,
                    ">" => ordering == Ordering::Greater,
                    "<=" => ordering != Ordering::Greater,
                    _ => ordering != Ordering::Less,
                })
            }
        }
    }
}

fn compare_numbers(left: &str, right: &str) -> Result<Ordering, String> {
    let parse = |value: &str| {
        value
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("'{}' is not an integer", value))
    };
    Ok(parse(left)?.cmp(&parse(right)?))
}
