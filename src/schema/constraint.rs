//! Translates declarative check constraints into validator directives.
//!
//! Only three shapes are recognized: a binary comparison of a column
//! against an integer constant, a text-length function applied to a column
//! compared against a constant, and a pattern match. Anything else is
//! silently skipped; the storage engine still enforces it.

use super::descriptor::ValidatorDirective;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Str(String),
    Cmp(Cmp),
    Tilde,
    And,
    Or,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cmp {
    Ge,
    Gt,
    Le,
    Lt,
}

const LENGTH_FUNCTIONS: &[&str] = &["char_length", "character_length", "length"];

/// Scan one check-constraint expression and return the directives it
/// yields, tagged by column name.
pub fn derive_directives(expr: &str) -> Vec<(String, ValidatorDirective)> {
    let tokens = match lex(expr) {
        Some(tokens) => tokens,
        None => return Vec::new(),
    };

    let mut directives = Vec::new();
    for conjunct in tokens.split(|t| *t == Token::And) {
        if let Some(found) = match_conjunct(conjunct) {
            directives.push(found);
        }
    }
    directives
}

/// Lexer over the engine's rendered constraint text. Parentheses, commas
/// and `::type` casts are noise and dropped; an unlexable character yields
/// `None` and the whole expression is skipped.
fn lex(expr: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '(' | ')' | ',' => {
                chars.next();
            }
            ':' => {
                // "::text" style cast: swallow the colons and the type name
                chars.next();
                if chars.peek() == Some(&':') {
                    chars.next();
                    while chars.peek().map_or(false, |c| c.is_ascii_alphanumeric() || *c == '_') {
                        chars.next();
                    }
                } else {
                    tokens.push(Token::Other);
                }
            }
            '\'' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('\'') => {
                            // doubled quote is an escaped quote
                            if chars.peek() == Some(&'\'') {
                                chars.next();
                                value.push('\'');
                            } else {
                                break;
                            }
                        }
                        Some(c) => value.push(c),
                        None => return None,
                    }
                }
                tokens.push(Token::Str(value));
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Cmp(Cmp::Ge));
                } else {
                    tokens.push(Token::Cmp(Cmp::Gt));
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Cmp(Cmp::Le));
                } else {
                    tokens.push(Token::Cmp(Cmp::Lt));
                }
            }
            '~' => {
                chars.next();
                tokens.push(Token::Tilde);
            }
            c if c.is_ascii_digit() || c == '-' => {
                chars.next();
                let mut text = String::from(c);
                let mut is_float = false;
                while let Some(&n) = chars.peek() {
                    if n.is_ascii_digit() {
                        text.push(n);
                        chars.next();
                    } else if n == '.' {
                        is_float = true;
                        text.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if is_float {
                    tokens.push(Token::Other);
                } else {
                    match text.parse::<i64>() {
                        Ok(n) => tokens.push(Token::Int(n)),
                        Err(_) => tokens.push(Token::Other),
                    }
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '"' => {
                chars.next();
                let mut ident = String::new();
                if c != '"' {
                    ident.push(c);
                }
                while let Some(&n) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        ident.push(n);
                        chars.next();
                    } else if n == '"' {
                        chars.next();
                    } else {
                        break;
                    }
                }
                match ident.to_ascii_lowercase().as_str() {
                    "and" => tokens.push(Token::And),
                    "or" => tokens.push(Token::Or),
                    _ => tokens.push(Token::Ident(ident)),
                }
            }
            _ => {
                chars.next();
                tokens.push(Token::Other);
            }
        }
    }

    Some(tokens)
}

fn match_conjunct(tokens: &[Token]) -> Option<(String, ValidatorDirective)> {
    match tokens {
        // votes >= 1
        [Token::Ident(col), Token::Cmp(cmp), Token::Int(n)] => {
            Some((col.clone(), value_bound(*cmp, *n)))
        }
        // 1 <= votes
        [Token::Int(n), Token::Cmp(cmp), Token::Ident(col)] => {
            Some((col.clone(), value_bound(flip(*cmp), *n)))
        }
        // char_length(name) >= 3  (parens already dropped by the lexer)
        [Token::Ident(func), Token::Ident(col), Token::Cmp(cmp), Token::Int(n)]
            if LENGTH_FUNCTIONS.contains(&func.to_ascii_lowercase().as_str()) =>
        {
            length_bound(*cmp, *n).map(|d| (col.clone(), d))
        }
        // name ~ '^pattern$'
        [Token::Ident(col), Token::Tilde, Token::Str(pattern)] => {
            Some((col.clone(), ValidatorDirective::Regex(pattern.clone())))
        }
        // regexp_like(name, '^pattern$')
        [Token::Ident(func), Token::Ident(col), Token::Str(pattern)]
            if func.eq_ignore_ascii_case("regexp_like") =>
        {
            Some((col.clone(), ValidatorDirective::Regex(pattern.clone())))
        }
        _ => None,
    }
}

/// Strict comparisons shift the bound onto the nearest included integer.
fn value_bound(cmp: Cmp, n: i64) -> ValidatorDirective {
    match cmp {
        Cmp::Ge => ValidatorDirective::MinValue(n),
        Cmp::Gt => ValidatorDirective::MinValue(n + 1),
        Cmp::Le => ValidatorDirective::MaxValue(n),
        Cmp::Lt => ValidatorDirective::MaxValue(n - 1),
    }
}

fn length_bound(cmp: Cmp, n: i64) -> Option<ValidatorDirective> {
    let bound = |v: i64| u32::try_from(v).ok();
    match cmp {
        Cmp::Ge => bound(n).map(ValidatorDirective::MinLength),
        Cmp::Gt => bound(n + 1).map(ValidatorDirective::MinLength),
        Cmp::Le => bound(n).map(ValidatorDirective::MaxLength),
        Cmp::Lt => bound(n - 1).map(ValidatorDirective::MaxLength),
    }
}

fn flip(cmp: Cmp) -> Cmp {
    match cmp {
        Cmp::Ge => Cmp::Le,
        Cmp::Gt => Cmp::Lt,
        Cmp::Le => Cmp::Ge,
        Cmp::Lt => Cmp::Gt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inclusive_and_strict_bounds() {
        let directives = derive_directives("votes >= 1 AND votes < 6");
        assert_eq!(
            directives,
            vec![
                ("votes".to_string(), ValidatorDirective::MinValue(1)),
                ("votes".to_string(), ValidatorDirective::MaxValue(5)),
            ]
        );
    }

    #[test]
    fn engine_rendered_noise_is_tolerated() {
        let directives = derive_directives("((votes >= 1) AND (votes < 6))");
        assert_eq!(directives.len(), 2);
    }

    #[test]
    fn length_function() {
        let directives = derive_directives("char_length(name) >= 3");
        assert_eq!(directives, vec![("name".to_string(), ValidatorDirective::MinLength(3))]);
    }

    #[test]
    fn length_function_with_cast() {
        let directives = derive_directives("(char_length((name)::text) <= 80)");
        assert_eq!(directives, vec![("name".to_string(), ValidatorDirective::MaxLength(80))]);
    }

    #[test]
    fn regex_operator_and_function() {
        let directives = derive_directives("((email)::text ~ '^[^@]+@[^@]+$'::text)");
        assert_eq!(
            directives,
            vec![("email".to_string(), ValidatorDirective::Regex("^[^@]+@[^@]+$".to_string()))]
        );

        let directives = derive_directives("regexp_like(slug, '^[a-z-]+$')");
        assert_eq!(
            directives,
            vec![("slug".to_string(), ValidatorDirective::Regex("^[a-z-]+$".to_string()))]
        );
    }

    #[test]
    fn reversed_comparison() {
        let directives = derive_directives("1 <= votes");
        assert_eq!(directives, vec![("votes".to_string(), ValidatorDirective::MinValue(1))]);
    }

    #[test]
    fn unrecognized_shapes_are_skipped() {
        assert!(derive_directives("votes >= 1 OR votes < 6").is_empty());
        assert!(derive_directives("a + b > 3").is_empty());
        assert!(derive_directives("status IN ('a', 'b')").is_empty());
        assert!(derive_directives("price >= 1.5").is_empty());
    }

    #[test]
    fn mixed_recognized_and_unrecognized() {
        let directives = derive_directives("votes >= 1 AND (a + b) > 2");
        assert_eq!(directives, vec![("votes".to_string(), ValidatorDirective::MinValue(1))]);
    }
}
