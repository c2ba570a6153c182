use crate::error::WorkerError;

/// Splits a free-form argument string into argv entries.
pub trait Tokenizer: Send + Sync {
    fn split(&self, text: &str) -> Result<Vec<String>, WorkerError>;
}

/// POSIX shell-style splitting: spaces, tabs and line breaks separate words,
/// single quotes are literal, double quotes allow `\"` and `\\`, and a bare
/// backslash escapes the next character. Comments are not recognised.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellTokenizer;

impl Tokenizer for ShellTokenizer {
    fn split(&self, text: &str) -> Result<Vec<String>, WorkerError> {
        let mut tokens = Vec::new();
        let mut current: Option<String> = None;
        let mut chars = text.chars();

        while let Some(c) = chars.next() {
            match c {
                ' ' | '\t' | '\r' | '\n' => {
                    if let Some(token) = current.take() {
                        tokens.push(token);
                    }
                }
                '\'' => {
                    let token = current.get_or_insert_with(String::new);
                    loop {
                        match chars.next() {
                            Some('\'') => break,
                            Some(c) => token.push(c),
                            None => return Err(unterminated("single quote")),
                        }
                    }
                }
                '"' => {
                    let token = current.get_or_insert_with(String::new);
                    loop {
                        match chars.next() {
                            Some('"') => break,
                            Some('\\') => match chars.next() {
                                Some(c @ ('"' | '\\')) => token.push(c),
                                Some(c) => {
                                    token.push('\\');
                                    token.push(c);
                                }
                                None => return Err(unterminated("double quote")),
                            },
                            Some(c) => token.push(c),
                            None => return Err(unterminated("double quote")),
                        }
                    }
                }
                '\\' => match chars.next() {
                    Some(c) => current.get_or_insert_with(String::new).push(c),
                    None => return Err(WorkerError::Tokenize("no escaped character".into())),
                },
                c => current.get_or_insert_with(String::new).push(c),
            }
        }

        if let Some(token) = current {
            tokens.push(token);
        }
        Ok(tokens)
    }
}

fn unterminated(what: &str) -> WorkerError {
    WorkerError::Tokenize(format!("no closing {what}"))
}
