use crate::lexer::Token;
use thiserror::Error;

/// A simple command: its argument vector and whether it runs in the background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub argv: Vec<String>,
    pub background: bool,
}

impl CommandLine {
    /// Command name, i.e. the first word.
    pub fn name(&self) -> &str {
        &self.argv[0]
    }

    /// Arguments after the command name.
    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParsingError {
    #[error("syntax error near unexpected token `&'")]
    UnexpectedAmpersand,
    #[error("missing command before `&'")]
    MissingCommand,
}

struct CommandBuilder {
    tokens: Vec<Token>,
    pos: usize,
}

impl CommandBuilder {
    fn from(tokens: Vec<Token>) -> Self {
        CommandBuilder { tokens, pos: 0 }
    }

    fn build(mut self) -> Result<Option<CommandLine>, ParsingError> {
        let mut argv = Vec::new();
        let mut background = false;

        while let Some(token) = self.consume() {
            match token {
                Token::Word(word) => argv.push(word),
                // Only valid as the very last token.
                Token::Ampersand if self.peek().is_none() => background = true,
                Token::Ampersand => return Err(ParsingError::UnexpectedAmpersand),
            }
        }

        match (argv.is_empty(), background) {
            (true, true) => Err(ParsingError::MissingCommand),
            (true, false) => Ok(None),
            (false, _) => Ok(Some(CommandLine { argv, background })),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }
}

/// Turn a token stream into a command line. A blank line yields `None`.
pub fn construct_command(tokens: Vec<Token>) -> Result<Option<CommandLine>, ParsingError> {
    CommandBuilder::from(tokens).build()
}
