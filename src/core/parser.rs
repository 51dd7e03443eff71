//! Recursive-descent molecule parser.
//!
//! Two grammars:
//!
//! ```text
//! plan       := block (('^' | '*') plan)?
//! block      := [NUMBER] [MODE] '[' rawContent ']' [',' kvlist]
//! kvlist     := WORD ':' (WORD | NUMBER) (',' kvlist)?
//! atomBlock  := WORD (',' kvlist)?
//! ```
//!
//! Raw block content is bracket-balanced text kept verbatim. Bond content is
//! never parsed here; atom content is checked against `atomBlock`.

use super::lexer::{Lexer, Token};
use super::types::*;
use indexmap::IndexMap;
use thiserror::Error;

/// Fatal parse failure. No partial plan is ever returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expected annotation key before ':', found {found}")]
    MissingKey { found: String },

    #[error("expected ':' after annotation key '{key}', found {found}")]
    MissingColon { key: String, found: String },

    #[error("expected value after '{key}:', found {found}")]
    MissingValue { key: String, found: String },

    #[error("expected '[' to open block, found {found}")]
    MissingBlockStart { found: String },

    #[error("mode must be 's' or 'p', got '{0}'")]
    InvalidMode(String),

    #[error("unterminated block: input ended at bracket depth {depth}")]
    UnterminatedBlock { depth: usize },

    #[error("repetition count must be a positive integer, got '{0}'")]
    InvalidTimes(String),

    #[error("repetition count {times} exceeds the limit of {max}")]
    TooManyRepetitions { times: usize, max: usize },

    #[error("molecule fans out to more than {max} calls")]
    TooManyCalls { max: usize },

    #[error("block content must not be empty")]
    EmptyContent,

    #[error("expected atom symbol, found {found}")]
    MissingSymbol { found: String },

    #[error("unexpected {found} after end of expression")]
    TrailingInput { found: String },
}

/// Largest repetition count of a single block.
pub const MAX_TIMES: usize = 10_000;

/// Largest leaf count of a whole plan. Nested bond content is checked by the
/// peer that parses it.
pub const MAX_CALLS: usize = 100_000;

/// Parse a full molecule expression into a plan.
pub fn parse_plan(molecule: &str) -> Result<Plan, ParseError> {
    let mut parser = Parser::new(molecule);
    let plan = parser.plan()?;
    parser.expect_end()?;
    if plan.leaf_count() > MAX_CALLS {
        return Err(ParseError::TooManyCalls { max: MAX_CALLS });
    }
    Ok(plan)
}

/// Parse bare atom content (`symbol[,key:value,...]`) into a single block.
pub fn parse_atom_block(content: &str) -> Result<Block, ParseError> {
    let mut parser = Parser::new(content);
    let (symbol, annotations) = parser.atom_call()?;
    parser.expect_end()?;
    Ok(Block {
        times: 1,
        mode: Mode::Sequential,
        content: symbol,
        annotations,
        atom: None,
    })
}

fn describe(token: Token, lit: &str) -> String {
    match token {
        Token::EndOfInput => "end of input".to_string(),
        _ => format!("'{}'", lit),
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    last: (Token, &'a str),
    pushed_back: bool,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            lexer: Lexer::new(src),
            last: (Token::EndOfInput, ""),
            pushed_back: false,
        }
    }

    /// Next raw token, honouring one token of pushback.
    fn scan(&mut self) -> (Token, &'a str) {
        if self.pushed_back {
            self.pushed_back = false;
            return self.last;
        }
        self.last = self.lexer.scan();
        self.last
    }

    fn unscan(&mut self) {
        self.pushed_back = true;
    }

    /// Next token that is not whitespace.
    fn next(&mut self) -> (Token, &'a str) {
        loop {
            let scanned = self.scan();
            if scanned.0 != Token::Whitespace {
                return scanned;
            }
        }
    }

    fn expect_end(&mut self) -> Result<(), ParseError> {
        match self.next() {
            (Token::EndOfInput, _) => Ok(()),
            (tok, lit) => Err(ParseError::TrailingInput {
                found: describe(tok, lit),
            }),
        }
    }

    fn plan(&mut self) -> Result<Plan, ParseError> {
        let block = self.block()?;
        let kind = match self.next().0 {
            Token::SequenceOp => OperatorKind::SequentialThen,
            Token::Multiply => OperatorKind::ParallelBoth,
            _ => {
                self.unscan();
                return Ok(Plan::Block(block));
            }
        };
        let right = self.plan()?;
        Ok(Plan::Operator(Operator::new(kind, block.into(), right)))
    }

    fn block(&mut self) -> Result<Block, ParseError> {
        let mut times = 1;
        let mut mode = Mode::Sequential;

        let (mut tok, mut lit) = self.next();
        if tok == Token::Number {
            times = parse_times(lit)?;
            (tok, lit) = self.next();
        }
        if tok == Token::Word {
            mode = Mode::from_word(lit).ok_or_else(|| ParseError::InvalidMode(lit.to_string()))?;
            (tok, lit) = self.next();
        }
        if tok != Token::BlockStart {
            return Err(ParseError::MissingBlockStart {
                found: describe(tok, lit),
            });
        }

        let content = self.raw_content()?;
        if content.is_empty() {
            return Err(ParseError::EmptyContent);
        }

        let annotations = match self.next().0 {
            Token::Comma => self.kvlist()?,
            _ => {
                self.unscan();
                IndexMap::new()
            }
        };

        let mut block = Block {
            times,
            mode,
            content,
            annotations,
            atom: None,
        };
        if block.leaf() == Leaf::Atom {
            let mut inner = Parser::new(&block.content);
            let (symbol, annotations) = inner.atom_call()?;
            inner.expect_end()?;
            block.atom = Some(AtomCall {
                symbol,
                annotations,
            });
        }
        Ok(block)
    }

    /// Collect bracket-balanced text up to the matching `]`.
    fn raw_content(&mut self) -> Result<String, ParseError> {
        let mut content = String::new();
        let mut depth = 1usize;
        loop {
            let (tok, lit) = self.scan();
            match tok {
                Token::EndOfInput => return Err(ParseError::UnterminatedBlock { depth }),
                Token::BlockStart => depth += 1,
                Token::BlockEnd => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(content);
                    }
                }
                _ => {}
            }
            content.push_str(lit);
        }
    }

    fn atom_call(&mut self) -> Result<(String, IndexMap<String, String>), ParseError> {
        let (tok, symbol) = self.next();
        if tok != Token::Word {
            return Err(ParseError::MissingSymbol {
                found: describe(tok, symbol),
            });
        }
        let annotations = match self.next().0 {
            Token::Comma => self.kvlist()?,
            _ => {
                self.unscan();
                IndexMap::new()
            }
        };
        Ok((symbol.to_string(), annotations))
    }

    fn kvlist(&mut self) -> Result<IndexMap<String, String>, ParseError> {
        let mut kv = IndexMap::new();
        loop {
            let (tok, key) = self.next();
            if tok != Token::Word {
                return Err(ParseError::MissingKey {
                    found: describe(tok, key),
                });
            }

            let (tok, lit) = self.next();
            if tok != Token::Colon {
                return Err(ParseError::MissingColon {
                    key: key.to_string(),
                    found: describe(tok, lit),
                });
            }

            let (tok, value) = self.next();
            match tok {
                Token::Word | Token::Number => {
                    kv.insert(key.to_string(), value.to_string());
                }
                _ => {
                    return Err(ParseError::MissingValue {
                        key: key.to_string(),
                        found: describe(tok, value),
                    })
                }
            }

            if self.next().0 != Token::Comma {
                self.unscan();
                return Ok(kv);
            }
        }
    }
}

fn parse_times(lit: &str) -> Result<usize, ParseError> {
    match lit.parse::<usize>() {
        Ok(n) if n > MAX_TIMES => Err(ParseError::TooManyRepetitions {
            times: n,
            max: MAX_TIMES,
        }),
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(ParseError::InvalidTimes(lit.to_string())),
    }
}
