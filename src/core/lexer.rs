//! Molecule lexer.
//!
//! Splits molecule text into tokens. Every token carries its literal as a
//! slice of the input, so concatenating literals reproduces the source.

/// Lexical token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Illegal,
    EndOfInput,
    Whitespace,
    Word,
    Number,
    /// `*`
    Multiply,
    /// `^`
    SequenceOp,
    Comma,
    Colon,
    /// `[`
    BlockStart,
    /// `]`
    BlockEnd,
}

fn is_whitespace(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\n' | '\r')
}

fn is_letter(ch: char) -> bool {
    ch.is_ascii_alphabetic()
}

fn is_word_next(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

fn is_number_next(ch: char) -> bool {
    ch.is_ascii_digit() || matches!(ch, '.' | 'k' | 'K' | 'm' | 'M' | 'g' | 'G')
}

/// Scanner over a molecule string.
pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    /// Advance while `pred` holds, returning the consumed slice starting at `start`.
    fn take_while(&mut self, start: usize, pred: impl Fn(char) -> bool) -> &'a str {
        while let Some(ch) = self.peek() {
            if !pred(ch) {
                break;
            }
            self.pos += ch.len_utf8();
        }
        &self.src[start..self.pos]
    }

    /// Return the next token and its literal.
    pub fn scan(&mut self) -> (Token, &'a str) {
        let start = self.pos;
        let Some(ch) = self.peek() else {
            return (Token::EndOfInput, "");
        };

        if is_whitespace(ch) {
            return (Token::Whitespace, self.take_while(start, is_whitespace));
        }
        if is_letter(ch) {
            self.pos += ch.len_utf8();
            return (Token::Word, self.take_while(start, is_word_next));
        }
        if ch.is_ascii_digit() {
            return (Token::Number, self.take_while(start, is_number_next));
        }

        self.pos += ch.len_utf8();
        let lit = &self.src[start..self.pos];
        let token = match ch {
            '*' => Token::Multiply,
            '^' => Token::SequenceOp,
            ',' => Token::Comma,
            ':' => Token::Colon,
            '[' => Token::BlockStart,
            ']' => Token::BlockEnd,
            _ => Token::Illegal,
        };
        (token, lit)
    }
}
