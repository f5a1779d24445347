//! Line-level tokenizer for the substitution pass.
//!
//! The functions in this module split one line of text into the coarse
//! tokens macro substitution operates on. This is deliberately not a
//! target-language lexer: it only knows enough to keep symbol runs
//! together and to step over string literals without looking inside.

use std::fmt;

use crate::language::{LanguageProfile, StringRule};

/// A rewindable cursor over one line's characters.
///
/// Reading past the end yields `None` without error; the substitution
/// pass leans on that for end-of-line detection.
#[derive(Clone, Debug)]
pub struct CharCursor {
    chars: Vec<char>,
    pos: usize,
}

impl CharCursor {
    pub fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    pub fn peek(&self) -> Option<char> {
        self.peek_n(1)
    }

    /// Look `n` characters ahead without consuming. Lookahead is
    /// 1-based: `peek_n(1)` is the next character `next` would return,
    /// and `peek_n(0)` is nothing.
    pub fn peek_n(&self, n: usize) -> Option<char> {
        self.chars.get((self.pos + n).checked_sub(1)?).copied()
    }

    pub fn next(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    /// Save the current position for a later `rewind`.
    // Backtracking surface; the current lexer gets by on one-character
    // lookahead.
    #[allow(dead_code)]
    pub fn mark(&self) -> usize {
        self.pos
    }

    #[allow(dead_code)]
    pub fn rewind(&mut self, pos: usize) {
        self.pos = pos;
    }
}

/// One token of a line. Tokens never cross a line boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    /// A maximal run matching the profile's valid-symbol pattern, or the
    /// single-line comment marker lexed as one atomic token.
    Symbol(String),
    /// A string literal including both delimiters and its escapes. An
    /// unterminated literal simply ends at end of line.
    Str(String),
    /// A single character with no valid extension.
    Char(char),
}

impl Token {
    /// The symbol text, if this token can name a macro.
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Token::Symbol(text) => Some(text),
            _ => None,
        }
    }

    /// Whether the token's raw text equals `text` (used to spot comment
    /// markers and call punctuation regardless of token kind).
    pub fn is_text(&self, text: &str) -> bool {
        match self {
            Token::Symbol(s) | Token::Str(s) => s == text,
            Token::Char(c) => {
                let mut chars = text.chars();
                chars.next() == Some(*c) && chars.next().is_none()
            }
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Token::Symbol(s) | Token::Str(s) => f.write_str(s),
            Token::Char(c) => write!(f, "{}", c),
        }
    }
}

/// Lazily produces the tokens of one line under a language profile.
/// A fresh stream is built per line; the stream is finite and not
/// restartable.
pub struct TokenStream<'a> {
    cursor: CharCursor,
    profile: &'a LanguageProfile,
    /// One-token lookahead slot filled by `peek`.
    pending: Option<Token>,
}

impl<'a> TokenStream<'a> {
    pub fn new(text: &str, profile: &'a LanguageProfile) -> Self {
        Self {
            cursor: CharCursor::new(text),
            profile,
            pending: None,
        }
    }

    /// Return the token `next_token` would produce, without consuming it.
    pub fn peek(&mut self) -> Option<&Token> {
        if self.pending.is_none() {
            self.pending = self.lex();
        }
        self.pending.as_ref()
    }

    pub fn next_token(&mut self) -> Option<Token> {
        if let Some(tok) = self.pending.take() {
            return Some(tok);
        }
        self.lex()
    }

    fn lex(&mut self) -> Option<Token> {
        let first = self.cursor.next()?;

        if let Some(rule) = self.profile.string_rule(first) {
            // The rule set is per profile, clone to release the borrow.
            let rule = rule.clone();
            return Some(self.lex_string(first, &rule));
        }

        let mut text = String::new();
        text.push(first);
        while let Some(next) = self.cursor.peek() {
            let mut candidate = text.clone();
            candidate.push(next);
            // Grow the token while it is still a valid symbol, or while it
            // forms exactly the comment marker (so `--` and `//` come out
            // as one atomic token).
            if self.profile.valid_symbol.is_match(&candidate)
                || candidate == self.profile.comment_single
            {
                self.cursor.next();
                text = candidate;
            } else {
                break;
            }
        }

        if text.chars().count() == 1 && !self.profile.valid_symbol.is_match(&text) {
            Some(Token::Char(first))
        } else {
            Some(Token::Symbol(text))
        }
    }

    /// Consume characters until the matching unescaped delimiter. The
    /// escape character makes the following character literal. Hitting
    /// end of line leaves the literal unterminated, which is fine here:
    /// multi-line strings are not this stage's problem.
    fn lex_string(&mut self, delim: char, rule: &StringRule) -> Token {
        let mut text = String::new();
        text.push(delim);
        let mut escaped = false;
        while let Some(c) = self.cursor.next() {
            text.push(c);
            if escaped {
                escaped = false;
            } else if c == rule.escape {
                escaped = true;
            } else if c == rule.delim {
                break;
            }
        }
        Token::Str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::profile_for;

    fn tokens(text: &str, lang: &str) -> Vec<Token> {
        let profile = profile_for(lang).unwrap();
        let mut stream = TokenStream::new(text, profile);
        let mut out = Vec::new();
        while let Some(tok) = stream.next_token() {
            out.push(tok);
        }
        out
    }

    fn sym(s: &str) -> Token {
        Token::Symbol(s.to_string())
    }

    #[test]
    fn cursor_rewinds_to_a_mark() {
        let mut cursor = CharCursor::new("abc");
        assert_eq!(cursor.next(), Some('a'));
        let mark = cursor.mark();
        assert_eq!(cursor.next(), Some('b'));
        assert_eq!(cursor.peek(), Some('c'));
        cursor.rewind(mark);
        assert_eq!(cursor.next(), Some('b'));
    }

    #[test]
    fn cursor_peeks_ahead_without_consuming() {
        let mut cursor = CharCursor::new("xy");
        assert_eq!(cursor.peek_n(0), None);
        assert_eq!(cursor.peek_n(2), Some('y'));
        assert_eq!(cursor.next(), Some('x'));
        assert_eq!(cursor.next(), Some('y'));
        assert_eq!(cursor.next(), None);
        // past-the-end reads stay None
        assert_eq!(cursor.peek(), None);
    }

    #[test]
    fn symbols_are_maximal_runs() {
        assert_eq!(
            tokens("say(GREETING);", "lsl"),
            vec![
                sym("say"),
                Token::Char('('),
                sym("GREETING"),
                Token::Char(')'),
                Token::Char(';'),
            ]
        );
    }

    #[test]
    fn comment_marker_is_one_token() {
        assert_eq!(
            tokens("x -- y", "lua"),
            vec![
                sym("x"),
                Token::Char(' '),
                sym("--"),
                Token::Char(' '),
                sym("y"),
            ]
        );
        // A lone slash is not the marker.
        assert_eq!(
            tokens("a/b", "c"),
            vec![sym("a"), Token::Char('/'), sym("b")]
        );
    }

    #[test]
    fn string_literals_keep_delimiters_and_escapes() {
        assert_eq!(
            tokens(r#"say("a\"b");"#, "lsl"),
            vec![
                sym("say"),
                Token::Char('('),
                Token::Str(r#""a\"b""#.to_string()),
                Token::Char(')'),
                Token::Char(';'),
            ]
        );
    }

    #[test]
    fn unterminated_string_ends_at_line_end() {
        assert_eq!(
            tokens(r#"x = "open"#, "lsl"),
            vec![
                sym("x"),
                Token::Char(' '),
                Token::Char('='),
                Token::Char(' '),
                Token::Str(r#""open"#.to_string()),
            ]
        );
    }

    #[test]
    fn digits_do_not_start_symbols() {
        assert_eq!(
            tokens("12", "c"),
            vec![Token::Char('1'), Token::Char('2')]
        );
    }

    #[test]
    fn peek_does_not_consume() {
        let profile = profile_for("c").unwrap();
        let mut stream = TokenStream::new("ab cd", profile);
        assert_eq!(stream.peek(), Some(&sym("ab")));
        assert_eq!(stream.peek(), Some(&sym("ab")));
        assert_eq!(stream.next_token(), Some(sym("ab")));
        assert_eq!(stream.next_token(), Some(Token::Char(' ')));
        assert_eq!(stream.next_token(), Some(sym("cd")));
        assert_eq!(stream.next_token(), None);
    }
}
