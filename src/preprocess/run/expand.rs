//! The macro substitution pass, applied to every emitted line.

use std::fmt::Write;

use super::*;

use crate::preprocess::lexer::{Token, TokenStream};
use crate::preprocess::state::Macro;

/// What a symbol token resolved to.
enum Resolved<'m> {
    /// Built-in or value macro: text spliced in verbatim.
    Text(String),
    Function(&'m Macro),
}

impl<'a> Run<'a> {
    /// Re-tokenize a line and replace every macro reference once.
    /// Substitution stops for the rest of the line after its first
    /// comment-marker token; replacement text is not re-expanded within
    /// the same pass.
    pub(super) fn substitute(&self, line: &str) -> Result<String, PreProcError> {
        let single = self.config.profile.comment_single;
        let mut stream = TokenStream::new(line, self.config.profile);
        let mut out = String::new();
        let mut commented = false;

        while let Some(tok) = stream.next_token() {
            let resolved = if commented { None } else { self.resolve(&tok) };
            match resolved {
                Some(Resolved::Text(text)) => {
                    if text == single {
                        commented = true;
                    }
                    out.push_str(&text);
                }
                Some(Resolved::Function(mac)) => {
                    // A diagnostic needs the name even though the macro
                    // was already found.
                    let name = tok.as_symbol().unwrap_or_default().to_string();
                    let args = self.collect_args(&mut stream, &name)?;
                    let text = self.apply(&name, mac, &args)?;
                    if text == single {
                        commented = true;
                    }
                    out.push_str(&text);
                }
                None => {
                    if tok.is_text(single) {
                        commented = true;
                    }
                    let _ = write!(out, "{}", tok);
                }
            }
        }

        Ok(out)
    }

    fn resolve(&self, tok: &Token) -> Option<Resolved<'_>> {
        let name = tok.as_symbol()?;
        if let Some(text) = self.builtin(name) {
            return Some(Resolved::Text(text));
        }
        match self.state.read(name)? {
            Macro::Value(text) => Some(Resolved::Text(text.clone())),
            mac @ Macro::Function { .. } => Some(Resolved::Function(mac)),
        }
    }

    /// Run-aware built-ins, looked up before the macro table.
    pub(super) fn builtin(&self, name: &str) -> Option<String> {
        match name {
            "__FILE__" => Some(format!("\"{}\"", self.file.display())),
            "__LINE__" => Some(self.lines.true_line().to_string()),
            "__SHORT_FILE__" => {
                let short = self
                    .file
                    .file_name()
                    .map(|f| f.to_string_lossy())
                    .unwrap_or_default();
                Some(format!("\"{}\"", short))
            }
            "__INCLUDE_LEVEL__" => Some(self.depth.saturating_sub(1).to_string()),
            _ => None,
        }
    }

    /// Collect a call's comma-separated arguments. Commas inside nested
    /// `(...)` do not split; the closing `)` at call depth ends the list.
    fn collect_args(
        &self,
        stream: &mut TokenStream,
        name: &str,
    ) -> Result<Vec<String>, PreProcError> {
        let opens = matches!(stream.peek(), Some(tok) if tok.is_text("("));
        if !opens {
            return Err(self.fail(DirectiveError::MissingCallParen(name.to_string())));
        }
        stream.next_token();

        let mut args = Vec::new();
        let mut arg = String::new();
        let mut depth = 1usize;

        while let Some(tok) = stream.next_token() {
            if tok.is_text("(") {
                depth += 1;
            } else if tok.is_text(")") {
                depth -= 1;
                if depth == 0 {
                    if !arg.is_empty() {
                        args.push(arg);
                    }
                    return Ok(args);
                }
            }
            if depth == 1 && tok.is_text(",") {
                args.push(std::mem::take(&mut arg));
            } else {
                let _ = write!(arg, "{}", tok);
            }
        }

        // Line ended before ')': whatever was collected is the call.
        if !arg.is_empty() {
            args.push(arg);
        }
        Ok(args)
    }

    /// Substitute bound arguments into the macro body and concatenate.
    fn apply(&self, name: &str, mac: &Macro, args: &[String]) -> Result<String, PreProcError> {
        let Macro::Function { params, body } = mac else {
            // resolve() only hands function macros to this path.
            return Ok(String::new());
        };

        if args.len() != params.len() {
            return Err(self.fail(DirectiveError::ArgumentCount {
                name: name.to_string(),
                expected: params.len(),
                got: args.len(),
            }));
        }

        let mut out = String::new();
        for tok in body {
            let bound = tok
                .as_symbol()
                .and_then(|sym| params.iter().position(|p| p == sym));
            match bound {
                Some(idx) => out.push_str(&args[idx]),
                None => {
                    let _ = write!(out, "{}", tok);
                }
            }
        }
        Ok(out)
    }
}
