//! One file's preprocessing run: directive dispatch, conditional-block
//! skipping, recursive inclusion, and the macro substitution pass in
//! `expand.rs`.
//!
//! A run either fully succeeds or fails; there is no partial output.
//! Child runs for included files share the parent's `SharedState` and
//! execute to completion before the parent resumes.

mod expand;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use arcstr::ArcStr;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;

use crate::language::LanguageProfile;

use super::error::{DirectiveError, PreProcError};
use super::lines::LineCursor;
use super::state::{is_function_signature, SharedState};

lazy_static! {
    static ref PLAIN_NAME: Regex = Regex::new(r"^[A-Za-z0-9_]+$").unwrap();
}

/// The recognized option bag, merged from file pragmas and driver
/// configuration. Unrecognized names pass through untyped for
/// language-specific consumers.
#[derive(Clone, Debug, Default)]
pub struct Options {
    pub verbose: bool,
    pub clean_comments: bool,
    pub collapse_empty_lines: bool,
    // Held for language-specific consumers; the engine itself never
    // reads these.
    #[allow(dead_code)]
    pub passthrough: HashMap<String, String>,
}

impl Options {
    /// Set an option by its pragma name. A bare pragma (empty value)
    /// means true; only a literal `false` switches a flag off.
    pub fn set(&mut self, name: &str, value: &str) {
        let flag = value != "false";
        match name {
            "verbose" => self.verbose = flag,
            "clean-comments" => self.clean_comments = flag,
            "collapse-empty-lines" => self.collapse_empty_lines = flag,
            _ => {
                self.passthrough.insert(name.to_string(), value.to_string());
            }
        }
    }
}

/// Everything a run needs besides its file: the language profile and the
/// option bag. Shared unchanged by every run in one inclusion tree.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub profile: &'static LanguageProfile,
    pub options: Options,
}

/// A single file's expansion. Constructed per file; included files get
/// child runs at depth + 1 sharing the same state.
pub struct Run<'a> {
    file: PathBuf,
    state: &'a mut SharedState,
    config: &'a RunConfig,
    /// Root file is depth 1, each nested include one deeper.
    depth: usize,
    lines: LineCursor,
    /// Open conditional blocks; must be back to 0 at end of file.
    if_depth: usize,
    output: Vec<String>,
}

impl<'a> Run<'a> {
    pub fn from_file(
        file: PathBuf,
        state: &'a mut SharedState,
        config: &'a RunConfig,
        depth: usize,
    ) -> Result<Self, PreProcError> {
        let text = fs::read_to_string(&file).map_err(|err| PreProcError::Include {
            file: file.clone(),
            kind: err.into(),
        })?;
        Ok(Self::from_source(file, ArcStr::from(text), state, config, depth))
    }

    pub fn from_source(
        file: PathBuf,
        text: ArcStr,
        state: &'a mut SharedState,
        config: &'a RunConfig,
        depth: usize,
    ) -> Self {
        Self {
            file,
            lines: LineCursor::new(&text),
            state,
            config,
            depth,
            if_depth: 0,
            output: Vec::new(),
        }
    }

    /// Expand the whole file and return its cleaned, trimmed output.
    pub fn run(mut self) -> Result<String, PreProcError> {
        self.state.record_file(&self.file);

        while let Some(line) = self.lines.next() {
            if let Some(text) = self.process(&line)? {
                let filled = self.substitute(&text)?;
                // Replacement text may span lines; the first continues the
                // current output line, the rest go back into the cursor to
                // be processed as fresh input.
                let mut rest: Vec<String> = filled.split('\n').map(String::from).collect();
                let first = rest.remove(0);
                self.output.push(first);
                if !rest.is_empty() {
                    self.lines.push(rest);
                }
            }
        }

        if self.if_depth > 0 {
            return Err(self.fail(DirectiveError::UnterminatedAtEof(self.if_depth)));
        }

        self.clean();
        Ok(self.output.join("\n").trim().to_string())
    }

    fn fail(&self, kind: DirectiveError) -> PreProcError {
        PreProcError::Directive {
            file: self.file.clone(),
            line: self.lines.true_line(),
            kind,
        }
    }

    /// Handle one physical line. `None` means the line produced no
    /// output of its own; `Some` text still goes through substitution.
    fn process(&mut self, line: &str) -> Result<Option<String>, PreProcError> {
        let Some((cmd, arg)) = self.line_directive(line)? else {
            return Ok(Some(line.to_string()));
        };

        match cmd.as_str() {
            "define" => {
                self.define(&arg)?;
                Ok(None)
            }
            "ifdef" => {
                if self.is_defined(&arg) {
                    self.if_depth += 1;
                } else {
                    self.skip_conditional()?;
                }
                Ok(None)
            }
            "ifndef" => {
                if self.is_defined(&arg) {
                    self.skip_conditional()?;
                } else {
                    self.if_depth += 1;
                }
                Ok(None)
            }
            "include" | "includeonce" => self.include(&cmd, &arg),
            // Reached in normal flow this always means an unmatched
            // conditional: a skip-scan consumes the legitimate ones.
            "else" | "elseif" => Err(self.fail(DirectiveError::UnmatchedConditional(cmd))),
            "endif" => {
                if self.if_depth > 0 {
                    self.if_depth -= 1;
                    Ok(None)
                } else {
                    Err(self.fail(DirectiveError::UnexpectedEndIf))
                }
            }
            other => {
                log::debug!(
                    "{}[{}]: ignoring unknown directive '{}'",
                    self.file.display(),
                    self.lines.true_line(),
                    other
                );
                Ok(None)
            }
        }
    }

    /// Split a directive line into command and argument, consuming
    /// continuation lines. Returns `None` for lines that do not start
    /// with the lead token at column 0.
    fn line_directive(&mut self, line: &str) -> Result<Option<(String, String)>, PreProcError> {
        let lead = self.config.profile.lead();
        let Some(rest) = line.strip_prefix(&lead) else {
            return Ok(None);
        };

        let (cmd, arg) = match rest.find(' ') {
            Some(idx) => (&rest[..idx], rest[idx..].trim()),
            None => (rest, ""),
        };
        let arg = self.read_continuation(arg)?;
        Ok(Some((cmd.to_string(), arg)))
    }

    /// Join continuation lines onto a directive argument. A trailing
    /// unescaped backslash pulls in the next line; when the lead is
    /// comment-prefixed, each continuation line must carry (and loses)
    /// the comment marker.
    fn read_continuation(&mut self, arg: &str) -> Result<String, PreProcError> {
        let mut joined = arg.trim_end().to_string();
        if !ends_with_continuation(&joined) {
            return Ok(joined);
        }

        let single = self.config.profile.comment_single;
        while let Some(next) = self.lines.next() {
            joined.pop();
            joined.truncate(joined.trim_end().len());

            let mut next = next.as_str();
            if self.config.profile.lead_char_commented {
                next = next.trim_start();
                next = next.strip_prefix(single).ok_or_else(|| {
                    self.fail(DirectiveError::MissingContinuationPrefix(single.to_string()))
                })?;
            }

            joined.push('\n');
            joined.push_str(next.trim_end());
            if !ends_with_continuation(&joined) {
                break;
            }
        }
        Ok(joined)
    }

    fn define(&mut self, arg: &str) -> Result<(), PreProcError> {
        let split = arg.find(' ').unwrap_or(arg.len());
        let name = arg[..split].trim();
        let body = arg[split..].trim();

        if PLAIN_NAME.is_match(name) || is_function_signature(name) {
            self.state.store(self.config.profile, name, body);
            Ok(())
        } else {
            Err(self.fail(DirectiveError::BadDefineName(name.to_string())))
        }
    }

    /// Whether a conditional's name resolves, via built-ins first and the
    /// macro table second.
    fn is_defined(&self, name: &str) -> bool {
        self.builtin(name).is_some() || self.state.read(name).is_some()
    }

    /// Skip forward to the matching `else` or `endif` without evaluating
    /// or emitting anything. Nested conditionals are tracked; an `else`
    /// at this conditional's own depth resumes normal processing with
    /// the block counted as open.
    fn skip_conditional(&mut self) -> Result<(), PreProcError> {
        let start = self.lines.true_line();
        let mut depth = 1usize;

        while let Some(line) = self.lines.next() {
            let Some((cmd, _)) = self.line_directive(&line)? else {
                continue;
            };
            match cmd.as_str() {
                "if" | "ifdef" | "ifndef" => depth += 1,
                "else" => {
                    if depth == 1 {
                        self.if_depth += 1;
                        return Ok(());
                    }
                }
                "endif" => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }

        Err(self.fail(DirectiveError::UnterminatedIf(start)))
    }

    /// `include` / `includeonce`: resolve against the current file's
    /// directory, run a child over the target, and splice its output in.
    fn include(&mut self, cmd: &str, arg: &str) -> Result<Option<String>, PreProcError> {
        let target = self.strip_string_delims(arg);
        let dir = self.file.parent().unwrap_or_else(|| Path::new(""));
        let path = dir.join(target);

        let verbose = self.config.options.verbose;
        let single = self.config.profile.comment_single;

        if cmd == "includeonce" && self.state.has_file(&path) {
            log::debug!("skipping repeated include of {}", path.display());
            return Ok(verbose
                .then(|| format!("{} <{} file=\"{}\" skipped/>", single, cmd, path.display())));
        }

        let child = Run::from_file(path.clone(), &mut *self.state, self.config, self.depth + 1)?;
        let text = child.run()?;

        if text.is_empty() {
            Ok(verbose.then(|| format!("{} <{} file=\"{}\"/>", single, cmd, path.display())))
        } else if verbose {
            self.output
                .push(format!("{}<{} file=\"{}\">\n{}", single, cmd, path.display(), text));
            Ok(Some(format!("{} </{}>", single, cmd)))
        } else {
            self.output.push(text);
            Ok(None)
        }
    }

    /// Strip one pair of matching string-literal delimiters, if present.
    fn strip_string_delims<'s>(&self, arg: &'s str) -> &'s str {
        let Some(first) = arg.chars().next() else {
            return arg;
        };
        let Some(rule) = self.config.profile.string_rule(first) else {
            return arg;
        };
        let inner = &arg[first.len_utf8()..];
        inner.strip_suffix(rule.delim).unwrap_or(inner)
    }

    /// Post-run output cleaning, per the option bag.
    fn clean(&mut self) {
        if self.config.options.clean_comments {
            let single = self.config.profile.comment_single;
            self.output
                .retain(|line| !line.trim_start().starts_with(single));
        }

        if self.config.options.collapse_empty_lines {
            self.output = std::mem::take(&mut self.output)
                .into_iter()
                .coalesce(|a, b| {
                    if a.is_empty() && b.is_empty() {
                        Ok(a)
                    } else {
                        Err((a, b))
                    }
                })
                .collect();
        }
    }
}

/// A trailing backslash continues the line unless it is itself escaped.
fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1
}
