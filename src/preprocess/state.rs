//! Macro symbol table and file-visitation state shared across one
//! recursive inclusion tree.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexSet;
use lazy_static::lazy_static;
use regex::Regex;

use crate::language::LanguageProfile;

use super::lexer::{Token, TokenStream};

/// The two substitution-rule kinds a `define` can register.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Macro {
    /// Replacement text substituted verbatim wherever the name appears
    /// as a bare token.
    Value(String),
    /// Invoked as `name(arg0, arg1, ...)`; every parameter token in the
    /// body is replaced with the corresponding argument's raw text.
    Function {
        params: Vec<String>,
        body: Vec<Token>,
    },
}

lazy_static! {
    static ref FUNCTION_SIGNATURE: Regex =
        Regex::new(r"^([A-Za-z0-9_]+)\(([A-Za-z0-9_, ]*)\)$").unwrap();
}

/// Whether `name` is `identifier(param[, param]*)` function-macro syntax.
pub fn is_function_signature(name: &str) -> bool {
    FUNCTION_SIGNATURE.is_match(name)
}

/// State shared by reference across an entire inclusion tree: the macro
/// table and the ordered set of every file entered during the run.
/// Lives for exactly one top-level invocation, then discarded.
pub struct SharedState {
    macros: HashMap<String, Macro>,
    files: IndexSet<PathBuf>,
}

impl SharedState {
    /// A fresh table, seeded with `__UNIXTIME__` and the profile's
    /// predefined macros.
    pub fn new(profile: &LanguageProfile) -> Self {
        let mut state = Self {
            macros: HashMap::new(),
            files: IndexSet::new(),
        };

        let unixtime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        state.store(profile, "__UNIXTIME__", &unixtime.to_string());

        for (name, body) in &profile.predefined {
            state.store(profile, name, body);
        }

        state
    }

    /// Register a macro. A name in function-macro syntax always registers
    /// a `Macro::Function`, even through this plain store path; the body
    /// is tokenized here, under the profile in force at definition time.
    /// Last store wins, silently.
    pub fn store(&mut self, profile: &LanguageProfile, name: &str, body: &str) {
        if let Some(caps) = FUNCTION_SIGNATURE.captures(name) {
            let params: Vec<String> = caps[2]
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();

            let mut tokens = Vec::new();
            let mut stream = TokenStream::new(body, profile);
            while let Some(tok) = stream.next_token() {
                tokens.push(tok);
            }

            self.macros
                .insert(caps[1].to_string(), Macro::Function { params, body: tokens });
        } else {
            self.macros
                .insert(name.to_string(), Macro::Value(body.to_string()));
        }
    }

    /// Exact-name lookup; no partial or prefix matching.
    pub fn read(&self, name: &str) -> Option<&Macro> {
        self.macros.get(name)
    }

    /// Record a file entered via inclusion. Idempotent.
    pub fn record_file(&mut self, path: &Path) {
        self.files.insert(path.to_path_buf());
    }

    pub fn has_file(&self, path: &Path) -> bool {
        self.files.contains(path)
    }

    /// Snapshot of every visited file, in first-entry order, no duplicates.
    pub fn files(&self) -> Vec<PathBuf> {
        self.files.iter().cloned().collect()
    }
}
