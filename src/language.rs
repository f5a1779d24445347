//! Static per-language lexical profiles.
//!
//! A profile carries everything the engine needs to stay out of the target
//! language's way: comment markers, string-literal rules, the directive lead
//! character and the valid-symbol pattern. Profiles are looked up by file
//! extension; aliases resolve transitively (`cpp` -> `c`, `luau` -> `lua`).

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

/// Resolution errors are non-exhaustive and may have new variants added at any time
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ResolutionError {
    #[error("no language profile for '{0}'")]
    UnknownLanguage(String),

    #[error("unable to get file extension for '{0}'")]
    NoExtension(String),
}

/// One string-literal rule: a delimiter, its escape character, and an
/// optional interpolation bracket pair (recorded for the profile data,
/// the lexer itself does not descend into interpolations).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StringRule {
    pub delim: char,
    pub escape: char,
    #[allow(dead_code)]
    pub interpolate: Option<Interpolation>,
}

// Profile data for language-specific tooling; the lexer does not
// descend into interpolations.
#[allow(dead_code)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interpolation {
    pub start: &'static str,
    pub end: &'static str,
}

#[derive(Clone, Debug)]
pub struct LanguageProfile {
    pub name: &'static str,
    pub comment_single: &'static str,
    // Profile data only; the line-based engine never crosses a
    // multi-line comment.
    #[allow(dead_code)]
    pub comment_multi: Option<(&'static str, &'static str)>,
    /// The directive lead character (`#` for every built-in profile).
    pub lead_char: char,
    /// Whether the lead character must be preceded by the single-line
    /// comment marker (`--#include` rather than `#include`).
    pub lead_char_commented: bool,
    /// A bare token is a maximal run whose accumulated text matches this.
    pub valid_symbol: Regex,
    pub string_rules: Vec<StringRule>,
    /// Macros seeded into every run for this language.
    pub predefined: Vec<(&'static str, &'static str)>,
}

// `Regex` has no `PartialEq`; compare it by pattern text.
impl PartialEq for LanguageProfile {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.comment_single == other.comment_single
            && self.comment_multi == other.comment_multi
            && self.lead_char == other.lead_char
            && self.lead_char_commented == other.lead_char_commented
            && self.valid_symbol.as_str() == other.valid_symbol.as_str()
            && self.string_rules == other.string_rules
            && self.predefined == other.predefined
    }
}

impl LanguageProfile {
    /// The full directive lead token for a line, e.g. `#` or `--#`.
    pub fn lead(&self) -> String {
        if self.lead_char_commented {
            format!("{}{}", self.comment_single, self.lead_char)
        } else {
            self.lead_char.to_string()
        }
    }

    pub fn string_rule(&self, c: char) -> Option<&StringRule> {
        self.string_rules.iter().find(|rule| rule.delim == c)
    }
}

enum Entry {
    Alias(&'static str),
    Profile(LanguageProfile),
}

fn symbol_pattern() -> Regex {
    // Every built-in language shares the identifier shape.
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap()
}

fn escaped(delim: char) -> StringRule {
    StringRule {
        delim,
        escape: '\\',
        interpolate: None,
    }
}

lazy_static! {
    static ref LANGUAGES: HashMap<&'static str, Entry> = {
        let mut map = HashMap::new();
        map.insert(
            "lua",
            Entry::Profile(LanguageProfile {
                name: "lua",
                comment_single: "--",
                comment_multi: Some(("--[[", "]]")),
                lead_char: '#',
                lead_char_commented: true,
                valid_symbol: symbol_pattern(),
                string_rules: vec![
                    escaped('\''),
                    escaped('"'),
                    StringRule {
                        delim: '`',
                        escape: '\\',
                        interpolate: Some(Interpolation {
                            start: "{",
                            end: "}",
                        }),
                    },
                ],
                predefined: vec![("require(f)", "(function()\n--#include f\nend)()")],
            }),
        );
        map.insert("luau", Entry::Alias("lua"));
        map.insert("slua", Entry::Alias("lua"));
        map.insert(
            "bash",
            Entry::Profile(LanguageProfile {
                name: "bash",
                comment_single: "#",
                comment_multi: None,
                lead_char: '#',
                lead_char_commented: false,
                valid_symbol: symbol_pattern(),
                string_rules: Vec::new(),
                predefined: Vec::new(),
            }),
        );
        map.insert(
            "c",
            Entry::Profile(LanguageProfile {
                name: "c",
                comment_single: "//",
                comment_multi: Some(("/*", "*/")),
                lead_char: '#',
                lead_char_commented: false,
                valid_symbol: symbol_pattern(),
                string_rules: Vec::new(),
                predefined: Vec::new(),
            }),
        );
        map.insert("cpp", Entry::Alias("c"));
        map.insert("h", Entry::Alias("c"));
        map.insert(
            "lsl",
            Entry::Profile(LanguageProfile {
                name: "lsl",
                comment_single: "//",
                comment_multi: Some(("/*", "*/")),
                lead_char: '#',
                lead_char_commented: false,
                valid_symbol: symbol_pattern(),
                string_rules: vec![escaped('"')],
                predefined: Vec::new(),
            }),
        );
        map
    };
}

/// Look up the profile for a file extension, following aliases.
pub fn profile_for(ext: &str) -> Result<&'static LanguageProfile, ResolutionError> {
    let mut key = ext;
    loop {
        match LANGUAGES.get(key) {
            Some(Entry::Profile(profile)) => return Ok(profile),
            Some(Entry::Alias(target)) => key = target,
            None => return Err(ResolutionError::UnknownLanguage(ext.to_string())),
        }
    }
}
