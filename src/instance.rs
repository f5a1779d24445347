//! A managed target file: pragma header parsing, project-root
//! resolution, and the write-back loop fed by a [`Driver`].
//!
//! The target file is the preprocessed artifact itself. Its pragma
//! header names the project and root source file; every run rewrites
//! the whole target with a fresh header and body. Deleting the target
//! closes the instance.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use thiserror::Error;

use crate::driver::{Driver, DriverError, DriverHandle, RunOutput};
use crate::language::{profile_for, LanguageProfile, ResolutionError};
use crate::preprocess::{Options, RunConfig};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InstanceError {
    #[error("target i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Language(#[from] ResolutionError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
    #[error("target is missing the @{0} pragma")]
    MissingPragma(&'static str),
    #[error("project root {} does not exist", .0.display())]
    NoProjectRoot(PathBuf),
}

/// Values read from (and written back into) the target's pragma header.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InstanceParams {
    pub language: String,
    pub project: Option<String>,
    pub file: Option<String>,
    pub hash: Option<String>,
    /// `@opt-*` pragmas in header order, raw values.
    pub options: IndexMap<String, String>,
}

/// The `@language` pragma is honored anywhere in the file, comment
/// prefix or not, so a fresh hand-written target can carry just this
/// one line.
pub fn detect_language(text: &str) -> Option<&str> {
    let idx = text.find("@language")?;
    let rest = &text[idx + "@language".len()..];
    let line = rest.lines().next().unwrap_or(rest);
    Some(line.trim()).filter(|lang| !lang.is_empty())
}

impl InstanceParams {
    /// Parse the comment-prefixed `@` pragmas of a target file.
    pub fn parse(text: &str, profile: &LanguageProfile) -> Self {
        let mut params = Self {
            language: profile.name.to_string(),
            ..Self::default()
        };

        for line in text.lines() {
            let Some(rest) = line.trim().strip_prefix(profile.comment_single) else {
                continue;
            };
            let Some(rest) = rest.trim().strip_prefix('@') else {
                continue;
            };
            let (cmd, arg) = match rest.find(' ') {
                Some(idx) => (&rest[..idx], rest[idx + 1..].trim()),
                None => (rest, ""),
            };
            match cmd.to_ascii_lowercase().as_str() {
                "project" => params.project = Some(arg.to_string()),
                "file" => params.file = Some(arg.to_string()),
                "hash" => params.hash = Some(arg.to_string()),
                cmd => {
                    if let Some(opt) = cmd.strip_prefix("opt-") {
                        params.options.insert(opt.to_string(), arg.to_string());
                    }
                }
            }
        }
        params
    }

    /// The header block written above every preprocessed body.
    pub fn render_header(&self, profile: &LanguageProfile) -> String {
        let single = profile.comment_single;
        let prefix = format!("{} @", single);
        let date = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut out = format!(
            "{} Preprocessed through wgpreproc v{}\n",
            single,
            env!("CARGO_PKG_VERSION")
        );
        out.push_str(&format!("{}language {}\n", prefix, self.language));
        out.push_str(&format!(
            "{}project {}\n",
            prefix,
            self.project.as_deref().unwrap_or("")
        ));
        out.push_str(&format!(
            "{}file {}\n",
            prefix,
            self.file.as_deref().unwrap_or("")
        ));
        out.push_str(&format!(
            "{}hash {}\n",
            prefix,
            self.hash.as_deref().unwrap_or("")
        ));
        out.push_str(&format!("{}date {}\n", prefix, date));
        if !self.options.is_empty() {
            out.push_str(single);
            out.push('\n');
            for (name, value) in &self.options {
                out.push_str(&format!("{}opt-{} {}\n", prefix, name, value));
            }
        }
        out.push_str(&format!("{} =============================", single));
        out
    }
}

pub struct Instance {
    target: PathBuf,
    projects_dir: PathBuf,
    lang_override: Option<String>,
}

impl Instance {
    pub fn new(target: PathBuf, projects_dir: PathBuf, lang_override: Option<String>) -> Self {
        Self {
            target,
            projects_dir,
            lang_override,
        }
    }

    /// Resolve the language profile: explicit override, then the
    /// `@language` pragma, then the target's file extension.
    fn resolve_profile(&self, text: &str) -> Result<&'static LanguageProfile, ResolutionError> {
        if let Some(lang) = &self.lang_override {
            return profile_for(lang);
        }
        if let Some(lang) = detect_language(text) {
            return profile_for(lang);
        }
        let ext = self
            .target
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| ResolutionError::NoExtension(self.target.display().to_string()))?;
        profile_for(ext)
    }

    /// Process the target's root file, rewrite the target on changes,
    /// and keep watching until the target is deleted. Blocks; callers
    /// give each instance its own thread.
    pub fn run(self) -> Result<(), InstanceError> {
        let text = std::fs::read_to_string(&self.target)?;
        let profile = self.resolve_profile(&text)?;
        let mut params = InstanceParams::parse(&text, profile);
        params.language = profile.name.to_string();

        let mut options = Options::default();
        for (name, value) in &params.options {
            options.set(name, value);
        }

        let project = params
            .project
            .as_deref()
            .ok_or(InstanceError::MissingPragma("project"))?;
        let file = params
            .file
            .as_deref()
            .ok_or(InstanceError::MissingPragma("file"))?;
        let root = self.projects_dir.join(project).join(file);
        if !root.is_file() {
            return Err(InstanceError::NoProjectRoot(root));
        }

        let mut driver = Driver::new(root, RunConfig { profile, options });
        let _guard = watch_for_removal(&self.target, driver.handle())?;

        log::info!("instance started: {}", self.target.display());
        let target = self.target.clone();
        driver.watch(move |output| {
            // Driver already suppressed unchanged fingerprints; the
            // stored @hash guards against rewriting a fresh target.
            if params.hash.as_deref() == Some(output.hash.as_str()) {
                return;
            }
            params.hash = Some(output.hash.clone());
            if let Err(err) = write_target(&target, &params, profile, output) {
                log::error!("cannot write {}: {}", target.display(), err);
            } else {
                log::info!("updated {}", target.display());
            }
        })?;
        log::info!("instance closed: {}", self.target.display());
        Ok(())
    }
}

/// Rewrite the whole target: header, body, trailing newline. Refuses to
/// create the file, so a deleted target stays deleted.
fn write_target(
    target: &Path,
    params: &InstanceParams,
    profile: &LanguageProfile,
    output: &RunOutput,
) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(target)?;
    write!(file, "{}\n{}", params.render_header(profile), output.text)?;
    if !output.text.ends_with('\n') {
        writeln!(file)?;
    }
    Ok(())
}

/// Close the driver when the target file disappears. The watcher stays
/// alive as long as the returned value is held.
fn watch_for_removal(
    target: &Path,
    handle: DriverHandle,
) -> Result<impl Sized, notify::Error> {
    let (tx, rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        if let Ok(event) = res {
            if matches!(event.kind, EventKind::Remove(_)) {
                let _ = tx.send(());
            }
        }
    })?;
    watcher.watch(target, RecursiveMode::NonRecursive)?;

    std::thread::spawn(move || {
        if rx.recv().is_ok() {
            handle.close();
        }
    });
    Ok(watcher)
}
