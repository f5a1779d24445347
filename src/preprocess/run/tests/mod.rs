use super::*;

use crate::language::profile_for;
use crate::preprocess::error::{DirectiveError, IncludeError, PreProcError};
use crate::preprocess::state::SharedState;

use arcstr::ArcStr;

use std::fs;
use std::path::{Path, PathBuf};

fn config(lang: &str) -> RunConfig {
    RunConfig {
        profile: profile_for(lang).unwrap(),
        options: Options::default(),
    }
}

fn expand_with(config: &RunConfig, source: &str) -> Result<String, PreProcError> {
    let mut state = SharedState::new(config.profile);
    let run = Run::from_source(
        PathBuf::from("main.lsl"),
        ArcStr::from(source),
        &mut state,
        config,
        1,
    );
    run.run()
}

fn expand(lang: &str, source: &str) -> Result<String, PreProcError> {
    expand_with(&config(lang), source)
}

fn directive_error(result: Result<String, PreProcError>) -> (usize, DirectiveError) {
    match result {
        Err(PreProcError::Directive { line, kind, .. }) => (line, kind),
        other => panic!("expected directive error, got {:?}", other),
    }
}

/// A scratch directory seeded with the given files.
fn scratch(name: &str, files: &[(&str, &str)]) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("wgpreproc-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    for (file, content) in files {
        fs::write(dir.join(file), content).unwrap();
    }
    dir
}

fn run_root(dir: &Path, root: &str, config: &RunConfig) -> Result<(String, Vec<PathBuf>), PreProcError> {
    let mut state = SharedState::new(config.profile);
    let run = Run::from_file(dir.join(root), &mut state, config, 1)?;
    let text = run.run()?;
    Ok((text, state.files()))
}

#[test]
fn value_macro_replaces_bare_references() {
    let out = expand("lsl", "#define GREETING \"hi\"\nsay(GREETING);").unwrap();
    assert_eq!(out, "say(\"hi\");");
}

#[test]
fn replacement_is_not_reexpanded_in_the_same_pass() {
    let out = expand("lsl", "#define A B\n#define B C\nA").unwrap();
    assert_eq!(out, "B");
}

#[test]
fn self_reference_substitutes_once() {
    let out = expand("lsl", "#define X 1 X\nX").unwrap();
    assert_eq!(out, "1 X");
}

#[test]
fn ifdef_and_ifndef_are_mutually_exclusive() {
    let source = "#ifdef FLAG\nguarded\n#endif\n#ifndef FLAG\nunguarded\n#endif";
    assert_eq!(expand("lsl", source).unwrap(), "unguarded");

    let defined = format!("#define FLAG 1\n{}", source);
    assert_eq!(expand("lsl", &defined).unwrap(), "guarded");
}

#[test]
fn builtins_count_as_defined() {
    let out = expand("lsl", "#ifdef __FILE__\nyes\n#endif").unwrap();
    assert_eq!(out, "yes");
}

#[test]
fn else_branch_is_emitted_after_a_false_condition() {
    let out = expand("lsl", "#ifdef MISSING\na\n#else\nb\n#endif").unwrap();
    assert_eq!(out, "b");
}

#[test]
fn else_after_a_taken_branch_is_an_error() {
    let source = "#define FLAG 1\n#ifdef FLAG\na\n#else\nb\n#endif";
    let (_, kind) = directive_error(expand("lsl", source));
    assert_eq!(kind, DirectiveError::UnmatchedConditional("else".to_string()));
}

#[test]
fn elseif_outside_a_skip_is_an_error() {
    let (_, kind) = directive_error(expand("lsl", "#elseif X\n"));
    assert_eq!(
        kind,
        DirectiveError::UnmatchedConditional("elseif".to_string())
    );
}

#[test]
fn skipping_tracks_nested_conditionals() {
    let source = "#ifdef MISSING\n#ifdef ALSO\nx\n#endif\ny\n#endif\nz";
    assert_eq!(expand("lsl", source).unwrap(), "z");
}

#[test]
fn extra_endif_is_an_error() {
    let (line, kind) = directive_error(expand("lsl", "a\n#endif"));
    assert_eq!(kind, DirectiveError::UnexpectedEndIf);
    assert_eq!(line, 2);
}

#[test]
fn missing_endif_is_an_error() {
    let (_, kind) = directive_error(expand("lsl", "#ifdef __FILE__\na"));
    assert_eq!(kind, DirectiveError::UnterminatedAtEof(1));

    let (_, kind) = directive_error(expand("lsl", "#ifdef MISSING\na"));
    assert_eq!(kind, DirectiveError::UnterminatedIf(1));
}

#[test]
fn function_macro_expands_with_bound_arguments() {
    let out = expand("lsl", "#define ADD(a, b) a+b\nADD(1,2);").unwrap();
    assert_eq!(out, "1+2;");
}

#[test]
fn function_macro_checks_argument_count() {
    let (_, kind) = directive_error(expand("lsl", "#define ADD(a, b) a+b\nADD(1);"));
    assert_eq!(
        kind,
        DirectiveError::ArgumentCount {
            name: "ADD".to_string(),
            expected: 2,
            got: 1,
        }
    );
}

#[test]
fn function_macro_requires_a_call() {
    let (_, kind) = directive_error(expand("lsl", "#define F(a) a\nF;"));
    assert_eq!(kind, DirectiveError::MissingCallParen("F".to_string()));
}

#[test]
fn commas_inside_nested_parens_do_not_split_arguments() {
    let out = expand("lsl", "#define WRAP(x) [x]\nWRAP(f(a, b))").unwrap();
    assert_eq!(out, "[f(a, b)]");
}

#[test]
fn substitution_stops_after_the_comment_marker() {
    let out = expand("lsl", "#define FOO bar\nFOO // FOO").unwrap();
    assert_eq!(out, "bar // FOO");
}

#[test]
fn macro_names_inside_string_literals_are_left_alone() {
    let out = expand("lsl", "#define FOO bar\nsay(\"FOO\");").unwrap();
    assert_eq!(out, "say(\"FOO\");");
}

#[test]
fn lead_char_mid_line_is_not_a_directive() {
    let out = expand("lsl", "x // #define Y 1\nY").unwrap();
    assert_eq!(out, "x // #define Y 1\nY");
}

#[test]
fn indented_lead_is_not_a_directive() {
    let out = expand("lsl", "  #define Y 1\nY").unwrap();
    assert_eq!(out, "#define Y 1\nY");
}

#[test]
fn file_and_line_builtins() {
    let out = expand("lsl", "one\n__LINE__\n__FILE__ __SHORT_FILE__").unwrap();
    assert_eq!(out, "one\n2\n\"main.lsl\" \"main.lsl\"");
}

#[test]
fn include_level_is_zero_at_the_root() {
    assert_eq!(expand("lsl", "__INCLUDE_LEVEL__").unwrap(), "0");
}

#[test]
fn continuation_joins_directive_lines() {
    let out = expand("lsl", "#define M first \\\nsecond\nM").unwrap();
    assert_eq!(out, "first\nsecond");
}

#[test]
fn escaped_backslash_does_not_continue() {
    let out = expand("lsl", "#define M a\\\\\nM").unwrap();
    assert_eq!(out, "a\\\\");
}

#[test]
fn commented_lead_requires_prefix_on_continuations() {
    let out = expand("lua", "--#define M a \\\n-- b\nM").unwrap();
    assert_eq!(out, "a\n b");

    let (_, kind) = directive_error(expand("lua", "--#define M a \\\nno prefix\nM"));
    assert_eq!(
        kind,
        DirectiveError::MissingContinuationPrefix("--".to_string())
    );
}

#[test]
fn bad_define_name_is_an_error() {
    let (_, kind) = directive_error(expand("lsl", "#define $$$ x"));
    assert_eq!(kind, DirectiveError::BadDefineName("$$$".to_string()));
}

#[test]
fn unknown_directives_are_dropped_without_failing() {
    let out = expand("lsl", "#pragma something\nkept").unwrap();
    assert_eq!(out, "kept");
}

#[test]
fn include_splices_the_target_twice_if_asked_twice() {
    let dir = scratch(
        "include-twice",
        &[
            ("main.lsl", "#include \"lib.lsl\"\n#include \"lib.lsl\""),
            ("lib.lsl", "one"),
        ],
    );
    let (text, files) = run_root(&dir, "main.lsl", &config("lsl")).unwrap();
    assert_eq!(text, "one\none");
    assert_eq!(files, vec![dir.join("main.lsl"), dir.join("lib.lsl")]);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn includeonce_suppresses_repeats() {
    let dir = scratch(
        "includeonce",
        &[
            (
                "main.lsl",
                "#includeonce \"lib.lsl\"\n#includeonce \"lib.lsl\"",
            ),
            ("lib.lsl", "one"),
        ],
    );
    let (text, _) = run_root(&dir, "main.lsl", &config("lsl")).unwrap();
    assert_eq!(text, "one");
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn macro_state_is_shared_across_the_inclusion_tree() {
    let dir = scratch(
        "shared-state",
        &[
            ("main.lsl", "#include \"lib.lsl\"\nFROM_LIB level __INCLUDE_LEVEL__"),
            ("lib.lsl", "#define FROM_LIB yes\nlevel __INCLUDE_LEVEL__"),
        ],
    );
    let (text, _) = run_root(&dir, "main.lsl", &config("lsl")).unwrap();
    assert_eq!(text, "level 1\nyes level 0");
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn missing_include_target_aborts_the_run() {
    let dir = scratch("missing-include", &[("main.lsl", "#include \"nope.lsl\"")]);
    match run_root(&dir, "main.lsl", &config("lsl")) {
        Err(PreProcError::Include { file, kind }) => {
            assert_eq!(file, dir.join("nope.lsl"));
            assert_eq!(kind, IncludeError::FileNotFound);
        }
        other => panic!("expected include error, got {:?}", other),
    }
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn errors_in_included_files_name_that_file() {
    let dir = scratch(
        "nested-error",
        &[
            ("main.lsl", "#include \"lib.lsl\""),
            ("lib.lsl", "#endif"),
        ],
    );
    match run_root(&dir, "main.lsl", &config("lsl")) {
        Err(PreProcError::Directive { file, line, kind }) => {
            assert_eq!(file, dir.join("lib.lsl"));
            assert_eq!(line, 1);
            assert_eq!(kind, DirectiveError::UnexpectedEndIf);
        }
        other => panic!("expected directive error, got {:?}", other),
    }
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn verbose_includes_are_bracketed_with_markers() {
    let dir = scratch(
        "verbose-include",
        &[("main.lsl", "#include \"lib.lsl\""), ("lib.lsl", "one")],
    );
    let mut config = config("lsl");
    config.options.verbose = true;
    let (text, _) = run_root(&dir, "main.lsl", &config).unwrap();
    let lib = dir.join("lib.lsl");
    assert_eq!(
        text,
        format!("//<include file=\"{}\">\none\n// </include>", lib.display())
    );
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn verbose_includeonce_leaves_a_skip_marker() {
    let dir = scratch(
        "verbose-once",
        &[
            (
                "main.lsl",
                "#includeonce \"lib.lsl\"\n#includeonce \"lib.lsl\"",
            ),
            ("lib.lsl", "one"),
        ],
    );
    let mut config = config("lsl");
    config.options.verbose = true;
    let (text, _) = run_root(&dir, "main.lsl", &config).unwrap();
    assert!(text.contains("skipped/>"), "got: {}", text);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn lua_require_expands_to_an_inline_include() {
    let dir = scratch(
        "lua-require",
        &[
            ("main.lua", "x = require(\"lib.lua\")"),
            ("lib.lua", "return 42"),
        ],
    );
    let (text, files) = run_root(&dir, "main.lua", &config("lua")).unwrap();
    assert_eq!(text, "x = (function()\nreturn 42\nend)()");
    assert_eq!(files, vec![dir.join("main.lua"), dir.join("lib.lua")]);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn clean_comments_drops_comment_lines() {
    let mut config = config("lsl");
    config.options.clean_comments = true;
    let out = expand_with(&config, "// gone\nkept\n  // also gone").unwrap();
    assert_eq!(out, "kept");
}

#[test]
fn collapse_empty_lines_folds_runs_of_blanks() {
    let mut config = config("lsl");
    config.options.collapse_empty_lines = true;
    let out = expand_with(&config, "a\n\n\n\nb").unwrap();
    assert_eq!(out, "a\n\nb");
}

#[test]
fn expansion_is_idempotent_for_stable_input() {
    let source = "#define ADD(a, b) a+b\nADD(1,2)\n__INCLUDE_LEVEL__";
    let first = expand("lsl", source).unwrap();
    let second = expand("lsl", source).unwrap();
    assert_eq!(first, second);
}

#[test]
fn options_pragma_names_map_to_typed_flags() {
    let mut options = Options::default();
    options.set("verbose", "");
    options.set("clean-comments", "true");
    options.set("collapse-empty-lines", "false");
    options.set("target", "mono");
    assert!(options.verbose);
    assert!(options.clean_comments);
    assert!(!options.collapse_empty_lines);
    assert_eq!(options.passthrough.get("target").map(String::as_str), Some("mono"));
}
