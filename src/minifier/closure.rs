//! Whole-program JavaScript compilation via oxc.
//!
//! Levels map onto oxc passes: whitespace-only reprints the parsed
//! program, simple adds the compressor, advanced also mangles local names.
//! Sources are parsed as classic scripts, so top-level declarations are
//! globals and survive every level.
//! Source maps come from the code generator and are post-processed so
//! `file`, `sources` and `sourcesContent` describe the build's own files.

use std::path::PathBuf;

use oxc::allocator::Allocator;
use oxc::codegen::{Codegen, CodegenOptions, CommentOptions};
use oxc::diagnostics::Severity;
use oxc::mangler::MangleOptions;
use oxc::minifier::{CompressOptions, Minifier, MinifierOptions};
use oxc::parser::Parser;
use oxc::span::SourceType;
use serde_json::Value;

use super::{diagnostic_line, Escape};
use crate::diagnostics::DiagnosticReporter;
use crate::strategy::{ClosureOptions, OptimizationLevel};

/// Compiler output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compiled {
    pub code: String,
    pub source_map: Option<String>,
}

/// File names the compiler output refers to
#[derive(Debug, Clone, Copy)]
pub struct Names<'a> {
    pub source: &'a str,
    pub destination: &'a str,
    pub source_map: &'a str,
}

/// Compile `source`. Errors and warnings go to `reporter`; advice is
/// dropped. Returns None when the program has errors.
pub fn compile(
    source: &str,
    names: Names<'_>,
    options: &ClosureOptions,
    reporter: &DiagnosticReporter,
) -> Option<Compiled> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, source, SourceType::script()).parse();

    let mut failed = false;
    for error in &parsed.errors {
        let line = diagnostic_line(source, error);
        match error.severity {
            Severity::Error => {
                failed = true;
                reporter.error(error.message.to_string(), line);
            }
            Severity::Warning => reporter.warning(error.message.to_string(), line),
            _ => {}
        }
    }
    if parsed.panicked && !failed {
        reporter.error("parser aborted", 1);
        failed = true;
    }
    if failed {
        return None;
    }

    let mut program = parsed.program;
    let minifier_options = match options.level {
        OptimizationLevel::WhitespaceOnly => None,
        OptimizationLevel::Simple => Some(MinifierOptions {
            mangle: None,
            compress: Some(CompressOptions::smallest()),
        }),
        OptimizationLevel::Advanced => Some(MinifierOptions {
            mangle: Some(MangleOptions {
                top_level: Some(false),
                ..MangleOptions::default()
            }),
            compress: Some(CompressOptions::smallest()),
        }),
    };
    let scoping = minifier_options
        .and_then(|opts| Minifier::new(opts).minify(&allocator, &mut program).scoping);

    let generated = Codegen::new()
        .with_options(CodegenOptions {
            minify: true,
            comments: CommentOptions::disabled(),
            source_map_path: options
                .source_map
                .then(|| PathBuf::from(names.source)),
            ..CodegenOptions::default()
        })
        .with_scoping(scoping)
        .build(&program);

    let mut code = generated.code;
    let source_map = if options.source_map {
        generated.map.map(|map| {
            rewrite_source_map(&map.to_json_string(), source, names, options.embed_sources)
        })
    } else {
        None
    };
    if source_map.is_some() {
        if !code.ends_with('\n') {
            code.push('\n');
        }
        code.push_str("//# sourceMappingURL=");
        code.push_str(names.source_map);
        code.push('\n');
    }

    Some(Compiled { code, source_map })
}

/// Point the map at the build's files and embed or strip the original text
fn rewrite_source_map(raw: &str, source: &str, names: Names<'_>, embed: bool) -> String {
    let Ok(mut map) = serde_json::from_str::<Value>(raw) else {
        return raw.to_string();
    };
    let Some(object) = map.as_object_mut() else {
        return raw.to_string();
    };
    object.insert("file".to_string(), Value::from(names.destination));
    object.insert("sources".to_string(), Value::from(vec![names.source]));
    if embed {
        object.insert("sourcesContent".to_string(), Value::from(vec![source]));
    } else {
        object.remove("sourcesContent");
    }
    serde_json::to_string(&map).unwrap_or_else(|_| raw.to_string())
}

/// Escape every non-ASCII character as `\uXXXX` (surrogate pairs above the BMP)
pub fn escape_non_ascii(code: &str) -> String {
    if code.is_ascii() {
        return code.to_string();
    }
    let mut out = String::with_capacity(code.len() + 16);
    for c in code.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            Escape::Js.push(c, &mut out);
        }
    }
    out
}
