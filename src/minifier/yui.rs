//! Conservative JavaScript compressor built on oxc.
//!
//! The source is parsed as a classic script. The first syntax error is
//! reported and the file is skipped, so a broken source never produces
//! output. Otherwise the program is reprinted without whitespace or
//! comments; `/*! ... */` license blocks stay. Names are never mangled.
//!
//! Two micro-optimizations run unless disabled: `obj["name"]` becomes
//! `obj.name` and quoted object keys that are plain identifiers lose their
//! quotes. With `preserve_semicolons` every statement keeps its `;`, even
//! before `}` and at the end of the file.

use oxc::allocator::{Allocator, Box as ArenaBox, TakeIn};
use oxc::ast::ast::{
    ArrayExpression, ArrayExpressionElement, ComputedMemberExpression, Expression,
    ObjectExpression, ObjectProperty, ObjectPropertyKind, PropertyKey, SimpleAssignmentTarget,
    Statement, StaticMemberExpression,
};
use oxc::ast::AstBuilder;
use oxc::ast_visit::{walk, walk_mut, Visit, VisitMut};
use oxc::codegen::{Codegen, CodegenOptions, CommentOptions, LegalComment};
use oxc::diagnostics::Severity;
use oxc::parser::Parser;
use oxc::span::{GetSpan, SourceType, Span};
use oxc::syntax::identifier::is_identifier_name;
use oxc::syntax::keyword::is_reserved_keyword;

use super::{diagnostic_line, line_of};
use crate::diagnostics::DiagnosticReporter;
use crate::strategy::YuiOptions;

const TRAILING_COMMA: &str = "Trailing comma is not legal in an ECMA-262 object initializer";

/// Compress `source`. Diagnostics go to `reporter`; None when the source
/// has a syntax error.
pub fn compress(
    source: &str,
    options: &YuiOptions,
    reporter: &DiagnosticReporter,
) -> Option<String> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, source, SourceType::script()).parse();

    if let Some(error) = parsed
        .errors
        .iter()
        .find(|error| error.severity == Severity::Error)
    {
        reporter.error(error.message.to_string(), diagnostic_line(source, error));
        return None;
    }
    if parsed.panicked {
        reporter.error("parser aborted", 1);
        return None;
    }
    for warning in parsed
        .errors
        .iter()
        .filter(|warning| warning.severity == Severity::Warning)
    {
        reporter.warning(warning.message.to_string(), diagnostic_line(source, warning));
    }

    let mut program = parsed.program;
    let mut commas = TrailingCommas {
        source,
        lines: Vec::new(),
    };
    commas.visit_program(&program);
    for line in commas.lines {
        reporter.warning(TRAILING_COMMA, line);
    }

    if !options.disable_optimizations {
        Shorthands {
            ast: AstBuilder::new(&allocator),
        }
        .visit_program(&mut program);
    }

    let code = Codegen::new()
        .with_options(CodegenOptions {
            minify: true,
            comments: CommentOptions {
                normal: false,
                jsdoc: false,
                annotation: false,
                legal: LegalComment::Inline,
            },
            ..CodegenOptions::default()
        })
        .build(&program)
        .code;

    Some(if options.preserve_semicolons {
        restore_semicolons(code)
    } else {
        code
    })
}

/// Finds `{a: 1,}` and `[1,]` style literals
struct TrailingCommas<'s> {
    source: &'s str,
    lines: Vec<u32>,
}

impl TrailingCommas<'_> {
    /// Whether the text between the last element and the closing bracket
    /// holds a comma
    fn check(&mut self, literal: Span, last: Option<Span>) {
        let Some(last) = last else { return };
        let between = self
            .source
            .get(last.end as usize..literal.end.saturating_sub(1) as usize)
            .unwrap_or_default();
        if between.trim_start().starts_with(',') {
            self.lines.push(line_of(self.source, last.end as usize));
        }
    }
}

impl<'a> Visit<'a> for TrailingCommas<'_> {
    fn visit_object_expression(&mut self, it: &ObjectExpression<'a>) {
        let last = it.properties.last().map(ObjectPropertyKind::span);
        self.check(it.span, last);
        walk::walk_object_expression(self, it);
    }

    fn visit_array_expression(&mut self, it: &ArrayExpression<'a>) {
        // `[1,,]` ends in a hole; its comma is the hole
        let last = it
            .elements
            .last()
            .filter(|element| !matches!(element, ArrayExpressionElement::Elision(_)))
            .map(ArrayExpressionElement::span);
        self.check(it.span, last);
        walk::walk_array_expression(self, it);
    }
}

/// Rewrites string keys that are plain identifiers into dotted access and
/// bare property names
struct Shorthands<'a> {
    ast: AstBuilder<'a>,
}

fn is_plain_name(name: &str) -> bool {
    is_identifier_name(name) && !is_reserved_keyword(name)
}

impl<'a> Shorthands<'a> {
    fn dotted(
        &self,
        member: &mut ComputedMemberExpression<'a>,
    ) -> Option<ArenaBox<'a, StaticMemberExpression<'a>>> {
        let Expression::StringLiteral(key) = &member.expression else {
            return None;
        };
        if !is_plain_name(&key.value) {
            return None;
        }
        let property = self.ast.identifier_name(key.span, key.value);
        let object = member.object.take_in(self.ast);
        Some(self.ast.alloc_static_member_expression(
            member.span,
            object,
            property,
            member.optional,
        ))
    }
}

impl<'a> VisitMut<'a> for Shorthands<'a> {
    fn visit_expression(&mut self, it: &mut Expression<'a>) {
        walk_mut::walk_expression(self, it);
        if let Expression::ComputedMemberExpression(member) = it {
            if let Some(dotted) = self.dotted(member) {
                *it = Expression::StaticMemberExpression(dotted);
            }
        }
    }

    fn visit_simple_assignment_target(&mut self, it: &mut SimpleAssignmentTarget<'a>) {
        walk_mut::walk_simple_assignment_target(self, it);
        if let SimpleAssignmentTarget::ComputedMemberExpression(member) = it {
            if let Some(dotted) = self.dotted(member) {
                *it = SimpleAssignmentTarget::StaticMemberExpression(dotted);
            }
        }
    }

    fn visit_object_property(&mut self, it: &mut ObjectProperty<'a>) {
        walk_mut::walk_object_property(self, it);
        if it.computed {
            return;
        }
        if let PropertyKey::StringLiteral(key) = &it.key {
            if is_plain_name(&key.value) {
                it.key = self.ast.property_key_static_identifier(key.span, key.value);
            }
        }
    }
}

/// Put back the `;` the minifying printer leaves out before `}` and at
/// the end of the output
fn restore_semicolons(code: String) -> String {
    let mut positions = missing_semicolons(&code);
    if positions.is_empty() {
        return code;
    }
    positions.sort_unstable();
    positions.dedup();

    let mut out = String::with_capacity(code.len() + positions.len());
    let mut start = 0;
    for position in positions {
        out.push_str(code.get(start..position).unwrap_or_default());
        out.push(';');
        start = position;
    }
    out.push_str(code.get(start..).unwrap_or_default());
    out
}

/// Byte offsets where a statement ends without its semicolon
fn missing_semicolons(code: &str) -> Vec<usize> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, code, SourceType::script()).parse();
    if parsed.panicked || !parsed.errors.is_empty() {
        return Vec::new();
    }
    let mut finder = SemicolonFinder {
        code,
        positions: Vec::new(),
    };
    finder.visit_program(&parsed.program);
    finder.positions
}

struct SemicolonFinder<'s> {
    code: &'s str,
    positions: Vec<usize>,
}

fn takes_semicolon(statement: &Statement<'_>) -> bool {
    matches!(
        statement,
        Statement::ExpressionStatement(_)
            | Statement::VariableDeclaration(_)
            | Statement::ReturnStatement(_)
            | Statement::ThrowStatement(_)
            | Statement::BreakStatement(_)
            | Statement::ContinueStatement(_)
            | Statement::DoWhileStatement(_)
            | Statement::DebuggerStatement(_)
    )
}

impl<'a> Visit<'a> for SemicolonFinder<'_> {
    fn visit_statement(&mut self, it: &Statement<'a>) {
        if takes_semicolon(it) {
            let end = it.span().end as usize;
            let terminated = self
                .code
                .get(..end)
                .is_none_or(|text| text.ends_with(';'));
            if !terminated {
                self.positions.push(end);
            }
        }
        walk::walk_statement(self, it);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{DiagnosticSink, Severity as DiagSeverity};
    use crate::resource::ResourcePath;

    const OPTIMIZE: YuiOptions = YuiOptions {
        preserve_semicolons: false,
        disable_optimizations: false,
    };

    fn run(source: &str, options: YuiOptions) -> (Option<String>, DiagnosticSink) {
        let sink = DiagnosticSink::new();
        let reporter = sink.reporter(ResourcePath::new("app.js").unwrap());
        let out = compress(source, &options, &reporter);
        (out, sink)
    }

    fn reparses(code: &str) -> bool {
        let allocator = Allocator::default();
        let parsed = Parser::new(&allocator, code, SourceType::script()).parse();
        parsed.errors.is_empty() && !parsed.panicked
    }

    // ==================== syntax error tests ====================

    #[test]
    fn test_missing_binding_reports_one_error() {
        let (out, sink) = run("var a = 1;\nvar = ;\n", YuiOptions::default());
        assert!(out.is_none());
        let diagnostics = sink.drain();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, DiagSeverity::Error);
        assert_eq!(diagnostics[0].line, 2);
    }

    #[test]
    fn test_several_errors_still_report_once() {
        let (out, sink) = run("ok();\n\na b c;\nd e f;\n", YuiOptions::default());
        assert!(out.is_none());
        let diagnostics = sink.drain();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].line, 3);
    }

    #[test]
    fn test_unterminated_string_reports_line() {
        let (out, sink) = run("var a = 1;\nvar b = 'oops;\n", YuiOptions::default());
        assert!(out.is_none());
        assert_eq!(sink.drain()[0].line, 2);
    }

    #[test]
    fn test_unclosed_block() {
        let (out, sink) = run("function f() {\n  return 1;\n", YuiOptions::default());
        assert!(out.is_none());
        assert_eq!(sink.len(), 1);
    }

    // ==================== warning tests ====================

    #[test]
    fn test_trailing_comma_warns() {
        let (out, sink) = run("var o = {\n  a: 1,\n};\nvar l = [1, 2,];\n", YuiOptions::default());
        assert!(out.is_some());
        let diagnostics = sink.drain();
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].severity, DiagSeverity::Warning);
        assert_eq!(diagnostics[0].line, 2);
        assert_eq!(diagnostics[1].line, 4);
    }

    #[test]
    fn test_no_warning_without_trailing_comma() {
        let (_, sink) = run("var o = { a: [1, 2], b: { c: 3 } };\nvar holes = [1,,2];\n", YuiOptions::default());
        assert!(sink.is_empty());
    }

    // ==================== output tests ====================

    #[test]
    fn test_strips_comments_and_whitespace() {
        let (out, _) = run(
            "// leading\nfunction add(first, second) {\n  /* sum */\n  return first + second;\n}\n",
            OPTIMIZE,
        );
        let out = out.unwrap();
        assert!(!out.contains("leading"));
        assert!(!out.contains("sum"));
        assert!(out.contains("first+second"));
    }

    #[test]
    fn test_keeps_license_comment() {
        let (out, _) = run("/*! (c) Example */\nvar a = 1;\n", YuiOptions::default());
        assert!(out.unwrap().contains("/*! (c) Example */"));
    }

    #[test]
    fn test_names_are_not_mangled() {
        let (out, _) = run(
            "function total(items) { var running = 0; return running + items; }\n",
            OPTIMIZE,
        );
        let out = out.unwrap();
        assert!(out.contains("running"));
        assert!(out.contains("items"));
    }

    #[test]
    fn test_for_of_with_optimizations() {
        let (out, sink) = run("for (const k of [\"a\"]) f(k);\nfor (const v of o.list) g(v);\n", OPTIMIZE);
        let out = out.unwrap();
        assert!(reparses(&out), "{out}");
        assert!(out.contains("of[") || out.contains("of ["), "{out}");
        assert!(out.contains("of o.list"), "{out}");
        assert!(sink.is_empty());
    }

    // ==================== semicolon tests ====================

    #[test]
    fn test_preserve_semicolons_keeps_every_terminator() {
        let options = YuiOptions {
            preserve_semicolons: true,
            disable_optimizations: true,
        };
        let (out, _) = run("function f() {\n  a();\n  return 1;\n}\nb()\n", options);
        let out = out.unwrap();
        assert!(out.contains("return 1;}"), "{out}");
        assert!(out.trim_end().ends_with("b();"), "{out}");
        assert!(reparses(&out));
    }

    #[test]
    fn test_semicolons_dropped_when_not_preserved() {
        let (out, _) = run("function f() {\n  return 1;\n}\n", OPTIMIZE);
        let out = out.unwrap();
        assert!(!out.contains(";}"), "{out}");
    }

    #[test]
    fn test_restore_semicolons_leaves_terminated_code() {
        assert_eq!(restore_semicolons("a();b();".to_string()), "a();b();");
        assert_eq!(restore_semicolons("if(a){b()}c()".to_string()), "if(a){b();}c();");
    }

    // ==================== optimization tests ====================

    #[test]
    fn test_bracket_to_dot() {
        let (out, _) = run("obj[\"name\"] = x[\"value\"];\n", OPTIMIZE);
        let out = out.unwrap();
        assert!(out.contains("obj.name="), "{out}");
        assert!(out.contains("x.value"), "{out}");
    }

    #[test]
    fn test_bracket_reserved_word_kept() {
        let (out, _) = run("var a = obj[\"class\"] + obj[\"two words\"];\n", OPTIMIZE);
        let out = out.unwrap();
        assert!(!out.contains(".class"), "{out}");
        assert!(!out.contains(".two"), "{out}");
    }

    #[test]
    fn test_object_key_unquoted() {
        let (out, _) = run("var o = { \"name\": 1, \"not-plain\": 2 };\n", OPTIMIZE);
        let out = out.unwrap();
        assert!(out.contains("{name:1"), "{out}");
        assert!(out.contains("not-plain"), "{out}");
    }

    #[test]
    fn test_optimizations_disabled_keeps_quotes() {
        let (out, _) = run("var o = { \"name\": obj[\"key\"] };\n", YuiOptions::default());
        let out = out.unwrap();
        assert!(out.contains("name"));
        assert!(!out.contains("{name:"), "{out}");
        assert!(!out.contains("obj.key"), "{out}");
    }

    #[test]
    fn test_deterministic() {
        let source = "var o = { \"a\": 1 };\nfunction f(x) { return o[\"a\"] + x; }\n";
        let (first, _) = run(source, OPTIMIZE);
        let (second, _) = run(source, OPTIMIZE);
        assert_eq!(first, second);
    }
}
