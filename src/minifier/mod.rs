//! Minification strategies behind one two-phase contract.
//!
//! [`prepare`] parses and checks the source; it is where syntax problems
//! are reported and where a job can be skipped before any output exists.
//! [`Prepared::emit`] then pushes the minified text through a charset
//! encoder into whatever byte sink the caller supplies.

pub mod closure;
pub mod css;
pub mod yui;

use std::fmt::Write as _;
use std::io::{self, Write};

use encoding_rs::{Encoder, EncoderResult, Encoding, UTF_16BE, UTF_16LE, UTF_8};
use oxc::diagnostics::OxcDiagnostic;

use crate::diagnostics::DiagnosticReporter;
use crate::resource::ResourcePath;
use crate::strategy::Strategy;

/// Charset of new Closure-style destinations
pub const ASCII_CHARSET: &str = "US-ASCII";

/// Output bytes produced per encoder call
const ENCODE_CHUNK: usize = 1024;

/// Receiver of minified text
pub trait TextSink {
    fn push_str(&mut self, text: &str) -> io::Result<()>;
}

impl TextSink for String {
    fn push_str(&mut self, text: &str) -> io::Result<()> {
        String::push_str(self, text);
        Ok(())
    }
}

/// How a character the output charset cannot hold is written instead
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escape {
    /// `\XXXXXX ` hex escape, valid in CSS strings and identifiers
    Css,
    /// `\uXXXX` per UTF-16 unit
    Js,
}

impl Escape {
    pub fn for_strategy(strategy: &Strategy) -> Self {
        match strategy {
            Strategy::CssCompress => Escape::Css,
            Strategy::JsCompress(_) | Strategy::Closure(_) => Escape::Js,
        }
    }

    /// Append the escaped form of `c`
    pub fn push(self, c: char, out: &mut String) {
        match self {
            Escape::Css => {
                let _ = write!(out, "\\{:06x} ", u32::from(c));
            }
            Escape::Js => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(out, "\\u{unit:04x}");
                }
            }
        }
    }
}

enum Target {
    Utf8,
    Utf16 { big_endian: bool },
    Legacy(Encoder),
}

/// Encodes text with a fixed charset into a byte writer.
///
/// Characters the charset cannot represent are written as escapes; call
/// [`EncodingWriter::finish`] to flush the encoder state.
pub struct EncodingWriter<W: Write> {
    inner: W,
    target: Target,
    escape: Escape,
    buffer: Vec<u8>,
}

impl<W: Write> EncodingWriter<W> {
    pub fn new(inner: W, encoding: &'static Encoding, escape: Escape) -> Self {
        let target = if encoding == UTF_8 {
            Target::Utf8
        } else if encoding == UTF_16LE || encoding == UTF_16BE {
            Target::Utf16 {
                big_endian: encoding == UTF_16BE,
            }
        } else {
            Target::Legacy(encoding.new_encoder())
        };
        Self {
            inner,
            target,
            escape,
            buffer: Vec::new(),
        }
    }

    /// Flush pending encoder state and hand back the writer
    pub fn finish(mut self) -> io::Result<W> {
        if let Target::Legacy(encoder) = &mut self.target {
            self.buffer.clear();
            encode_escaping(encoder, self.escape, "", true, &mut self.buffer);
            self.inner.write_all(&self.buffer)?;
        }
        Ok(self.inner)
    }
}

impl<W: Write> TextSink for EncodingWriter<W> {
    fn push_str(&mut self, text: &str) -> io::Result<()> {
        match &mut self.target {
            Target::Utf8 => self.inner.write_all(text.as_bytes()),
            Target::Utf16 { big_endian } => {
                self.buffer.clear();
                for unit in text.encode_utf16() {
                    let bytes = if *big_endian {
                        unit.to_be_bytes()
                    } else {
                        unit.to_le_bytes()
                    };
                    self.buffer.extend_from_slice(&bytes);
                }
                self.inner.write_all(&self.buffer)
            }
            Target::Legacy(encoder) => {
                self.buffer.clear();
                encode_escaping(encoder, self.escape, text, false, &mut self.buffer);
                self.inner.write_all(&self.buffer)
            }
        }
    }
}

/// Encode `text` into `out`, replacing unmappable characters by their
/// escape. Escapes are ASCII, which every supported legacy charset maps.
fn encode_escaping(
    encoder: &mut Encoder,
    escape: Escape,
    mut text: &str,
    last: bool,
    out: &mut Vec<u8>,
) {
    loop {
        let start = out.len();
        out.resize(start + ENCODE_CHUNK, 0);
        let (result, read, written) =
            encoder.encode_from_utf8_without_replacement(text, &mut out[start..], last);
        out.truncate(start + written);
        text = &text[read..];
        match result {
            EncoderResult::InputEmpty => return,
            EncoderResult::OutputFull => {}
            EncoderResult::Unmappable(c) => {
                let mut escaped = String::new();
                escape.push(c, &mut escaped);
                encode_escaping(encoder, escape, &escaped, false, out);
            }
        }
    }
}

/// 1-based line containing byte `offset`
pub(crate) fn line_of(source: &str, offset: usize) -> u32 {
    let end = offset.min(source.len());
    source.as_bytes()[..end].iter().filter(|b| **b == b'\n').count() as u32 + 1
}

/// Line of the first label of a parser diagnostic
pub(crate) fn diagnostic_line(source: &str, diagnostic: &OxcDiagnostic) -> u32 {
    diagnostic
        .labels
        .as_ref()
        .and_then(|labels| labels.first())
        .map_or(1, |label| line_of(source, label.offset()))
}

/// Resolve a charset label such as "UTF-8" or "ISO-8859-1"
pub fn lookup_charset(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

/// Decode source bytes; a byte order mark overrides `encoding`
pub fn decode(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

/// Whether `encoding` can represent every character
pub fn is_unicode(encoding: &'static Encoding) -> bool {
    encoding == UTF_8 || encoding == UTF_16LE || encoding == UTF_16BE
}

/// Charset a strategy writes its destination in
pub fn output_charset(
    strategy: &Strategy,
    source_charset: &str,
    destination_charset: Option<&str>,
) -> String {
    if let Some(existing) = destination_charset {
        return existing.to_string();
    }
    match strategy {
        Strategy::Closure(_) => ASCII_CHARSET.to_string(),
        Strategy::CssCompress | Strategy::JsCompress(_) => source_charset.to_string(),
    }
}

/// Extra output written next to the destination (e.g. a source map)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraArtifact {
    pub path: ResourcePath,
    pub bytes: Vec<u8>,
}

/// Everything a strategy needs to run
#[derive(Debug, Clone)]
pub struct MinifyInput {
    pub source: ResourcePath,
    pub destination: ResourcePath,
    pub text: String,
    pub output_encoding: &'static Encoding,
}

/// A checked source, ready to be written out
#[derive(Debug)]
pub struct Prepared {
    pub code: String,
    pub extras: Vec<ExtraArtifact>,
}

impl Prepared {
    /// Write the minified text; returns the extra artifacts to persist
    pub fn emit(self, sink: &mut dyn TextSink) -> io::Result<Vec<ExtraArtifact>> {
        sink.push_str(&self.code)?;
        Ok(self.extras)
    }
}

/// Parse and check `input` with `strategy`.
///
/// `Ok(None)` means the source has errors that were reported and the job
/// should leave its destination alone. `Err` is a catastrophic failure.
pub fn prepare(
    strategy: &Strategy,
    input: &MinifyInput,
    reporter: &DiagnosticReporter,
) -> Result<Option<Prepared>, String> {
    match strategy {
        Strategy::CssCompress => {
            let code = css::compress(&input.text)?;
            Ok(Some(Prepared {
                code,
                extras: Vec::new(),
            }))
        }
        Strategy::JsCompress(options) => Ok(yui::compress(&input.text, options, reporter).map(
            |code| Prepared {
                code,
                extras: Vec::new(),
            },
        )),
        Strategy::Closure(options) => {
            let map_path = input.destination.source_map();
            let names = closure::Names {
                source: input.source.file_name(),
                destination: input.destination.file_name(),
                source_map: map_path.file_name(),
            };
            let Some(compiled) = closure::compile(&input.text, names, options, reporter) else {
                return Ok(None);
            };
            let code = if is_unicode(input.output_encoding) {
                compiled.code
            } else {
                closure::escape_non_ascii(&compiled.code)
            };
            let extras = compiled
                .source_map
                .map(|map| ExtraArtifact {
                    path: map_path.clone(),
                    bytes: map.into_bytes(),
                })
                .into_iter()
                .collect();
            Ok(Some(Prepared { code, extras }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticSink;
    use crate::strategy::{ClosureOptions, OptimizationLevel, YuiOptions};
    use encoding_rs::{ISO_2022_JP, WINDOWS_1252};

    fn p(s: &str) -> ResourcePath {
        ResourcePath::new(s).unwrap()
    }

    fn input(source: &str, text: &str) -> MinifyInput {
        let source = p(source);
        MinifyInput {
            destination: source.minified().unwrap(),
            source,
            text: text.to_string(),
            output_encoding: UTF_8,
        }
    }

    fn run(strategy: Strategy, input: &MinifyInput) -> (Option<String>, DiagnosticSink) {
        let sink = DiagnosticSink::new();
        let reporter = sink.reporter(input.source.clone());
        let prepared = prepare(&strategy, input, &reporter).unwrap();
        let text = prepared.map(|prepared| {
            let mut out = String::new();
            prepared.emit(&mut out).unwrap();
            out
        });
        (text, sink)
    }

    // ==================== charset tests ====================

    #[test]
    fn test_lookup_charset() {
        assert_eq!(lookup_charset("UTF-8"), Some(UTF_8));
        assert_eq!(lookup_charset(" utf8 "), Some(UTF_8));
        assert_eq!(lookup_charset("ISO-8859-1"), Some(WINDOWS_1252));
        assert!(lookup_charset("klingon").is_none());
    }

    #[test]
    fn test_output_charset_rules() {
        let css = Strategy::CssCompress;
        let gcc = Strategy::Closure(ClosureOptions::default());
        assert_eq!(output_charset(&css, "ISO-8859-1", None), "ISO-8859-1");
        assert_eq!(output_charset(&css, "UTF-8", Some("UTF-16")), "UTF-16");
        assert_eq!(output_charset(&gcc, "UTF-8", None), ASCII_CHARSET);
        assert_eq!(output_charset(&gcc, "UTF-8", Some("UTF-8")), "UTF-8");
    }

    fn encode(text: &str, encoding: &'static Encoding, escape: Escape) -> Vec<u8> {
        let mut writer = EncodingWriter::new(Vec::new(), encoding, escape);
        writer.push_str(text).unwrap();
        writer.finish().unwrap()
    }

    #[test]
    fn test_encoding_writer_latin1() {
        assert_eq!(encode("café", WINDOWS_1252, Escape::Js), vec![b'c', b'a', b'f', 0xE9]);
    }

    #[test]
    fn test_encoding_writer_escapes_unmappable_css() {
        let out = encode("a{content:\"→é\"}", WINDOWS_1252, Escape::Css);
        let mut expected = b"a{content:\"\\002192 ".to_vec();
        expected.push(0xE9);
        expected.extend_from_slice(b"\"}");
        assert_eq!(out, expected);
    }

    #[test]
    fn test_encoding_writer_escapes_unmappable_js() {
        let out = encode("var s=\"→😀\";", WINDOWS_1252, Escape::Js);
        assert_eq!(out, b"var s=\"\\u2192\\ud83d\\ude00\";".to_vec());
    }

    #[test]
    fn test_encoding_writer_utf16() {
        assert_eq!(encode("ab", UTF_16LE, Escape::Js), vec![97, 0, 98, 0]);
        assert_eq!(encode("ab", UTF_16BE, Escape::Js), vec![0, 97, 0, 98]);
        assert_eq!(encode("é", UTF_16LE, Escape::Js), vec![0xE9, 0]);
    }

    #[test]
    fn test_encoding_writer_finish_resets_stateful_charset() {
        let out = encode("日", ISO_2022_JP, Escape::Js);
        let (text, _, had_errors) = ISO_2022_JP.decode(&out);
        assert!(!had_errors);
        assert_eq!(text, "日");
        assert!(out.ends_with(b"\x1b(B"));
    }

    #[test]
    fn test_encoding_writer_large_input() {
        let text = "é".repeat(ENCODE_CHUNK * 3);
        assert_eq!(encode(&text, WINDOWS_1252, Escape::Css), vec![0xE9; ENCODE_CHUNK * 3]);
    }

    #[test]
    fn test_line_of() {
        let source = "a\nb\nc";
        assert_eq!(line_of(source, 0), 1);
        assert_eq!(line_of(source, 2), 2);
        assert_eq!(line_of(source, 4), 3);
        assert_eq!(line_of(source, 100), 3);
    }

    #[test]
    fn test_decode_latin1() {
        assert_eq!(decode(&[b'c', 0xE9], WINDOWS_1252), "cé");
    }

    // ==================== prepare tests ====================

    #[test]
    fn test_prepare_css() {
        let (text, sink) = run(Strategy::CssCompress, &input("style.css", "a { color: red; }"));
        assert_eq!(text.as_deref(), Some("a{color:red}"));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_prepare_yui_syntax_error_skips_with_one_error() {
        let (text, sink) = run(
            Strategy::JsCompress(YuiOptions::default()),
            &input("app.js", "var a = 1;\nvar b = \"broken;\n"),
        );
        assert!(text.is_none());
        let diagnostics = sink.drain();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].line, 2);
    }

    #[test]
    fn test_prepare_yui_warnings_reported() {
        let (text, sink) = run(
            Strategy::JsCompress(YuiOptions::default()),
            &input("app.js", "var o = { a: 1, };"),
        );
        assert_eq!(text.as_deref(), Some("var o={a:1};"));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_prepare_closure_with_source_map() {
        let strategy = Strategy::Closure(ClosureOptions {
            level: OptimizationLevel::WhitespaceOnly,
            source_map: true,
            embed_sources: false,
        });
        let sink = DiagnosticSink::new();
        let input = input("web/app.js", "var x = 1;\n");
        let prepared = prepare(&strategy, &input, &sink.reporter(input.source.clone()))
            .unwrap()
            .unwrap();

        let mut out = String::new();
        let extras = prepared.emit(&mut out).unwrap();

        assert_eq!(extras.len(), 1);
        assert_eq!(extras[0].path, p("web/app.min.js.map"));
        assert!(out.contains("sourceMappingURL=app.min.js.map"));
    }

    #[test]
    fn test_prepare_closure_escapes_for_ascii_output() {
        let strategy = Strategy::Closure(ClosureOptions::default());
        let mut input = input("app.js", "var s = \"é\";\n");
        input.output_encoding = WINDOWS_1252;
        let (text, _) = run(strategy, &input);
        let text = text.unwrap();
        assert!(text.is_ascii());
        assert!(text.contains("\\u00e9"));
    }
}
