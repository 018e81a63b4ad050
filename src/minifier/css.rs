//! CSS compression via lightningcss.

use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};

/// Minify a stylesheet in one pass without line wrapping.
///
/// The error is the parser's or printer's message; CSS compression has no
/// diagnostics of its own, so any failure fails the job.
pub fn compress(source: &str) -> Result<String, String> {
    let stylesheet =
        StyleSheet::parse(source, ParserOptions::default()).map_err(|e| e.to_string())?;
    let result = stylesheet
        .to_css(PrinterOptions {
            minify: true,
            ..PrinterOptions::default()
        })
        .map_err(|e| e.to_string())?;
    Ok(result.code)
}
