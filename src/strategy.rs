//! Strategy registry: which minifier (and which options) applies to a file.
//!
//! Resolution is a pure function of the file extension and the configured
//! strategy name. The options a resolved [`Strategy`] carries start out as
//! defaults and are overlaid from the preference store with
//! [`Strategy::configure`].

use std::fmt;

use crate::prefs::{
    ConfigStore, PreferenceBackend, DISABLE_OPTIMIZATIONS, OPTIMIZATION, PRESERVE_SEMICOLONS,
    SOURCE_MAP, SOURCE_MAP_EMBED,
};
use crate::resource::{ResourcePath, SourceKind};

/// Configured strategy names, as stored under the `strategy` option
pub const NONE: &str = "none";
pub const CSS_COMPRESSOR: &str = "css-compressor";
pub const YUI_COMPRESSOR: &str = "yui";
pub const CLOSURE_COMPILER: &str = "gcc";

/// Options of the conservative JS compressor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YuiOptions {
    pub preserve_semicolons: bool,
    pub disable_optimizations: bool,
}

impl Default for YuiOptions {
    fn default() -> Self {
        Self {
            preserve_semicolons: true,
            disable_optimizations: true,
        }
    }
}

/// Closure-style optimization level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizationLevel {
    #[default]
    WhitespaceOnly,
    Simple,
    Advanced,
}

impl OptimizationLevel {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationLevel::WhitespaceOnly => "whitespace-only",
            OptimizationLevel::Simple => "simple",
            OptimizationLevel::Advanced => "advanced",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "whitespace-only" | "whitespace" => Some(OptimizationLevel::WhitespaceOnly),
            "simple" => Some(OptimizationLevel::Simple),
            "advanced" => Some(OptimizationLevel::Advanced),
            _ => None,
        }
    }
}

impl fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options of the whole-program JS compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClosureOptions {
    pub level: OptimizationLevel,
    pub source_map: bool,
    pub embed_sources: bool,
}

/// A resolved minification variant with its options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    CssCompress,
    JsCompress(YuiOptions),
    Closure(ClosureOptions),
}

impl Strategy {
    /// Name stored under the `strategy` option
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::CssCompress => CSS_COMPRESSOR,
            Strategy::JsCompress(_) => YUI_COMPRESSOR,
            Strategy::Closure(_) => CLOSURE_COMPILER,
        }
    }

    /// Overlay the options stored for `path`. Malformed values keep defaults.
    pub fn configure<B: PreferenceBackend>(self, store: &ConfigStore<B>, path: &ResourcePath) -> Self {
        match self {
            Strategy::CssCompress => Strategy::CssCompress,
            Strategy::JsCompress(defaults) => Strategy::JsCompress(YuiOptions {
                preserve_semicolons: store.get_bool(
                    path,
                    PRESERVE_SEMICOLONS,
                    defaults.preserve_semicolons,
                ),
                disable_optimizations: store.get_bool(
                    path,
                    DISABLE_OPTIMIZATIONS,
                    defaults.disable_optimizations,
                ),
            }),
            Strategy::Closure(defaults) => {
                let level = store
                    .get_opt(path, OPTIMIZATION)
                    .and_then(|raw| OptimizationLevel::parse(&raw))
                    .unwrap_or(defaults.level);
                Strategy::Closure(ClosureOptions {
                    level,
                    source_map: store.get_bool(path, SOURCE_MAP, defaults.source_map),
                    embed_sources: store.get_bool(path, SOURCE_MAP_EMBED, defaults.embed_sources),
                })
            }
        }
    }

    /// Option values to persist for this strategy (besides its name)
    pub fn option_values(&self) -> Vec<(&'static str, String)> {
        match self {
            Strategy::CssCompress => Vec::new(),
            Strategy::JsCompress(opts) => vec![
                (PRESERVE_SEMICOLONS, opts.preserve_semicolons.to_string()),
                (DISABLE_OPTIMIZATIONS, opts.disable_optimizations.to_string()),
            ],
            Strategy::Closure(opts) => vec![
                (OPTIMIZATION, opts.level.as_str().to_string()),
                (SOURCE_MAP, opts.source_map.to_string()),
                (SOURCE_MAP_EMBED, opts.embed_sources.to_string()),
            ],
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::CssCompress => write!(f, "{CSS_COMPRESSOR}"),
            Strategy::JsCompress(opts) => write!(
                f,
                "{YUI_COMPRESSOR} (preserveSemicolons={}, disableOptimizations={})",
                opts.preserve_semicolons, opts.disable_optimizations
            ),
            Strategy::Closure(opts) => write!(
                f,
                "{CLOSURE_COMPILER} (optimization={}, sourceMap={}, embedSources={})",
                opts.level, opts.source_map, opts.embed_sources
            ),
        }
    }
}

/// Normalize a configured strategy name, accepting the historical aliases.
/// Unknown names behave like "none".
pub fn canonical_name(configured: &str) -> &'static str {
    match configured.trim() {
        "css-compressor" | "css" | "YuiCssCompressor" => CSS_COMPRESSOR,
        "yui" | "js-compressor" | "YuiCompressor" => YUI_COMPRESSOR,
        "gcc" | "closure" | "GoogleClosureCompiler" => CLOSURE_COMPILER,
        _ => NONE,
    }
}

/// Map a file extension and configured strategy name to a strategy with
/// default options. None means the file is never built.
pub fn resolve(extension: &str, configured: &str) -> Option<Strategy> {
    let name = canonical_name(configured);
    if name == NONE {
        return None;
    }
    match SourceKind::parse(extension)? {
        SourceKind::Css => Some(Strategy::CssCompress),
        SourceKind::Js => match name {
            YUI_COMPRESSOR => Some(Strategy::JsCompress(YuiOptions::default())),
            CLOSURE_COMPILER => Some(Strategy::Closure(ClosureOptions::default())),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== resolve tests ====================

    #[test]
    fn test_resolve_css_ignores_configured_name() {
        assert_eq!(resolve("css", "css-compressor"), Some(Strategy::CssCompress));
        assert_eq!(resolve("css", "yui"), Some(Strategy::CssCompress));
        assert_eq!(resolve("css", "gcc"), Some(Strategy::CssCompress));
    }

    #[test]
    fn test_resolve_none_never_builds() {
        for ext in ["css", "js", "ts"] {
            assert_eq!(resolve(ext, "none"), None);
            assert_eq!(resolve(ext, "DONT_MINIFY"), None);
            assert_eq!(resolve(ext, ""), None);
        }
    }

    #[test]
    fn test_resolve_js_variants() {
        assert_eq!(
            resolve("js", "yui"),
            Some(Strategy::JsCompress(YuiOptions::default()))
        );
        assert_eq!(
            resolve("js", "YuiCompressor"),
            Some(Strategy::JsCompress(YuiOptions::default()))
        );
        assert_eq!(
            resolve("js", "GoogleClosureCompiler"),
            Some(Strategy::Closure(ClosureOptions::default()))
        );
        assert_eq!(resolve("js", "css-compressor"), None);
    }

    #[test]
    fn test_resolve_unknown_extension() {
        assert_eq!(resolve("ts", "gcc"), None);
        assert_eq!(resolve("html", "css-compressor"), None);
    }

    // ==================== option tests ====================

    #[test]
    fn test_yui_defaults_match_property_page() {
        let opts = YuiOptions::default();
        assert!(opts.preserve_semicolons);
        assert!(opts.disable_optimizations);
    }

    #[test]
    fn test_optimization_level_parse() {
        assert_eq!(
            OptimizationLevel::parse("SIMPLE"),
            Some(OptimizationLevel::Simple)
        );
        assert_eq!(
            OptimizationLevel::parse("whitespace_only"),
            Some(OptimizationLevel::WhitespaceOnly)
        );
        assert_eq!(OptimizationLevel::parse("extreme"), None);
        assert_eq!(OptimizationLevel::default(), OptimizationLevel::WhitespaceOnly);
    }

    #[test]
    fn test_option_values() {
        let closure = Strategy::Closure(ClosureOptions {
            level: OptimizationLevel::Advanced,
            source_map: true,
            embed_sources: false,
        });
        let values = closure.option_values();
        assert!(values.contains(&(OPTIMIZATION, "advanced".to_string())));
        assert!(values.contains(&(SOURCE_MAP, "true".to_string())));
        assert!(Strategy::CssCompress.option_values().is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(Strategy::CssCompress.to_string(), "css-compressor");
        assert!(Strategy::Closure(ClosureOptions::default())
            .to_string()
            .contains("whitespace-only"));
    }
}
