//! Renderer options.
//!
//! Options arrive from the embedding host as JSON (camelCase keys, every
//! field optional) and are validated before the renderer applies them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;

/// Cursor shapes for the focused and unfocused states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorStyle {
    /// Expressed through the color resolver (cell colors swap to cursor colors).
    #[default]
    Block,
    Bar,
    Underline,
    /// Four one-device-pixel edges; the usual inactive style.
    Outline,
    /// No cursor drawn.
    None,
}

/// Renderer options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RendererOptions {
    pub cursor_style: CursorStyle,
    pub cursor_inactive_style: CursorStyle,
    /// Bar cursor width in CSS pixels.
    pub cursor_width: f32,
    pub cursor_blink: bool,
    pub line_height: f32,
    /// Extra horizontal space per cell in CSS pixels (may be negative).
    pub letter_spacing: f32,
    pub rescale_overlapping_glyphs: bool,
    pub font_family: String,
    pub font_size: f32,
    pub font_weight: String,
    pub font_weight_bold: String,
    pub draw_bold_text_in_bright_colors: bool,
    pub minimum_contrast_ratio: f32,
    pub custom_glyphs: bool,
    /// Preferred graphics backend; `WgpuBackend::init_preferred` starts here.
    pub backend: BackendKind,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            cursor_style: CursorStyle::Block,
            cursor_inactive_style: CursorStyle::Outline,
            cursor_width: 1.0,
            cursor_blink: false,
            line_height: 1.0,
            letter_spacing: 0.0,
            rescale_overlapping_glyphs: false,
            font_family: "courier-new, courier, monospace".to_owned(),
            font_size: 15.0,
            font_weight: "normal".to_owned(),
            font_weight_bold: "bold".to_owned(),
            draw_bold_text_in_bright_colors: true,
            minimum_contrast_ratio: 1.0,
            custom_glyphs: true,
            backend: BackendKind::WebGpu,
        }
    }
}

impl RendererOptions {
    /// Parse and validate options from a JSON object.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let options: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Json(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        serde_json::to_string(self).map_err(|e| ConfigError::Json(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if matches!(self.cursor_style, CursorStyle::Outline | CursorStyle::None) {
            return Err(ConfigError::Invalid {
                field: "cursorStyle",
                reason: "must be block, bar or underline",
            });
        }
        if !self.line_height.is_finite() || self.line_height < 1.0 {
            return Err(ConfigError::Invalid {
                field: "lineHeight",
                reason: "must be a finite number >= 1",
            });
        }
        if !self.letter_spacing.is_finite() {
            return Err(ConfigError::Invalid {
                field: "letterSpacing",
                reason: "must be finite",
            });
        }
        if !self.cursor_width.is_finite() || self.cursor_width < 1.0 {
            return Err(ConfigError::Invalid {
                field: "cursorWidth",
                reason: "must be a finite number >= 1",
            });
        }
        if !self.font_size.is_finite() || self.font_size <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "fontSize",
                reason: "must be positive",
            });
        }
        if !self.minimum_contrast_ratio.is_finite() || self.minimum_contrast_ratio < 1.0 {
            return Err(ConfigError::Invalid {
                field: "minimumContrastRatio",
                reason: "must be >= 1",
            });
        }
        Ok(())
    }

    /// Cursor style for the current focus state.
    #[must_use]
    pub fn active_cursor_style(&self, focused: bool) -> CursorStyle {
        if focused {
            self.cursor_style
        } else {
            self.cursor_inactive_style
        }
    }
}

/// Option parsing or validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Malformed JSON or wrong field types.
    Json(String),
    /// A field holds a value the renderer cannot use.
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(msg) => write!(f, "invalid renderer options: {msg}"),
            Self::Invalid { field, reason } => write!(f, "invalid option {field}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let options = RendererOptions::from_json_str("{}").unwrap();
        assert_eq!(options, RendererOptions::default());
    }

    #[test]
    fn camel_case_fields_parse() {
        let options = RendererOptions::from_json_str(
            r#"{"cursorStyle":"bar","cursorInactiveStyle":"none","cursorWidth":2,
                "lineHeight":1.2,"letterSpacing":-1,"rescaleOverlappingGlyphs":true,
                "backend":"webgl2"}"#,
        )
        .unwrap();
        assert_eq!(options.cursor_style, CursorStyle::Bar);
        assert_eq!(options.cursor_inactive_style, CursorStyle::None);
        assert_eq!(options.cursor_width, 2.0);
        assert_eq!(options.line_height, 1.2);
        assert_eq!(options.letter_spacing, -1.0);
        assert!(options.rescale_overlapping_glyphs);
        assert_eq!(options.backend, BackendKind::WebGl2);
        assert_eq!(options.backend.fallback_chain(), &[BackendKind::WebGl2]);
    }

    #[test]
    fn rejects_bad_values() {
        let err = RendererOptions::from_json_str(r#"{"lineHeight":0.5}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "lineHeight", .. }));

        let err = RendererOptions::from_json_str(r#"{"cursorStyle":"outline"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "cursorStyle", .. }));

        let err = RendererOptions::from_json_str(r#"{"cursorStyle":"triangle"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn json_roundtrip() {
        let options = RendererOptions {
            cursor_blink: true,
            letter_spacing: 2.0,
            ..RendererOptions::default()
        };
        let json = options.to_json_string().unwrap();
        assert_eq!(RendererOptions::from_json_str(&json).unwrap(), options);
    }

    #[test]
    fn active_style_follows_focus() {
        let options = RendererOptions::default();
        assert_eq!(options.active_cursor_style(true), CursorStyle::Block);
        assert_eq!(options.active_cursor_style(false), CursorStyle::Outline);
    }
}
