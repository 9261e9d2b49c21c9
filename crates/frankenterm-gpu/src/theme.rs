//! Theme colors consumed by the resolver and batchers.

use serde::{Deserialize, Serialize};

use crate::attrs::RGB_MASK;

/// Packed `0xRRGGBBAA` color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rgba(pub u32);

impl Rgba {
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self(((r as u32) << 24) | ((g as u32) << 16) | ((b as u32) << 8) | a as u32)
    }

    #[must_use]
    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 0xFF)
    }

    /// Build from a `0xRRGGBB` value with full alpha.
    #[must_use]
    pub const fn from_rgb(rgb: u32) -> Self {
        Self(((rgb & RGB_MASK) << 8) | 0xFF)
    }

    /// The 24-bit RGB payload as stored in attribute words.
    #[must_use]
    pub const fn rgb(self) -> u32 {
        (self.0 >> 8) & RGB_MASK
    }

    /// Normalized `[r, g, b, a]` floats.
    #[must_use]
    pub fn to_f32(self) -> [f32; 4] {
        [
            ((self.0 >> 24) & 0xFF) as f32 / 255.0,
            ((self.0 >> 16) & 0xFF) as f32 / 255.0,
            ((self.0 >> 8) & 0xFF) as f32 / 255.0,
            (self.0 & 0xFF) as f32 / 255.0,
        ]
    }
}

/// Number of palette entries.
pub const ANSI_COLORS: usize = 256;

/// Resolved theme colors.
///
/// Selection colors are the opaque (pre-blended) variants so the background
/// pass can paint them as ordinary truecolor spans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ColorSet {
    pub foreground: Rgba,
    pub background: Rgba,
    pub cursor: Rgba,
    pub cursor_accent: Rgba,
    pub selection_background_opaque: Rgba,
    pub selection_inactive_background_opaque: Rgba,
    pub selection_foreground: Option<Rgba>,
    pub ansi: Vec<Rgba>,
}

impl ColorSet {
    /// Palette lookup; out-of-range indices (short custom palettes) fall back
    /// to the default palette entry.
    #[must_use]
    pub fn ansi(&self, index: u32) -> Rgba {
        let index = index as usize;
        self.ansi
            .get(index)
            .copied()
            .unwrap_or_else(|| default_ansi_color(index))
    }
}

impl Default for ColorSet {
    fn default() -> Self {
        Self {
            foreground: Rgba::opaque(0xFF, 0xFF, 0xFF),
            background: Rgba::opaque(0x00, 0x00, 0x00),
            cursor: Rgba::opaque(0xFF, 0xFF, 0xFF),
            cursor_accent: Rgba::opaque(0x00, 0x00, 0x00),
            selection_background_opaque: Rgba::opaque(0x4D, 0x4D, 0x4D),
            selection_inactive_background_opaque: Rgba::opaque(0x3A, 0x3A, 0x3A),
            selection_foreground: None,
            ansi: default_ansi_palette(),
        }
    }
}

const BASE_ANSI: [u32; 16] = [
    0x2E3436, 0xCC0000, 0x4E9A06, 0xC4A000, 0x3465A4, 0x75507B, 0x06989A, 0xD3D7CF, 0x555753,
    0xEF2929, 0x8AE234, 0xFCE94F, 0x729FCF, 0xAD7FA8, 0x34E2E2, 0xEEEEEC,
];

const CUBE_STEPS: [u32; 6] = [0x00, 0x5F, 0x87, 0xAF, 0xD7, 0xFF];

/// Entry `index` of the xterm 256-color palette.
#[must_use]
pub fn default_ansi_color(index: usize) -> Rgba {
    match index {
        0..=15 => Rgba::from_rgb(BASE_ANSI[index]),
        16..=231 => {
            let i = index - 16;
            let r = CUBE_STEPS[(i / 36) % 6];
            let g = CUBE_STEPS[(i / 6) % 6];
            let b = CUBE_STEPS[i % 6];
            Rgba::from_rgb((r << 16) | (g << 8) | b)
        }
        232..=255 => {
            let v = 8 + (index as u32 - 232) * 10;
            Rgba::from_rgb((v << 16) | (v << 8) | v)
        }
        _ => Rgba::from_rgb(0),
    }
}

#[must_use]
pub fn default_ansi_palette() -> Vec<Rgba> {
    (0..ANSI_COLORS).map(default_ansi_color).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba_channels() {
        let c = Rgba::new(0x11, 0x22, 0x33, 0x44);
        assert_eq!(c.0, 0x1122_3344);
        assert_eq!(c.rgb(), 0x11_2233);
        assert_eq!(Rgba::from_rgb(0x11_2233), Rgba::new(0x11, 0x22, 0x33, 0xFF));
        let f = Rgba::opaque(255, 0, 51).to_f32();
        assert_eq!(f, [1.0, 0.0, 0.2, 1.0]);
    }

    #[test]
    fn palette_matches_xterm_cube_and_ramp() {
        let palette = default_ansi_palette();
        assert_eq!(palette.len(), ANSI_COLORS);
        assert_eq!(palette[1], Rgba::from_rgb(0xCC0000));
        assert_eq!(palette[16], Rgba::from_rgb(0x000000));
        assert_eq!(palette[196], Rgba::from_rgb(0xFF0000));
        assert_eq!(palette[231], Rgba::from_rgb(0xFFFFFF));
        assert_eq!(palette[232], Rgba::from_rgb(0x080808));
        assert_eq!(palette[255], Rgba::from_rgb(0xEEEEEE));
    }

    #[test]
    fn short_palette_falls_back() {
        let theme = ColorSet {
            ansi: vec![Rgba::from_rgb(0x123456)],
            ..ColorSet::default()
        };
        assert_eq!(theme.ansi(0), Rgba::from_rgb(0x123456));
        assert_eq!(theme.ansi(1), default_ansi_color(1));
    }

    #[test]
    fn color_set_json_roundtrip() {
        let theme = ColorSet::default();
        let json = serde_json::to_string(&theme).unwrap();
        let back: ColorSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, theme);
    }
}
