//! Packed cell attribute words.
//!
//! Every stage of the pipeline exchanges colors and SGR flags as three `u32`
//! words per cell (`fg`, `bg`, `ext`). The layout is shared:
//!
//! | bits    | meaning                                              |
//! |---------|------------------------------------------------------|
//! | 0..24   | truecolor RGB, or palette index in bits 0..8         |
//! | 24..26  | color mode (default / 16 / 256 / RGB)                |
//! | 26..32  | flags ([`FgFlags`] in `fg`, [`BgFlags`] in `bg`)      |
//!
//! Cell content codes use bits 0..21 for the codepoint; bit 31 marks a
//! combined (multi-codepoint) cell in the render model.

use bitflags::bitflags;

/// Mask selecting the color mode bits.
pub const CM_MASK: u32 = 0x0300_0000;
/// Terminal default color.
pub const CM_DEFAULT: u32 = 0;
/// 16-color palette.
pub const CM_P16: u32 = 0x0100_0000;
/// 256-color palette.
pub const CM_P256: u32 = 0x0200_0000;
/// 24-bit truecolor.
pub const CM_RGB: u32 = 0x0300_0000;

/// Truecolor payload.
pub const RGB_MASK: u32 = 0x00FF_FFFF;
/// Palette index payload.
pub const PCOLOR_MASK: u32 = 0xFF;

/// Codepoint bits of a content word.
pub const CODEPOINT_MASK: u32 = 0x001F_FFFF;
/// Code stored for empty cells.
pub const NULL_CELL_CODE: u32 = 0;
/// Marks combined characters in the render model so they are looked up by
/// their full character string.
pub const COMBINED_CHAR_BIT: u32 = 0x8000_0000;

bitflags! {
    /// Flags carried in the upper bits of the foreground word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FgFlags: u32 {
        const INVERSE       = 0x0400_0000;
        const BOLD          = 0x0800_0000;
        const UNDERLINE     = 0x1000_0000;
        const BLINK         = 0x2000_0000;
        const INVISIBLE     = 0x4000_0000;
        const STRIKETHROUGH = 0x8000_0000;
    }
}

bitflags! {
    /// Flags carried in the upper bits of the background word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BgFlags: u32 {
        const ITALIC       = 0x0400_0000;
        const DIM          = 0x0800_0000;
        /// `ext` word is meaningful for this cell.
        const HAS_EXTENDED = 0x1000_0000;
        const PROTECTED    = 0x2000_0000;
        const OVERLINE     = 0x4000_0000;
    }
}

/// Decoded color mode of an attribute word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorMode {
    Default,
    Palette16,
    Palette256,
    Rgb,
}

impl ColorMode {
    #[must_use]
    pub const fn of(word: u32) -> Self {
        match word & CM_MASK {
            CM_P16 => Self::Palette16,
            CM_P256 => Self::Palette256,
            CM_RGB => Self::Rgb,
            _ => Self::Default,
        }
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Default => CM_DEFAULT,
            Self::Palette16 => CM_P16,
            Self::Palette256 => CM_P256,
            Self::Rgb => CM_RGB,
        }
    }
}

/// Logical color of a cell side.
///
/// Mirrors the default → 16 named → 256 indexed → 24-bit hierarchy used by
/// the terminal core; [`Color::encode`] produces the packed color bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Color {
    #[default]
    Default,
    /// Named color index (0-15).
    Named(u8),
    /// 256-color palette index.
    Indexed(u8),
    Rgb(u8, u8, u8),
}

impl Color {
    /// Color-mode and payload bits (no flags).
    #[must_use]
    pub const fn encode(self) -> u32 {
        match self {
            Self::Default => CM_DEFAULT,
            Self::Named(idx) => CM_P16 | (idx as u32 & 0x0F),
            Self::Indexed(idx) => CM_P256 | idx as u32,
            Self::Rgb(r, g, b) => CM_RGB | ((r as u32) << 16) | ((g as u32) << 8) | b as u32,
        }
    }

    #[must_use]
    pub const fn decode(word: u32) -> Self {
        match ColorMode::of(word) {
            ColorMode::Default => Self::Default,
            ColorMode::Palette16 => Self::Named((word & PCOLOR_MASK) as u8),
            ColorMode::Palette256 => Self::Indexed((word & PCOLOR_MASK) as u8),
            ColorMode::Rgb => Self::Rgb(
                ((word >> 16) & 0xFF) as u8,
                ((word >> 8) & 0xFF) as u8,
                (word & 0xFF) as u8,
            ),
        }
    }
}

/// Pack a foreground word.
#[must_use]
pub const fn fg_word(color: Color, flags: FgFlags) -> u32 {
    color.encode() | flags.bits()
}

/// Pack a background word.
#[must_use]
pub const fn bg_word(color: Color, flags: BgFlags) -> u32 {
    color.encode() | flags.bits()
}

#[must_use]
pub const fn is_inverse(fg: u32) -> bool {
    fg & FgFlags::INVERSE.bits() != 0
}

/// Color mode and payload of a word, flags stripped.
#[must_use]
pub const fn color_bits(word: u32) -> u32 {
    word & (CM_MASK | RGB_MASK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_encode_decode() {
        for color in [
            Color::Default,
            Color::Named(9),
            Color::Indexed(201),
            Color::Rgb(0x12, 0x34, 0x56),
        ] {
            assert_eq!(Color::decode(color.encode()), color);
        }
    }

    #[test]
    fn flags_do_not_overlap_color_bits() {
        assert_eq!(FgFlags::all().bits() & (CM_MASK | RGB_MASK), 0);
        assert_eq!(BgFlags::all().bits() & (CM_MASK | RGB_MASK), 0);
    }

    #[test]
    fn fg_word_keeps_flags_and_mode() {
        let word = fg_word(Color::Rgb(1, 2, 3), FgFlags::INVERSE | FgFlags::BOLD);
        assert!(is_inverse(word));
        assert_eq!(ColorMode::of(word), ColorMode::Rgb);
        assert_eq!(color_bits(word), CM_RGB | 0x01_02_03);
    }

    #[test]
    fn named_color_is_masked_to_sixteen() {
        assert_eq!(Color::Named(0x1F).encode(), CM_P16 | 0x0F);
    }
}
