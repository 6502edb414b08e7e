//! Colour palette: 256 indexed colours plus default foreground/background.
//!
//! Indices 0..=15 are the ANSI system colours and come from a named scheme;
//! 16..=231 form the 6x6x6 colour cube and 232..=255 the greyscale ramp,
//! both generated the same way every xterm-compatible terminal does.

use crate::cell::Color;

/// An RGB triple.
pub type Rgb = [u8; 3];

/// The resolved colour palette.
#[derive(Clone)]
pub struct Palette {
    /// 256 indexed colours (16 system + 216 cube + 24 greyscale).
    pub colors: [Rgb; 256],
    /// Default foreground colour.
    pub default_fg: Rgb,
    /// Default background colour.
    pub default_bg: Rgb,
    /// Custom cursor fill colour, when the scheme defines one.
    pub cursor_fill: Option<Rgb>,
}

const SCHEME_LINUX: [Rgb; 16] = [
    [0x00, 0x00, 0x00],
    [0xA8, 0x00, 0x00],
    [0x00, 0xA8, 0x00],
    [0xA8, 0x57, 0x00],
    [0x00, 0x00, 0xA8],
    [0xA8, 0x00, 0xA8],
    [0x00, 0xA8, 0xA8],
    [0xA8, 0xA8, 0xA8],
    [0x57, 0x57, 0x57],
    [0xFF, 0x57, 0x57],
    [0x57, 0xFF, 0x57],
    [0xFF, 0xFF, 0x57],
    [0x57, 0x57, 0xFF],
    [0xFF, 0x57, 0xFF],
    [0x57, 0xFF, 0xFF],
    [0xFF, 0xFF, 0xFF],
];

const SCHEME_RXVT: [Rgb; 16] = [
    [0x00, 0x00, 0x00],
    [0xCD, 0x00, 0x00],
    [0x00, 0xCD, 0x00],
    [0xCD, 0xCD, 0x00],
    [0x00, 0x00, 0xCD],
    [0xCD, 0x00, 0xCD],
    [0x00, 0xCD, 0xCD],
    [0xFA, 0xEB, 0xD7],
    [0x40, 0x40, 0x40],
    [0xFF, 0x00, 0x00],
    [0x00, 0xFF, 0x00],
    [0xFF, 0xFF, 0x00],
    [0x00, 0x00, 0xFF],
    [0xFF, 0x00, 0xFF],
    [0x00, 0xFF, 0xFF],
    [0xFF, 0xFF, 0xFF],
];

const SCHEME_TANGO: [Rgb; 16] = [
    [0x2E, 0x34, 0x36],
    [0xCC, 0x00, 0x00],
    [0x4E, 0x9A, 0x06],
    [0xC4, 0xA0, 0x00],
    [0x34, 0x65, 0xA4],
    [0x75, 0x50, 0x7B],
    [0x06, 0x98, 0x9A],
    [0xD3, 0xD7, 0xCF],
    [0x55, 0x57, 0x53],
    [0xEF, 0x29, 0x29],
    [0x8A, 0xE2, 0x34],
    [0xFC, 0xE9, 0x4F],
    [0x72, 0x9F, 0xCF],
    [0xAD, 0x7F, 0xA8],
    [0x34, 0xE2, 0xE2],
    [0xEE, 0xEE, 0xEC],
];

const SCHEME_XTERM: [Rgb; 16] = [
    [0x00, 0x00, 0x00],
    [0xCD, 0x00, 0x00],
    [0x00, 0xCD, 0x00],
    [0xCD, 0xCD, 0x00],
    [0x00, 0x00, 0xEE],
    [0xCD, 0x00, 0xCD],
    [0x00, 0xCD, 0xCD],
    [0xE5, 0xE5, 0xE5],
    [0x7F, 0x7F, 0x7F],
    [0xFF, 0x00, 0x00],
    [0x00, 0xFF, 0x00],
    [0xFF, 0xFF, 0x00],
    [0x5C, 0x5C, 0xFF],
    [0xFF, 0x00, 0xFF],
    [0x00, 0xFF, 0xFF],
    [0xFF, 0xFF, 0xFF],
];

const SCHEME_ZENBURN_DARK: [Rgb; 16] = [
    [0x00, 0x00, 0x00],
    [0x9E, 0x18, 0x28],
    [0xAE, 0xCE, 0x92],
    [0x96, 0x8A, 0x38],
    [0x41, 0x41, 0x71],
    [0x96, 0x3C, 0x59],
    [0x41, 0x81, 0x79],
    [0xBE, 0xBE, 0xBE],
    [0x66, 0x66, 0x66],
    [0xCF, 0x61, 0x71],
    [0xC5, 0xF7, 0x79],
    [0xFF, 0xF7, 0x96],
    [0x41, 0x86, 0xBE],
    [0xCF, 0x9E, 0xBE],
    [0x71, 0xBE, 0xBE],
    [0xFF, 0xFF, 0xFF],
];

const SCHEME_ZENBURN: [Rgb; 16] = [
    [0x3F, 0x3F, 0x3F],
    [0x70, 0x50, 0x50],
    [0x60, 0xB4, 0x8A],
    [0xDF, 0xAF, 0x8F],
    [0x50, 0x60, 0x70],
    [0xDC, 0x8C, 0xC3],
    [0x8C, 0xD0, 0xD3],
    [0xDC, 0xDC, 0xCC],
    [0x70, 0x90, 0x80],
    [0xDC, 0xA3, 0xA3],
    [0xC3, 0xBF, 0x9F],
    [0xF0, 0xDF, 0xAF],
    [0x94, 0xBF, 0xF3],
    [0xEC, 0x93, 0xD3],
    [0x93, 0xE0, 0xE3],
    [0xFF, 0xFF, 0xFF],
];

const SCHEME_SOLARIZED_DARK: [Rgb; 16] = [
    [0x07, 0x36, 0x42],
    [0xDC, 0x32, 0x2F],
    [0x85, 0x99, 0x00],
    [0xB5, 0x89, 0x00],
    [0x26, 0x8B, 0xD2],
    [0xD3, 0x36, 0x82],
    [0x2A, 0xA1, 0x98],
    [0xEE, 0xE8, 0xD5],
    [0x00, 0x2B, 0x36],
    [0xCB, 0x4B, 0x16],
    [0x58, 0x6E, 0x75],
    [0x65, 0x7B, 0x83],
    [0x83, 0x94, 0x96],
    [0x6C, 0x71, 0xC4],
    [0x93, 0xA1, 0xA1],
    [0xFD, 0xF6, 0xE3],
];

const SCHEME_SOLARIZED_LIGHT: [Rgb; 16] = [
    [0xEE, 0xE8, 0xD5],
    [0xDC, 0x32, 0x2F],
    [0x85, 0x99, 0x00],
    [0xB5, 0x89, 0x00],
    [0x26, 0x8B, 0xD2],
    [0xD3, 0x36, 0x82],
    [0x2A, 0xA1, 0x98],
    [0x07, 0x36, 0x42],
    [0xFD, 0xF6, 0xE3],
    [0xCB, 0x4B, 0x16],
    [0x93, 0xA1, 0xA1],
    [0x83, 0x94, 0x96],
    [0x65, 0x7B, 0x83],
    [0x6C, 0x71, 0xC4],
    [0x58, 0x6E, 0x75],
    [0x00, 0x2B, 0x36],
];

impl Palette {
    /// Builds a palette from a named scheme. Unknown names fall back to
    /// `linux` with a warning.
    pub fn from_scheme(name: &str) -> Self {
        let (system, solarized) = match name {
            "linux" => (&SCHEME_LINUX, false),
            "rxvt" => (&SCHEME_RXVT, false),
            "tango" => (&SCHEME_TANGO, false),
            "xterm" => (&SCHEME_XTERM, false),
            "zenburn" => (&SCHEME_ZENBURN, false),
            "zenburn-dark" => (&SCHEME_ZENBURN_DARK, false),
            "solarized-dark" => (&SCHEME_SOLARIZED_DARK, true),
            "solarized-light" => (&SCHEME_SOLARIZED_LIGHT, true),
            other => {
                log::warn!("unknown color scheme {:?}, using linux", other);
                (&SCHEME_LINUX, false)
            }
        };

        let mut colors = [[0u8; 3]; 256];
        colors[..16].copy_from_slice(system);

        // 216-entry colour cube.
        for r in 0..6 {
            for g in 0..6 {
                for b in 0..6 {
                    let idx = 16 + r * 36 + g * 6 + b;
                    let level = |c: usize| if c == 0 { 0 } else { (55 + c * 40) as u8 };
                    colors[idx] = [level(r), level(g), level(b)];
                }
            }
        }

        // 24-entry greyscale ramp.
        for i in 0..24 {
            let gray = (8 + i * 10) as u8;
            colors[232 + i] = [gray, gray, gray];
        }

        // The solarized schemes keep their base tones in the "bright" slots
        // and use a dedicated cursor fill.
        let (default_fg, default_bg, cursor_fill) = if solarized {
            (system[12], system[8], Some(system[14]))
        } else {
            (system[7], system[0], None)
        };

        Self {
            colors,
            default_fg,
            default_bg,
            cursor_fill,
        }
    }

    /// Resolves a cell colour used as foreground.
    #[inline]
    pub fn resolve_fg(&self, color: Color) -> Rgb {
        match color {
            Color::DefaultFg => self.default_fg,
            Color::DefaultBg => self.default_bg,
            Color::Indexed(i) => self.colors[i as usize],
            Color::Rgb(r, g, b) => [r, g, b],
        }
    }

    /// Resolves a cell colour used as background.
    #[inline]
    pub fn resolve_bg(&self, color: Color) -> Rgb {
        match color {
            Color::DefaultFg => self.default_fg,
            Color::DefaultBg => self.default_bg,
            Color::Indexed(i) => self.colors[i as usize],
            Color::Rgb(r, g, b) => [r, g, b],
        }
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::from_scheme("linux")
    }
}
