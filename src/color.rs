//! Color parsing, HSL adjustment and compact serialization

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static FUNCTION_COLOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(rgba?|hsla?)\(\s*([^()]*)\)$").unwrap()
});

/// CSS named colors and their hex values
pub const KEYWORDS: &[(&str, &str)] = &[
    ("aliceblue", "#f0f8ff"),
    ("antiquewhite", "#faebd7"),
    ("aqua", "#00ffff"),
    ("aquamarine", "#7fffd4"),
    ("azure", "#f0ffff"),
    ("beige", "#f5f5dc"),
    ("bisque", "#ffe4c4"),
    ("black", "#000000"),
    ("blanchedalmond", "#ffebcd"),
    ("blue", "#0000ff"),
    ("blueviolet", "#8a2be2"),
    ("brown", "#a52a2a"),
    ("burlywood", "#deb887"),
    ("cadetblue", "#5f9ea0"),
    ("chartreuse", "#7fff00"),
    ("chocolate", "#d2691e"),
    ("coral", "#ff7f50"),
    ("cornflowerblue", "#6495ed"),
    ("cornsilk", "#fff8dc"),
    ("crimson", "#dc143c"),
    ("cyan", "#00ffff"),
    ("darkblue", "#00008b"),
    ("darkcyan", "#008b8b"),
    ("darkgoldenrod", "#b8860b"),
    ("darkgray", "#a9a9a9"),
    ("darkgreen", "#006400"),
    ("darkgrey", "#a9a9a9"),
    ("darkkhaki", "#bdb76b"),
    ("darkmagenta", "#8b008b"),
    ("darkolivegreen", "#556b2f"),
    ("darkorange", "#ff8c00"),
    ("darkorchid", "#9932cc"),
    ("darkred", "#8b0000"),
    ("darksalmon", "#e9967a"),
    ("darkseagreen", "#8fbc8f"),
    ("darkslateblue", "#483d8b"),
    ("darkslategray", "#2f4f4f"),
    ("darkslategrey", "#2f4f4f"),
    ("darkturquoise", "#00ced1"),
    ("darkviolet", "#9400d3"),
    ("deeppink", "#ff1493"),
    ("deepskyblue", "#00bfff"),
    ("dimgray", "#696969"),
    ("dimgrey", "#696969"),
    ("dodgerblue", "#1e90ff"),
    ("firebrick", "#b22222"),
    ("floralwhite", "#fffaf0"),
    ("forestgreen", "#228b22"),
    ("fuchsia", "#ff00ff"),
    ("gainsboro", "#dcdcdc"),
    ("ghostwhite", "#f8f8ff"),
    ("gold", "#ffd700"),
    ("goldenrod", "#daa520"),
    ("gray", "#808080"),
    ("green", "#008000"),
    ("greenyellow", "#adff2f"),
    ("grey", "#808080"),
    ("honeydew", "#f0fff0"),
    ("hotpink", "#ff69b4"),
    ("indianred", "#cd5c5c"),
    ("indigo", "#4b0082"),
    ("ivory", "#fffff0"),
    ("khaki", "#f0e68c"),
    ("lavender", "#e6e6fa"),
    ("lavenderblush", "#fff0f5"),
    ("lawngreen", "#7cfc00"),
    ("lemonchiffon", "#fffacd"),
    ("lightblue", "#add8e6"),
    ("lightcoral", "#f08080"),
    ("lightcyan", "#e0ffff"),
    ("lightgoldenrodyellow", "#fafad2"),
    ("lightgray", "#d3d3d3"),
    ("lightgreen", "#90ee90"),
    ("lightgrey", "#d3d3d3"),
    ("lightpink", "#ffb6c1"),
    ("lightsalmon", "#ffa07a"),
    ("lightseagreen", "#20b2aa"),
    ("lightskyblue", "#87cefa"),
    ("lightslategray", "#778899"),
    ("lightslategrey", "#778899"),
    ("lightsteelblue", "#b0c4de"),
    ("lightyellow", "#ffffe0"),
    ("lime", "#00ff00"),
    ("limegreen", "#32cd32"),
    ("linen", "#faf0e6"),
    ("magenta", "#ff00ff"),
    ("maroon", "#800000"),
    ("mediumaquamarine", "#66cdaa"),
    ("mediumblue", "#0000cd"),
    ("mediumorchid", "#ba55d3"),
    ("mediumpurple", "#9370db"),
    ("mediumseagreen", "#3cb371"),
    ("mediumslateblue", "#7b68ee"),
    ("mediumspringgreen", "#00fa9a"),
    ("mediumturquoise", "#48d1cc"),
    ("mediumvioletred", "#c71585"),
    ("midnightblue", "#191970"),
    ("mintcream", "#f5fffa"),
    ("mistyrose", "#ffe4e1"),
    ("moccasin", "#ffe4b5"),
    ("navajowhite", "#ffdead"),
    ("navy", "#000080"),
    ("oldlace", "#fdf5e6"),
    ("olive", "#808000"),
    ("olivedrab", "#6b8e23"),
    ("orange", "#ffa500"),
    ("orangered", "#ff4500"),
    ("orchid", "#da70d6"),
    ("palegoldenrod", "#eee8aa"),
    ("palegreen", "#98fb98"),
    ("paleturquoise", "#afeeee"),
    ("palevioletred", "#db7093"),
    ("papayawhip", "#ffefd5"),
    ("peachpuff", "#ffdab9"),
    ("peru", "#cd853f"),
    ("pink", "#ffc0cb"),
    ("plum", "#dda0dd"),
    ("powderblue", "#b0e0e6"),
    ("purple", "#800080"),
    ("rebeccapurple", "#663399"),
    ("red", "#ff0000"),
    ("rosybrown", "#bc8f8f"),
    ("royalblue", "#4169e1"),
    ("saddlebrown", "#8b4513"),
    ("salmon", "#fa8072"),
    ("sandybrown", "#f4a460"),
    ("seagreen", "#2e8b57"),
    ("seashell", "#fff5ee"),
    ("sienna", "#a0522d"),
    ("silver", "#c0c0c0"),
    ("skyblue", "#87ceeb"),
    ("slateblue", "#6a5acd"),
    ("slategray", "#708090"),
    ("slategrey", "#708090"),
    ("snow", "#fffafa"),
    ("springgreen", "#00ff7f"),
    ("steelblue", "#4682b4"),
    ("tan", "#d2b48c"),
    ("teal", "#008080"),
    ("thistle", "#d8bfd8"),
    ("tomato", "#ff6347"),
    ("turquoise", "#40e0d0"),
    ("violet", "#ee82ee"),
    ("wheat", "#f5deb3"),
    ("white", "#ffffff"),
    ("whitesmoke", "#f5f5f5"),
    ("yellow", "#ffff00"),
    ("yellowgreen", "#9acd32"),
];

static KEYWORD_MAP: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| KEYWORDS.iter().copied().collect());

/// Shortest keyword for each 6-digit hex value, where a keyword is shortest
static HEX_TO_KEYWORD: Lazy<HashMap<String, &'static str>> = Lazy::new(|| {
    let mut map: HashMap<String, &'static str> = HashMap::new();
    for &(name, hex) in KEYWORDS {
        let entry = map.entry(hex.to_string()).or_insert(name);
        if name.len() < entry.len() {
            *entry = name;
        }
    }
    map
});

pub fn keyword_hex(name: &str) -> Option<&'static str> {
    KEYWORD_MAP.get(name.to_ascii_lowercase().as_str()).copied()
}

/// An sRGB color with alpha; channels 0-255, alpha 0-1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

/// Hue in degrees, saturation and lightness in percent, alpha 0-1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsl {
    pub h: f64,
    pub s: f64,
    pub l: f64,
    pub a: f64,
}

impl Color {
    pub fn rgb(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    /// Parse a hex, keyword, `rgb[a]()` or `hsl[a]()` color
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(hex) = text.strip_prefix('#') {
            return Self::from_hex(hex);
        }
        if text.eq_ignore_ascii_case("transparent") {
            return Some(Self {
                r: 0.0,
                g: 0.0,
                b: 0.0,
                a: 0.0,
            });
        }
        if let Some(hex) = keyword_hex(text) {
            return Self::from_hex(&hex[1..]);
        }
        let caps = FUNCTION_COLOR_RE.captures(text)?;
        let kind = caps[1].to_ascii_lowercase();
        let parts: Vec<&str> = caps[2]
            .split(|c: char| c == ',' || c == '/' || c.is_whitespace())
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() < 3 {
            return None;
        }
        let alpha = match parts.get(3) {
            Some(a) => parse_alpha(a)?,
            None => 1.0,
        };
        if kind.starts_with("rgb") {
            Some(Self {
                r: parse_channel(parts[0])?,
                g: parse_channel(parts[1])?,
                b: parse_channel(parts[2])?,
                a: alpha,
            })
        } else {
            let hsl = Hsl {
                h: parts[0].trim_end_matches("deg").parse().ok()?,
                s: parts[1].trim_end_matches('%').parse().ok()?,
                l: parts[2].trim_end_matches('%').parse().ok()?,
                a: alpha,
            };
            Some(Self::from_hsl(hsl))
        }
    }

    fn from_hex(hex: &str) -> Option<Self> {
        let expanded: String = match hex.len() {
            3 | 4 => hex.chars().flat_map(|c| [c, c]).collect(),
            6 | 8 => hex.to_string(),
            _ => return None,
        };
        let bytes = hex::decode(&expanded).ok()?;
        Some(Self {
            r: bytes[0] as f64,
            g: bytes[1] as f64,
            b: bytes[2] as f64,
            a: bytes.get(3).map(|&a| a as f64 / 255.0).unwrap_or(1.0),
        })
    }

    pub fn to_hsl(&self) -> Hsl {
        let r = self.r / 255.0;
        let g = self.g / 255.0;
        let b = self.b / 255.0;
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let l = (max + min) / 2.0;
        let delta = max - min;

        if delta == 0.0 {
            return Hsl {
                h: 0.0,
                s: 0.0,
                l: l * 100.0,
                a: self.a,
            };
        }

        let s = if l > 0.5 {
            delta / (2.0 - max - min)
        } else {
            delta / (max + min)
        };
        let h = if max == r {
            (g - b) / delta + if g < b { 6.0 } else { 0.0 }
        } else if max == g {
            (b - r) / delta + 2.0
        } else {
            (r - g) / delta + 4.0
        };

        Hsl {
            h: h * 60.0,
            s: s * 100.0,
            l: l * 100.0,
            a: self.a,
        }
    }

    pub fn from_hsl(hsl: Hsl) -> Self {
        let h = hsl.h.rem_euclid(360.0) / 360.0;
        let s = (hsl.s / 100.0).clamp(0.0, 1.0);
        let l = (hsl.l / 100.0).clamp(0.0, 1.0);
        let a = hsl.a.clamp(0.0, 1.0);

        if s == 0.0 {
            let v = l * 255.0;
            return Self { r: v, g: v, b: v, a };
        }

        let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
        let p = 2.0 * l - q;
        Self {
            r: hue_to_rgb(p, q, h + 1.0 / 3.0) * 255.0,
            g: hue_to_rgb(p, q, h) * 255.0,
            b: hue_to_rgb(p, q, h - 1.0 / 3.0) * 255.0,
            a,
        }
    }

    /// Shift hue (degrees), saturation, lightness (percentage points) and alpha
    pub fn adjust(&self, dh: f64, ds: f64, dl: f64, da: f64) -> Self {
        let mut hsl = self.to_hsl();
        hsl.h += dh;
        hsl.s = (hsl.s + ds).clamp(0.0, 100.0);
        hsl.l = (hsl.l + dl).clamp(0.0, 100.0);
        hsl.a = (hsl.a + da).clamp(0.0, 1.0);
        Self::from_hsl(hsl)
    }

    fn channels(&self) -> [u8; 3] {
        [
            self.r.round().clamp(0.0, 255.0) as u8,
            self.g.round().clamp(0.0, 255.0) as u8,
            self.b.round().clamp(0.0, 255.0) as u8,
        ]
    }

    /// Six-digit lowercase hex, ignoring alpha
    pub fn to_hex(&self) -> String {
        format!("#{}", hex::encode(self.channels()))
    }

    /// Hex when opaque, `rgba()` otherwise
    pub fn to_css(&self) -> String {
        if self.a >= 1.0 {
            self.to_hex()
        } else {
            let [r, g, b] = self.channels();
            let alpha = (self.a * 1000.0).round() / 1000.0;
            format!("rgba({},{},{},{})", r, g, b, alpha)
        }
    }
}

fn hue_to_rgb(p: f64, q: f64, mut t: f64) -> f64 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

fn parse_channel(text: &str) -> Option<f64> {
    match text.strip_suffix('%') {
        Some(pct) => pct.parse::<f64>().ok().map(|v| (v * 2.55).clamp(0.0, 255.0)),
        None => text.parse::<f64>().ok().map(|v| v.clamp(0.0, 255.0)),
    }
}

fn parse_alpha(text: &str) -> Option<f64> {
    match text.strip_suffix('%') {
        Some(pct) => pct.parse::<f64>().ok().map(|v| v / 100.0),
        None => text.parse::<f64>().ok(),
    }
}

/// Compress `#aabbcc` to `#abc` when lossless; lowercases the result
pub fn compress_hex(hex: &str) -> String {
    let lower = hex.to_ascii_lowercase();
    let digits = lower.trim_start_matches('#').as_bytes();
    if digits.len() == 6 && digits[0] == digits[1] && digits[2] == digits[3] && digits[4] == digits[5]
    {
        format!(
            "#{}{}{}",
            digits[0] as char, digits[2] as char, digits[4] as char
        )
    } else {
        lower
    }
}

/// Shortest textual form of an opaque color: keyword or (short) hex
pub fn shortest(color: &Color) -> String {
    let hex = color.to_hex();
    let short = compress_hex(&hex);
    match HEX_TO_KEYWORD.get(&hex) {
        Some(keyword) if keyword.len() < short.len() => keyword.to_string(),
        _ => short,
    }
}
