#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

pub trait ColorExt {
    fn from_hex(hex: &str) -> Option<Self>
    where
        Self: Sized;

    fn is_dark(&self) -> bool;
}

impl ColorExt for Rgb {
    fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim().trim_start_matches('#');
        let channel = |s: &str| u8::from_str_radix(s, 16).ok();

        match hex.len() {
            6 => Some(Rgb {
                r: channel(&hex[0..2])?,
                g: channel(&hex[2..4])?,
                b: channel(&hex[4..6])?,
            }),
            3 => {
                let expand = |i: usize| channel(&hex[i..i + 1]).map(|v| v * 17);
                Some(Rgb {
                    r: expand(0)?,
                    g: expand(1)?,
                    b: expand(2)?,
                })
            }
            _ => None,
        }
    }

    /// Perceived brightness below the midpoint (ITU-R 601 weights).
    fn is_dark(&self) -> bool {
        let brightness =
            (self.r as u32 * 299 + self.g as u32 * 587 + self.b as u32 * 114) / 1000;
        brightness < 128
    }
}

/// Text colour to draw on top of an uploader's avatar colour.
pub fn contrasting_text(background: &str) -> &'static str {
    match Rgb::from_hex(background) {
        Some(color) if color.is_dark() => "#ffffff",
        _ => "#121212",
    }
}
