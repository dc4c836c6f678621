//! Fixed reference palettes and the quality levels that select them

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub type Rgb = [u8; 3];

/// Plan 9 palette: 256 colors, a 4x4x4 RGB cube refined by 4 value steps.
static PLAN9: Lazy<Vec<Rgb>> = Lazy::new(plan9);

/// Web-safe palette: the 6x6x6 RGB cube.
static WEB_SAFE: Lazy<Vec<Rgb>> = Lazy::new(web_safe);

fn plan9() -> Vec<Rgb> {
    let mut colors = vec![[0u8; 3]; 256];
    let mut i = 0i32;
    for r in 0..4i32 {
        for v in 0..4i32 {
            let mut j = v - r;
            for g in 0..4i32 {
                for b in 0..4i32 {
                    let den = r.max(g).max(b);
                    let color = if den == 0 {
                        let gray = (0x11 * v) as u8;
                        [gray, gray, gray]
                    } else {
                        let num = 17 * (4 * den + v);
                        [
                            (r * num / den) as u8,
                            (g * num / den) as u8,
                            (b * num / den) as u8,
                        ]
                    };
                    colors[(i + (j & 0x0f)) as usize] = color;
                    j += 1;
                }
            }
            i += 16;
        }
    }
    colors
}

fn web_safe() -> Vec<Rgb> {
    let mut colors = Vec::with_capacity(216);
    for r in 0..6u8 {
        for g in 0..6u8 {
            for b in 0..6u8 {
                colors.push([0x33 * r, 0x33 * g, 0x33 * b]);
            }
        }
    }
    colors
}

/// A borrowed, non-empty color table of at most 256 entries.
#[derive(Debug, Clone, Copy)]
pub struct Palette<'a> {
    colors: &'a [Rgb],
}

impl<'a> Palette<'a> {
    pub const MAX_COLORS: usize = 256;

    pub fn new(colors: &'a [Rgb]) -> Option<Self> {
        if colors.is_empty() || colors.len() > Self::MAX_COLORS {
            return None;
        }
        Some(Self { colors })
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn colors(&self) -> &'a [Rgb] {
        self.colors
    }

    /// Index of the entry closest to `rgb` by squared Euclidean distance.
    /// Ties go to the lowest index.
    pub fn nearest(&self, rgb: [i32; 3]) -> u8 {
        let mut best = 0usize;
        let mut best_dist = i32::MAX;
        for (idx, color) in self.colors.iter().enumerate() {
            let dr = rgb[0] - i32::from(color[0]);
            let dg = rgb[1] - i32::from(color[1]);
            let db = rgb[2] - i32::from(color[2]);
            let dist = dr * dr + dg * dg + db * db;
            if dist < best_dist {
                best = idx;
                best_dist = dist;
                if dist == 0 {
                    break;
                }
            }
        }
        best as u8
    }

    /// Flat `r,g,b,r,g,b..` table as stored in a GIF color table.
    pub fn to_rgb_bytes(&self) -> Vec<u8> {
        self.colors.iter().flatten().copied().collect()
    }
}

/// Size/fidelity tradeoff applied to every frame of a recording.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    /// First 64 Plan 9 colors, smallest files
    Low,
    /// Full 256-color Plan 9 palette
    #[default]
    Medium,
    /// 216-color web-safe cube, evenly spaced channels
    High,
}

impl QualityLevel {
    pub fn palette(self) -> Palette<'static> {
        let colors: &'static [Rgb] = match self {
            QualityLevel::Low => &PLAN9[..64],
            QualityLevel::Medium => &PLAN9[..],
            QualityLevel::High => &WEB_SAFE[..],
        };
        Palette { colors }
    }

    pub fn max_colors(self) -> usize {
        match self {
            QualityLevel::Low => 64,
            QualityLevel::Medium => 256,
            QualityLevel::High => 216,
        }
    }
}

impl std::fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            QualityLevel::Low => "low",
            QualityLevel::Medium => "medium",
            QualityLevel::High => "high",
        })
    }
}
