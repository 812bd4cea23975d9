//! Text width measurement
//!
//! The engine needs item widths to compute scroll travel. Hosts with a real
//! text shaper implement `TextMeasure`; `EstimatedMeasure` is a font-agnostic
//! fallback.

/// Measures rendered text width in logical pixels
pub trait TextMeasure: Send {
    fn measure(&self, text: &str, font_size: f32) -> f32;
}

/// Advance-width estimate: wide glyphs take a full em, others ~0.55 em
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimatedMeasure;

/// Full-width characters (CJK, kana, hangul, fullwidth forms)
fn is_wide(c: char) -> bool {
    matches!(c,
        '\u{1100}'..='\u{115F}' |   // Hangul Jamo
        '\u{2E80}'..='\u{303E}' |   // CJK radicals, symbols and punctuation
        '\u{3041}'..='\u{33FF}' |   // Hiragana, Katakana, compatibility
        '\u{3400}'..='\u{4DBF}' |   // CJK Extension A
        '\u{4E00}'..='\u{9FFF}' |   // CJK Unified Ideographs
        '\u{AC00}'..='\u{D7A3}' |   // Hangul syllables
        '\u{F900}'..='\u{FAFF}' |   // CJK compatibility ideographs
        '\u{FF01}'..='\u{FF60}' |   // Fullwidth forms
        '\u{FFE0}'..='\u{FFE6}' |
        '\u{1F300}'..='\u{1FAFF}'   // Emoji
    )
}

impl TextMeasure for EstimatedMeasure {
    fn measure(&self, text: &str, font_size: f32) -> f32 {
        let ems: f32 = text
            .chars()
            .filter(|c| !c.is_control())
            .map(|c| if is_wide(c) { 1.0 } else { 0.55 })
            .sum();
        ems * font_size
    }
}

impl<F> TextMeasure for F
where
    F: Fn(&str, f32) -> f32 + Send,
{
    fn measure(&self, text: &str, font_size: f32) -> f32 {
        self(text, font_size)
    }
}
