//! # Text Layout
//!
//! Line wrapping, measurement, and line placement for text elements.
//!
//! Wrapping is greedy: chunks delimited by UAX#14 break opportunities are
//! appended to the current line while they fit, and a new line starts when
//! the next chunk would overflow. A single chunk wider than the maximum
//! width is never split; it occupies its own line and overflows, matching
//! what the visual editor shows.

use crate::font::FontContext;
use crate::model::{FontStyle, Frame, TextAlign};
use unicode_linebreak::{linebreaks, BreakOpportunity};

/// Line height as a multiple of font size. Matches the editor's default
/// line box so output stays visually in step with the on-screen preview.
pub const LINE_HEIGHT_FACTOR: f64 = 1.2;

/// A line of text after wrapping.
#[derive(Debug, Clone, PartialEq)]
pub struct WrappedLine {
    pub text: String,
    /// Measured width, excluding trailing whitespace.
    pub width: f64,
}

/// A wrapped line with its final position on the canvas.
/// Coordinates are template-space: origin top-left, y grows downward,
/// `y` is the baseline.
#[derive(Debug, Clone)]
pub struct PlacedLine {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
}

/// A wrap chunk: the characters between two break opportunities.
struct Chunk {
    text: String,
    /// Width including trailing whitespace.
    full_width: f64,
    /// Width with trailing whitespace excluded (used for fit checks, since
    /// spaces at a line break are allowed to hang).
    trimmed_width: f64,
    /// A mandatory break (newline) follows this chunk.
    mandatory_after: bool,
}

/// Compute UAX#14 break opportunities indexed by char position.
///
/// Entry `i` is the opportunity *before* `chars[i]`. Index 0 is always
/// `None`; a break at end-of-text is ignored.
fn compute_break_opportunities(text: &str) -> Vec<Option<BreakOpportunity>> {
    let char_count = text.chars().count();
    let mut result = vec![None; char_count];

    let byte_to_char: Vec<usize> = {
        let mut map = vec![0usize; text.len() + 1];
        let mut char_idx = 0;
        for (byte_idx, _) in text.char_indices() {
            map[byte_idx] = char_idx;
            char_idx += 1;
        }
        map[text.len()] = char_idx;
        map
    };

    for (byte_offset, opp) in linebreaks(text) {
        let char_idx = byte_to_char[byte_offset];
        if char_idx < char_count {
            result[char_idx] = Some(opp);
        }
    }

    result
}

fn is_newline(ch: char) -> bool {
    matches!(ch, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

pub struct TextLayout;

impl Default for TextLayout {
    fn default() -> Self {
        Self::new()
    }
}

impl TextLayout {
    pub fn new() -> Self {
        Self
    }

    /// Break a string into lines that fit within `max_width`.
    pub fn break_into_lines(
        &self,
        font_context: &FontContext,
        text: &str,
        max_width: f64,
        font_size: f64,
        font_family: &str,
        font_weight: u32,
        font_style: FontStyle,
    ) -> Vec<WrappedLine> {
        if text.is_empty() {
            return vec![WrappedLine {
                text: String::new(),
                width: 0.0,
            }];
        }

        let italic = matches!(font_style, FontStyle::Italic | FontStyle::Oblique);
        let chunks = self.split_chunks(font_context, text, font_size, font_family, font_weight, italic);

        let mut lines = Vec::new();
        let mut line_text = String::new();
        let mut line_width = 0.0;

        for chunk in &chunks {
            let fits = line_width + chunk.trimmed_width <= max_width;
            if !line_text.is_empty() && !fits {
                lines.push(self.finish_line(font_context, line_text, font_size, font_family, font_weight, italic));
                line_text = String::new();
                line_width = 0.0;
            }

            line_text.push_str(&chunk.text);
            line_width += chunk.full_width;

            if chunk.mandatory_after {
                lines.push(self.finish_line(font_context, line_text, font_size, font_family, font_weight, italic));
                line_text = String::new();
                line_width = 0.0;
            }
        }

        if !line_text.is_empty() || lines.is_empty() {
            lines.push(self.finish_line(font_context, line_text, font_size, font_family, font_weight, italic));
        }

        lines
    }

    /// Split text into chunks at break opportunities, stripping newline
    /// characters (they survive only as mandatory-break markers).
    fn split_chunks(
        &self,
        font_context: &FontContext,
        text: &str,
        font_size: f64,
        font_family: &str,
        font_weight: u32,
        italic: bool,
    ) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let break_opps = compute_break_opportunities(text);

        let mut chunks = Vec::new();
        let mut start = 0;

        for i in 1..=chars.len() {
            let boundary = if i == chars.len() {
                // End of text closes the final chunk.
                Some(BreakOpportunity::Allowed)
            } else {
                break_opps[i]
            };

            if let Some(opp) = boundary {
                let mandatory = matches!(opp, BreakOpportunity::Mandatory);
                let chunk_chars: Vec<char> = chars[start..i]
                    .iter()
                    .copied()
                    .filter(|c| !is_newline(*c))
                    .collect();
                let chunk_text: String = chunk_chars.iter().collect();
                let full_width =
                    font_context.measure_string(&chunk_text, font_family, font_weight, italic, font_size);
                let trimmed = chunk_text.trim_end();
                let trimmed_width =
                    font_context.measure_string(trimmed, font_family, font_weight, italic, font_size);

                chunks.push(Chunk {
                    text: chunk_text,
                    full_width,
                    trimmed_width,
                    mandatory_after: mandatory,
                });
                start = i;
            }
        }

        chunks
    }

    /// Close out a line: trailing whitespace stays in the text but is
    /// excluded from the measured width.
    fn finish_line(
        &self,
        font_context: &FontContext,
        text: String,
        font_size: f64,
        font_family: &str,
        font_weight: u32,
        italic: bool,
    ) -> WrappedLine {
        let width =
            font_context.measure_string(text.trim_end(), font_family, font_weight, italic, font_size);
        WrappedLine { text, width }
    }

    /// Measure the width of a string on a single line.
    pub fn measure_width(
        &self,
        font_context: &FontContext,
        text: &str,
        font_size: f64,
        font_family: &str,
        font_weight: u32,
        font_style: FontStyle,
    ) -> f64 {
        let italic = matches!(font_style, FontStyle::Italic | FontStyle::Oblique);
        font_context.measure_string(text, font_family, font_weight, italic, font_size)
    }

    /// Position wrapped lines inside a bounding box.
    ///
    /// Vertical policy is top-aligned: the first baseline sits one ascent
    /// below the box top and subsequent baselines step by the line height.
    /// This is the production renderer's policy; see DESIGN.md for why the
    /// legacy centered policy was not kept. Lines may run past the box
    /// bottom (auto-height behavior, the box height is advisory).
    pub fn place_lines(
        &self,
        lines: &[WrappedLine],
        frame: &Frame,
        align: TextAlign,
        font_size: f64,
        ascent: f64,
    ) -> Vec<PlacedLine> {
        let line_height = font_size * LINE_HEIGHT_FACTOR;

        lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                let x = match align {
                    TextAlign::Left => frame.x,
                    TextAlign::Center => frame.x + (frame.width - line.width) / 2.0,
                    TextAlign::Right => frame.x + frame.width - line.width,
                };
                PlacedLine {
                    text: line.text.trim_end().to_string(),
                    x,
                    y: frame.y + ascent + i as f64 * line_height,
                    width: line.width,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> FontContext {
        FontContext::new()
    }

    fn wrap(text: &str, max_width: f64) -> Vec<WrappedLine> {
        TextLayout::new().break_into_lines(
            &ctx(),
            text,
            max_width,
            12.0,
            "Helvetica",
            400,
            FontStyle::Normal,
        )
    }

    #[test]
    fn test_single_line() {
        let lines = wrap("Hello", 200.0);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "Hello");
    }

    #[test]
    fn test_line_break_at_space() {
        let lines = wrap("Hello World", 40.0);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text.trim_end(), "Hello");
        assert_eq!(lines[1].text, "World");
    }

    #[test]
    fn test_explicit_newline() {
        let lines = wrap("Hello\nWorld", 200.0);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "Hello");
        assert_eq!(lines[1].text, "World");
    }

    #[test]
    fn test_empty_string() {
        let lines = wrap("", 200.0);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].width, 0.0);
    }

    #[test]
    fn test_no_line_exceeds_max_width() {
        let lines = wrap("aaa bbb ccc ddd eee fff ggg", 60.0);
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(
                line.width <= 60.0 + 1e-9,
                "line '{}' measures {} > 60",
                line.text,
                line.width
            );
        }
    }

    #[test]
    fn test_overlong_word_is_not_split() {
        let lines = wrap("short incomprehensibilities end", 50.0);
        // The long word overflows its own line rather than being split.
        assert!(lines.iter().any(|l| l.text.trim() == "incomprehensibilities"));
        for line in &lines {
            assert!(!line.text.trim().contains(' ') || line.width <= 50.0 + 1e-9);
        }
    }

    #[test]
    fn test_overlong_single_word_single_line() {
        let lines = wrap("incomprehensibilities", 10.0);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "incomprehensibilities");
        assert!(lines[0].width > 10.0);
    }

    #[test]
    fn test_greedy_packs_words() {
        // Wide enough for two words per line: greedy puts two, not one.
        let tl = TextLayout::new();
        let fc = ctx();
        let two_words = tl.measure_width(&fc, "aa bb", 12.0, "Helvetica", 400, FontStyle::Normal);
        let lines = wrap("aa bb cc dd", two_words + 1.0);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text.trim_end(), "aa bb");
        assert_eq!(lines[1].text.trim_end(), "cc dd");
    }

    #[test]
    fn test_trailing_spaces_excluded_from_width() {
        let tl = TextLayout::new();
        let fc = ctx();
        let lines = wrap("Hi   ", 200.0);
        let hi = tl.measure_width(&fc, "Hi", 12.0, "Helvetica", 400, FontStyle::Normal);
        assert!((lines[0].width - hi).abs() < 1e-9);
    }

    #[test]
    fn test_blank_line_between_newlines() {
        let lines = wrap("a\n\nb", 200.0);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].text, "");
    }

    #[test]
    fn test_place_lines_left() {
        let tl = TextLayout::new();
        let lines = vec![
            WrappedLine {
                text: "one".into(),
                width: 30.0,
            },
            WrappedLine {
                text: "two".into(),
                width: 25.0,
            },
        ];
        let frame = Frame {
            x: 100.0,
            y: 200.0,
            width: 300.0,
            height: 50.0,
        };
        let placed = tl.place_lines(&lines, &frame, TextAlign::Left, 20.0, 16.0);
        assert_eq!(placed[0].x, 100.0);
        assert_eq!(placed[1].x, 100.0);
        // First baseline one ascent below the box top; second steps by 1.2em.
        assert!((placed[0].y - 216.0).abs() < 1e-9);
        assert!((placed[1].y - 240.0).abs() < 1e-9);
    }

    #[test]
    fn test_place_lines_center_and_right() {
        let tl = TextLayout::new();
        let lines = vec![WrappedLine {
            text: "x".into(),
            width: 100.0,
        }];
        let frame = Frame {
            x: 100.0,
            y: 0.0,
            width: 300.0,
            height: 50.0,
        };
        let centered = tl.place_lines(&lines, &frame, TextAlign::Center, 12.0, 9.6);
        assert!((centered[0].x - 200.0).abs() < 1e-9);
        let right = tl.place_lines(&lines, &frame, TextAlign::Right, 12.0, 9.6);
        assert!((right[0].x - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_cjk_breaks_between_ideographs() {
        let opps = compute_break_opportunities("\u{4F60}\u{597D}\u{4E16}\u{754C}");
        let allowed = opps
            .iter()
            .filter(|o| matches!(o, Some(BreakOpportunity::Allowed)))
            .count();
        assert!(allowed >= 2);
    }
}
