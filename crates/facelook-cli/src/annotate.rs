//! Frame annotation: outlined face boxes with a `label (confidence)` caption.

use facelook_core::{MatchResult, PixelBox};
use image::{Rgb, RgbImage};

pub const KNOWN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: u32 = 2;

// Caption glyphs are 3×5 cells drawn at GLYPH_SCALE, one empty column apart.
const GLYPH_WIDTH: u32 = 3;
const GLYPH_HEIGHT: u32 = 5;
const GLYPH_SCALE: u32 = 2;
const CAPTION_PADDING: u32 = 2;

/// `label (confidence)`, or just the label when confidence is undefined.
pub fn caption(result: &MatchResult) -> String {
    match result.to_report().confidence {
        Some(c) => format!("{} ({c:.2})", result.label),
        None => result.label.clone(),
    }
}

/// Draw every result's box and caption onto `image`.
pub fn annotate(image: &mut RgbImage, results: &[MatchResult]) {
    for result in results {
        let color = if result.is_known() { KNOWN_COLOR } else { UNKNOWN_COLOR };
        draw_box(image, &result.bbox, color);
        draw_caption(image, &result.bbox, &caption(result), color);
    }
}

/// Outline `bbox` in `color`, clipped to the image.
pub fn draw_box(image: &mut RgbImage, bbox: &PixelBox, color: Rgb<u8>) {
    let (w, h) = image.dimensions();
    let x0 = bbox.x.min(w);
    let y0 = bbox.y.min(h);
    let x1 = bbox.x.saturating_add(bbox.width).min(w);
    let y1 = bbox.y.saturating_add(bbox.height).min(h);
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    for y in y0..y1 {
        for x in x0..x1 {
            let on_edge = x < x0 + BOX_THICKNESS
                || x + BOX_THICKNESS >= x1
                || y < y0 + BOX_THICKNESS
                || y + BOX_THICKNESS >= y1;
            if on_edge {
                image.put_pixel(x, y, color);
            }
        }
    }
}

/// Filled caption bar above the box, or inside its top edge when the box
/// touches the top of the frame.
fn draw_caption(image: &mut RgbImage, bbox: &PixelBox, text: &str, background: Rgb<u8>) {
    let bar_height = caption_height();
    let bar_width = text_width(text) + 2 * CAPTION_PADDING;
    let top = if bbox.y >= bar_height { bbox.y - bar_height } else { bbox.y };

    fill_rect(image, bbox.x, top, bar_width, bar_height, background);
    draw_text(image, bbox.x + CAPTION_PADDING, top + CAPTION_PADDING, text, TEXT_COLOR);
}

fn caption_height() -> u32 {
    GLYPH_HEIGHT * GLYPH_SCALE + 2 * CAPTION_PADDING
}

fn text_width(text: &str) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        0
    } else {
        (n * (GLYPH_WIDTH + 1) - 1) * GLYPH_SCALE
    }
}

fn fill_rect(image: &mut RgbImage, x: u32, y: u32, width: u32, height: u32, color: Rgb<u8>) {
    let (w, h) = image.dimensions();
    for py in y..y.saturating_add(height).min(h) {
        for px in x..x.saturating_add(width).min(w) {
            image.put_pixel(px, py, color);
        }
    }
}

/// Render `text` with its top-left corner at `(x, y)`, clipped to the image.
/// Lowercase letters are drawn as capitals; characters without a glyph as `?`.
pub fn draw_text(image: &mut RgbImage, x: u32, y: u32, text: &str, color: Rgb<u8>) {
    let advance = (GLYPH_WIDTH + 1) * GLYPH_SCALE;
    for (i, ch) in text.chars().enumerate() {
        let origin_x = x.saturating_add(i as u32 * advance);
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (0b100 >> col) == 0 {
                    continue;
                }
                let cell_x = origin_x.saturating_add(col * GLYPH_SCALE);
                let cell_y = y.saturating_add(row as u32 * GLYPH_SCALE);
                fill_rect(image, cell_x, cell_y, GLYPH_SCALE, GLYPH_SCALE, color);
            }
        }
    }
}

/// Five rows of three bits, most significant bit leftmost.
fn glyph(ch: char) -> [u8; 5] {
    match ch.to_ascii_uppercase() {
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'B' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'C' => [0b011, 0b100, 0b100, 0b100, 0b011],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'G' => [0b011, 0b100, 0b101, 0b101, 0b011],
        'H' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'J' => [0b001, 0b001, 0b001, 0b101, 0b010],
        'K' => [0b101, 0b101, 0b110, 0b101, 0b101],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'M' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'N' => [0b110, 0b101, 0b101, 0b101, 0b101],
        'O' => [0b010, 0b101, 0b101, 0b101, 0b010],
        'P' => [0b110, 0b101, 0b110, 0b100, 0b100],
        'Q' => [0b010, 0b101, 0b101, 0b110, 0b011],
        'R' => [0b110, 0b101, 0b110, 0b101, 0b101],
        'S' => [0b011, 0b100, 0b010, 0b001, 0b110],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'U' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'V' => [0b101, 0b101, 0b101, 0b101, 0b010],
        'W' => [0b101, 0b101, 0b111, 0b111, 0b101],
        'X' => [0b101, 0b101, 0b010, 0b101, 0b101],
        'Y' => [0b101, 0b101, 0b010, 0b010, 0b010],
        'Z' => [0b111, 0b001, 0b010, 0b100, 0b111],
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b110, 0b001, 0b010, 0b100, 0b111],
        '3' => [0b110, 0b001, 0b010, 0b001, 0b110],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b110, 0b001, 0b110],
        '6' => [0b011, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b110],
        ' ' => [0; 5],
        '(' => [0b001, 0b010, 0b010, 0b010, 0b001],
        ')' => [0b100, 0b010, 0b010, 0b010, 0b100],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        '_' => [0b000, 0b000, 0b000, 0b000, 0b111],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        _ => [0b110, 0b001, 0b010, 0b000, 0b010],
    }
}
