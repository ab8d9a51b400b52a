//! Tiny 3x5 bitmap font for the score label (digits, '.', '%').

use image::{Rgba, RgbaImage};

const GLYPH_W: u32 = 3;
const GLYPH_H: u32 = 5;

// Each row is 3 bits, MSB on the left.
fn glyph(ch: char) -> Option<[u8; 5]> {
    let rows = match ch {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        '%' => [0b101, 0b001, 0b010, 0b100, 0b101],
        _ => return None,
    };
    Some(rows)
}

/// Pixel size of `text` at `scale`, including one-column gaps between glyphs.
pub fn text_size(text: &str, scale: u32) -> (u32, u32) {
    let count = text.chars().filter(|&c| glyph(c).is_some()).count() as u32;
    if count == 0 {
        return (0, 0);
    }
    ((count * (GLYPH_W + 1) - 1) * scale, GLYPH_H * scale)
}

/// Draws `text` with its top-left corner at `(x, y)`; unknown characters are skipped.
pub fn draw_text(image: &mut RgbaImage, text: &str, x: u32, y: u32, scale: u32, color: [u8; 4]) {
    let scale = scale.max(1);
    let mut pen_x = x;
    for ch in text.chars() {
        let Some(rows) = glyph(ch) else {
            continue;
        };
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (0b100 >> col) == 0 {
                    continue;
                }
                let px = pen_x + col * scale;
                let py = y + row as u32 * scale;
                fill_block(image, px, py, scale, color);
            }
        }
        pen_x += (GLYPH_W + 1) * scale;
    }
}

/// Text with a one-block dark shadow so it reads on any background.
pub fn draw_label(image: &mut RgbaImage, text: &str, x: u32, y: u32, scale: u32) {
    let scale = scale.max(1);
    draw_text(image, text, x + scale / 2 + 1, y + scale / 2 + 1, scale, [0, 0, 0, 255]);
    draw_text(image, text, x, y, scale, [255, 255, 255, 255]);
}

fn fill_block(image: &mut RgbaImage, x: u32, y: u32, size: u32, color: [u8; 4]) {
    let (width, height) = image.dimensions();
    for by in y..(y + size).min(height) {
        for bx in x..(x + size).min(width) {
            image.put_pixel(bx, by, Rgba(color));
        }
    }
}
