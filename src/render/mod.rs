//! Frame annotation: detection boxes, labels and the alert overlay.
//!
//! Presentation only. Nothing here feeds back into the touch decision.

mod font;

pub use font::{draw_text, text_width};

use image::{Rgb, RgbImage};

use crate::detect::{Detection, ObjectClass};
use crate::geometry::BoundingBox;

const SUBJECT_COLOR: Rgb<u8> = Rgb([66, 135, 245]);
const TARGET_COLOR: Rgb<u8> = Rgb([255, 165, 0]);
const OTHER_COLOR: Rgb<u8> = Rgb([160, 160, 160]);
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const ALERT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Top-left corner of the alert text.
pub const ALERT_ORIGIN: (i64, i64) = (50, 50);
const ALERT_SCALE: u32 = 4;
const LABEL_SCALE: u32 = 1;
const BOX_THICKNESS: u32 = 2;

#[derive(Clone, Debug)]
pub struct Renderer {
    alert_text: String,
}

impl Renderer {
    pub fn new(alert_text: impl Into<String>) -> Self {
        Self {
            alert_text: alert_text.into(),
        }
    }

    /// Draw every detection, whatever its class.
    pub fn draw_detections(&self, image: &mut RgbImage, detections: &[Detection]) {
        for detection in detections {
            let color = class_color(detection.class);
            let bbox = detection.bbox.clamped(image.width(), image.height());
            draw_box(image, &bbox, color, BOX_THICKNESS);

            let caption = match detection.confidence {
                Some(confidence) => format!("{} {:.2}", detection.label, confidence),
                None => detection.label.clone(),
            };
            let band_height = font::GLYPH_HEIGHT * LABEL_SCALE + 2;
            let top = (bbox.min_y as i64 - i64::from(band_height)).max(0);
            fill_rect(
                image,
                bbox.min_x as i64,
                top,
                text_width(&caption, LABEL_SCALE) + 2,
                band_height,
                color,
            );
            draw_text(
                image,
                bbox.min_x as i64 + 1,
                top + 1,
                &caption,
                LABEL_SCALE,
                LABEL_TEXT_COLOR,
            );
        }
    }

    /// Stamp the alert text onto a flagged frame.
    pub fn draw_alert(&self, image: &mut RgbImage) {
        let (x, y) = ALERT_ORIGIN;
        draw_text(image, x, y, &self.alert_text, ALERT_SCALE, ALERT_COLOR);
    }
}

fn class_color(class: ObjectClass) -> Rgb<u8> {
    match class {
        ObjectClass::Person => SUBJECT_COLOR,
        ObjectClass::CellPhone => TARGET_COLOR,
        ObjectClass::Other => OTHER_COLOR,
    }
}

fn draw_box(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: u32) {
    let x0 = bbox.min_x as i64;
    let y0 = bbox.min_y as i64;
    let w = (bbox.max_x - bbox.min_x).round().max(1.0) as u32;
    let h = (bbox.max_y - bbox.min_y).round().max(1.0) as u32;
    let t = thickness.min(w).min(h).max(1);
    fill_rect(image, x0, y0, w, t, color);
    fill_rect(image, x0, y0 + i64::from(h) - i64::from(t), w, t, color);
    fill_rect(image, x0, y0, t, h, color);
    fill_rect(image, x0 + i64::from(w) - i64::from(t), y0, t, h, color);
}

fn fill_rect(image: &mut RgbImage, x: i64, y: i64, w: u32, h: u32, color: Rgb<u8>) {
    let x_start = x.max(0);
    let y_start = y.max(0);
    let x_end = (x + i64::from(w)).min(i64::from(image.width()));
    let y_end = (y + i64::from(h)).min(i64::from(image.height()));
    for py in y_start..y_end {
        for px in x_start..x_end {
            image.put_pixel(px as u32, py as u32, color);
        }
    }
}
