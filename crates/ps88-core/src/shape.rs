//! Render descriptions produced by gui callbacks.
//!
//! Shapes are plain data. A rendering consumer receives the full list for a
//! frame and draws it in order; nothing here rasterizes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-bit `0xRRGGBBAA` color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Color(pub u32);

impl Color {
    pub const WHITE: Color = Color(0xFFFF_FFFF);
    pub const BLACK: Color = Color(0x0000_00FF);

    pub fn from_rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Color(u32::from_be_bytes([r, g, b, a]))
    }

    pub fn rgba(&self) -> (u8, u8, u8, u8) {
        let [r, g, b, a] = self.0.to_be_bytes();
        (r, g, b, a)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:08x}", self.0)
    }
}

/// One drawable item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Shape {
    Polygon {
        points: Vec<[f32; 2]>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fill: Option<Color>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stroke: Option<Color>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stroke_width: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        closed: Option<bool>,
    },
    Text {
        text: String,
        x: f32,
        y: f32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<Color>,
    },
}

impl Shape {
    pub fn kind(&self) -> &'static str {
        match self {
            Shape::Polygon { .. } => "polygon",
            Shape::Text { .. } => "text",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_components() {
        let color = Color::from_rgba(0x12, 0x34, 0x56, 0x78);
        assert_eq!(color.0, 0x1234_5678);
        assert_eq!(color.rgba(), (0x12, 0x34, 0x56, 0x78));
        assert_eq!(color.to_string(), "#12345678");
    }

    #[test]
    fn test_polygon_json_layout() {
        let shape = Shape::Polygon {
            points: vec![[0.0, 0.0], [1.0, 0.0]],
            fill: Some(Color::WHITE),
            stroke: None,
            stroke_width: None,
            closed: Some(true),
        };
        let json = serde_json::to_value(&shape).unwrap();
        assert_eq!(json["type"], "polygon");
        assert_eq!(json["fill"], 0xFFFF_FFFFu32);
        assert_eq!(json["closed"], true);
        assert!(json.get("stroke").is_none());
    }

    #[test]
    fn test_text_from_json() {
        let shape: Shape =
            serde_json::from_str(r#"{"type":"text","text":"hi","x":1.0,"y":2.0}"#).unwrap();
        assert_eq!(shape.kind(), "text");
        match shape {
            Shape::Text { size, color, .. } => {
                assert!(size.is_none());
                assert!(color.is_none());
            }
            _ => panic!("expected text"),
        }
    }
}
