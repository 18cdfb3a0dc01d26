//! Draw context handed to `gui` callbacks.
//!
//! ```rhai
//! ps88.gui(|ctx| {
//!     ctx.add_polygon([[0, 0], [ctx.width, 0], [ctx.width, 20]], #{ fill: 0x336699ff, closed: true });
//!     ctx.add_text(`x = ${ctx.pointer.x}`, 10, 30, #{ size: 14, color: 0xffffffff });
//! });
//! ```
//!
//! Malformed shapes are dropped with a warning instead of failing the
//! callback.

use crate::error::ShapeError;
use crate::shape::{Color, Shape};
use rhai::{Dynamic, Engine, Map, FLOAT, INT};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

/// Pointer state reported with each draw request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pointer {
    pub x: f32,
    pub y: f32,
    pub primary_pressed: bool,
    pub secondary_pressed: bool,
}

/// Raw pointer input from the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointerEvent {
    Move,
    PrimaryDown,
    PrimaryUp,
    SecondaryDown,
    SecondaryUp,
}

impl Pointer {
    pub fn apply(&mut self, event: PointerEvent, x: f32, y: f32) {
        self.x = x;
        self.y = y;
        match event {
            PointerEvent::Move => {}
            PointerEvent::PrimaryDown => self.primary_pressed = true,
            PointerEvent::PrimaryUp => self.primary_pressed = false,
            PointerEvent::SecondaryDown => self.secondary_pressed = true,
            PointerEvent::SecondaryUp => self.secondary_pressed = false,
        }
    }
}

/// Parameters of one draw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawRequest {
    pub width: u32,
    pub height: u32,
    pub pointer: Pointer,
}

/// The `ctx` value passed to a gui callback.
#[derive(Debug, Clone)]
pub struct DrawContext {
    width: u32,
    height: u32,
    pointer: Pointer,
    shapes: Arc<Mutex<Vec<Shape>>>,
}

impl DrawContext {
    pub fn new(request: &DrawRequest) -> Self {
        Self {
            width: request.width,
            height: request.height,
            pointer: request.pointer,
            shapes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shapes appended so far, in order.
    pub fn take_shapes(&self) -> Vec<Shape> {
        std::mem::take(&mut *self.shapes.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn push(&self, shape: Result<Shape, ShapeError>) {
        match shape {
            Ok(shape) => self
                .shapes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(shape),
            Err(e) => log::warn!("[GUI] dropping malformed shape: {}", e),
        }
    }

    fn add_polygon(&mut self, points: Dynamic) {
        self.push(polygon(points, Dynamic::UNIT));
    }

    fn add_polygon_with(&mut self, points: Dynamic, options: Dynamic) {
        self.push(polygon(points, options));
    }

    fn add_text(&mut self, text: Dynamic, x: Dynamic, y: Dynamic) {
        self.push(text_shape(text, x, y, Dynamic::UNIT));
    }

    fn add_text_with(&mut self, text: Dynamic, x: Dynamic, y: Dynamic, options: Dynamic) {
        self.push(text_shape(text, x, y, options));
    }
}

fn number(value: &Dynamic, field: &'static str) -> Result<f32, ShapeError> {
    let raw = if let Ok(f) = value.as_float() {
        f
    } else if let Ok(i) = value.as_int() {
        i as FLOAT
    } else {
        return Err(ShapeError::WrongType {
            field,
            expected: "number",
        });
    };
    let narrowed = raw as f32;
    if raw.is_finite() && narrowed.is_finite() {
        Ok(narrowed)
    } else {
        Err(ShapeError::NotFinite { field })
    }
}

fn color(value: &Dynamic, field: &'static str) -> Result<Color, ShapeError> {
    value
        .as_int()
        .ok()
        .and_then(|i| u32::try_from(i).ok())
        .map(Color)
        .ok_or(ShapeError::BadColor { field })
}

fn options(value: Dynamic) -> Result<Map, ShapeError> {
    if value.is_unit() {
        return Ok(Map::new());
    }
    value.try_cast::<Map>().ok_or(ShapeError::WrongType {
        field: "options",
        expected: "map",
    })
}

fn polygon(points: Dynamic, opts: Dynamic) -> Result<Shape, ShapeError> {
    let points = points.into_array().map_err(|_| ShapeError::WrongType {
        field: "points",
        expected: "array",
    })?;
    let points = points
        .into_iter()
        .enumerate()
        .map(|(index, point)| {
            let pair = point
                .into_array()
                .ok()
                .filter(|pair| pair.len() == 2)
                .ok_or(ShapeError::BadPoint { index })?;
            Ok([number(&pair[0], "x")?, number(&pair[1], "y")?])
        })
        .collect::<Result<Vec<_>, ShapeError>>()?;

    let opts = options(opts)?;
    let mut fill = None;
    let mut stroke = None;
    let mut stroke_width = None;
    let mut closed = None;
    for (key, value) in &opts {
        match key.as_str() {
            "fill" => fill = Some(color(value, "fill")?),
            "stroke" => stroke = Some(color(value, "stroke")?),
            "stroke_width" => {
                let width = number(value, "stroke_width")?;
                if width < 0.0 {
                    return Err(ShapeError::Negative { field: "stroke_width" });
                }
                stroke_width = Some(width);
            }
            "closed" => {
                closed = Some(value.as_bool().map_err(|_| ShapeError::WrongType {
                    field: "closed",
                    expected: "bool",
                })?)
            }
            other => log::debug!("[GUI] ignoring polygon option '{}'", other),
        }
    }

    Ok(Shape::Polygon {
        points,
        fill,
        stroke,
        stroke_width,
        closed,
    })
}

fn text_shape(text: Dynamic, x: Dynamic, y: Dynamic, opts: Dynamic) -> Result<Shape, ShapeError> {
    let x = number(&x, "x")?;
    let y = number(&y, "y")?;
    let opts = options(opts)?;
    let mut size = None;
    let mut text_color = None;
    for (key, value) in &opts {
        match key.as_str() {
            "size" => size = Some(number(value, "size")?),
            "color" => text_color = Some(color(value, "color")?),
            other => log::debug!("[GUI] ignoring text option '{}'", other),
        }
    }

    Ok(Shape::Text {
        text: text.to_string(),
        x,
        y,
        size,
        color: text_color,
    })
}

pub(crate) fn register(engine: &mut Engine) {
    engine.register_type_with_name::<DrawContext>("DrawContext");
    engine.register_get("width", |ctx: &mut DrawContext| ctx.width as INT);
    engine.register_get("height", |ctx: &mut DrawContext| ctx.height as INT);
    engine.register_get("pointer", |ctx: &mut DrawContext| ctx.pointer);
    engine.register_fn("add_polygon", DrawContext::add_polygon);
    engine.register_fn("add_polygon", DrawContext::add_polygon_with);
    engine.register_fn("add_text", DrawContext::add_text);
    engine.register_fn("add_text", DrawContext::add_text_with);

    engine.register_type_with_name::<Pointer>("Pointer");
    engine.register_get("x", |p: &mut Pointer| p.x as FLOAT);
    engine.register_get("y", |p: &mut Pointer| p.y as FLOAT);
    engine.register_get("primary_pressed", |p: &mut Pointer| p.primary_pressed);
    engine.register_get("secondary_pressed", |p: &mut Pointer| p.secondary_pressed);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw(script: &str) -> Vec<Shape> {
        let mut engine = Engine::new();
        register(&mut engine);
        let ctx = DrawContext::new(&DrawRequest {
            width: 640,
            height: 480,
            pointer: Pointer {
                x: 10.0,
                y: 12.0,
                primary_pressed: true,
                secondary_pressed: false,
            },
        });
        let mut scope = rhai::Scope::new();
        scope.push("ctx", ctx.clone());
        engine.run_with_scope(&mut scope, script).unwrap();
        ctx.take_shapes()
    }

    #[test]
    fn test_polygon_with_fill() {
        let shapes = draw("ctx.add_polygon([[0, 0], [10, 0], [10, 10], [0, 10]], #{ fill: 0xFFFFFFFF });");
        assert_eq!(shapes.len(), 1);
        match &shapes[0] {
            Shape::Polygon { points, fill, closed, .. } => {
                assert_eq!(points.len(), 4);
                assert_eq!(points[2], [10.0, 10.0]);
                assert_eq!(*fill, Some(Color::WHITE));
                assert_eq!(*closed, None);
            }
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn test_text_with_options() {
        let shapes = draw("ctx.add_text(42, 1.5, 2, #{ size: 12, color: 0x00ff00ff });");
        assert_eq!(
            shapes,
            vec![Shape::Text {
                text: "42".into(),
                x: 1.5,
                y: 2.0,
                size: Some(12.0),
                color: Some(Color(0x00ff_00ff)),
            }]
        );
    }

    #[test]
    fn test_context_fields() {
        let shapes = draw(
            "if ctx.width == 640 && ctx.height == 480 && ctx.pointer.primary_pressed {
                 ctx.add_text(\"ok\", ctx.pointer.x, ctx.pointer.y);
             }",
        );
        assert_eq!(shapes.len(), 1);
    }

    #[test]
    fn test_malformed_shapes_are_dropped() {
        let shapes = draw(
            "ctx.add_polygon([[0, 0], [1]]);
             ctx.add_polygon([[0, 0], [1.0e300, 1]]);
             ctx.add_polygon([[0, 0]], #{ fill: -1 });
             ctx.add_polygon([[0, 0]], #{ fill: 0x1FFFFFFFF });
             ctx.add_text(\"t\", \"x\", 0);
             ctx.add_polygon(\"nope\");
             ctx.add_polygon([[0, 0], [1, 1]], #{ closed: true, stroke_width: 2 });",
        );
        assert_eq!(shapes.len(), 1);
        assert!(matches!(
            shapes[0],
            Shape::Polygon {
                closed: Some(true),
                stroke_width: Some(w),
                ..
            } if w == 2.0
        ));
    }

    #[test]
    fn test_pointer_tracking() {
        let mut pointer = Pointer::default();
        pointer.apply(PointerEvent::PrimaryDown, 5.0, 6.0);
        pointer.apply(PointerEvent::SecondaryDown, 7.0, 8.0);
        pointer.apply(PointerEvent::PrimaryUp, 9.0, 1.0);
        assert_eq!(
            pointer,
            Pointer {
                x: 9.0,
                y: 1.0,
                primary_pressed: false,
                secondary_pressed: true,
            }
        );
    }
}
