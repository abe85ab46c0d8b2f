//! Geometry heuristics over SVG elements: lengths, view boxes, intrinsic
//! document size, overlay placement and element centers.

use varia_core::{Placement, Point2D, Size2D};
use varia_ir::Layer;

use crate::svg::SvgElement;

/// Parse the leading number of a length (`"100px"` → 100). Units are ignored.
pub fn parse_length(value: &str) -> Option<f64> {
    let s = value.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end == digits_start || &s[digits_start..end] == "." {
        return None;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp = end + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        let exp_digits = exp;
        while exp < bytes.len() && bytes[exp].is_ascii_digit() {
            exp += 1;
        }
        if exp > exp_digits {
            end = exp;
        }
    }
    s[..end].parse().ok()
}

/// The `viewBox` attribute: origin and extents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewBox {
    pub origin: Point2D,
    pub size: Size2D,
}

impl ViewBox {
    /// Parse `"minX minY width height"`, separated by whitespace and/or commas.
    pub fn parse(value: &str) -> Option<Self> {
        let nums: Vec<f64> = value
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<f64>().ok())
            .collect::<Option<Vec<_>>>()?;
        if nums.len() != 4 {
            return None;
        }
        Some(Self {
            origin: Point2D::new(nums[0], nums[1]),
            size: Size2D::new(nums[2], nums[3]),
        })
    }
}

/// Size a document declares for itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntrinsicSize {
    pub size: Size2D,
    /// View-box origin, present only when the size came from the view box.
    pub view_box_origin: Option<Point2D>,
}

/// Intrinsic size of a document root: explicit `width`/`height` when both
/// are positive, else `viewBox`.
pub fn intrinsic_size(root: &SvgElement) -> Option<IntrinsicSize> {
    let positive = |v: f64| v.is_finite() && v > 0.0;
    let explicit = root
        .attr("width")
        .and_then(parse_length)
        .filter(|v| positive(*v))
        .zip(root.attr("height").and_then(parse_length).filter(|v| positive(*v)));
    if let Some((w, h)) = explicit {
        return Some(IntrinsicSize {
            size: Size2D::new(w, h),
            view_box_origin: None,
        });
    }
    let vb = ViewBox::parse(root.attr("viewBox")?)?;
    Some(IntrinsicSize {
        size: vb.size,
        view_box_origin: Some(vb.origin),
    })
}

/// Placement of an overlay layer inside the base document.
///
/// Each axis scales by `target / intrinsic`; an axis with no declared target,
/// no intrinsic size or a non-positive result keeps scale 1. The view-box
/// origin is subtracted only when the layer declares a size and the intrinsic
/// size came from the view box.
pub fn layer_placement(layer: &Layer, intrinsic: Option<IntrinsicSize>) -> Placement {
    let position = layer.position();
    let sized = layer.width.is_some() || layer.height.is_some();
    let intrinsic = intrinsic.filter(|_| sized);

    let axis_scale = |target: Option<f64>, original: Option<f64>| -> f64 {
        match (target, original) {
            (Some(t), Some(o)) => {
                let s = t / o;
                if s.is_finite() && s > 0.0 {
                    s
                } else {
                    1.0
                }
            }
            _ => 1.0,
        }
    };
    let sx = axis_scale(layer.width, intrinsic.map(|i| i.size.width));
    let sy = axis_scale(layer.height, intrinsic.map(|i| i.size.height));

    let origin = intrinsic
        .and_then(|i| i.view_box_origin)
        .unwrap_or_else(Point2D::zero);

    Placement {
        translate: Point2D::new(position.x - origin.x * sx, position.y - origin.y * sy),
        scale: Point2D::new(sx, sy),
    }
}

fn num_attr(el: &SvgElement, name: &str) -> Option<f64> {
    el.attr(name).and_then(parse_length)
}

/// Numeric attribute with the SVG default of 0 when absent.
fn num_attr_or_zero(el: &SvgElement, name: &str) -> Option<f64> {
    match el.attr(name) {
        Some(v) => parse_length(v),
        None => Some(0.0),
    }
}

/// Approximate visual center of a shape, used for anchor-point matching.
/// `None` when the element kind has no center rule or its geometry is missing.
pub fn element_center(el: &SvgElement) -> Option<Point2D> {
    match el.local_name() {
        "rect" => {
            let x = num_attr_or_zero(el, "x")?;
            let y = num_attr_or_zero(el, "y")?;
            let w = num_attr(el, "width")?;
            let h = num_attr(el, "height")?;
            Some(Point2D::new(x + w / 2.0, y + h / 2.0))
        }
        "circle" | "ellipse" => Some(Point2D::new(
            num_attr_or_zero(el, "cx")?,
            num_attr_or_zero(el, "cy")?,
        )),
        "line" => {
            let x1 = num_attr_or_zero(el, "x1")?;
            let y1 = num_attr_or_zero(el, "y1")?;
            let x2 = num_attr_or_zero(el, "x2")?;
            let y2 = num_attr_or_zero(el, "y2")?;
            Some(Point2D::new((x1 + x2) / 2.0, (y1 + y2) / 2.0))
        }
        "polygon" | "polyline" => Point2D::centroid(&parse_points(el.attr("points")?)),
        "path" => Point2D::centroid(&path_endpoints(el.attr("d")?)),
        "text" => {
            let first = |name: &str| match el.attr(name) {
                Some(v) => v
                    .split(|c: char| c.is_whitespace() || c == ',')
                    .find(|s| !s.is_empty())
                    .and_then(parse_length),
                None => Some(0.0),
            };
            Some(Point2D::new(first("x")?, first("y")?))
        }
        _ => None,
    }
}

/// Parse a `points` list into coordinate pairs. A trailing odd value is dropped.
pub fn parse_points(value: &str) -> Vec<Point2D> {
    let mut cursor = NumberCursor::new(value);
    let mut points = Vec::new();
    while let (Some(x), Some(y)) = (cursor.number(), cursor.number()) {
        points.push(Point2D::new(x, y));
    }
    points
}

/// Absolute endpoint of every drawing command in path data.
///
/// Relative commands are resolved against the current point; `Z` moves the
/// current point back to the subpath start without contributing a point.
/// Parsing stops at the first malformed segment.
pub fn path_endpoints(d: &str) -> Vec<Point2D> {
    let mut cursor = NumberCursor::new(d);
    let mut points = Vec::new();
    let mut current = Point2D::zero();
    let mut start = Point2D::zero();
    let mut command: Option<char> = None;

    loop {
        cursor.skip_separators();
        let cmd = match cursor.peek() {
            None => break,
            Some(c) if c.is_ascii_alphabetic() => {
                cursor.bump();
                c
            }
            // Implicit repetition of the previous command.
            Some(_) => match command {
                Some('M') => 'L',
                Some('m') => 'l',
                Some(c) if !matches!(c, 'Z' | 'z') => c,
                _ => break,
            },
        };
        command = Some(cmd);
        let relative = cmd.is_ascii_lowercase();
        let base = if relative { current } else { Point2D::zero() };

        let next = match cmd.to_ascii_uppercase() {
            'Z' => {
                current = start;
                continue;
            }
            'M' | 'L' | 'T' => cursor.pair().map(|(x, y)| (base.x + x, base.y + y)),
            'H' => cursor
                .number()
                .map(|x| (if relative { current.x + x } else { x }, current.y)),
            'V' => cursor
                .number()
                .map(|y| (current.x, if relative { current.y + y } else { y })),
            'C' => cursor
                .skip(4)
                .and_then(|_| cursor.pair())
                .map(|(x, y)| (base.x + x, base.y + y)),
            'S' | 'Q' => cursor
                .skip(2)
                .and_then(|_| cursor.pair())
                .map(|(x, y)| (base.x + x, base.y + y)),
            'A' => cursor
                .skip(3)
                .and_then(|_| cursor.flag())
                .and_then(|_| cursor.flag())
                .and_then(|_| cursor.pair())
                .map(|(x, y)| (base.x + x, base.y + y)),
            _ => None,
        };

        let Some((x, y)) = next else { break };
        current = Point2D::new(x, y);
        if cmd.eq_ignore_ascii_case(&'M') {
            start = current;
        }
        points.push(current);
    }

    points
}

/// Reads numbers out of SVG number lists (`"10,20 -5.5e1.5"`).
struct NumberCursor<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> NumberCursor<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src.get(self.pos).map(|&b| b as char)
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_whitespace() || c == ',') {
            self.pos += 1;
        }
    }

    fn number(&mut self) -> Option<f64> {
        self.skip_separators();
        let start = self.pos;
        let mut end = start;
        let at = |i: usize| self.src.get(i).copied();

        if matches!(at(end), Some(b'+' | b'-')) {
            end += 1;
        }
        let mut digits = 0;
        while matches!(at(end), Some(b'0'..=b'9')) {
            end += 1;
            digits += 1;
        }
        if at(end) == Some(b'.') {
            end += 1;
            while matches!(at(end), Some(b'0'..=b'9')) {
                end += 1;
                digits += 1;
            }
        }
        if digits == 0 {
            return None;
        }
        if matches!(at(end), Some(b'e' | b'E')) {
            let mut exp = end + 1;
            if matches!(at(exp), Some(b'+' | b'-')) {
                exp += 1;
            }
            let exp_digits = exp;
            while matches!(at(exp), Some(b'0'..=b'9')) {
                exp += 1;
            }
            if exp > exp_digits {
                end = exp;
            }
        }

        let text = std::str::from_utf8(&self.src[start..end]).ok()?;
        let value = text.parse().ok()?;
        self.pos = end;
        Some(value)
    }

    fn pair(&mut self) -> Option<(f64, f64)> {
        Some((self.number()?, self.number()?))
    }

    /// Arc flags are a single `0`/`1` and may be written without separators.
    fn flag(&mut self) -> Option<bool> {
        self.skip_separators();
        let flag = match self.peek()? {
            '0' => false,
            '1' => true,
            _ => return None,
        };
        self.bump();
        Some(flag)
    }

    fn skip(&mut self, count: usize) -> Option<()> {
        for _ in 0..count {
            self.number()?;
        }
        Some(())
    }
}
