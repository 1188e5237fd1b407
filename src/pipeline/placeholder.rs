//! Diagram placeholders for the second cascade tier.
//!
//! Diagram environments (`tikzpicture`, `circuitikz`, `pgfpicture`) are the
//! most common reason a generated document fails to compile. This module
//! swaps each one for a framed box of roughly the same size so the rest of
//! the document can still be typeset.
//!
//! Size inference, first match wins:
//!
//! 1. `width=` / `height=` in the environment's optional argument (bare
//!    numbers are centimetres; `mm`, `in`, `pt` are converted)
//! 2. the bounding box of the `(x,y)` coordinate pairs in the body
//! 3. a default of 8 cm × 5 cm
//!
//! Only outermost diagram blocks are replaced; a diagram nested inside
//! another (a `tikzpicture` in a `\node{...}`) goes with its parent. Text
//! after an unescaped `%` is a comment and never opens or closes a block.
//!
//! The replacement contains no diagram environment, so running the
//! substitution twice gives the same text as running it once.

use once_cell::sync::Lazy;
use regex::Regex;

/// Environments treated as diagrams.
pub const DIAGRAM_ENVIRONMENTS: [&str; 3] = ["tikzpicture", "circuitikz", "pgfpicture"];

pub const DEFAULT_WIDTH_CM: f64 = 8.0;
pub const DEFAULT_HEIGHT_CM: f64 = 5.0;

/// Smallest edge of an inferred box; degenerate coordinate sets (a single
/// point, a horizontal line) would otherwise produce a zero-height box.
const MIN_EDGE_CM: f64 = 1.0;

static RE_DIAGRAM_TAG: Lazy<Regex> = Lazy::new(|| {
    let envs = DIAGRAM_ENVIRONMENTS.join("|");
    Regex::new(&format!(r"\\(begin|end)\{{({envs})\}}")).unwrap()
});

static RE_WIDTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[,\[])\s*width\s*=\s*(-?\d+(?:\.\d+)?)\s*(cm|mm|in|pt)?").unwrap());

static RE_HEIGHT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[,\[])\s*height\s*=\s*(-?\d+(?:\.\d+)?)\s*(cm|mm|in|pt)?").unwrap());

static RE_COORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\s*(-?\d+(?:\.\d+)?)\s*,\s*(-?\d+(?:\.\d+)?)\s*\)").unwrap());

/// Box dimensions in centimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxSize {
    pub width_cm: f64,
    pub height_cm: f64,
}

impl Default for BoxSize {
    fn default() -> Self {
        Self {
            width_cm: DEFAULT_WIDTH_CM,
            height_cm: DEFAULT_HEIGHT_CM,
        }
    }
}

/// Convert a length with an optional unit to centimetres.
fn to_cm(value: f64, unit: Option<&str>) -> f64 {
    match unit {
        Some("mm") => value / 10.0,
        Some("in") => value * 2.54,
        Some("pt") => value * 2.54 / 72.27,
        _ => value,
    }
}

fn declared(re: &Regex, options: &str) -> Option<f64> {
    let caps = re.captures(options)?;
    let value: f64 = caps[1].parse().ok()?;
    let cm = to_cm(value, caps.get(2).map(|m| m.as_str()));
    (cm > 0.0).then_some(cm)
}

fn bounding_box(body: &str) -> Option<BoxSize> {
    let mut points = RE_COORD.captures_iter(body).filter_map(|c| {
        let x: f64 = c[1].parse().ok()?;
        let y: f64 = c[2].parse().ok()?;
        Some((x, y))
    });
    let (x0, y0) = points.next()?;
    let (mut min_x, mut max_x, mut min_y, mut max_y) = (x0, x0, y0, y0);
    for (x, y) in points {
        min_x = min_x.min(x);
        max_x = max_x.max(x);
        min_y = min_y.min(y);
        max_y = max_y.max(y);
    }
    Some(BoxSize {
        width_cm: (max_x - min_x).max(MIN_EDGE_CM),
        height_cm: (max_y - min_y).max(MIN_EDGE_CM),
    })
}

/// Infer the box size for one diagram from its options and body.
///
/// A declared width or height wins over the inferred one for that edge;
/// edges left unknown fall back to the bounding box, then to the default.
pub fn infer_size(options: &str, body: &str) -> BoxSize {
    let width = declared(&RE_WIDTH, options);
    let height = declared(&RE_HEIGHT, options);
    if let (Some(width_cm), Some(height_cm)) = (width, height) {
        return BoxSize { width_cm, height_cm };
    }
    let fallback = bounding_box(body).unwrap_or_default();
    BoxSize {
        width_cm: width.unwrap_or(fallback.width_cm),
        height_cm: height.unwrap_or(fallback.height_cm),
    }
}

/// The framed box that stands in for a diagram.
pub fn placeholder_box(env: &str, size: BoxSize) -> String {
    format!(
        "\\fbox{{\\parbox[c][{h:.2}cm][c]{{{w:.2}cm}}{{\\centering Diagram omitted ({env})}}}}",
        w = size.width_cm,
        h = size.height_cm,
    )
}

/// Byte ranges of `%` comments: from an unescaped `%` to the end of its line.
fn comment_spans(document: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut offset = 0;
    for line in document.split_inclusive('\n') {
        let bytes = line.as_bytes();
        let mut backslashes = 0usize;
        for (i, &b) in bytes.iter().enumerate() {
            if b == b'%' && backslashes % 2 == 0 {
                spans.push((offset + i, offset + line.len()));
                break;
            }
            backslashes = if b == b'\\' { backslashes + 1 } else { 0 };
        }
        offset += line.len();
    }
    spans
}

/// An outermost diagram block found by [`find_diagrams`].
#[derive(Debug, Clone, PartialEq, Eq)]
struct DiagramBlock {
    env: String,
    /// Byte range of the whole block, `\begin` through `\end{env}`.
    start: usize,
    end: usize,
    /// Byte range of the optional `[...]` argument, if present.
    options: Option<(usize, usize)>,
    /// Byte range between the options (or `\begin{env}`) and `\end{env}`.
    body: (usize, usize),
}

/// Locate outermost diagram blocks, tracking nesting depth and skipping
/// comments. A block whose closing tag does not match the open environment,
/// or that is never closed, is not reported.
fn find_diagrams(document: &str) -> Vec<DiagramBlock> {
    let comments = comment_spans(document);
    let in_comment = |pos: usize| comments.iter().any(|&(s, e)| pos >= s && pos < e);

    let mut blocks = Vec::new();
    let mut stack: Vec<&str> = Vec::new();
    let mut open: Option<(usize, Option<(usize, usize)>, usize)> = None;

    for caps in RE_DIAGRAM_TAG.captures_iter(document) {
        let tag = caps.get(0).map_or((0, 0), |m| (m.start(), m.end()));
        if in_comment(tag.0) {
            continue;
        }
        let env = caps.get(2).map_or("", |m| m.as_str());

        if &caps[1] == "begin" {
            if stack.is_empty() {
                let rest = &document[tag.1..];
                let options = rest
                    .strip_prefix('[')
                    .and_then(|r| r.find(']'))
                    .map(|close| (tag.1, tag.1 + close + 2));
                let body_start = options.map_or(tag.1, |(_, e)| e);
                open = Some((tag.0, options, body_start));
            }
            stack.push(env);
            continue;
        }

        match stack.last() {
            Some(&top) if top == env => {
                stack.pop();
                if stack.is_empty() {
                    if let Some((start, options, body_start)) = open.take() {
                        blocks.push(DiagramBlock {
                            env: env.to_string(),
                            start,
                            end: tag.1,
                            options,
                            body: (body_start, tag.0),
                        });
                    }
                }
            }
            Some(_) => {
                // Mismatched close: drop the enclosing block entirely.
                stack.clear();
                open = None;
            }
            None => {}
        }
    }
    blocks
}

/// Replace every outermost diagram environment with a sized placeholder box.
///
/// Returns the new text and the number of diagrams replaced. A block whose
/// closing environment name differs from its opening one is left alone.
pub fn replace_diagrams(document: &str) -> (String, usize) {
    let blocks = find_diagrams(document);
    if blocks.is_empty() {
        return (document.to_string(), 0);
    }

    let mut out = String::with_capacity(document.len());
    let mut cursor = 0;
    for block in &blocks {
        out.push_str(&document[cursor..block.start]);
        let options = block.options.map_or("", |(s, e)| &document[s..e]);
        let body = &document[block.body.0..block.body.1];
        out.push_str(&placeholder_box(&block.env, infer_size(options, body)));
        cursor = block.end;
    }
    out.push_str(&document[cursor..]);
    (out, blocks.len())
}
