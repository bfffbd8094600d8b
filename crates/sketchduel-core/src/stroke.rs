//! Validation of drawing payloads before they are relayed or recorded.
//!
//! Live stroke paths are restricted to absolute or relative move/line
//! commands with plain decimal coordinates (`M 10 20 L 30.5,-4`). Anything
//! else (curves, arcs, exponents, stray characters) is rejected so a relayed
//! path can never smuggle markup into the opponent's canvas.

use crate::net::messages::{LiveStroke, TurnStroke};

pub const MAX_PATH_LEN: usize = 20_000;
pub const MAX_STROKE_ID_LEN: usize = 64;
pub const MAX_STROKE_WIDTH: f64 = 200.0;
pub const MAX_STROKES_PER_TURN: usize = 500;
pub const MAX_POINTS_PER_STROKE: usize = 5_000;
const MAX_COLOR_NAME_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrokeError {
    BadId,
    PathTooLong(usize),
    BadPath(usize),
    BadColor(String),
    BadWidth,
    TooManyStrokes(usize),
    TooManyPoints(usize),
    EmptyStroke,
    NonFiniteCoordinate,
}

impl std::fmt::Display for StrokeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadId => write!(f, "stroke id must be 1-{MAX_STROKE_ID_LEN} characters"),
            Self::PathTooLong(len) => {
                write!(f, "stroke path too long: {len} chars (max {MAX_PATH_LEN})")
            },
            Self::BadPath(pos) => write!(f, "unsupported stroke path at offset {pos}"),
            Self::BadColor(c) => write!(f, "invalid stroke color: {c:?}"),
            Self::BadWidth => write!(f, "stroke width must be in (0, {MAX_STROKE_WIDTH}]"),
            Self::TooManyStrokes(n) => {
                write!(f, "too many strokes: {n} (max {MAX_STROKES_PER_TURN})")
            },
            Self::TooManyPoints(n) => {
                write!(f, "too many points in stroke: {n} (max {MAX_POINTS_PER_STROKE})")
            },
            Self::EmptyStroke => write!(f, "stroke has no points"),
            Self::NonFiniteCoordinate => write!(f, "stroke coordinates must be finite"),
        }
    }
}

impl std::error::Error for StrokeError {}

/// Validate a live `draw_stroke` payload.
pub fn validate_live_stroke(stroke: &LiveStroke) -> Result<(), StrokeError> {
    if stroke.id.is_empty()
        || stroke.id.len() > MAX_STROKE_ID_LEN
        || stroke.id.chars().any(char::is_control)
    {
        return Err(StrokeError::BadId);
    }
    validate_width(stroke.stroke_width)?;
    validate_color(&stroke.color)?;
    validate_path(&stroke.path)
}

/// Validate the stroke list of a `submit_turn`. An empty list is a valid
/// (blank) turn.
pub fn validate_turn_strokes(strokes: &[TurnStroke]) -> Result<(), StrokeError> {
    if strokes.len() > MAX_STROKES_PER_TURN {
        return Err(StrokeError::TooManyStrokes(strokes.len()));
    }
    for stroke in strokes {
        if stroke.points.is_empty() {
            return Err(StrokeError::EmptyStroke);
        }
        if stroke.points.len() > MAX_POINTS_PER_STROKE {
            return Err(StrokeError::TooManyPoints(stroke.points.len()));
        }
        if stroke
            .points
            .iter()
            .any(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(StrokeError::NonFiniteCoordinate);
        }
        validate_width(stroke.width)?;
        validate_color(&stroke.color)?;
    }
    Ok(())
}

fn validate_width(width: f64) -> Result<(), StrokeError> {
    if width.is_finite() && width > 0.0 && width <= MAX_STROKE_WIDTH {
        Ok(())
    } else {
        Err(StrokeError::BadWidth)
    }
}

/// A color is either `#` plus 3, 4, 6 or 8 hex digits, or a bare
/// alphabetic name such as `red`.
pub fn validate_color(color: &str) -> Result<(), StrokeError> {
    let ok = if let Some(hex) = color.strip_prefix('#') {
        matches!(hex.len(), 3 | 4 | 6 | 8) && hex.bytes().all(|b| b.is_ascii_hexdigit())
    } else {
        !color.is_empty()
            && color.len() <= MAX_COLOR_NAME_LEN
            && color.bytes().all(|b| b.is_ascii_alphabetic())
    };
    if ok {
        Ok(())
    } else {
        Err(StrokeError::BadColor(color.chars().take(MAX_COLOR_NAME_LEN).collect()))
    }
}

/// Check a path against the move/line grammar:
///
/// ```text
/// path    := sep* segment (sep* segment)* sep*
/// segment := ('M'|'m'|'L'|'l') sep* pair (sep+ pair)*
/// pair    := number sep+ number
/// number  := '-'? (digits ('.' digits?)? | '.' digits)
/// ```
pub fn validate_path(path: &str) -> Result<(), StrokeError> {
    if path.len() > MAX_PATH_LEN {
        return Err(StrokeError::PathTooLong(path.len()));
    }
    let mut cursor = PathCursor {
        bytes: path.as_bytes(),
        pos: 0,
    };
    cursor.skip_separators();
    if cursor.at_end() {
        return Err(StrokeError::BadPath(0));
    }
    let mut first = true;
    while !cursor.at_end() {
        let cmd = cursor.bytes[cursor.pos];
        let valid_cmd = if first {
            matches!(cmd, b'M' | b'm')
        } else {
            matches!(cmd, b'M' | b'm' | b'L' | b'l')
        };
        if !valid_cmd {
            return Err(StrokeError::BadPath(cursor.pos));
        }
        cursor.pos += 1;
        first = false;

        // At least one coordinate pair per command, then any number more.
        cursor.skip_separators();
        cursor.pair()?;
        loop {
            let had_sep = cursor.skip_separators();
            if cursor.at_end() || cursor.peek_is_command() {
                break;
            }
            if !had_sep {
                return Err(StrokeError::BadPath(cursor.pos));
            }
            cursor.pair()?;
        }
    }
    Ok(())
}

struct PathCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl PathCursor<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek_is_command(&self) -> bool {
        matches!(
            self.bytes.get(self.pos),
            Some(b'M' | b'm' | b'L' | b'l')
        )
    }

    /// Skip whitespace and commas; returns whether anything was skipped.
    fn skip_separators(&mut self) -> bool {
        let start = self.pos;
        while let Some(&b) = self.bytes.get(self.pos) {
            if b.is_ascii_whitespace() || b == b',' {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.pos > start
    }

    fn pair(&mut self) -> Result<(), StrokeError> {
        self.number()?;
        if !self.skip_separators() {
            // A leading '-' is a valid separator in SVG, but we require an
            // explicit one to keep the grammar unambiguous.
            return Err(StrokeError::BadPath(self.pos));
        }
        self.number()
    }

    fn number(&mut self) -> Result<(), StrokeError> {
        let start = self.pos;
        if self.bytes.get(self.pos) == Some(&b'-') {
            self.pos += 1;
        }
        let int_digits = self.digits();
        let mut frac_digits = 0;
        if self.bytes.get(self.pos) == Some(&b'.') {
            self.pos += 1;
            frac_digits = self.digits();
        }
        if int_digits == 0 && frac_digits == 0 {
            return Err(StrokeError::BadPath(start));
        }
        Ok(())
    }

    fn digits(&mut self) -> usize {
        let start = self.pos;
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_digit())
        {
            self.pos += 1;
        }
        self.pos - start
    }
}
