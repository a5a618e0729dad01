//! Well-known text (WKT) parsing, reduced to what the compiler needs: the
//! geometry's bounding envelope.
//!
//! Supported types: `POINT`, `LINESTRING`, `POLYGON`, `MULTIPOINT`,
//! `MULTILINESTRING`, `MULTIPOLYGON` and `GEOMETRYCOLLECTION`, with optional
//! `Z`, `M` or `ZM` ordinates. Coordinates are `longitude latitude`.

use crate::error::{Error, Result};

/// Axis-aligned bounding box of a geometry, in degrees
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Envelope {
    /// Westernmost longitude
    pub min_lon: f64,
    /// Southernmost latitude
    pub min_lat: f64,
    /// Easternmost longitude
    pub max_lon: f64,
    /// Northernmost latitude
    pub max_lat: f64,
}

impl Envelope {
    fn of_point(lon: f64, lat: f64) -> Self {
        Self {
            min_lon: lon,
            min_lat: lat,
            max_lon: lon,
            max_lat: lat,
        }
    }

    fn expand(&mut self, other: &Envelope) {
        self.min_lon = self.min_lon.min(other.min_lon);
        self.min_lat = self.min_lat.min(other.min_lat);
        self.max_lon = self.max_lon.max(other.max_lon);
        self.max_lat = self.max_lat.max(other.max_lat);
    }
}

fn merge(acc: Option<Envelope>, next: Option<Envelope>) -> Option<Envelope> {
    match (acc, next) {
        (Some(mut a), Some(b)) => {
            a.expand(&b);
            Some(a)
        }
        (a, b) => a.or(b),
    }
}

/// Parse WKT and return the envelope of the geometry
///
/// Fails with [`Error::InvalidGeometry`] on malformed text, out-of-range
/// coordinates, unclosed polygon rings, or a geometry with no coordinates.
pub fn envelope(wkt: &str) -> Result<Envelope> {
    let mut parser = Parser::new(wkt)?;
    let envelope = parser.geometry()?;
    if let Some(token) = parser.next() {
        return Err(parser.error(format!("unexpected trailing {}", token.describe())));
    }
    envelope.ok_or_else(|| Error::invalid_geometry(wkt, "geometry is empty"))
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Word(String),
    Number(f64),
    Open,
    Close,
    Comma,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Word(w) => format!("'{w}'"),
            Token::Number(n) => format!("number {n}"),
            Token::Open => "'('".to_string(),
            Token::Close => "')'".to_string(),
            Token::Comma => "','".to_string(),
        }
    }
}

fn tokenize(wkt: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = wkt.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            c if c.is_ascii_alphabetic() => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if !c.is_ascii_alphabetic() {
                        break;
                    }
                    end = i + c.len_utf8();
                    chars.next();
                }
                tokens.push(Token::Word(wkt[start..end].to_ascii_uppercase()));
            }
            c if c.is_ascii_digit() || matches!(c, '-' | '+' | '.') => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if !(c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')) {
                        break;
                    }
                    end = i + c.len_utf8();
                    chars.next();
                }
                let text = &wkt[start..end];
                let value: f64 = text
                    .parse()
                    .map_err(|_| Error::invalid_geometry(wkt, format!("invalid number '{text}'")))?;
                tokens.push(Token::Number(value));
            }
            other => {
                return Err(Error::invalid_geometry(
                    wkt,
                    format!("unexpected character '{other}'"),
                ));
            }
        }
    }

    Ok(tokens)
}

/// Number of ordinates a coordinate carries
#[derive(Clone, Copy, Debug, PartialEq)]
enum Dimension {
    /// No tag: two to four ordinates accepted
    Unspecified,
    /// `Z` or `M`
    Three,
    /// `ZM`
    Four,
}

impl Dimension {
    fn accepts(&self, ordinates: usize) -> bool {
        match self {
            Dimension::Unspecified => (2..=4).contains(&ordinates),
            Dimension::Three => ordinates == 3,
            Dimension::Four => ordinates == 4,
        }
    }
}

struct Parser<'a> {
    wkt: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(wkt: &'a str) -> Result<Self> {
        Ok(Self {
            wkt,
            tokens: tokenize(wkt)?,
            pos: 0,
        })
    }

    fn error(&self, reason: impl Into<String>) -> Error {
        Error::invalid_geometry(self.wkt, reason)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(self.error(format!(
                "expected {}, found {}",
                expected.describe(),
                token.describe()
            ))),
            None => Err(self.error(format!(
                "expected {}, found end of input",
                expected.describe()
            ))),
        }
    }

    /// Consume `EMPTY` if it is the next token
    fn take_empty(&mut self) -> bool {
        if matches!(self.peek(), Some(Token::Word(w)) if w == "EMPTY") {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn dimension(&mut self) -> Result<Dimension> {
        let dimension = match self.peek() {
            Some(Token::Word(w)) if w == "Z" || w == "M" => Dimension::Three,
            Some(Token::Word(w)) if w == "ZM" => Dimension::Four,
            _ => return Ok(Dimension::Unspecified),
        };
        self.pos += 1;
        Ok(dimension)
    }

    /// A tagged geometry; `None` when it is `EMPTY`
    fn geometry(&mut self) -> Result<Option<Envelope>> {
        let kind = match self.next() {
            Some(Token::Word(kind)) => kind,
            Some(token) => {
                return Err(self.error(format!("expected geometry type, found {}", token.describe())));
            }
            None => return Err(self.error("empty input")),
        };
        let dimension = self.dimension()?;
        if self.take_empty() {
            return Ok(None);
        }

        match kind.as_str() {
            "POINT" => {
                self.expect(Token::Open)?;
                let point = self.coordinate(dimension)?;
                self.expect(Token::Close)?;
                Ok(Some(point))
            }
            "LINESTRING" => self.line(dimension, 2).map(Some),
            "POLYGON" => self.polygon(dimension).map(Some),
            "MULTIPOINT" => self.list(|p| p.multipoint_member(dimension)),
            "MULTILINESTRING" => self.list(|p| p.member(|p| p.line(dimension, 2))),
            "MULTIPOLYGON" => self.list(|p| p.member(|p| p.polygon(dimension))),
            "GEOMETRYCOLLECTION" => self.list(|p| p.geometry()),
            other => Err(self.error(format!("unsupported geometry type '{other}'"))),
        }
    }

    /// `( item , item ... )`, merging the items' envelopes
    fn list<F>(&mut self, mut item: F) -> Result<Option<Envelope>>
    where
        F: FnMut(&mut Self) -> Result<Option<Envelope>>,
    {
        self.expect(Token::Open)?;
        let mut acc = item(self)?;
        loop {
            match self.next() {
                Some(Token::Comma) => acc = merge(acc, item(self)?),
                Some(Token::Close) => return Ok(acc),
                Some(token) => {
                    return Err(self.error(format!("expected ',' or ')', found {}", token.describe())));
                }
                None => return Err(self.error("unterminated coordinate list")),
            }
        }
    }

    /// A member of a multi-geometry, which may be `EMPTY`
    fn member<F>(&mut self, body: F) -> Result<Option<Envelope>>
    where
        F: FnOnce(&mut Self) -> Result<Envelope>,
    {
        if self.take_empty() {
            return Ok(None);
        }
        body(self).map(Some)
    }

    /// MULTIPOINT members appear both as `1 2` and as `(1 2)`
    fn multipoint_member(&mut self, dimension: Dimension) -> Result<Option<Envelope>> {
        if self.take_empty() {
            return Ok(None);
        }
        if self.peek() == Some(&Token::Open) {
            self.pos += 1;
            let point = self.coordinate(dimension)?;
            self.expect(Token::Close)?;
            Ok(Some(point))
        } else {
            self.coordinate(dimension).map(Some)
        }
    }

    fn polygon(&mut self, dimension: Dimension) -> Result<Envelope> {
        self.expect(Token::Open)?;
        let mut envelope = self.ring(dimension)?;
        loop {
            match self.next() {
                Some(Token::Comma) => {
                    // holes lie inside the shell, but a malformed hole still fails
                    let hole = self.ring(dimension)?;
                    envelope.expand(&hole);
                }
                Some(Token::Close) => return Ok(envelope),
                Some(token) => {
                    return Err(self.error(format!("expected ',' or ')', found {}", token.describe())));
                }
                None => return Err(self.error("unterminated polygon")),
            }
        }
    }

    fn ring(&mut self, dimension: Dimension) -> Result<Envelope> {
        let (envelope, first, last, count) = self.points(dimension)?;
        if count < 4 {
            return Err(self.error(format!("polygon ring has {count} points, at least 4 required")));
        }
        if first != last {
            return Err(self.error("polygon ring is not closed"));
        }
        Ok(envelope)
    }

    fn line(&mut self, dimension: Dimension, min_points: usize) -> Result<Envelope> {
        let (envelope, _, _, count) = self.points(dimension)?;
        if count < min_points {
            return Err(self.error(format!(
                "linestring has {count} points, at least {min_points} required"
            )));
        }
        Ok(envelope)
    }

    /// `( x y, x y, ... )` returning envelope, first and last point, and count
    fn points(&mut self, dimension: Dimension) -> Result<(Envelope, (f64, f64), (f64, f64), usize)> {
        self.expect(Token::Open)?;
        let mut envelope = self.coordinate(dimension)?;
        let first = (envelope.min_lon, envelope.min_lat);
        let mut last = first;
        let mut count = 1;
        loop {
            match self.next() {
                Some(Token::Comma) => {
                    let point = self.coordinate(dimension)?;
                    last = (point.min_lon, point.min_lat);
                    envelope.expand(&point);
                    count += 1;
                }
                Some(Token::Close) => return Ok((envelope, first, last, count)),
                Some(token) => {
                    return Err(self.error(format!("expected ',' or ')', found {}", token.describe())));
                }
                None => return Err(self.error("unterminated coordinate list")),
            }
        }
    }

    fn coordinate(&mut self, dimension: Dimension) -> Result<Envelope> {
        let mut ordinates = Vec::with_capacity(4);
        while let Some(Token::Number(value)) = self.peek() {
            ordinates.push(*value);
            self.pos += 1;
        }
        if !dimension.accepts(ordinates.len()) {
            return Err(self.error(format!(
                "coordinate has {} ordinates, expected {}",
                ordinates.len(),
                match dimension {
                    Dimension::Unspecified => "2 to 4",
                    Dimension::Three => "3",
                    Dimension::Four => "4",
                }
            )));
        }

        let (lon, lat) = (ordinates[0], ordinates[1]);
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(self.error(format!("longitude {lon} outside [-180, 180]")));
        }
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(self.error(format!("latitude {lat} outside [-90, 90]")));
        }
        Ok(Envelope::of_point(lon, lat))
    }
}
