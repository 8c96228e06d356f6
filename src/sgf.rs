//! Just enough SGF to replay archived game records: the main sequence of
//! B/W moves plus the root handicap (`HA`) and setup-stone (`AB`) properties.
//!
//! Parsing follows the main line only and stops at the end of the first
//! game tree; KGS-style archives do not carry variations.

use anyhow::{bail, Context, Result};

use crate::board::{Player, Point};

/// Parsed game record: setup stones plus the ordered move sequence.
#[derive(Clone, Debug)]
pub struct SgfRecord {
    handicap: u32,
    setup_stones: Vec<Point>,
    moves: Vec<(Player, Option<Point>)>,
}

impl SgfRecord {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).context("sgf record is not valid utf-8")?;
        let mut parser = Parser {
            chars: text.char_indices().peekable(),
            text,
        };
        parser.parse_record()
    }

    /// Declared handicap count (`HA`), 0 when absent.
    pub fn handicap(&self) -> u32 {
        self.handicap
    }

    /// Stones placed for Black before play begins (`AB`).
    pub fn setup_stones(&self) -> &[Point] {
        &self.setup_stones
    }

    /// Move events in order; `None` is a pass.
    pub fn moves(&self) -> &[(Player, Option<Point>)] {
        &self.moves
    }
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    text: &'a str,
}

impl<'a> Parser<'a> {
    fn parse_record(&mut self) -> Result<SgfRecord> {
        let mut record = SgfRecord {
            handicap: 0,
            setup_stones: Vec::new(),
            moves: Vec::new(),
        };
        let mut depth = 0u32;
        while let Some((_, c)) = self.chars.next() {
            match c {
                '(' => depth += 1,
                // End of the first game tree ends the main line.
                ')' => break,
                ';' => {
                    if depth == 0 {
                        bail!("sgf node outside of any game tree");
                    }
                    self.parse_node(&mut record)?;
                }
                c if c.is_whitespace() => {}
                other => bail!("unexpected character '{other}' in sgf record"),
            }
        }
        if record.moves.is_empty() && record.setup_stones.is_empty() {
            bail!("sgf record contains no nodes");
        }
        Ok(record)
    }

    fn parse_node(&mut self, record: &mut SgfRecord) -> Result<()> {
        loop {
            self.skip_whitespace();
            let ident = self.read_ident();
            if ident.is_empty() {
                return Ok(());
            }
            let values = self.read_values()?;
            match ident.as_str() {
                "B" | "W" => {
                    let player = if ident == "B" { Player::Black } else { Player::White };
                    let value = values.first().map(String::as_str).unwrap_or("");
                    record.moves.push((player, decode_move(value)?));
                }
                "HA" => {
                    let value = values
                        .first()
                        .with_context(|| "HA property has no value".to_string())?;
                    record.handicap = value
                        .trim()
                        .parse()
                        .with_context(|| format!("invalid handicap value '{value}'"))?;
                }
                "AB" => {
                    for value in &values {
                        let point = decode_point(value)
                            .with_context(|| format!("invalid setup stone '{value}'"))?;
                        record.setup_stones.push(point);
                    }
                }
                _ => {}
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn read_ident(&mut self) -> String {
        let mut ident = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_uppercase() {
                ident.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        ident
    }

    fn read_values(&mut self) -> Result<Vec<String>> {
        let mut values = Vec::new();
        loop {
            self.skip_whitespace();
            match self.chars.peek() {
                Some(&(_, '[')) => {
                    self.chars.next();
                    values.push(self.read_value()?);
                }
                _ => break,
            }
        }
        Ok(values)
    }

    fn read_value(&mut self) -> Result<String> {
        let mut value = String::new();
        loop {
            match self.chars.next() {
                Some((_, '\\')) => {
                    if let Some((_, escaped)) = self.chars.next() {
                        value.push(escaped);
                    }
                }
                Some((_, ']')) => return Ok(value),
                Some((_, c)) => value.push(c),
                None => bail!("unterminated property value near end of '{}'", self.text),
            }
        }
    }
}

fn decode_move(value: &str) -> Result<Option<Point>> {
    // An empty value is a pass; "tt" is the historical pass encoding for
    // boards up to 19x19.
    if value.is_empty() || value == "tt" {
        return Ok(None);
    }
    decode_point(value).map(Some)
}

fn decode_point(value: &str) -> Result<Point> {
    let mut chars = value.chars();
    let (col_c, row_c) = match (chars.next(), chars.next(), chars.next()) {
        (Some(col), Some(row), None) => (col, row),
        _ => bail!("coordinate '{value}' is not two characters"),
    };
    let col = coord_index(col_c).with_context(|| format!("bad column in '{value}'"))?;
    let row = coord_index(row_c).with_context(|| format!("bad row in '{value}'"))?;
    Ok(Point::new(row + 1, col + 1))
}

fn coord_index(c: char) -> Result<u32> {
    if c.is_ascii_lowercase() {
        Ok(c as u32 - 'a' as u32)
    } else {
        bail!("coordinate letter '{c}' out of range")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_game() {
        let record = SgfRecord::parse(b"(;FF[4]SZ[19];B[dd];W[pp];B[dp])").unwrap();
        assert_eq!(record.handicap(), 0);
        assert!(record.setup_stones().is_empty());
        assert_eq!(
            record.moves(),
            &[
                (Player::Black, Some(Point::new(4, 4))),
                (Player::White, Some(Point::new(16, 16))),
                (Player::Black, Some(Point::new(16, 4))),
            ]
        );
    }

    #[test]
    fn parses_handicap_and_setup_stones() {
        let record = SgfRecord::parse(b"(;FF[4]SZ[19]HA[2]AB[dd][pp];W[qq];B[dp])").unwrap();
        assert_eq!(record.handicap(), 2);
        assert_eq!(
            record.setup_stones(),
            &[Point::new(4, 4), Point::new(16, 16)]
        );
        assert_eq!(record.moves().len(), 2);
        assert_eq!(record.moves()[0].0, Player::White);
    }

    #[test]
    fn empty_and_tt_values_are_passes() {
        let record = SgfRecord::parse(b"(;SZ[19];B[];W[tt];B[dd])").unwrap();
        assert_eq!(record.moves()[0].1, None);
        assert_eq!(record.moves()[1].1, None);
        assert_eq!(record.moves()[2].1, Some(Point::new(4, 4)));
    }

    #[test]
    fn escaped_brackets_in_comments_are_ignored() {
        let record = SgfRecord::parse(b"(;SZ[19]C[a \\] bracket];B[dd])").unwrap();
        assert_eq!(record.moves().len(), 1);
    }

    #[test]
    fn variations_are_cut_at_main_line_end() {
        // The first ')' closes the main sequence; the sibling branch is
        // never reached.
        let record = SgfRecord::parse(b"(;SZ[19];B[dd];W[pp])").unwrap();
        assert_eq!(record.moves().len(), 2);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(SgfRecord::parse(b"not an sgf").is_err());
        assert!(SgfRecord::parse(b"(;B[d)").is_err());
        assert!(SgfRecord::parse(b"()").is_err());
    }
}
