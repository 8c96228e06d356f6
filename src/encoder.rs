//! Pluggable board-state encoders, selected by name.

use anyhow::{bail, Result};

use crate::board::{GameState, Point};

/// Strategy turning a game state into a feature tensor and a played point
/// into a label index.
pub trait Encoder: Send + Sync {
    fn name(&self) -> &str;

    /// Feature tensor shape as `[planes, rows, cols]`.
    fn shape(&self) -> [usize; 3];

    /// Encode the state before a move is applied, row-major over `shape()`.
    fn encode(&self, state: &GameState) -> Vec<f32>;

    /// Label index for a played point.
    fn encode_point(&self, point: Point) -> i64;

    /// Size of the label space (one-hot width).
    fn num_points(&self) -> usize;
}

/// Single-plane encoding: +1 for stones of the side to move, -1 for the
/// opponent, 0 for empty intersections.
pub struct OnePlaneEncoder {
    board_size: u32,
}

impl OnePlaneEncoder {
    pub fn new(board_size: u32) -> Self {
        Self { board_size }
    }
}

impl Encoder for OnePlaneEncoder {
    fn name(&self) -> &str {
        "oneplane"
    }

    fn shape(&self) -> [usize; 3] {
        let n = self.board_size as usize;
        [1, n, n]
    }

    fn encode(&self, state: &GameState) -> Vec<f32> {
        let n = self.board_size;
        let mut planes = Vec::with_capacity((n * n) as usize);
        for row in 1..=n {
            for col in 1..=n {
                let value = match state.board().stone_at(Point::new(row, col)) {
                    Some(player) if player == state.next_player() => 1.0,
                    Some(_) => -1.0,
                    None => 0.0,
                };
                planes.push(value);
            }
        }
        planes
    }

    fn encode_point(&self, point: Point) -> i64 {
        ((point.row - 1) * self.board_size + (point.col - 1)) as i64
    }

    fn num_points(&self) -> usize {
        (self.board_size * self.board_size) as usize
    }
}

type EncoderCtor = fn(u32) -> Box<dyn Encoder>;

const REGISTRY: &[(&str, EncoderCtor)] =
    &[("oneplane", |size| Box::new(OnePlaneEncoder::new(size)))];

/// Look up an encoder constructor by name and instantiate it for the given
/// board size.
pub fn get_encoder(name: &str, board_size: u32) -> Result<Box<dyn Encoder>> {
    for (key, ctor) in REGISTRY {
        if *key == name {
            return Ok(ctor(board_size));
        }
    }
    bail!("unknown encoder '{name}'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{GameState, Move};

    #[test]
    fn oneplane_is_relative_to_side_to_move() {
        let encoder = get_encoder("oneplane", 9).unwrap();
        let mut state = GameState::new_game(9);
        state.apply_move(Move::Play(Point::new(3, 3)));
        // Black stone on the board, White to move: the stone is an opponent
        // stone from White's perspective.
        let tensor = encoder.encode(&state);
        assert_eq!(tensor.len(), 81);
        assert_eq!(tensor[2 * 9 + 2], -1.0);
        assert_eq!(tensor.iter().filter(|&&v| v != 0.0).count(), 1);
    }

    #[test]
    fn point_labels_are_row_major() {
        let encoder = get_encoder("oneplane", 19).unwrap();
        assert_eq!(encoder.encode_point(Point::new(1, 1)), 0);
        assert_eq!(encoder.encode_point(Point::new(1, 19)), 18);
        assert_eq!(encoder.encode_point(Point::new(19, 19)), 360);
        assert_eq!(encoder.num_points(), 361);
    }

    #[test]
    fn unknown_encoder_is_an_error() {
        assert!(get_encoder("sevenplane", 19).is_err());
    }
}
