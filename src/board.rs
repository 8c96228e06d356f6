//! Minimal Go game state driven by the replay loop.
//!
//! The packer only needs stone placement and side-to-move tracking to feed
//! the encoder; capture, ko, and legality resolution belong to a full rules
//! engine and are out of scope here.

/// Stone colour / side to move.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Player {
    Black,
    White,
}

impl Player {
    pub fn other(self) -> Player {
        match self {
            Player::Black => Player::White,
            Player::White => Player::Black,
        }
    }
}

/// 1-based board coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Point {
    pub row: u32,
    pub col: u32,
}

impl Point {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Move {
    Play(Point),
    Pass,
}

#[derive(Clone, Debug)]
pub struct Board {
    size: u32,
    grid: Vec<Option<Player>>,
}

impl Board {
    pub fn new(size: u32) -> Self {
        Self {
            size,
            grid: vec![None; (size * size) as usize],
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn place_stone(&mut self, player: Player, point: Point) {
        let idx = self.index(point);
        self.grid[idx] = Some(player);
    }

    pub fn stone_at(&self, point: Point) -> Option<Player> {
        self.grid[self.index(point)]
    }

    fn index(&self, point: Point) -> usize {
        ((point.row - 1) * self.size + (point.col - 1)) as usize
    }
}

/// Mutable replay cursor: board plus side to move and last move.
#[derive(Clone, Debug)]
pub struct GameState {
    board: Board,
    next_player: Player,
    last_move: Option<Move>,
}

impl GameState {
    pub fn new_game(board_size: u32) -> Self {
        Self {
            board: Board::new(board_size),
            next_player: Player::Black,
            last_move: None,
        }
    }

    /// Construct a mid-game state, e.g. after handicap stones were placed.
    pub fn from_setup(board: Board, next_player: Player, last_move: Option<Move>) -> Self {
        Self {
            board,
            next_player,
            last_move,
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn next_player(&self) -> Player {
        self.next_player
    }

    pub fn last_move(&self) -> Option<Move> {
        self.last_move
    }

    pub fn apply_move(&mut self, mv: Move) {
        if let Move::Play(point) = mv {
            self.board.place_stone(self.next_player, point);
        }
        self.next_player = self.next_player.other();
        self.last_move = Some(mv);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_play_places_stone_and_flips_side() {
        let mut state = GameState::new_game(9);
        assert_eq!(state.next_player(), Player::Black);
        state.apply_move(Move::Play(Point::new(3, 3)));
        assert_eq!(state.board().stone_at(Point::new(3, 3)), Some(Player::Black));
        assert_eq!(state.next_player(), Player::White);
    }

    #[test]
    fn apply_pass_only_flips_side() {
        let mut state = GameState::new_game(9);
        state.apply_move(Move::Pass);
        assert_eq!(state.next_player(), Player::White);
        assert_eq!(state.last_move(), Some(Move::Pass));
        assert_eq!(state.board().stone_at(Point::new(1, 1)), None);
    }

    #[test]
    fn setup_state_keeps_placed_stones() {
        let mut board = Board::new(19);
        board.place_stone(Player::Black, Point::new(4, 4));
        board.place_stone(Player::Black, Point::new(16, 16));
        let state = GameState::from_setup(board, Player::White, None);
        assert_eq!(state.next_player(), Player::White);
        assert_eq!(state.board().stone_at(Point::new(4, 4)), Some(Player::Black));
    }
}
