//! Wire format for per-frame observations.
//!
//! A request is a whitespace separated token stream:
//! `<won:0|1> <player_x> <tile_0> ... <tile_{k-1}> END` where `k = (2v+1)^2`
//! and `v` is the vision size (half-width of the square grid around the player).

use crate::error::{Error, Result};

/// Literal sentinel closing every request and response.
pub const SENTINEL: &str = "END";

/// Square tile grid centred on the player, stored row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    side: usize,
    tiles: Vec<i16>,
}

impl Grid {
    pub fn new(side: usize, tiles: Vec<i16>) -> Result<Self> {
        if side == 0 || side % 2 == 0 || tiles.len() != side * side {
            return Err(Error::GridSizeMismatch {
                expected: side,
                got: isqrt(tiles.len()),
            });
        }
        Ok(Self { side, tiles })
    }

    /// All-zero grid for a given vision size.
    pub fn empty(vision_size: usize) -> Self {
        let side = side_for_vision(vision_size);
        Self {
            side,
            tiles: vec![0; side * side],
        }
    }

    pub fn side(&self) -> usize {
        self.side
    }

    pub fn vision_size(&self) -> usize {
        (self.side - 1) / 2
    }

    pub fn tiles(&self) -> &[i16] {
        &self.tiles
    }

    pub fn get(&self, row: usize, col: usize) -> Option<i16> {
        if row >= self.side || col >= self.side {
            return None;
        }
        self.tiles.get(row * self.side + col).copied()
    }

    /// Flattened network input.
    pub fn to_input(&self) -> Vec<f32> {
        self.tiles.iter().map(|&t| t as f32).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameObservation {
    pub won: bool,
    pub player_x: i32,
    pub grid: Grid,
}

impl FrameObservation {
    pub fn vision_size(&self) -> usize {
        self.grid.vision_size()
    }
}

#[inline]
pub fn side_for_vision(vision_size: usize) -> usize {
    2 * vision_size + 1
}

/// Vision size from the raw token count of a message (sentinel included).
///
/// `floor((sqrt(n - 2) - 1) / 2)`; for well-formed messages this equals
/// `(side - 1) / 2`. Returns `None` when there are too few tokens.
pub fn vision_size_for_tokens(token_count: usize) -> Option<usize> {
    if token_count < 3 {
        return None;
    }
    let root = ((token_count - 2) as f64).sqrt();
    let v = ((root - 1.0) / 2.0).floor();
    if v < 0.0 {
        return None;
    }
    Some(v as usize)
}

fn isqrt(n: usize) -> usize {
    let mut r = (n as f64).sqrt() as usize;
    while r * r > n {
        r -= 1;
    }
    while (r + 1) * (r + 1) <= n {
        r += 1;
    }
    r
}

/// Parse one request message.
pub fn decode(raw: &str) -> Result<FrameObservation> {
    let tokens: Vec<&str> = raw.split_ascii_whitespace().collect();

    match tokens.last() {
        Some(&SENTINEL) => {}
        Some(_) => return Err(Error::malformed("missing END sentinel")),
        None => return Err(Error::malformed("empty message")),
    }
    if tokens.len() < 3 {
        return Err(Error::malformed(format!(
            "expected at least 3 tokens, got {}",
            tokens.len()
        )));
    }

    let won_flag: i32 = tokens[0]
        .parse()
        .map_err(|_| Error::malformed(format!("bad win flag '{}'", tokens[0])))?;
    let player_x: i32 = tokens[1]
        .parse()
        .map_err(|_| Error::malformed(format!("bad player x '{}'", tokens[1])))?;

    let tile_tokens = &tokens[2..tokens.len() - 1];
    let side = isqrt(tile_tokens.len());
    if tile_tokens.is_empty() || side * side != tile_tokens.len() || side % 2 == 0 {
        return Err(Error::GridSizeMismatch {
            expected: side_for_vision(vision_size_for_tokens(tokens.len()).unwrap_or(0)),
            got: side,
        });
    }

    let mut tiles = Vec::with_capacity(tile_tokens.len());
    for (i, tok) in tile_tokens.iter().enumerate() {
        let tile: i16 = tok
            .parse()
            .map_err(|_| Error::malformed(format!("bad tile '{tok}' at index {i}")))?;
        tiles.push(tile);
    }

    Ok(FrameObservation {
        won: won_flag == 1,
        player_x,
        grid: Grid { side, tiles },
    })
}

/// Build the wire form of an observation.
pub fn encode(obs: &FrameObservation) -> String {
    let mut out = String::with_capacity(8 + obs.grid.tiles.len() * 3);
    out.push_str(if obs.won { "1" } else { "0" });
    out.push(' ');
    out.push_str(&obs.player_x.to_string());
    for t in &obs.grid.tiles {
        out.push(' ');
        out.push_str(&t.to_string());
    }
    out.push(' ');
    out.push_str(SENTINEL);
    out
}
