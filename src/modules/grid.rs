use serde::{Deserialize, Serialize};

use crate::modules::action::Direction;
use crate::modules::config::{
    CROP_GROWTH_K, MAX_GROWTH_DURATION, STARTING_DAY, STONE_PER_DEPOSIT, SUMMER_DURATION,
    WALL_HP_MAX, YEAR_LENGTH,
};
use crate::modules::slots::Pid;
use crate::modules::terrain::Terrain;

/// Row-major dense grid on a torus. All stride and wrap arithmetic lives here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid<T> {
    width: usize,
    height: usize,
    cells: Vec<T>,
}

impl<T: Clone> Grid<T> {
    pub fn filled(width: usize, height: usize, value: T) -> Self {
        Self {
            width,
            height,
            cells: vec![value; width * height],
        }
    }

    pub fn fill(&mut self, value: T) {
        self.cells.iter_mut().for_each(|cell| *cell = value.clone());
    }
}

impl<T> Grid<T> {
    pub fn from_cells(width: usize, height: usize, cells: Vec<T>) -> Option<Self> {
        (cells.len() == width * height).then_some(Self {
            width,
            height,
            cells,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn cells(&self) -> &[T] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [T] {
        &mut self.cells
    }

    /// Wraps a signed coordinate pair onto the torus.
    #[inline]
    pub fn wrap(&self, r: i32, c: i32) -> (usize, usize) {
        (
            r.rem_euclid(self.height as i32) as usize,
            c.rem_euclid(self.width as i32) as usize,
        )
    }

    #[inline]
    pub fn index(&self, r: usize, c: usize) -> usize {
        debug_assert!(r < self.height && c < self.width);
        r * self.width + c
    }

    #[inline]
    pub fn get(&self, r: usize, c: usize) -> &T {
        &self.cells[self.index(r, c)]
    }

    #[inline]
    pub fn get_mut(&mut self, r: usize, c: usize) -> &mut T {
        let idx = self.index(r, c);
        &mut self.cells[idx]
    }

    /// Cell reached from `(r, c)` by a signed offset, wrapped.
    #[inline]
    pub fn offset(&self, r: usize, c: usize, dr: i32, dc: i32) -> (usize, usize) {
        self.wrap(r as i32 + dr, c as i32 + dc)
    }

    /// Neighbour one step in `dir`.
    #[inline]
    pub fn step(&self, r: usize, c: usize, dir: Direction) -> (usize, usize) {
        let (dr, dc) = dir.delta();
        self.offset(r, c, dr, dc)
    }
}

/// Resource and wall counters of one cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    /// Day of the year the crop on this cell last started growing.
    pub last_harvest: u16,
    pub stored_food: u16,
    pub stone: u16,
    pub wall_hp: u16,
}

/// The world grid: terrain, per-cell counters, occupancy and the calendar.
#[derive(Debug, Clone)]
pub struct World {
    pub(crate) tick: u32,
    pub(crate) is_winter: bool,
    terrain: Terrain,
    tiles: Grid<Tile>,
    occupants: Grid<Option<Pid>>,
}

impl World {
    pub fn new(terrain: Terrain) -> Self {
        let (width, height) = (terrain.width(), terrain.height());
        Self {
            tick: 0,
            is_winter: false,
            terrain,
            tiles: Grid::filled(width, height, Tile::default()),
            occupants: Grid::filled(width, height, None),
        }
    }

    pub fn width(&self) -> usize {
        self.tiles.width()
    }

    pub fn height(&self) -> usize {
        self.tiles.height()
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn is_winter(&self) -> bool {
        self.is_winter
    }

    /// Day of the year for the current tick; summer is `0..SUMMER_DURATION`.
    pub fn day(&self) -> u32 {
        day_of_year(self.tick)
    }

    pub fn terrain(&self) -> &Terrain {
        &self.terrain
    }

    pub fn tiles(&self) -> &Grid<Tile> {
        &self.tiles
    }

    pub fn occupants(&self) -> &Grid<Option<Pid>> {
        &self.occupants
    }

    #[inline]
    pub fn wrap(&self, r: i32, c: i32) -> (usize, usize) {
        self.tiles.wrap(r, c)
    }

    #[inline]
    pub fn step(&self, r: usize, c: usize, dir: Direction) -> (usize, usize) {
        self.tiles.step(r, c, dir)
    }

    #[inline]
    pub fn tile(&self, r: usize, c: usize) -> &Tile {
        self.tiles.get(r, c)
    }

    #[inline]
    pub(crate) fn tile_mut(&mut self, r: usize, c: usize) -> &mut Tile {
        self.tiles.get_mut(r, c)
    }

    #[inline]
    pub fn is_soil(&self, r: usize, c: usize) -> bool {
        self.terrain.is_soil(r, c)
    }

    #[inline]
    pub fn occupant(&self, r: usize, c: usize) -> Option<Pid> {
        *self.occupants.get(r, c)
    }

    pub(crate) fn set_occupant(&mut self, r: usize, c: usize, pid: Option<Pid>) {
        *self.occupants.get_mut(r, c) = pid;
    }

    pub fn is_blocked(&self, r: usize, c: usize) -> bool {
        let tile = self.tile(r, c);
        tile.wall_hp > 0 || tile.stone > 0 || self.occupant(r, c).is_some()
    }

    /// Erects a full-strength wall, wiping any crop, stored food or stone.
    pub fn place_wall(&mut self, r: usize, c: usize) {
        let tile = self.tile_mut(r, c);
        if tile.wall_hp > 0 {
            return;
        }
        *tile = Tile {
            wall_hp: WALL_HP_MAX,
            ..Tile::default()
        };
    }

    /// Removes a wall. On summer soil the crop starts growing again today.
    pub fn destroy_wall(&mut self, r: usize, c: usize) {
        if self.tile(r, c).wall_hp == 0 {
            return;
        }
        let regrow = !self.is_winter && self.is_soil(r, c);
        let today = self.day() as u16;
        let tile = self.tile_mut(r, c);
        tile.wall_hp = 0;
        if regrow {
            tile.last_harvest = today;
        }
    }

    /// Days the crop on this cell has been growing, capped.
    pub fn growth_days(&self, r: usize, c: usize) -> i32 {
        let tile = self.tile(r, c);
        if self.is_winter
            || !self.is_soil(r, c)
            || tile.stored_food > 0
            || tile.stone > 0
            || tile.wall_hp > 0
        {
            return 0;
        }
        let days = self.day() as i32 - tile.last_harvest as i32;
        days.clamp(0, MAX_GROWTH_DURATION)
    }

    /// Food that harvesting this cell would yield right now.
    pub fn crop_available(&self, r: usize, c: usize) -> i32 {
        crop_yield(self.growth_days(r, c))
    }

    /// Restarts crop growth on every soil cell (start of summer).
    pub(crate) fn start_crop_growth(&mut self) {
        for (tile, &soil) in self
            .tiles
            .cells_mut()
            .iter_mut()
            .zip(self.terrain.cells().iter())
        {
            if soil {
                tile.last_harvest = 0;
            }
        }
    }

    /// First unblocked cell around `(r, c)`, scanned row by row.
    pub fn find_empty_neighbour(&self, r: usize, c: usize) -> Option<(usize, usize)> {
        for dr in -1..=1 {
            for dc in -1..=1 {
                if dr == 0 && dc == 0 {
                    continue;
                }
                let (tr, tc) = self.tiles.offset(r, c, dr, dc);
                if !self.is_blocked(tr, tc) {
                    return Some((tr, tc));
                }
            }
        }
        None
    }

    /// Clears tiles and occupancy, rewinds the calendar and seeds the stone
    /// deposits at the quarter points and the centre.
    pub(crate) fn reset(&mut self) {
        self.tick = 0;
        self.is_winter = false;
        self.tiles.fill(Tile::default());
        self.occupants.fill(None);

        let (h, w) = (self.height(), self.width());
        for ri in 0..2 {
            for ci in 0..2 {
                let r = ((0.25 + ri as f64 * 0.5) * h as f64) as usize;
                let c = ((0.25 + ci as f64 * 0.5) * w as f64) as usize;
                self.tile_mut(r, c).stone = STONE_PER_DEPOSIT;
            }
        }
        self.tile_mut(h / 2, w / 2).stone = STONE_PER_DEPOSIT;
    }

    pub(crate) fn restore(&mut self, tiles: Grid<Tile>, occupants: Grid<Option<Pid>>) {
        self.tiles = tiles;
        self.occupants = occupants;
    }
}

pub fn day_of_year(tick: u32) -> u32 {
    tick.wrapping_add(STARTING_DAY) % YEAR_LENGTH
}

pub fn is_summer_day(day: u32) -> bool {
    day < SUMMER_DURATION
}

/// Exponentially compounding crop yield after `days` of growth.
pub fn crop_yield(days: i32) -> i32 {
    if days <= 0 {
        return 0;
    }
    ((CROP_GROWTH_K * days as f64).exp() - 1.0) as i32
}
