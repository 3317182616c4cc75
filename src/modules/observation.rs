use crate::modules::config::{
    MAX_FOOD_CARRIED, MAX_FOOD_STORED, MAX_HP, MAX_SATIATION, MAX_STONE_CARRIED,
    OBSERVED_MAX_AGE, STONE_PER_DEPOSIT, VISION_RADIUS, WALL_HP_MAX, YEAR_LENGTH,
};
use crate::modules::genetics::Genetics;
use crate::modules::grid::World;
use crate::modules::slots::{Pid, SlotAllocator};

/// Bytes per vision-window cell before the genes.
const CELL_FIELDS: usize = 11;
/// Self block: food, stone, hp, satiation, age, role, then genes.
const SELF_FIELDS: usize = 6;
/// Row, column, day, family size, population.
const CULTURAL_FIELDS: usize = 5;

pub fn window_side() -> usize {
    2 * VISION_RADIUS as usize + 1
}

/// Bytes in one agent's observation record.
pub fn record_size(gene_count: usize) -> usize {
    window_side() * window_side() * (CELL_FIELDS + gene_count)
        + SELF_FIELDS
        + gene_count
        + CULTURAL_FIELDS
}

/// Linearly maps `value` from `[min, max]` onto `0..=255`, clamping first.
pub fn to_byte(value: f32, min: f32, max: f32) -> u8 {
    let value = value.clamp(min, max);
    ((value - min) / (max - min) * 255.0).round() as u8
}

/// Writes the record of every listed alive agent at `pid * record_size`.
/// Records of dead slots are left as they were.
///
/// # Panics
///
/// If a record does not end exactly at its slot boundary.
pub fn encode_all(
    world: &World,
    slots: &SlotAllocator,
    genetics: &Genetics,
    out: &mut [u8],
) {
    let gene_count = genetics.gene_count();
    let size = record_size(gene_count);
    for &pid in slots.alive_pids() {
        let start = pid as usize * size;
        let written = encode_agent(world, slots, genetics, pid, &mut out[start..start + size]);
        assert_eq!(
            written, size,
            "observation for agent {} wrote {} bytes, record is {}",
            pid, written, size
        );
    }
}

fn encode_agent(
    world: &World,
    slots: &SlotAllocator,
    genetics: &Genetics,
    pid: Pid,
    record: &mut [u8],
) -> usize {
    let gene_count = genetics.gene_count();
    let agent = slots.agent(pid);
    let mut at = 0;

    for dr in -VISION_RADIUS..=VISION_RADIUS {
        for dc in -VISION_RADIUS..=VISION_RADIUS {
            let (tr, tc) = world.tiles().offset(agent.r, agent.c, dr, dc);
            let tile = world.tile(tr, tc);
            let cell = &mut record[at..at + CELL_FIELDS + gene_count];

            cell[0] = world.is_soil(tr, tc) as u8;
            cell[1] = world.growth_days(tr, tc) as u8;
            cell[2] = to_byte(tile.stored_food as f32, 0.0, MAX_FOOD_STORED as f32);
            cell[3] = to_byte(tile.stone as f32, 0.0, STONE_PER_DEPOSIT as f32);
            cell[4] = to_byte(tile.wall_hp as f32, 0.0, WALL_HP_MAX as f32);

            match world.occupant(tr, tc) {
                Some(other) => {
                    let seen = slots.agent(other);
                    cell[5] = to_byte(genetics.kinship(pid, other) as f32, 0.0, 1.0);
                    cell[6] = to_byte(seen.hp as f32, 0.0, MAX_HP as f32);
                    cell[7] = to_byte(seen.age as f32, 0.0, OBSERVED_MAX_AGE);
                    cell[8] = to_byte(seen.satiation as f32, 0.0, MAX_SATIATION as f32);
                    cell[9] = seen.facing.index() as u8 + 1;
                    cell[10] = seen.role + 1;
                    for (slot, &gene) in cell[CELL_FIELDS..].iter_mut().zip(genetics.genome(other)) {
                        *slot = gene + 1;
                    }
                }
                None => cell[5..].fill(0),
            }
            at += CELL_FIELDS + gene_count;
        }
    }

    let own = &mut record[at..at + SELF_FIELDS + gene_count];
    own[0] = to_byte(agent.food_carried as f32, 0.0, MAX_FOOD_CARRIED as f32);
    own[1] = to_byte(agent.stone_carried as f32, 0.0, MAX_STONE_CARRIED as f32);
    own[2] = to_byte(agent.hp as f32, 0.0, MAX_HP as f32);
    own[3] = to_byte(agent.satiation as f32, 0.0, MAX_SATIATION as f32);
    own[4] = to_byte(agent.age as f32, 0.0, OBSERVED_MAX_AGE);
    own[5] = agent.role;
    own[SELF_FIELDS..].copy_from_slice(genetics.genome(pid));
    at += SELF_FIELDS + gene_count;

    let max_agents = slots.capacity() as f32;
    let cultural = &mut record[at..at + CULTURAL_FIELDS];
    cultural[0] = to_byte(agent.r as f32, 0.0, world.height() as f32);
    cultural[1] = to_byte(agent.c as f32, 0.0, world.width() as f32);
    cultural[2] = to_byte(world.day() as f32, 0.0, YEAR_LENGTH as f32);
    cultural[3] = to_byte(genetics.family_sizes()[pid as usize] as f32, 0.0, max_agents);
    cultural[4] = to_byte(slots.alive_count() as f32, 0.0, max_agents);
    at + CULTURAL_FIELDS
}
