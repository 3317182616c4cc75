use crate::modules::config::{RewardMode, SimConfig};
use crate::modules::genetics::Genetics;
use crate::modules::slots::Pid;

/// Recomputes family sizes and writes a reward for every agent that is alive
/// or died this tick. Other slots keep their previous reward and their stale
/// family size. Returns the sum of the rewards written.
///
/// Afterwards the current family sizes become the previous ones.
pub fn compute_rewards(
    config: &SimConfig,
    genetics: &mut Genetics,
    alive_mask: &[u8],
    alive_pids: &[Pid],
    terminals: &[u8],
    rewards: &mut [f32],
) -> f32 {
    let gene_count = genetics.gene_count();
    let mut total = 0.0;

    for pid in 0..alive_mask.len() {
        if alive_mask[pid] == 0 && terminals[pid] == 0 {
            continue;
        }
        let family = genetics.family_size(pid as Pid, alive_pids);
        let (families, prev_families) = genetics.family_ledgers_mut();
        families[pid] = family;
        let prev = prev_families[pid];

        let reward = if gene_count == 0 {
            0.0
        } else {
            match config.reward_mode {
                RewardMode::Delta => delta_reward(family, prev, gene_count),
                RewardMode::GrowthRate => {
                    if family == 0 {
                        assert!(
                            terminals[pid] != 0,
                            "agent {} has no family but is still alive",
                            pid
                        );
                    }
                    growth_rate_reward(family, prev, config.extinction_reward)
                }
            }
        };
        rewards[pid] = reward;
        total += reward;
    }

    genetics.commit_family_sizes();
    total
}

pub fn delta_reward(family: u16, prev: u16, gene_count: usize) -> f32 {
    (family as f32 - prev as f32) / gene_count as f32
}

/// Log growth of the family. Losing a family of `n > 1` in one tick scores
/// the extinction penalty plus `ln(1/n)`, so dying out all at once is never
/// better than dying out one by one.
pub fn growth_rate_reward(family: u16, prev: u16, extinction_reward: f32) -> f32 {
    if family == 0 {
        let mut reward = extinction_reward;
        if prev > 1 {
            reward += ln_f32(1.0 / prev as f32);
        }
        reward
    } else {
        ln_f32(family as f32 / prev as f32)
    }
}

fn ln_f32(x: f32) -> f32 {
    (x as f64).ln() as f32
}
