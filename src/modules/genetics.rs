use rand::Rng;

use crate::modules::grid::Grid;
use crate::modules::slots::Pid;

/// Genomes, the pairwise kinship matrix and the family-size ledger.
///
/// The matrix is only written when an agent is born or founded: the new
/// agent's row and column are filled against every agent alive at that
/// moment. Deaths leave it untouched, so a dead agent's final family size can
/// still be computed in the tick it dies.
#[derive(Debug, Clone)]
pub struct Genetics {
    gene_count: usize,
    allele_count: usize,
    genomes: Grid<u8>,
    kinship: Grid<u8>,
    family_sizes: Vec<u16>,
    prev_family_sizes: Vec<u16>,
}

impl Genetics {
    pub fn new(max_agents: usize, gene_count: usize, allele_count: usize) -> Self {
        let mut genetics = Self {
            gene_count,
            allele_count,
            genomes: Grid::filled(gene_count, max_agents, 0),
            kinship: Grid::filled(max_agents, max_agents, 0),
            family_sizes: vec![0; max_agents],
            prev_family_sizes: vec![0; max_agents],
        };
        genetics.reset();
        genetics
    }

    pub fn gene_count(&self) -> usize {
        self.gene_count
    }

    pub fn max_agents(&self) -> usize {
        self.kinship.width()
    }

    /// Zeroes the matrix and the previous family sizes; every agent is fully
    /// related to itself.
    pub fn reset(&mut self) {
        self.kinship.fill(0);
        let n = self.max_agents();
        for pid in 0..n {
            *self.kinship.get_mut(pid, pid) = self.gene_count as u8;
        }
        self.prev_family_sizes.iter_mut().for_each(|f| *f = 0);
    }

    pub fn genome(&self, pid: Pid) -> &[u8] {
        let start = pid as usize * self.gene_count;
        &self.genomes.cells()[start..start + self.gene_count]
    }

    pub fn genome_mut(&mut self, pid: Pid) -> &mut [u8] {
        let start = pid as usize * self.gene_count;
        &mut self.genomes.cells_mut()[start..start + self.gene_count]
    }

    pub fn genomes(&self) -> &[u8] {
        self.genomes.cells()
    }

    pub fn kinship_matrix(&self) -> &[u8] {
        self.kinship.cells()
    }

    /// Number of loci at which the two genomes carry the same allele.
    pub fn kinship(&self, a: Pid, b: Pid) -> u8 {
        self.genome(a)
            .iter()
            .zip(self.genome(b))
            .filter(|(x, y)| x == y)
            .count() as u8
    }

    #[inline]
    pub fn kinship_entry(&self, a: Pid, b: Pid) -> u8 {
        *self.kinship.get(a as usize, b as usize)
    }

    pub fn randomize_genome<R: Rng + ?Sized>(&mut self, pid: Pid, rng: &mut R) {
        let alleles = self.allele_count;
        for gene in self.genome_mut(pid) {
            *gene = rng.gen_range(0..alleles) as u8;
        }
    }

    pub fn copy_genome(&mut self, from: Pid, to: Pid) {
        let source = self.genome(from).to_vec();
        self.genome_mut(to).copy_from_slice(&source);
    }

    /// Gives `child` a genome mixed locus by locus from both parents and
    /// registers it in the matrix.
    pub fn on_birth<R: Rng + ?Sized>(
        &mut self,
        child: Pid,
        parent_a: Pid,
        parent_b: Pid,
        alive_mask: &[u8],
        rng: &mut R,
    ) {
        for locus in 0..self.gene_count {
            let parent = if rng.gen_range(0..2) == 0 {
                parent_a
            } else {
                parent_b
            };
            let allele = self.genome(parent)[locus];
            self.genome_mut(child)[locus] = allele;
        }
        self.register(child, alive_mask);
    }

    /// Fills `pid`'s row and column against every other slot flagged in
    /// `alive_mask` and seeds its previous family size with the result.
    pub fn register(&mut self, pid: Pid, alive_mask: &[u8]) {
        let mut family = self.gene_count as u16;
        for (other, &alive) in alive_mask.iter().enumerate() {
            if alive == 0 || other == pid as usize {
                continue;
            }
            let k = self.kinship(pid, other as Pid);
            *self.kinship.get_mut(pid as usize, other) = k;
            *self.kinship.get_mut(other, pid as usize) = k;
            family += k as u16;
        }
        self.prev_family_sizes[pid as usize] = family;
    }

    /// Sum of kinship between `pid` and every agent in `alive`, itself
    /// included.
    pub fn family_size(&self, pid: Pid, alive: &[Pid]) -> u16 {
        let row = &self.kinship.cells()[pid as usize * self.max_agents()..][..self.max_agents()];
        alive.iter().map(|&other| row[other as usize] as u16).sum()
    }

    pub fn family_sizes(&self) -> &[u16] {
        &self.family_sizes
    }

    pub fn prev_family_sizes(&self) -> &[u16] {
        &self.prev_family_sizes
    }

    pub(crate) fn family_ledgers_mut(&mut self) -> (&mut [u16], &mut [u16]) {
        (&mut self.family_sizes, &mut self.prev_family_sizes)
    }

    pub(crate) fn commit_family_sizes(&mut self) {
        self.prev_family_sizes.copy_from_slice(&self.family_sizes);
    }

    /// Sum over loci of the Shannon entropy (bits) of the allele frequencies
    /// among `alive`.
    pub fn genetic_diversity(&self, alive: &[Pid]) -> f32 {
        if alive.is_empty() {
            return 0.0;
        }
        let mut counts = vec![0usize; self.gene_count * self.allele_count];
        for &pid in alive {
            for (locus, &allele) in self.genome(pid).iter().enumerate() {
                counts[locus * self.allele_count + allele as usize] += 1;
            }
        }
        let total = alive.len() as f32;
        counts
            .iter()
            .filter(|&&n| n > 0)
            .map(|&n| {
                let p = n as f32 / total;
                -p * p.log2()
            })
            .sum()
    }

    pub(crate) fn restore(
        &mut self,
        genomes: Vec<u8>,
        kinship: Vec<u8>,
        family_sizes: Vec<u16>,
        prev_family_sizes: Vec<u16>,
    ) -> bool {
        let n = self.max_agents();
        let (Some(genomes), Some(kinship)) = (
            Grid::from_cells(self.gene_count, n, genomes),
            Grid::from_cells(n, n, kinship),
        ) else {
            return false;
        };
        if family_sizes.len() != n || prev_family_sizes.len() != n {
            return false;
        }
        self.genomes = genomes;
        self.kinship = kinship;
        self.family_sizes = family_sizes;
        self.prev_family_sizes = prev_family_sizes;
        true
    }
}
