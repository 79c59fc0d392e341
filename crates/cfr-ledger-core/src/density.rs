//! Percentile-rank density scores.
//!
//! Density is words per structural unit (sections for a title, distinct
//! titles for an agency). Raw ratios are not comparable across entities of
//! very different size, so the score is a percentile rank instead: the
//! fraction of peers whose density is strictly lower.
//!
//! ```text
//! score = |{ peers with lower density }| / (n - 1)
//! ```
//!
//! Entities with zero units have no density and are left out of the
//! population (`None`). When exactly one entity has a density its score is
//! the midpoint, `0.5`.

/// Words and structural units for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DensityInput {
    pub words: i64,
    pub units: i64,
}

impl DensityInput {
    pub fn new(words: i64, units: i64) -> Self {
        Self { words, units }
    }

    /// Words per unit, or `None` when there are no units.
    pub fn density(&self) -> Option<f64> {
        if self.units > 0 {
            Some(self.words as f64 / self.units as f64)
        } else {
            None
        }
    }
}

/// Compute percentile scores for every input, in input order.
pub fn density_scores(inputs: &[DensityInput]) -> Vec<Option<f64>> {
    let mut population: Vec<f64> = inputs.iter().filter_map(DensityInput::density).collect();
    population.sort_by(|a, b| a.total_cmp(b));
    let n = population.len();

    inputs
        .iter()
        .map(|input| {
            let density = input.density()?;
            if n <= 1 {
                return Some(0.5);
            }
            let lower = population.partition_point(|d| *d < density);
            Some(lower as f64 / (n - 1) as f64)
        })
        .collect()
}
