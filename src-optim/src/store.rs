//! Bounded elite store backing the coordinated retry engine
//!
//! Keeps the best `(x, f)` results seen so far, sorted ascending by `f`,
//! deduplicated in normalized coordinates, with per-entry seed-production
//! counts for back-pressure. All mutation happens under the caller's lock;
//! the store itself is a plain single-threaded structure.

use std::path::Path;

use ndarray::Array1;
use rand::Rng;

use crate::problem::Bounds;
use crate::Error;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of entries (`K`).
    pub capacity: usize,
    /// Minimum normalized distance between entries with near-equal `f`;
    /// `None` derives `0.15 * sqrt(n)` from the problem dimension.
    pub dedup_radius: Option<f64>,
    /// Relative objective tolerance for deduplication: two entries within
    /// `dedup_radius` merge when `|Δf| < dedup_tolerance * max(1, |f|)`.
    pub dedup_tolerance: f64,
    /// Entries that produced more than this many seeds become ineligible as
    /// parents until displaced.
    pub count_max: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 500,
            dedup_radius: None,
            dedup_tolerance: 0.05,
            count_max: 50,
        }
    }
}

/// One elite solution. `y` is `f` normalized to `[0, 1]` over the current
/// store contents; `generation` is the admission ordinal; `count` tracks how
/// many seeds this entry has parented.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreEntry {
    pub x: Array1<f64>,
    pub f: f64,
    pub y: f64,
    pub generation: u64,
    pub count: u32,
}

pub struct RetryStore {
    entries: Vec<StoreEntry>,
    capacity: usize,
    dedup_radius: f64,
    dedup_tolerance: f64,
    count_max: u32,
    mid: Array1<f64>,
    scale: Array1<f64>,
    admitted: u64,
    best: Option<(Array1<f64>, f64)>,
}

impl RetryStore {
    pub fn new(bounds: &Bounds, cfg: StoreConfig) -> Result<Self, Error> {
        if cfg.capacity == 0 {
            return Err(Error::InvalidConfig("store capacity must be positive".into()));
        }
        let n = bounds.dim();
        Ok(Self {
            entries: Vec::with_capacity(cfg.capacity + 1),
            capacity: cfg.capacity,
            dedup_radius: cfg
                .dedup_radius
                .unwrap_or(0.15 * (n as f64).sqrt()),
            dedup_tolerance: cfg.dedup_tolerance,
            count_max: cfg.count_max,
            mid: bounds.midpoint(),
            scale: bounds.scale(),
            admitted: 0,
            best: None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries sorted ascending by `f`.
    pub fn entries(&self) -> &[StoreEntry] {
        &self.entries
    }

    /// Global best over everything ever admitted (survives eviction).
    pub fn best(&self) -> Option<(&Array1<f64>, f64)> {
        self.best.as_ref().map(|(x, f)| (x, *f))
    }

    pub fn best_f(&self) -> f64 {
        self.best.as_ref().map(|(_, f)| *f).unwrap_or(f64::INFINITY)
    }

    pub fn worst_f(&self) -> Option<f64> {
        self.entries.last().map(|e| e.f)
    }

    /// Euclidean distance in box-normalized coordinates `(x - m) / s`.
    pub fn normalized_distance(&self, a: &Array1<f64>, b: &Array1<f64>) -> f64 {
        let mut total = 0.0;
        for i in 0..a.len() {
            let d = (a[i] - b[i]) / self.scale[i];
            total += d * d;
        }
        total.sqrt()
    }

    /// Admit a run result. Non-finite values are discarded; near-duplicates
    /// merge keeping the better of the pair; overflow evicts the worst entry.
    /// Parent counts (by admission ordinal) are bumped for the seed that
    /// produced this result whether or not it is kept.
    pub fn admit(&mut self, x: Array1<f64>, f: f64, parents: Option<(u64, u64)>) -> bool {
        if let Some((pa, pb)) = parents {
            for entry in &mut self.entries {
                if entry.generation == pa || entry.generation == pb {
                    entry.count = entry.count.saturating_add(1);
                }
            }
        }
        if !f.is_finite() {
            return false;
        }

        let improved_best = self.best.as_ref().map(|(_, bf)| f < *bf).unwrap_or(true);
        if improved_best {
            self.best = Some((x.clone(), f));
        }

        // Nearest neighbour in normalized coordinates.
        let nearest = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, self.normalized_distance(&x, &e.x)))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        if let Some((idx, dist)) = nearest {
            let neighbour_f = self.entries[idx].f;
            let tol = self.dedup_tolerance * neighbour_f.abs().max(1.0);
            if dist < self.dedup_radius && (f - neighbour_f).abs() < tol {
                if f < neighbour_f {
                    let mut entry = self.entries.remove(idx);
                    entry.x = x;
                    entry.f = f;
                    entry.count = 0;
                    let pos = self.insertion_point(f);
                    self.entries.insert(pos, entry);
                    self.renormalize();
                    return true;
                }
                return false;
            }
        }

        self.admitted += 1;
        let entry = StoreEntry {
            x,
            f,
            y: 0.0,
            generation: self.admitted,
            count: 0,
        };
        let pos = self.insertion_point(f);
        self.entries.insert(pos, entry);
        if self.entries.len() > self.capacity {
            self.entries.pop();
        }
        self.renormalize();
        true
    }

    /// Two distinct parents sampled with probability strictly decreasing in
    /// rank; entries past the seed-count ceiling are skipped. Needs at least
    /// two eligible entries.
    pub fn sample_parents<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Option<(StoreEntry, StoreEntry)> {
        let eligible: Vec<usize> = (0..self.entries.len())
            .filter(|&i| self.entries[i].count <= self.count_max)
            .collect();
        if eligible.len() < 2 {
            return None;
        }
        let weights: Vec<f64> = (0..eligible.len()).map(|r| 1.0 / (r as f64 + 2.0)).collect();
        let first = weighted_draw(&weights, rng);
        let mut second = weighted_draw(&weights, rng);
        while second == first {
            second = weighted_draw(&weights, rng);
        }
        Some((
            self.entries[eligible[first]].clone(),
            self.entries[eligible[second]].clone(),
        ))
    }

    fn insertion_point(&self, f: f64) -> usize {
        self.entries
            .partition_point(|e| e.f <= f)
    }

    fn renormalize(&mut self) {
        let (lo, hi) = match (self.entries.first(), self.entries.last()) {
            (Some(first), Some(last)) => (first.f, last.f),
            _ => return,
        };
        let span = (hi - lo).max(f64::MIN_POSITIVE);
        for entry in &mut self.entries {
            entry.y = (entry.f - lo) / span;
        }
    }

    /// Checkpoint the store as flat `(f, x[0..n-1])` CSV records.
    pub fn save_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let mut writer = csv::Writer::from_path(path)?;
        for entry in &self.entries {
            let mut record = Vec::with_capacity(entry.x.len() + 1);
            record.push(format!("{:.17e}", entry.f));
            for &xi in entry.x.iter() {
                record.push(format!("{:.17e}", xi));
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Re-admit checkpointed records through the normal admission protocol.
    /// Returns the number of records admitted.
    pub fn load_csv<P: AsRef<Path>>(&mut self, path: P) -> Result<usize, Error> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)?;
        let mut admitted = 0;
        for record in reader.records() {
            let record = record?;
            let mut values = Vec::with_capacity(record.len());
            for field in record.iter() {
                match field.trim().parse::<f64>() {
                    Ok(v) => values.push(v),
                    Err(_) => {
                        log::warn!("skipping malformed checkpoint record");
                        values.clear();
                        break;
                    }
                }
            }
            if values.len() != self.mid.len() + 1 {
                continue;
            }
            let f = values[0];
            let x = Array1::from_vec(values[1..].to_vec());
            if self.admit(x, f, None) {
                admitted += 1;
            }
        }
        Ok(admitted)
    }
}

fn weighted_draw<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> usize {
    let total: f64 = weights.iter().sum();
    let mut draw = rng.random::<f64>() * total;
    for (i, &w) in weights.iter().enumerate() {
        draw -= w;
        if draw <= 0.0 {
            return i;
        }
    }
    weights.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn unit_store(capacity: usize) -> RetryStore {
        let bounds = Bounds::new(
            Array1::from_elem(2, -1.0),
            Array1::from_elem(2, 1.0),
        )
        .unwrap();
        RetryStore::new(
            &bounds,
            StoreConfig {
                capacity,
                ..StoreConfig::default()
            },
        )
        .unwrap()
    }

    fn point(a: f64, b: f64) -> Array1<f64> {
        Array1::from_vec(vec![a, b])
    }

    #[test]
    fn test_sorted_and_bounded() {
        let mut store = unit_store(5);
        for i in 0..20 {
            let v = ((i * 7) % 13) as f64;
            store.admit(point(v / 13.0, -v / 13.0), v, None);
        }
        assert!(store.len() <= 5);
        let fs: Vec<f64> = store.entries().iter().map(|e| e.f).collect();
        for pair in fs.windows(2) {
            assert!(pair[0] <= pair[1], "store out of order: {:?}", fs);
        }
        // Global best survives even though only 5 entries are kept.
        assert_eq!(store.best_f(), 0.0);
    }

    #[test]
    fn test_rejects_non_finite() {
        let mut store = unit_store(5);
        assert!(!store.admit(point(0.0, 0.0), f64::INFINITY, None));
        assert!(!store.admit(point(0.0, 0.0), f64::NAN, None));
        assert!(store.is_empty());
    }

    #[test]
    fn test_dedup_keeps_better() {
        let mut store = unit_store(10);
        assert!(store.admit(point(0.5, 0.5), 1.0, None));
        // Same place, slightly worse: dropped.
        assert!(!store.admit(point(0.5001, 0.5), 1.01, None));
        assert_eq!(store.len(), 1);
        // Same place, slightly better: merged in place.
        assert!(store.admit(point(0.4999, 0.5), 0.99, None));
        assert_eq!(store.len(), 1);
        assert_eq!(store.entries()[0].f, 0.99);
        // Same place but a very different value: genuinely new entry.
        assert!(store.admit(point(0.5, 0.4999), 50.0, None));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_parent_counts_and_backpressure() {
        let bounds = Bounds::new(
            Array1::from_elem(2, -1.0),
            Array1::from_elem(2, 1.0),
        )
        .unwrap();
        let mut store = RetryStore::new(
            &bounds,
            StoreConfig {
                capacity: 10,
                count_max: 1,
                ..StoreConfig::default()
            },
        )
        .unwrap();
        store.admit(point(-0.9, -0.9), 1.0, None);
        store.admit(point(0.0, 0.0), 2.0, None);
        store.admit(point(0.9, 0.9), 3.0, None);

        let mut rng = StdRng::seed_from_u64(5);
        assert!(store.sample_parents(&mut rng).is_some());

        let (ga, gb) = (store.entries()[0].generation, store.entries()[1].generation);
        store.admit(point(0.3, -0.7), 4.0, Some((ga, gb)));
        store.admit(point(-0.3, 0.7), 5.0, Some((ga, gb)));
        let counts: Vec<u32> = store.entries().iter().map(|e| e.count).collect();
        assert!(counts.iter().filter(|&&c| c == 2).count() == 2);

        // Two entries are now past count_max = 1; three remain eligible.
        let eligible = store
            .entries()
            .iter()
            .filter(|e| e.count <= 1)
            .count();
        assert_eq!(eligible, 3);
        assert!(store.sample_parents(&mut rng).is_some());
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let mut store = unit_store(10);
        store.admit(point(0.1, 0.2), 3.0, None);
        store.admit(point(-0.5, 0.9), 1.0, None);
        store.admit(point(0.8, -0.8), 2.0, None);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.csv");
        store.save_csv(&path).unwrap();

        let mut restored = unit_store(10);
        let loaded = restored.load_csv(&path).unwrap();
        assert_eq!(loaded, 3);
        assert_eq!(restored.len(), 3);
        assert_eq!(restored.best_f(), 1.0);
        let fs: Vec<f64> = restored.entries().iter().map(|e| e.f).collect();
        assert_eq!(fs, vec![1.0, 2.0, 3.0]);
    }
}
