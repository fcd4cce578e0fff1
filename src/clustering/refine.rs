//! Optional clustering refinement.
//!
//! Stage 0 (greedy rule-based) always runs first; when enough interests are
//! available, this stage sweeps several candidate partitionings over a
//! feature matrix and keeps the winner only if its quality beats the
//! configured gate. Quality is the same metric the post-filter uses: mean
//! pairwise compatibility within clusters. On any shortfall the caller
//! falls back to the stage-0 result, so this module is free to be picky.

use chrono::{DateTime, Datelike, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::compat::{self, CompatWeights};
use crate::model::Interest;

const FEATURES: usize = 9;
const MAX_CLUSTERS: usize = 8;
const KMEANS_SEED: u64 = 42;
const KMEANS_INITS: usize = 10;
const KMEANS_MAX_ITERS: usize = 25;
const DENSITY_RADII: [f64; 4] = [0.3, 0.5, 0.8, 1.0];

/// Attempts a refined partitioning. Returns `None` when no candidate clears
/// `quality_threshold`; the caller then keeps the stage-0 clusters.
pub fn refine(
    interests: &[Interest],
    now: DateTime<Utc>,
    weights: &CompatWeights,
    quality_threshold: f64,
) -> Option<Vec<Vec<usize>>> {
    let n = interests.len();
    if n < 4 {
        return None;
    }

    let features = robust_scale(feature_matrix(interests, now));
    let k_max = (n / 3).clamp(2, MAX_CLUSTERS);

    struct Candidate {
        label: String,
        partition: Vec<Vec<usize>>,
        quality: f64,
    }

    let mut best: Option<Candidate> = None;

    let mut consider = |label: String, partition: Vec<Vec<usize>>| {
        let quality = partition_quality(&partition, interests, now, weights);
        if quality <= 0.0 {
            return;
        }
        let clusters = partition.len();
        let replace = match &best {
            None => true,
            // Strictly-better quality wins; on a tie the earlier algorithm
            // stands unless the newcomer uses fewer clusters.
            Some(b) => {
                quality > b.quality + 1e-9
                    || ((quality - b.quality).abs() <= 1e-9 && clusters < b.partition.len())
            }
        };
        if replace {
            best = Some(Candidate {
                label,
                partition,
                quality,
            });
        }
    };

    for k in 2..=k_max {
        consider(format!("agglomerative_{k}"), ward_partition(&features, k));
    }
    for k in 2..=k_max {
        consider(format!("kmeans_{k}"), kmeans_partition(&features, k));
    }
    for eps in DENSITY_RADII {
        consider(format!("density_{eps}"), density_partition(&features, eps, 2));
    }

    let winner = best?;
    debug!(
        algorithm = %winner.label,
        quality = winner.quality,
        clusters = winner.partition.len(),
        "refinement winner"
    );

    (winner.quality >= quality_threshold).then_some(winner.partition)
}

/// Mean over clusters (of at least two members) of intra-cluster average
/// pairwise compatibility, weighted by member count.
pub fn partition_quality(
    partition: &[Vec<usize>],
    interests: &[Interest],
    now: DateTime<Utc>,
    weights: &CompatWeights,
) -> f64 {
    let mut total = 0.0;
    let mut weight = 0usize;

    for cluster in partition {
        if cluster.len() < 2 {
            continue;
        }
        let members: Vec<&Interest> = cluster.iter().map(|&i| &interests[i]).collect();
        total += compat::mean_pairwise(&members, now, weights) * cluster.len() as f64;
        weight += cluster.len();
    }

    if weight == 0 { 0.0 } else { total / weight as f64 }
}

/* =========================
 * Feature engineering
 * ========================= */

fn feature_matrix(interests: &[Interest], now: DateTime<Utc>) -> Vec<[f64; FEATURES]> {
    interests
        .iter()
        .map(|i| {
            let center = i.date_from + (i.date_to - i.date_from) / 2;
            let (budget_mid, budget_range) = match i.budget_range() {
                Some((lo, hi)) => ((lo + hi) / 2.0 / 1_000.0, (hi - lo) / 1_000.0),
                None => (0.0, 0.0),
            };
            let month = i.date_from.month();

            [
                (center.timestamp() / 86_400) as f64,
                i.duration_days() as f64,
                i.lead_time_days(now) as f64,
                budget_mid,
                budget_range,
                i.party_size as f64,
                season(month) as f64,
                size_category(i.party_size) as f64,
                month as f64,
            ]
        })
        .collect()
}

fn season(month: u32) -> u32 {
    match month {
        12 | 1 | 2 => 0,
        3..=5 => 1,
        6..=8 => 2,
        _ => 3,
    }
}

fn size_category(party: u32) -> u32 {
    if party <= 2 {
        0
    } else if party <= 6 {
        1
    } else {
        2
    }
}

/// Median/IQR scaling per column; constant columns are only centered.
fn robust_scale(mut rows: Vec<[f64; FEATURES]>) -> Vec<[f64; FEATURES]> {
    for col in 0..FEATURES {
        let mut values: Vec<f64> = rows.iter().map(|r| r[col]).collect();
        values.sort_by(|a, b| a.total_cmp(b));

        let median = quantile(&values, 0.5);
        let iqr = quantile(&values, 0.75) - quantile(&values, 0.25);

        for row in rows.iter_mut() {
            row[col] -= median;
            if iqr > 0.0 {
                row[col] /= iqr;
            }
        }
    }
    rows
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = pos - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

fn sq_dist(a: &[f64; FEATURES], b: &[f64; FEATURES]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/* =========================
 * Agglomerative (Ward)
 * ========================= */

/// Bottom-up Ward-linkage agglomeration to `k` clusters, Lance-Williams
/// distance updates over squared Euclidean distances.
fn ward_partition(features: &[[f64; FEATURES]], k: usize) -> Vec<Vec<usize>> {
    let n = features.len();
    if k >= n {
        return (0..n).map(|i| vec![i]).collect();
    }

    let mut clusters: Vec<Option<Vec<usize>>> = (0..n).map(|i| Some(vec![i])).collect();
    let mut sizes: Vec<usize> = vec![1; n];
    let mut dist: Vec<Vec<f64>> = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = sq_dist(&features[i], &features[j]);
            dist[i][j] = d;
            dist[j][i] = d;
        }
    }

    let mut active = n;
    while active > k {
        // Find the closest active pair.
        let mut best = (usize::MAX, usize::MAX, f64::INFINITY);
        for i in 0..n {
            if clusters[i].is_none() {
                continue;
            }
            for j in (i + 1)..n {
                if clusters[j].is_none() {
                    continue;
                }
                if dist[i][j] < best.2 {
                    best = (i, j, dist[i][j]);
                }
            }
        }
        let (i, j, d_ij) = best;

        // Lance-Williams update for Ward linkage against every other
        // active cluster, merged cluster kept at index i.
        for m in 0..n {
            if m == i || m == j || clusters[m].is_none() {
                continue;
            }
            let (ni, nj, nm) = (sizes[i] as f64, sizes[j] as f64, sizes[m] as f64);
            let updated = ((ni + nm) * dist[i][m] + (nj + nm) * dist[j][m] - nm * d_ij)
                / (ni + nj + nm);
            dist[i][m] = updated;
            dist[m][i] = updated;
        }

        let merged = clusters[j].take().unwrap();
        clusters[i].as_mut().unwrap().extend(merged);
        sizes[i] += sizes[j];
        active -= 1;
    }

    clusters.into_iter().flatten().collect()
}

/* =========================
 * K-means
 * ========================= */

fn kmeans_partition(features: &[[f64; FEATURES]], k: usize) -> Vec<Vec<usize>> {
    let n = features.len();
    if k >= n {
        return (0..n).map(|i| vec![i]).collect();
    }

    let mut best_assignment: Vec<usize> = Vec::new();
    let mut best_inertia = f64::INFINITY;

    for init in 0..KMEANS_INITS {
        // Deterministic seeding keeps refinement reproducible run to run.
        let mut rng = ChaCha8Rng::seed_from_u64(KMEANS_SEED + init as u64);

        let mut centroids: Vec<[f64; FEATURES]> = Vec::with_capacity(k);
        let mut picked: Vec<usize> = Vec::with_capacity(k);
        while picked.len() < k {
            let idx = rng.gen_range(0..n);
            if !picked.contains(&idx) {
                picked.push(idx);
                centroids.push(features[idx]);
            }
        }

        let mut assignment = vec![0usize; n];
        for _ in 0..KMEANS_MAX_ITERS {
            let mut moved = false;
            for (i, point) in features.iter().enumerate() {
                let nearest = (0..k)
                    .min_by(|&a, &b| {
                        sq_dist(point, &centroids[a]).total_cmp(&sq_dist(point, &centroids[b]))
                    })
                    .unwrap();
                if assignment[i] != nearest {
                    assignment[i] = nearest;
                    moved = true;
                }
            }

            for c in 0..k {
                let members: Vec<&[f64; FEATURES]> = features
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| assignment[*i] == c)
                    .map(|(_, f)| f)
                    .collect();
                if members.is_empty() {
                    continue;
                }
                let mut mean = [0.0; FEATURES];
                for m in &members {
                    for (dst, src) in mean.iter_mut().zip(m.iter()) {
                        *dst += src;
                    }
                }
                for v in mean.iter_mut() {
                    *v /= members.len() as f64;
                }
                centroids[c] = mean;
            }

            if !moved {
                break;
            }
        }

        let inertia: f64 = features
            .iter()
            .enumerate()
            .map(|(i, p)| sq_dist(p, &centroids[assignment[i]]))
            .sum();
        if inertia < best_inertia {
            best_inertia = inertia;
            best_assignment = assignment;
        }
    }

    let mut out: Vec<Vec<usize>> = vec![Vec::new(); k];
    for (i, &c) in best_assignment.iter().enumerate() {
        out[c].push(i);
    }
    out.retain(|c| !c.is_empty());
    out
}

/* =========================
 * Density-based
 * ========================= */

fn density_partition(
    features: &[[f64; FEATURES]],
    eps: f64,
    min_samples: usize,
) -> Vec<Vec<usize>> {
    let n = features.len();
    let eps_sq = eps * eps;

    let neighbors = |i: usize| -> Vec<usize> {
        (0..n)
            .filter(|&j| j != i && sq_dist(&features[i], &features[j]) <= eps_sq)
            .collect()
    };

    const UNVISITED: usize = usize::MAX;
    const NOISE: usize = usize::MAX - 1;
    let mut labels = vec![UNVISITED; n];
    let mut next_label = 0usize;

    for i in 0..n {
        if labels[i] != UNVISITED {
            continue;
        }
        let hood = neighbors(i);
        if hood.len() + 1 < min_samples {
            labels[i] = NOISE;
            continue;
        }

        let label = next_label;
        next_label += 1;
        labels[i] = label;

        let mut queue = hood;
        while let Some(j) = queue.pop() {
            if labels[j] == NOISE {
                labels[j] = label;
            }
            if labels[j] != UNVISITED {
                continue;
            }
            labels[j] = label;
            let jh = neighbors(j);
            if jh.len() + 1 >= min_samples {
                queue.extend(jh);
            }
        }
    }

    let mut out: Vec<Vec<usize>> = vec![Vec::new(); next_label];
    for (i, &label) in labels.iter().enumerate() {
        if label < next_label {
            out[label].push(i);
        }
    }
    out.retain(|c| !c.is_empty());
    out
}
