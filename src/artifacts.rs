//! Heartbeat artifact correction
//!
//! Chest belts occasionally miss a beat, report an extra one or place a beat
//! at the wrong time. [`ArtifactCorrector`] detects these from the successive
//! differences of the beat intervals and from their deviation to a running
//! median, both normalized by a rolling inter-quartile threshold, and repairs
//! the peak sequence. Detection and repair repeat while the number of detected
//! artifacts keeps decreasing.

use crate::stats::mean;
use tracing::debug;

/// Anything that can repair a sequence of heartbeat times
pub trait PeakCorrector {
    /// Return the corrected, non-decreasing peak times
    fn correct(&self, peaks: &[f64]) -> Vec<f64>;
}

/// Repairs nothing; useful for artifact-free reference data
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCorrection;

impl PeakCorrector for NoCorrection {
    fn correct(&self, peaks: &[f64]) -> Vec<f64> {
        peaks.to_vec()
    }
}

/// Ectopic, missed, extra and long/short beat corrector
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactCorrector {
    /// Peaks are expressed in units of `1 / sfreq` seconds
    pub sfreq: f64,
    pub c1: f64,
    pub c2: f64,
    pub alpha: f64,
    pub window_width: usize,
    pub medfilt_order: usize,
    /// Smallest interval difference the device can report, in interval units;
    /// the rolling threshold never drops below `alpha * resolution / 2`
    pub resolution: f64,
}

impl Default for ArtifactCorrector {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Artifact indices by class; an index `i` refers to peak `i` and interval `i`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifacts {
    pub ectopic: Vec<usize>,
    pub missed: Vec<usize>,
    pub extra: Vec<usize>,
    pub longshort: Vec<usize>,
}

impl Artifacts {
    pub fn count(&self) -> usize {
        self.ectopic.len() + self.missed.len() + self.extra.len() + self.longshort.len()
    }
}

impl ArtifactCorrector {
    pub fn new(sfreq: f64) -> Self {
        Self {
            sfreq,
            c1: 0.13,
            c2: 0.17,
            alpha: 5.2,
            window_width: 91,
            medfilt_order: 11,
            resolution: 1.0 / sfreq,
        }
    }

    /// Classify artifacts in a peak sequence
    pub fn find_artifacts(&self, peaks: &[f64]) -> Artifacts {
        let n = peaks.len();
        if n < 4 {
            return Artifacts::default();
        }

        let mut rr: Vec<f64> = std::iter::once(0.0)
            .chain(peaks.windows(2).map(|w| (w[1] - w[0]) / self.sfreq))
            .collect();
        rr[0] = mean(&rr[1..]);

        let mut drrs: Vec<f64> = std::iter::once(0.0)
            .chain(rr.windows(2).map(|w| w[1] - w[0]))
            .collect();
        drrs[0] = mean(&drrs[1..]);

        let th1 = self.threshold(&drrs);
        let drrs: Vec<f64> = drrs.iter().zip(&th1).map(|(d, t)| normalize(*d, *t)).collect();

        let padded = reflect_pad(&drrs, 2);
        let s12: Vec<f64> = (0..n)
            .map(|i| {
                let d = i + 2;
                if padded[d] > 0.0 {
                    padded[d - 1].max(padded[d + 1])
                } else if padded[d] < 0.0 {
                    padded[d - 1].min(padded[d + 1])
                } else {
                    0.0
                }
            })
            .collect();
        let s22: Vec<f64> = (0..n)
            .map(|i| {
                let d = i + 2;
                if padded[d] >= 0.0 {
                    padded[d + 1].min(padded[d + 2])
                } else {
                    padded[d + 1].max(padded[d + 2])
                }
            })
            .collect();

        let medrr = median_filter(&rr, self.medfilt_order);
        let mrrs: Vec<f64> = rr
            .iter()
            .zip(&medrr)
            .map(|(r, m)| {
                let dev = r - m;
                if dev < 0.0 {
                    dev * 2.0
                } else {
                    dev
                }
            })
            .collect();
        let th2 = self.threshold(&mrrs);
        let mrrs: Vec<f64> = mrrs.iter().zip(&th2).map(|(m, t)| normalize(*m, *t)).collect();

        let mut artifacts = Artifacts::default();
        let mut i = 0;
        while i + 2 < n {
            if drrs[i].abs() <= 1.0 && mrrs[i].abs() <= 3.0 {
                i += 1;
                continue;
            }

            let is_ectopic = (drrs[i] > 1.0 && s12[i] < -self.c1 * drrs[i] - self.c2)
                || (drrs[i] < -1.0 && s12[i] > -self.c1 * drrs[i] + self.c2);
            if is_ectopic {
                artifacts.ectopic.push(i);
                i += 1;
                continue;
            }

            let mut candidates = vec![i];
            if drrs[i + 1].abs() < drrs[i + 2].abs() {
                candidates.push(i + 1);
            }
            for j in candidates {
                let is_long = drrs[j] > 1.0 && s22[j] < -1.0;
                let is_short = drrs[j] < -1.0 && s22[j] > 1.0;
                if !(is_long || is_short) && mrrs[j].abs() <= 3.0 {
                    continue;
                }
                let is_missed = (rr[j] / 2.0 - medrr[j]).abs() < th2[j];
                let is_extra = j + 1 < n && (rr[j] + rr[j + 1] - medrr[j]).abs() < th2[j];
                if is_long && is_missed {
                    artifacts.missed.push(j);
                } else if is_short && is_extra {
                    artifacts.extra.push(j);
                } else if is_long || is_short {
                    artifacts.longshort.push(j);
                }
            }
            i += 1;
        }

        artifacts.missed.dedup();
        artifacts.extra.dedup();
        artifacts.longshort.dedup();
        artifacts
    }

    /// Repair a peak sequence given its classified artifacts
    pub fn correct_artifacts(&self, artifacts: &Artifacts, peaks: &[f64]) -> Vec<f64> {
        let mut corrected = peaks.to_vec();
        let mut missed = artifacts.missed.clone();
        let mut ectopic = artifacts.ectopic.clone();
        let mut longshort = artifacts.longshort.clone();

        if !artifacts.extra.is_empty() {
            corrected = remove_extra(&artifacts.extra, &corrected);
            missed = shift_indices(&artifacts.extra, &missed, -1);
            ectopic = shift_indices(&artifacts.extra, &ectopic, -1);
            longshort = shift_indices(&artifacts.extra, &longshort, -1);
        }
        if !missed.is_empty() {
            corrected = insert_missed(&missed, &corrected);
            ectopic = shift_indices(&missed, &ectopic, 1);
            longshort = shift_indices(&missed, &longshort, 1);
        }
        if !ectopic.is_empty() {
            corrected = realign(&ectopic, &corrected);
        }
        if !longshort.is_empty() {
            corrected = realign(&longshort, &corrected);
        }
        corrected
    }

    /// Rolling threshold: `alpha` times half the inter-quartile range of `|x|`
    ///
    /// Quantized intervals often have a zero inter-quartile range, so the range
    /// is taken to be at least one `resolution` step.
    fn threshold(&self, x: &[f64]) -> Vec<f64> {
        let abs: Vec<f64> = x.iter().map(|v| v.abs()).collect();
        let half = self.window_width / 2;
        let floor = self.alpha * self.resolution / 2.0;
        (0..abs.len())
            .map(|i| {
                let lo = i.saturating_sub(half);
                let hi = (i + half + 1).min(abs.len());
                let mut window = abs[lo..hi].to_vec();
                window.sort_by(|a, b| a.total_cmp(b));
                let q1 = quantile_sorted(&window, 0.25);
                let q3 = quantile_sorted(&window, 0.75);
                (self.alpha * (q3 - q1) / 2.0).max(floor)
            })
            .collect()
    }
}

impl PeakCorrector for ArtifactCorrector {
    fn correct(&self, peaks: &[f64]) -> Vec<f64> {
        let mut artifacts = self.find_artifacts(peaks);
        let mut corrected = self.correct_artifacts(&artifacts, peaks);
        let mut n_current = artifacts.count();
        debug!(artifacts = n_current, "initial artifact pass");

        loop {
            let next = self.find_artifacts(&corrected);
            let n_previous = n_current;
            n_current = next.count();
            if n_current >= n_previous {
                break;
            }
            artifacts = next;
            corrected = self.correct_artifacts(&artifacts, &corrected);
        }
        corrected
    }
}

/// Divide by a threshold; a zero deviation under a zero threshold is no deviation
fn normalize(value: f64, threshold: f64) -> f64 {
    if value == 0.0 {
        0.0
    } else {
        value / threshold
    }
}

/// Linear-interpolation quantile of a sorted slice
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Mirror-pad without repeating the edge sample; requires `x.len() > pad`
fn reflect_pad(x: &[f64], pad: usize) -> Vec<f64> {
    let n = x.len();
    let mut out = Vec::with_capacity(n + 2 * pad);
    out.extend((1..=pad).rev().map(|i| x[i]));
    out.extend_from_slice(x);
    out.extend((1..=pad).map(|i| x[n - 1 - i]));
    out
}

/// Odd-order median filter with zero padding at the edges
fn median_filter(x: &[f64], order: usize) -> Vec<f64> {
    let half = order / 2;
    (0..x.len())
        .map(|i| {
            let mut window: Vec<f64> = (0..order)
                .map(|k| {
                    let idx = i as isize + k as isize - half as isize;
                    if idx < 0 || idx as usize >= x.len() {
                        0.0
                    } else {
                        x[idx as usize]
                    }
                })
                .collect();
            window.sort_by(|a, b| a.total_cmp(b));
            window[half]
        })
        .collect()
}

/// Shift indices after insertions or deletions at `at`
fn shift_indices(at: &[usize], indices: &[usize], delta: isize) -> Vec<usize> {
    indices
        .iter()
        .map(|&idx| {
            let affected = at.iter().filter(|&&a| a < idx).count() as isize;
            (idx as isize + affected * delta).max(0) as usize
        })
        .collect()
}

fn remove_extra(extra: &[usize], peaks: &[f64]) -> Vec<f64> {
    peaks
        .iter()
        .enumerate()
        .filter(|(i, _)| !extra.contains(i))
        .map(|(_, p)| *p)
        .collect()
}

/// Insert a beat halfway between the neighbours of each missed interval
fn insert_missed(missed: &[usize], peaks: &[f64]) -> Vec<f64> {
    let valid: Vec<usize> = missed
        .iter()
        .copied()
        .filter(|&i| i > 1 && i < peaks.len())
        .collect();
    let mut out = Vec::with_capacity(peaks.len() + valid.len());
    for (i, p) in peaks.iter().enumerate() {
        if valid.contains(&i) {
            let prev = peaks[i - 1];
            out.push(prev + (p - prev) / 2.0);
        }
        out.push(*p);
    }
    out
}

/// Move misplaced beats halfway between their neighbours
fn realign(misaligned: &[usize], peaks: &[f64]) -> Vec<f64> {
    let valid: Vec<usize> = misaligned
        .iter()
        .copied()
        .filter(|&i| i > 1 && i + 1 < peaks.len())
        .collect();
    let mut out: Vec<f64> = peaks
        .iter()
        .enumerate()
        .filter(|(i, _)| !valid.contains(i))
        .map(|(_, p)| *p)
        .collect();
    out.extend(
        valid
            .iter()
            .map(|&i| peaks[i - 1] + (peaks[i + 1] - peaks[i - 1]) / 2.0),
    );
    out.sort_by(|a, b| a.total_cmp(b));
    out
}
