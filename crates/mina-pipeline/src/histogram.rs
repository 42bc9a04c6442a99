//! Automatic threshold selection on a grey-level histogram.
//!
//! Each function takes a histogram (counts per bin) and returns the bin
//! index at or below which voxels are background, or `None` when the
//! algorithm cannot settle on a level. The algorithms follow the
//! published descriptions collected in Landini's auto-threshold survey
//! and in Niemistö's HistThresh toolbox.

// Histogram arithmetic freely mixes bin indices and counts as f64.
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::many_single_char_names,
    clippy::similar_names
)]

/// Smallest positive difference treated as non-zero.
const EPSILON: f64 = 2.220_446_049_250_313e-16;

/// Iteration cap for the iterative methods.
const MAX_ITERATIONS: usize = 10_000;

fn total(hist: &[u64]) -> f64 {
    hist.iter().map(|&h| h as f64).sum()
}

fn normalized(hist: &[u64]) -> Option<Vec<f64>> {
    let n = total(hist);
    if n == 0.0 {
        return None;
    }
    Some(hist.iter().map(|&h| h as f64 / n).collect())
}

fn first_nonzero(hist: &[u64]) -> Option<usize> {
    hist.iter().position(|&h| h > 0)
}

fn last_nonzero(hist: &[u64]) -> Option<usize> {
    hist.iter().rposition(|&h| h > 0)
}

/// Partial sums `A`, `B`, `C` (count, first moment, second moment) over
/// bins `0..=j`.
fn partial_moments(hist: &[u64], j: usize) -> (f64, f64, f64) {
    hist.iter()
        .take(j + 1)
        .enumerate()
        .fold((0.0, 0.0, 0.0), |(a, b, c), (i, &h)| {
            let h = h as f64;
            let i = i as f64;
            (a + h, i.mul_add(h, b), (i * i).mul_add(h, c))
        })
}

/// Round half up, as the reference implementations do.
fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}

fn as_bin(x: f64, len: usize) -> Option<usize> {
    if x.is_finite() && x >= 0.0 && (x as usize) < len {
        Some(x as usize)
    } else {
        None
    }
}

/// Cumulative normalized histogram `P1` and its complement `P2`.
fn cumulative(norm: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut p1 = Vec::with_capacity(norm.len());
    let mut acc = 0.0;
    for &v in norm {
        acc += v;
        p1.push(acc);
    }
    let p2 = p1.iter().map(|p| 1.0 - p).collect();
    (p1, p2)
}

/// First and last bins where both classes have non-negligible mass.
fn entropy_bounds(p1: &[f64], p2: &[f64]) -> Option<(usize, usize)> {
    let first = p1.iter().position(|p| p.abs() >= EPSILON)?;
    let last = p2.iter().rposition(|p| p.abs() >= EPSILON)?;
    (first <= last).then_some((first, last))
}

/// Otsu's method: maximize between-class variance.
#[must_use]
pub fn otsu(hist: &[u64]) -> Option<usize> {
    let n = total(hist);
    let sum_all: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &h)| i as f64 * h as f64)
        .sum();

    let mut best = None;
    let mut max_var = -1.0;
    let mut w0 = 0.0;
    let mut sum0 = 0.0;
    for (k, &h) in hist.iter().enumerate() {
        w0 += h as f64;
        sum0 += k as f64 * h as f64;
        let w1 = n - w0;
        if w0 == 0.0 || w1 == 0.0 {
            continue;
        }
        let m0 = sum0 / w0;
        let m1 = (sum_all - sum0) / w1;
        let var = w0 * w1 * (m0 - m1) * (m0 - m1);
        if var > max_var {
            max_var = var;
            best = Some(k);
        }
    }
    best
}

/// Mean grey level.
#[must_use]
pub fn mean(hist: &[u64]) -> Option<usize> {
    let n = total(hist);
    if n == 0.0 {
        return None;
    }
    let sum: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &h)| i as f64 * h as f64)
        .sum();
    as_bin((sum / n).floor(), hist.len())
}

/// The bin closest to splitting the voxels in half.
#[must_use]
pub fn percentile(hist: &[u64]) -> Option<usize> {
    const PTILE: f64 = 0.5;
    let n = total(hist);
    if n == 0.0 {
        return None;
    }
    let mut best = None;
    let mut min_diff = f64::MAX;
    let mut partial = 0.0;
    for (i, &h) in hist.iter().enumerate() {
        partial += h as f64;
        let diff = (partial / n - PTILE).abs();
        if diff < min_diff {
            min_diff = diff;
            best = Some(i);
        }
    }
    best
}

/// Iterative intermeans: the level equals the midpoint of the class means.
#[must_use]
pub fn iso_data(hist: &[u64]) -> Option<usize> {
    let len = hist.len();
    if len < 3 {
        return None;
    }
    let mut g = (1..len - 1)
        .find(|&i| hist[i] > 0)
        .map_or(0, |i| i + 1);
    loop {
        let (totl, l, _) = partial_moments(hist, g.min(len - 1));
        let (toth, h) = hist
            .iter()
            .enumerate()
            .skip(g + 1)
            .fold((0.0, 0.0), |(t, s), (i, &c)| {
                (t + c as f64, (i as f64).mul_add(c as f64, s))
            });
        if totl > 0.0 && toth > 0.0 {
            let level = round_half_up(f64::midpoint(l / totl, h / toth));
            if g as f64 == level {
                return Some(g);
            }
        }
        g += 1;
        if g + 2 > len {
            return None;
        }
    }
}

/// Legacy ImageJ intermeans, ignoring the extreme bins.
#[must_use]
pub fn ij1(hist: &[u64]) -> Option<usize> {
    let len = hist.len();
    if len < 3 {
        return None;
    }
    let max_value = len - 1;
    let mut data = hist.to_vec();
    data[0] = 0;
    data[max_value] = 0;

    let mut min = 0;
    while data[min] == 0 && min < max_value {
        min += 1;
    }
    let mut max = max_value;
    while data[max] == 0 && max > 0 {
        max -= 1;
    }
    if min >= max {
        return Some(len / 2);
    }

    let mut moving = min;
    let mut result;
    loop {
        let (mut sum1, mut sum2, mut sum3, mut sum4) = (0.0, 0.0, 0.0, 0.0);
        for (i, &h) in data.iter().enumerate().take(moving + 1).skip(min) {
            sum1 += i as f64 * h as f64;
            sum2 += h as f64;
        }
        for (i, &h) in data.iter().enumerate().take(max + 1).skip(moving + 1) {
            sum3 += i as f64 * h as f64;
            sum4 += h as f64;
        }
        result = f64::midpoint(sum1 / sum2, sum3 / sum4);
        moving += 1;
        if !((moving + 1) as f64 <= result && moving + 1 < max) {
            break;
        }
    }
    as_bin(result.round(), len)
}

/// Li's iterative minimum cross entropy.
#[must_use]
pub fn li(hist: &[u64]) -> Option<usize> {
    let n = total(hist);
    if n == 0.0 {
        return None;
    }
    let (_, sum, _) = partial_moments(hist, hist.len() - 1);
    let tolerance = 0.5;
    let mut new_thresh = sum / n;
    let mut threshold = 0;

    for _ in 0..MAX_ITERATIONS {
        let old_thresh = new_thresh;
        threshold = (old_thresh + 0.5) as usize;
        threshold = threshold.min(hist.len() - 1);

        let (num_back, sum_back, _) = partial_moments(hist, threshold);
        let mean_back = if num_back == 0.0 { 0.0 } else { sum_back / num_back };
        let num_obj = n - num_back;
        let mean_obj = if num_obj == 0.0 {
            0.0
        } else {
            (sum - sum_back) / num_obj
        };

        let temp = (mean_back - mean_obj) / (mean_back.ln() - mean_obj.ln());
        if temp.is_nan() {
            break;
        }
        new_thresh = if temp < -EPSILON {
            (temp - 0.5).trunc()
        } else {
            (temp + 0.5).trunc()
        };
        if (new_thresh - old_thresh).abs() <= tolerance {
            break;
        }
    }
    Some(threshold)
}

/// Zack's triangle method.
#[must_use]
pub fn triangle(hist: &[u64]) -> Option<usize> {
    let len = hist.len();
    let mut min = first_nonzero(hist)?;
    min = min.saturating_sub(1);
    let mut min2 = last_nonzero(hist)?;
    if min2 < len - 1 {
        min2 += 1;
    }
    let mut max = 0;
    let mut dmax = 0;
    for (i, &h) in hist.iter().enumerate() {
        if h > dmax {
            max = i;
            dmax = h;
        }
    }

    // The long tail must be on the left; mirror the histogram otherwise.
    let inverted = (max as isize - min as isize) < (min2 as isize - max as isize);
    let data: Vec<u64> = if inverted {
        let mut d = hist.to_vec();
        d.reverse();
        min = len - 1 - min2;
        max = len - 1 - max;
        d
    } else {
        hist.to_vec()
    };

    if min == max {
        return Some(min);
    }

    let mut nx = data[max] as f64;
    let mut ny = min as f64 - max as f64;
    let d = nx.hypot(ny);
    nx /= d;
    ny /= d;
    let d = nx.mul_add(min as f64, ny * data[min] as f64);

    let mut split = min;
    let mut split_distance = 0.0;
    for (i, &h) in data.iter().enumerate().take(max + 1).skip(min + 1) {
        let distance = nx.mul_add(i as f64, ny * h as f64) - d;
        if distance > split_distance {
            split = i;
            split_distance = distance;
        }
    }
    let split = split.saturating_sub(1);

    if inverted {
        Some(len - 1 - split)
    } else {
        Some(split)
    }
}

/// Huang's fuzzy thresholding using Shannon's entropy function.
#[must_use]
pub fn huang(hist: &[u64]) -> Option<usize> {
    let first = first_nonzero(hist)?;
    let last = last_nonzero(hist)?;
    if first == last {
        return Some(first);
    }

    let mut s = vec![0.0; last + 1];
    let mut w = vec![0.0; last + 1];
    s[first] = hist[first] as f64;
    w[first] = first as f64 * hist[first] as f64;
    for i in first + 1..=last {
        s[i] = s[i - 1] + hist[i] as f64;
        w[i] = (i as f64).mul_add(hist[i] as f64, w[i - 1]);
    }

    let c = (last - first) as f64;
    let mut smu = vec![0.0; last - first + 1];
    for (i, v) in smu.iter_mut().enumerate().skip(1) {
        let mu = 1.0 / (1.0 + i as f64 / c);
        *v = (-mu).mul_add(mu.ln(), -((1.0 - mu) * (1.0 - mu).ln()));
    }

    let membership = |mu: f64, i: usize| -> f64 {
        let mu = mu as isize;
        smu[(i as isize - mu).unsigned_abs().min(smu.len() - 1)]
    };

    let mut best = first;
    let mut best_entropy = f64::MAX;
    for threshold in first..=last {
        let mut entropy = 0.0;
        let mu = round_half_up(w[threshold] / s[threshold]);
        for i in first..=threshold {
            entropy += membership(mu, i) * hist[i] as f64;
        }
        if threshold < last {
            let mu = round_half_up((w[last] - w[threshold]) / (s[last] - s[threshold]));
            for i in threshold + 1..=last {
                entropy += membership(mu, i) * hist[i] as f64;
            }
        }
        if best_entropy > entropy {
            best_entropy = entropy;
            best = threshold;
        }
    }
    Some(best)
}

/// Smooth with a three-point running mean until exactly two peaks remain.
fn smooth_until_bimodal(hist: &[u64]) -> Option<Vec<f64>> {
    let len = hist.len();
    let mut smoothed: Vec<f64> = hist.iter().map(|&h| h as f64).collect();
    let mut iterations = 0;
    while !is_bimodal(&smoothed) {
        let (mut current, mut next) = (0.0, smoothed[0]);
        for i in 0..len - 1 {
            let previous = current;
            current = next;
            next = smoothed[i + 1];
            smoothed[i] = (previous + current + next) / 3.0;
        }
        smoothed[len - 1] = (current + next) / 3.0;
        iterations += 1;
        if iterations > MAX_ITERATIONS {
            return None;
        }
    }
    Some(smoothed)
}

fn is_bimodal(y: &[f64]) -> bool {
    let mut modes = 0;
    for k in 1..y.len().saturating_sub(1) {
        if y[k - 1] < y[k] && y[k + 1] < y[k] {
            modes += 1;
            if modes > 2 {
                return false;
            }
        }
    }
    modes == 2
}

/// Midpoint of the two peaks of the smoothed histogram.
#[must_use]
pub fn intermodes(hist: &[u64]) -> Option<usize> {
    if hist.len() < 3 {
        return None;
    }
    let smoothed = smooth_until_bimodal(hist)?;
    let tt: usize = (1..smoothed.len() - 1)
        .filter(|&i| smoothed[i - 1] < smoothed[i] && smoothed[i + 1] < smoothed[i])
        .sum();
    Some(tt / 2)
}

/// Valley between the two peaks of the smoothed histogram.
#[must_use]
pub fn minimum(hist: &[u64]) -> Option<usize> {
    if hist.len() < 3 {
        return None;
    }
    let smoothed = smooth_until_bimodal(hist)?;
    (1..smoothed.len() - 1)
        .find(|&i| smoothed[i - 1] > smoothed[i] && smoothed[i + 1] >= smoothed[i])
}

/// Tsai's moment-preserving threshold.
#[must_use]
pub fn moments(hist: &[u64]) -> Option<usize> {
    let norm = normalized(hist)?;
    let m0 = 1.0;
    let (mut m1, mut m2, mut m3) = (0.0, 0.0, 0.0);
    for (i, &h) in norm.iter().enumerate() {
        let di = i as f64;
        m1 += di * h;
        m2 += di * di * h;
        m3 += di * di * di * h;
    }
    let cd = m0 * m2 - m1 * m1;
    let c0 = (-m2).mul_add(m2, m1 * m3) / cd;
    let c1 = (m0 * -m3 + m2 * m1) / cd;
    let disc = c1.mul_add(c1, -4.0 * c0).sqrt();
    let z0 = 0.5 * (-c1 - disc);
    let z1 = 0.5 * (-c1 + disc);
    let p0 = (z1 - m1) / (z1 - z0);
    if !p0.is_finite() {
        return None;
    }

    let mut sum = 0.0;
    for (i, &h) in norm.iter().enumerate() {
        sum += h;
        if sum > p0 {
            return Some(i);
        }
    }
    None
}

/// Yen's maximum correlation criterion.
#[must_use]
pub fn yen(hist: &[u64]) -> Option<usize> {
    let norm = normalized(hist)?;
    let len = norm.len();
    let (p1, _) = cumulative(&norm);
    let mut p1_sq = vec![0.0; len];
    p1_sq[0] = norm[0] * norm[0];
    for i in 1..len {
        p1_sq[i] = norm[i].mul_add(norm[i], p1_sq[i - 1]);
    }
    let mut p2_sq = vec![0.0; len];
    for i in (0..len - 1).rev() {
        p2_sq[i] = norm[i + 1].mul_add(norm[i + 1], p2_sq[i + 1]);
    }

    let mut best = None;
    let mut max_crit = f64::MIN;
    for it in 0..len {
        let sq = p1_sq[it] * p2_sq[it];
        let spread = p1[it] * (1.0 - p1[it]);
        let crit = -(if sq > 0.0 { sq.ln() } else { 0.0 })
            + 2.0 * if spread > 0.0 { spread.ln() } else { 0.0 };
        if crit > max_crit {
            max_crit = crit;
            best = Some(it);
        }
    }
    best
}

/// Kapur, Sahoo & Wong maximum entropy.
#[must_use]
pub fn max_entropy(hist: &[u64]) -> Option<usize> {
    let norm = normalized(hist)?;
    let (p1, p2) = cumulative(&norm);
    let (first, last) = entropy_bounds(&p1, &p2)?;
    max_entropy_between(hist, &norm, &p1, &p2, first, last)
}

fn max_entropy_between(
    hist: &[u64],
    norm: &[f64],
    p1: &[f64],
    p2: &[f64],
    first: usize,
    last: usize,
) -> Option<usize> {
    let mut best = None;
    let mut max_ent = f64::MIN;
    for it in first..=last {
        let mut ent_back = 0.0;
        for ih in 0..=it {
            if hist[ih] != 0 {
                let r = norm[ih] / p1[it];
                ent_back -= r * r.ln();
            }
        }
        let mut ent_obj = 0.0;
        for ih in it + 1..norm.len() {
            if hist[ih] != 0 {
                let r = norm[ih] / p2[it];
                ent_obj -= r * r.ln();
            }
        }
        let tot = ent_back + ent_obj;
        if max_ent < tot {
            max_ent = tot;
            best = Some(it);
        }
    }
    best
}

/// Renyi entropy: combines the maximum-entropy levels for three orders.
#[must_use]
pub fn renyi_entropy(hist: &[u64]) -> Option<usize> {
    let norm = normalized(hist)?;
    let (p1, p2) = cumulative(&norm);
    let (first, last) = entropy_bounds(&p1, &p2)?;

    let t_star2 = max_entropy_between(hist, &norm, &p1, &p2, first, last)?;

    let renyi = |alpha: f64| -> usize {
        let term = 1.0 / (1.0 - alpha);
        let mut threshold = 0;
        let mut max_ent = 0.0;
        for it in first..=last {
            let ent_back: f64 = (0..=it).map(|ih| (norm[ih] / p1[it]).powf(alpha)).sum();
            let ent_obj: f64 = (it + 1..norm.len())
                .map(|ih| (norm[ih] / p2[it]).powf(alpha))
                .sum();
            let product = ent_back * ent_obj;
            let tot = term * if product > 0.0 { product.ln() } else { 0.0 };
            if tot > max_ent {
                max_ent = tot;
                threshold = it;
            }
        }
        threshold
    };
    let t_star1 = renyi(0.5);
    let t_star3 = renyi(2.0);

    let mut stars = [t_star1, t_star2, t_star3];
    stars.sort_unstable();
    let [t1, t2, t3] = stars;

    let (beta1, beta2, beta3) = if t1.abs_diff(t2) <= 5 {
        if t2.abs_diff(t3) <= 5 {
            (1.0, 2.0, 1.0)
        } else {
            (0.0, 1.0, 3.0)
        }
    } else if t2.abs_diff(t3) <= 5 {
        (3.0, 1.0, 0.0)
    } else {
        (1.0, 2.0, 1.0)
    };

    let omega = p1[t3] - p1[t1];
    let level = (t1 as f64).mul_add(
        (0.25 * omega).mul_add(beta1, p1[t1]),
        (0.25 * t2 as f64 * omega).mul_add(beta2, t3 as f64 * (0.25 * omega).mul_add(beta3, p2[t3])),
    );
    as_bin(level.trunc(), hist.len())
}

/// Shanbhag's fuzzy-set entropy.
#[must_use]
pub fn shanbhag(hist: &[u64]) -> Option<usize> {
    let norm = normalized(hist)?;
    let (p1, p2) = cumulative(&norm);
    let (first, last) = entropy_bounds(&p1, &p2)?;

    let mut best = None;
    let mut min_ent = f64::MAX;
    for it in first..=last {
        let term = 0.5 / p1[it];
        let mut ent_back = 0.0;
        for ih in 1..=it {
            ent_back -= norm[ih] * (1.0 - term * p1[ih - 1]).ln();
        }
        ent_back *= term;

        let term = 0.5 / p2[it];
        let mut ent_obj = 0.0;
        for ih in it + 1..norm.len() {
            ent_obj -= norm[ih] * (1.0 - term * p2[ih]).ln();
        }
        ent_obj *= term;

        let tot = (ent_back - ent_obj).abs();
        if tot < min_ent {
            min_ent = tot;
            best = Some(it);
        }
    }
    best
}

/// Solve the two-Gaussian decision boundary used by both error methods.
fn gaussian_boundary(mu: f64, nu: f64, sigma2: f64, tau2: f64, p: f64, q: f64) -> Option<f64> {
    let w0 = 1.0 / sigma2 - 1.0 / tau2;
    let w1 = mu / sigma2 - nu / tau2;
    let w2 = (mu * mu) / sigma2 - (nu * nu) / tau2 + ((sigma2 * q * q) / (tau2 * p * p)).log10();
    let sqterm = w1.mul_add(w1, -(w0 * w2));
    if sqterm < 0.0 {
        return None;
    }
    let t = (w1 + sqterm.sqrt()) / w0;
    t.is_finite().then_some(t)
}

/// Kittler & Illingworth iterative minimum error.
#[must_use]
pub fn min_error(hist: &[u64]) -> Option<usize> {
    let mut threshold = mean(hist)?;
    let last = hist.len() - 1;
    let (a_all, b_all, c_all) = partial_moments(hist, last);

    for _ in 0..MAX_ITERATIONS {
        let (a, b, c) = partial_moments(hist, threshold);
        let mu = b / a;
        let nu = (b_all - b) / (a_all - a);
        let p = a / a_all;
        let q = (a_all - a) / a_all;
        let sigma2 = c / a - mu * mu;
        let tau2 = (c_all - c) / (a_all - a) - nu * nu;

        let Some(t) = gaussian_boundary(mu, nu, sigma2, tau2, p, q) else {
            log::debug!("minError: no real boundary, keeping level {threshold}");
            break;
        };
        let Some(next) = as_bin(t.floor(), hist.len()) else {
            break;
        };
        if next == threshold {
            break;
        }
        threshold = next;
    }
    Some(threshold)
}

/// Maximum likelihood fit of two Gaussians by expectation maximization,
/// started from the [`minimum`] level.
#[must_use]
pub fn max_likelihood(hist: &[u64]) -> Option<usize> {
    const TOLERANCE: f64 = 1e-6;

    let start = minimum(hist)?;
    let last = hist.len() - 1;
    let (a_all, b_all, c_all) = partial_moments(hist, last);
    let (a, b, c) = partial_moments(hist, start);

    let mut mu = b / a;
    let mut nu = (b_all - b) / (a_all - a);
    let mut p = a / a_all;
    let mut q = (a_all - a) / a_all;
    let mut sigma2 = c / a - mu * mu;
    let mut tau2 = (c_all - c) / (a_all - a) - nu * nu;

    for _ in 0..MAX_ITERATIONS {
        let (prev_mu, prev_nu, prev_p, prev_q, prev_sigma2, prev_tau2) =
            (mu, nu, p, q, sigma2, tau2);

        let (mut sp, mut sg, mut sip, mut sig) = (0.0, 0.0, 0.0, 0.0);
        let phis: Vec<f64> = (0..hist.len())
            .map(|i| {
                let x = i as f64;
                let fore = p / sigma2.sqrt() * (-((x - mu) * (x - mu)) / (2.0 * sigma2)).exp();
                let back = q / tau2.sqrt() * (-((x - nu) * (x - nu)) / (2.0 * tau2)).exp();
                if fore + back > 0.0 {
                    fore / (fore + back)
                } else if (x - mu).abs() < (x - nu).abs() {
                    1.0
                } else {
                    0.0
                }
            })
            .collect();
        for (i, (&h, &phi)) in hist.iter().zip(&phis).enumerate() {
            let y = h as f64;
            let gamma = 1.0 - phi;
            sp += phi * y;
            sg += gamma * y;
            sip += i as f64 * phi * y;
            sig += i as f64 * gamma * y;
        }
        let f = sp + sg;
        p = sp / f;
        q = sg / f;
        mu = sip / sp;
        nu = sig / sg;

        let (mut vs, mut vt) = (0.0, 0.0);
        for (i, (&h, &phi)) in hist.iter().zip(&phis).enumerate() {
            let y = h as f64;
            let x = i as f64;
            vs += phi * y * (x - mu) * (x - mu);
            vt += (1.0 - phi) * y * (x - nu) * (x - nu);
        }
        sigma2 = vs / sp;
        tau2 = vt / sg;

        if ![mu, nu, p, q, sigma2, tau2].iter().all(|v| v.is_finite()) {
            return None;
        }
        let converged = (mu - prev_mu).abs() < TOLERANCE
            && (nu - prev_nu).abs() < TOLERANCE
            && (p - prev_p).abs() < TOLERANCE
            && (q - prev_q).abs() < TOLERANCE
            && (sigma2 - prev_sigma2).abs() < TOLERANCE
            && (tau2 - prev_tau2).abs() < TOLERANCE;
        if converged {
            break;
        }
    }

    let t = gaussian_boundary(mu, nu, sigma2, tau2, p, q)?;
    as_bin(t.floor(), hist.len())
}

/// Rosin's unimodal method: the bin farthest from the line joining the
/// histogram peak to the end of its longer tail.
#[must_use]
pub fn rosin(hist: &[u64]) -> Option<usize> {
    let first = first_nonzero(hist)?;
    let last = last_nonzero(hist)?;
    let peak = hist
        .iter()
        .enumerate()
        .max_by_key(|&(i, &h)| (h, std::cmp::Reverse(i)))
        .map(|(i, _)| i)?;

    let (from, to) = if last - peak >= peak - first {
        (peak, last)
    } else {
        (first, peak)
    };
    if from == to {
        return Some(peak);
    }

    let (x1, y1) = (from as f64, hist[from] as f64);
    let (x2, y2) = (to as f64, hist[to] as f64);
    let norm = (y2 - y1).hypot(x2 - x1);

    let mut best = from;
    let mut best_distance = -1.0;
    for (i, &h) in hist.iter().enumerate().take(to + 1).skip(from) {
        let distance =
            ((y2 - y1).mul_add(i as f64, -((x2 - x1) * h as f64)) + x2 * y1 - y2 * x1).abs() / norm;
        if distance > best_distance {
            best_distance = distance;
            best = i;
        }
    }
    Some(best)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Two well-separated Gaussian-ish lumps centred at 60 and 180.
    fn bimodal() -> Vec<u64> {
        (0..256)
            .map(|i| {
                let x = f64::from(i);
                let a = 1000.0 * (-((x - 60.0) * (x - 60.0)) / 200.0).exp();
                let b = 600.0 * (-((x - 180.0) * (x - 180.0)) / 300.0).exp();
                (a + b).round() as u64
            })
            .collect()
    }

    fn between_peaks(level: Option<usize>, name: &str) {
        let level = level.unwrap_or_else(|| unreachable!("{name} found no level"));
        assert!(
            (70..=170).contains(&level),
            "{name} level {level} is not between the peaks",
        );
    }

    #[test]
    fn bimodal_methods_split_between_the_peaks() {
        let h = bimodal();
        between_peaks(otsu(&h), "otsu");
        between_peaks(iso_data(&h), "isoData");
        between_peaks(ij1(&h), "ij1");
        between_peaks(li(&h), "li");
        between_peaks(huang(&h), "huang");
        between_peaks(intermodes(&h), "intermodes");
        between_peaks(minimum(&h), "minimum");
        between_peaks(mean(&h), "mean");
        between_peaks(max_entropy(&h), "maxEntropy");
        between_peaks(renyi_entropy(&h), "renyiEntropy");
        between_peaks(min_error(&h), "minError");
        between_peaks(max_likelihood(&h), "maxLikelihood");
    }

    #[test]
    fn empty_histogram_has_no_level() {
        let h = vec![0; 256];
        assert_eq!(otsu(&h), None);
        assert_eq!(mean(&h), None);
        assert_eq!(percentile(&h), None);
        assert_eq!(li(&h), None);
        assert_eq!(triangle(&h), None);
        assert_eq!(huang(&h), None);
        assert_eq!(moments(&h), None);
        assert_eq!(yen(&h), None);
        assert_eq!(max_entropy(&h), None);
        assert_eq!(shanbhag(&h), None);
        assert_eq!(rosin(&h), None);
    }

    #[test]
    fn mean_of_two_spikes() {
        let mut h = vec![0; 256];
        h[10] = 1;
        h[30] = 1;
        assert_eq!(mean(&h), Some(20));
    }

    #[test]
    fn percentile_splits_counts_in_half() {
        let mut h = vec![0; 256];
        h[5] = 50;
        h[100] = 50;
        assert_eq!(percentile(&h), Some(5));
    }

    #[test]
    fn smoothing_pads_both_ends_with_zero() {
        let smoothed = smooth_until_bimodal(&[0, 3, 0, 3, 0, 3, 0]).unwrap();
        assert_eq!(smoothed, vec![1.0, 1.0, 2.0, 1.0, 2.0, 1.0, 1.0]);
    }

    #[test]
    fn intermodes_of_two_spikes_is_their_midpoint() {
        let mut h = vec![0; 256];
        h[20] = 100;
        h[200] = 100;
        assert_eq!(intermodes(&h), Some(110));
    }

    #[test]
    fn otsu_of_two_spikes_separates_them() {
        let mut h = vec![0; 256];
        h[20] = 100;
        h[200] = 100;
        let level = otsu(&h).unwrap();
        assert!((20..200).contains(&level));
    }

    #[test]
    fn triangle_finds_the_knee_of_a_skewed_histogram() {
        // Tall peak at 30 with a long linear tail to the right.
        let h: Vec<u64> = (0..256)
            .map(|i| match i {
                0..=29 => 0,
                30 => 1000,
                31..=200 => 200 - i as u64,
                _ => 0,
            })
            .collect();
        let level = triangle(&h).unwrap();
        assert!((30..=200).contains(&level), "level {level}");
    }

    #[test]
    fn single_value_histograms_are_handled() {
        let mut h = vec![0; 256];
        h[42] = 10;
        assert_eq!(huang(&h), Some(42));
        assert!(triangle(&h).is_some());
        assert_eq!(ij1(&h), Some(128));
    }
}
