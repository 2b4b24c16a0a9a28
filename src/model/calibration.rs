//! Probability calibration: isotonic regression, Platt scaling, and the
//! blended ensemble calibrator applied to every classifier head.

use serde::{Deserialize, Serialize};

/// Monotone step-fit via pool-adjacent-violators, predicted with linear
/// interpolation and clipped at the boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsotonicRegression {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl IsotonicRegression {
    pub fn fit(x: &[f64], y: &[f64]) -> Self {
        assert_eq!(x.len(), y.len());
        let mut pairs: Vec<(f64, f64)> = x.iter().copied().zip(y.iter().copied()).collect();
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        // Average duplicated x first so the fit is a function of x
        let mut xs: Vec<f64> = Vec::new();
        let mut ys: Vec<f64> = Vec::new();
        let mut ws: Vec<f64> = Vec::new();
        for (xv, yv) in pairs {
            if let Some(last) = xs.last() {
                if (xv - last).abs() < f64::EPSILON {
                    let n = ys.len() - 1;
                    let w = ws[n];
                    ys[n] = (ys[n] * w + yv) / (w + 1.0);
                    ws[n] = w + 1.0;
                    continue;
                }
            }
            xs.push(xv);
            ys.push(yv);
            ws.push(1.0);
        }

        // Pool adjacent violators
        let mut i = 0usize;
        while i + 1 < ys.len() {
            if ys[i] > ys[i + 1] {
                let w = ws[i] + ws[i + 1];
                let v = (ys[i] * ws[i] + ys[i + 1] * ws[i + 1]) / w;
                ys[i] = v;
                ws[i] = w;
                xs.remove(i + 1);
                ys.remove(i + 1);
                ws.remove(i + 1);
                // Pooling can break monotonicity to the left
                while i > 0 && ys[i - 1] > ys[i] {
                    let w = ws[i - 1] + ws[i];
                    let v = (ys[i - 1] * ws[i - 1] + ys[i] * ws[i]) / w;
                    ys[i - 1] = v;
                    ws[i - 1] = w;
                    xs.remove(i);
                    ys.remove(i);
                    ws.remove(i);
                    i -= 1;
                }
            } else {
                i += 1;
            }
        }

        Self { xs, ys }
    }

    pub fn predict(&self, x: f64) -> f64 {
        if self.xs.is_empty() {
            return x;
        }
        if x <= self.xs[0] {
            return self.ys[0];
        }
        if x >= *self.xs.last().unwrap() {
            return *self.ys.last().unwrap();
        }
        let i = self.xs.partition_point(|&v| v < x);
        let (x0, x1) = (self.xs[i - 1], self.xs[i]);
        let (y0, y1) = (self.ys[i - 1], self.ys[i]);
        if (x1 - x0).abs() < f64::EPSILON {
            return y0;
        }
        y0 + (y1 - y0) * (x - x0) / (x1 - x0)
    }
}

/// One-dimensional logistic regression fit by Newton-Raphson.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlattScaler {
    pub weight: f64,
    pub bias: f64,
}

impl PlattScaler {
    pub fn fit(x: &[f64], y: &[f64]) -> Self {
        assert_eq!(x.len(), y.len());
        let n = x.len().max(1) as f64;
        let mut w = 1.0f64;
        let mut b = 0.0f64;

        for _ in 0..100 {
            let (mut gw, mut gb) = (0.0, 0.0);
            let (mut hww, mut hwb, mut hbb) = (0.0, 0.0, 0.0);
            for (&xi, &yi) in x.iter().zip(y) {
                let p = 1.0 / (1.0 + (-(w * xi + b)).exp());
                let d = p - yi;
                gw += d * xi;
                gb += d;
                let s = (p * (1.0 - p)).max(1e-12);
                hww += s * xi * xi;
                hwb += s * xi;
                hbb += s;
            }
            gw /= n;
            gb /= n;
            hww = hww / n + 1e-9;
            hwb /= n;
            hbb = hbb / n + 1e-9;

            // 2x2 Newton step
            let det = hww * hbb - hwb * hwb;
            if det.abs() < 1e-12 {
                break;
            }
            let dw = (hbb * gw - hwb * gb) / det;
            let db = (hww * gb - hwb * gw) / det;
            w -= dw;
            b -= db;
            if dw.abs() < 1e-10 && db.abs() < 1e-10 {
                break;
            }
        }

        Self { weight: w, bias: b }
    }

    pub fn predict(&self, x: f64) -> f64 {
        1.0 / (1.0 + (-(self.weight * x + self.bias)).exp())
    }
}

/// Blend of isotonic and Platt calibration. Isotonic carries most of the
/// weight; Platt keeps the map smooth where isotonic plateaus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleCalibrator {
    pub isotonic: IsotonicRegression,
    pub platt: PlattScaler,
    pub iso_weight: f64,
}

pub const DEFAULT_ISO_WEIGHT: f64 = 0.6;

impl EnsembleCalibrator {
    pub fn fit(raw_probs: &[f64], labels: &[f64]) -> Self {
        Self {
            isotonic: IsotonicRegression::fit(raw_probs, labels),
            platt: PlattScaler::fit(raw_probs, labels),
            iso_weight: DEFAULT_ISO_WEIGHT,
        }
    }

    pub fn predict(&self, p: f64) -> f64 {
        let iso = self.isotonic.predict(p);
        let platt = self.platt.predict(p);
        (iso * self.iso_weight + platt * (1.0 - self.iso_weight)).clamp(0.0, 1.0)
    }

    pub fn predict_all(&self, probs: &[f64]) -> Vec<f64> {
        probs.iter().map(|&p| self.predict(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isotonic_is_monotone() {
        let x = vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8];
        let y = vec![0.0, 0.1, 0.0, 0.4, 0.3, 0.7, 1.0, 0.9];
        let iso = IsotonicRegression::fit(&x, &y);
        let mut prev = f64::NEG_INFINITY;
        for i in 0..=20 {
            let p = iso.predict(i as f64 / 20.0);
            assert!(p >= prev - 1e-12, "not monotone at {}", i);
            prev = p;
        }
    }

    #[test]
    fn test_isotonic_clips_out_of_bounds() {
        let iso = IsotonicRegression::fit(&[0.2, 0.4, 0.6], &[0.1, 0.5, 0.9]);
        assert_eq!(iso.predict(-1.0), 0.1);
        assert_eq!(iso.predict(2.0), 0.9);
    }

    #[test]
    fn test_platt_separates_classes() {
        let x: Vec<f64> = (0..100).map(|i| i as f64 / 100.0).collect();
        let y: Vec<f64> = x.iter().map(|&v| if v > 0.5 { 1.0 } else { 0.0 }).collect();
        let platt = PlattScaler::fit(&x, &y);
        assert!(platt.predict(0.9) > 0.8);
        assert!(platt.predict(0.1) < 0.2);
    }

    #[test]
    fn test_ensemble_calibrator_output_in_unit_interval() {
        let x: Vec<f64> = (0..50).map(|i| i as f64 / 50.0).collect();
        let y: Vec<f64> = x.iter().map(|&v| if v > 0.3 { 1.0 } else { 0.0 }).collect();
        let cal = EnsembleCalibrator::fit(&x, &y);
        for i in 0..=10 {
            let p = cal.predict(i as f64 / 10.0);
            assert!((0.0..=1.0).contains(&p));
        }
        assert!((cal.iso_weight - 0.6).abs() < 1e-12);
    }
}
