/*!
Sampling statistics shared by the augmented data, the class sampler and the variable models.

Every function here draws from a caller-owned generator, so each consumer keeps its own
[`SmallRng`](rand::rngs::SmallRng) and the order of draws stays fixed for a given seed.

# Examples

```rust
use mixtcomp::distributions::{multinomial, uniform};
use rand::rngs::SmallRng;
use rand::SeedableRng;

let mut rng = SmallRng::seed_from_u64(42);
let k = multinomial(&mut rng, &[0.2, 0.3, 0.5]).expect("weights are positive");
assert!(k < 3);

let x = uniform(&mut rng, -1.0, 1.0);
assert!((-1.0..1.0).contains(&x));
```
*/

use rand::Rng;
use rand_distr::{Distribution, Exp};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use std::f64::consts::LN_2;

/// Draws uniformly from `[lo, hi)`. A degenerate interval (`lo >= hi`) resolves to `lo`.
pub fn uniform<R: Rng + ?Sized>(rng: &mut R, lo: f64, hi: f64) -> f64 {
    if lo < hi {
        rng.gen_range(lo..hi)
    } else {
        lo
    }
}

/// Draws uniformly from the integers of `[lo, hi]`. A degenerate interval resolves to `lo`.
pub fn uniform_int<R: Rng + ?Sized>(rng: &mut R, lo: i64, hi: i64) -> i64 {
    if lo < hi {
        rng.gen_range(lo..=hi)
    } else {
        lo
    }
}

/// Samples an index proportionally to non-negative, not necessarily normalized, weights.
///
/// Returns `None` when the weights sum to zero (or are not finite), so callers can
/// treat the draw as a failure instead of dividing by zero.
pub fn multinomial<R: Rng + ?Sized>(rng: &mut R, weights: &[f64]) -> Option<usize> {
    let sum: f64 = weights.iter().sum();
    if !(sum > 0.0) || !sum.is_finite() {
        return None;
    }
    let r: f64 = rng.gen::<f64>() * sum;
    let mut cum = 0.0;
    let mut last_positive = None;
    for (i, &w) in weights.iter().enumerate() {
        if w > 0.0 {
            last_positive = Some(i);
        }
        cum += w;
        if r < cum && w > 0.0 {
            return Some(i);
        }
    }
    last_positive
}

/// Above this standardized bound the normal survival function is taken from its
/// asymptotic expansion, the direct value losing its precision before it underflows.
const SF_ASYMPTOTIC_FROM: f64 = 30.0;

/// Beyond this many standard deviations truncated draws use tail rejection sampling.
const TAIL_SAMPLING_FROM: f64 = 5.0;

const MAX_REJECTION: usize = 10_000;

/// `ln(1 - exp(x))` for `x <= 0`, accurate on the whole range.
pub fn ln1m_exp(x: f64) -> f64 {
    if x > -LN_2 {
        (-x.exp_m1()).ln()
    } else {
        (-x.exp()).ln_1p()
    }
}

/// Log-density of a normal distribution.
pub fn normal_ln_pdf(x: f64, mean: f64, sd: f64) -> f64 {
    Normal::standard().ln_pdf((x - mean) / sd) - sd.ln()
}

/// Log of the standard normal survival function, finite as long as `z` is.
pub fn ln_std_normal_sf(z: f64) -> f64 {
    if z == f64::INFINITY {
        return f64::NEG_INFINITY;
    }
    if z == f64::NEG_INFINITY {
        return 0.0;
    }
    if z < SF_ASYMPTOTIC_FROM {
        return Normal::standard().sf(z).ln();
    }
    let z2 = z * z;
    let series = 1.0 - 1.0 / z2 + 3.0 / (z2 * z2) - 15.0 / (z2 * z2 * z2) + 105.0 / (z2 * z2 * z2 * z2);
    Normal::standard().ln_pdf(z) - z.ln() + series.ln()
}

/// Log of the standard normal cumulative distribution function.
pub fn ln_std_normal_cdf(z: f64) -> f64 {
    ln_std_normal_sf(-z)
}

/**
Log of the probability mass of `N(mean, sd)` on `[lo, hi]`, either bound may be infinite.

Intervals lying in a tail are computed from the log survival function on that side, so the
mass stays finite however far the interval is from the mean. An empty interval has a null
mass.
*/
pub fn normal_ln_interval_proba(lo: f64, hi: f64, mean: f64, sd: f64) -> f64 {
    let a = (lo - mean) / sd;
    let b = (hi - mean) / sd;
    if a.is_nan() || b.is_nan() || a >= b {
        return f64::NEG_INFINITY;
    }
    if a > 0.0 {
        let ln_sa = ln_std_normal_sf(a);
        ln_sa + ln1m_exp(ln_std_normal_sf(b) - ln_sa)
    } else if b < 0.0 {
        let ln_cb = ln_std_normal_cdf(b);
        ln_cb + ln1m_exp(ln_std_normal_cdf(a) - ln_cb)
    } else {
        let std = Normal::standard();
        (std.cdf(b) - std.cdf(a)).ln()
    }
}

/// Standard normal restricted to `[c, d]` with `c` far in the upper tail.
///
/// Rejection from a translated exponential, or from a uniform when the interval is narrow
/// compared to the exponential scale.
fn std_normal_upper_tail<R: Rng + ?Sized>(rng: &mut R, c: f64, d: f64) -> f64 {
    let alpha = 0.5 * (c + (c * c + 4.0).sqrt());
    let exp = match Exp::new(alpha) {
        Ok(exp) => exp,
        Err(_) => return c,
    };
    let narrow = alpha * (d - c) < 1.0;
    for _ in 0..MAX_REJECTION {
        let u: f64 = rng.gen();
        if narrow {
            let z = uniform(rng, c, d);
            if u <= (0.5 * (c * c - z * z)).exp() {
                return z;
            }
        } else {
            let z = c + exp.sample(rng);
            if z <= d && u <= (-0.5 * (z - alpha).powi(2)).exp() {
                return z;
            }
        }
    }
    c
}

/**
Draws from `N(mean, sd)` truncated to `[lo, hi]`.

Inside the body of the distribution the draw inverts the CDF, working with the survival
function above the mean. Intervals more than a few standard deviations out are sampled by
rejection in the tail, mirrored for the lower tail. An empty interval resolves to `lo`.
*/
pub fn truncated_normal<R: Rng + ?Sized>(
    rng: &mut R,
    mean: f64,
    sd: f64,
    lo: f64,
    hi: f64,
) -> f64 {
    let a = (lo - mean) / sd;
    let b = (hi - mean) / sd;
    if a.is_nan() || b.is_nan() || a >= b {
        return lo;
    }
    let std = Normal::standard();
    let z = if a >= TAIL_SAMPLING_FROM {
        std_normal_upper_tail(rng, a, b)
    } else if b <= -TAIL_SAMPLING_FROM {
        -std_normal_upper_tail(rng, -b, -a)
    } else if a > 0.0 {
        let u = uniform(rng, std.sf(b), std.sf(a)).clamp(f64::MIN_POSITIVE, 1.0 - f64::EPSILON);
        -std.inverse_cdf(u)
    } else {
        let u = uniform(rng, std.cdf(a), std.cdf(b)).clamp(f64::MIN_POSITIVE, 1.0 - f64::EPSILON);
        std.inverse_cdf(u)
    };
    (mean + sd * z.clamp(a, b)).clamp(lo, hi)
}
