/*!
Augmented data: completed values paired with a per-individual missing-value descriptor.

Every variable, the latent class included, is stored as an [`AugmentedData<T>`]. `data[i]`
always holds a usable value. `mis_data[i]` says whether that value was observed or is a
provisional completion, and under which constraint it is resampled.

# Examples

```rust
use mixtcomp::data::{AugmentedData, MisType, MisVal};
use rand::rngs::SmallRng;
use rand::SeedableRng;

let mut aug = AugmentedData::<f64>::new();
aug.resize_arrays(3);
aug.set_present(0, 1.0);
aug.set_present(1, 4.0);
aug.set_missing(2, MisVal::Interval(2.0, 3.0));
aug.compute_range();
assert_eq!(aug.data_range.min, 1.0);
assert_eq!(aug.data_range.max, 4.0);

let mut rng = SmallRng::seed_from_u64(0);
aug.remove_missing(2, &mut rng).unwrap();
assert!((2.0..=3.0).contains(&aug.data[2]));
assert!(aug.check_missing_type(&[MisType::Present]).is_err());
```
*/

use crate::distributions::{multinomial, uniform, uniform_int};
use num_traits::{NumCast, ToPrimitive};
use rand::Rng;
use std::fmt::{Debug, Display};

/// Kind of a missing-value descriptor, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MisType {
    Present,
    Missing,
    MissingFiniteValues,
    MissingInterval,
    MissingLeftUnboundedInterval,
    MissingRightUnboundedInterval,
}

impl MisType {
    pub const ALL: [MisType; 6] = [
        MisType::Present,
        MisType::Missing,
        MisType::MissingFiniteValues,
        MisType::MissingInterval,
        MisType::MissingLeftUnboundedInterval,
        MisType::MissingRightUnboundedInterval,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Text used when a model refuses this kind of descriptor.
    fn unsupported_message(self, count: usize) -> String {
        let ind = if count > 1 {
            "individuals are"
        } else {
            "individual is"
        };
        match self {
            MisType::Present => format!(
                "Observed values are not supported for this model, yet {count} {ind} observed."
            ),
            MisType::Missing => format!(
                "Non observed values are not supported for this model, yet {count} {ind} completely missing."
            ),
            MisType::MissingFiniteValues => format!(
                "Partially observed values defined by list of possible values, {{a, b, c, ... }}, are not supported for this model, yet {count} {ind} defined by list of possible values."
            ),
            MisType::MissingInterval => format!(
                "Partially observed values defined by interval, [a:b], are not supported for this model, yet {count} {ind} defined by interval."
            ),
            MisType::MissingLeftUnboundedInterval => format!(
                "Partially observed values defined by upper-bounded semi-interval, [-inf:a], are not supported for this model, yet {count} {ind} defined by upper-bounded semi-interval."
            ),
            MisType::MissingRightUnboundedInterval => format!(
                "Partially observed values defined by lower-bounded semi-interval, [a:+inf], are not supported for this model, yet {count} {ind} defined by lower-bounded semi-interval."
            ),
        }
    }
}

/// Missing-value descriptor of one individual.
#[derive(Debug, Clone, PartialEq)]
pub enum MisVal<T> {
    Present,
    /// No information at all.
    Missing,
    /// The value is one of the candidates.
    FiniteValues(Vec<T>),
    /// The value lies in `[lo, hi]`.
    Interval(T, T),
    /// The value lies in `(-inf, hi]`.
    LeftUnbounded(T),
    /// The value lies in `[lo, +inf)`.
    RightUnbounded(T),
}

impl<T: Copy> MisVal<T> {
    pub fn kind(&self) -> MisType {
        match self {
            MisVal::Present => MisType::Present,
            MisVal::Missing => MisType::Missing,
            MisVal::FiniteValues(_) => MisType::MissingFiniteValues,
            MisVal::Interval(..) => MisType::MissingInterval,
            MisVal::LeftUnbounded(_) => MisType::MissingLeftUnboundedInterval,
            MisVal::RightUnbounded(_) => MisType::MissingRightUnboundedInterval,
        }
    }

    /// Bounds carried by the descriptor, used by range computation.
    pub fn bounds(&self) -> Vec<T> {
        match self {
            MisVal::Present | MisVal::Missing => Vec::new(),
            MisVal::FiniteValues(values) => values.clone(),
            MisVal::Interval(lo, hi) => vec![*lo, *hi],
            MisVal::LeftUnbounded(b) | MisVal::RightUnbounded(b) => vec![*b],
        }
    }
}

/// Observed bounds of a variable.
///
/// `range` is `max - min + 1` (a modality count) for discrete types and `max - min` for reals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range<T> {
    pub min: T,
    pub max: T,
    pub range: T,
    pub has_range: bool,
}

impl<T: DataValue> Range<T> {
    pub fn new(min: T, max: T, has_range: bool) -> Self {
        Self {
            min,
            max,
            range: T::range_width(min, max),
            has_range,
        }
    }
}

impl<T: DataValue> Default for Range<T> {
    fn default() -> Self {
        Self::new(T::default(), T::default(), false)
    }
}

/// Element type of an [`AugmentedData`], with the completion rules of its missing kinds.
///
/// Kinds without a rule for a type return a diagnostic instead of a value.
pub trait DataValue:
    Copy + PartialOrd + Default + Debug + Display + ToPrimitive + NumCast + Send + Sync + 'static
{
    const TYPE_NAME: &'static str;

    fn range_width(min: Self, max: Self) -> Self;

    fn to_real(self) -> f64 {
        self.to_f64().unwrap_or(f64::NAN)
    }

    /// Converts a real estimate back, rounding for discrete types.
    fn from_real(x: f64) -> Option<Self> {
        NumCast::from(x)
    }

    /// Point estimate of an ascending-sorted, non-empty sample: the mode, first value on ties.
    fn central_estimate(sorted: &[Self]) -> Self {
        let mut best = sorted[0];
        let mut best_count = 0;
        let mut start = 0;
        while start < sorted.len() {
            let mut end = start;
            while end < sorted.len() && sorted[end] == sorted[start] {
                end += 1;
            }
            if end - start > best_count {
                best_count = end - start;
                best = sorted[start];
            }
            start = end;
        }
        best
    }

    fn sample_missing<R: Rng + ?Sized>(_rng: &mut R, _range: &Range<Self>) -> Result<Self, String> {
        Err(format!("completely missing {} values cannot be sampled", Self::TYPE_NAME))
    }

    fn sample_finite_values<R: Rng + ?Sized>(
        _rng: &mut R,
        _candidates: &[Self],
        _range: &Range<Self>,
    ) -> Result<Self, String> {
        Err(format!(
            "{} data does not support missing values defined by a list of candidates",
            Self::TYPE_NAME
        ))
    }

    fn sample_interval<R: Rng + ?Sized>(
        _rng: &mut R,
        _lo: Self,
        _hi: Self,
        _range: &Range<Self>,
    ) -> Result<Self, String> {
        Err(format!(
            "{} data does not support missing values defined by an interval",
            Self::TYPE_NAME
        ))
    }

    fn sample_left_unbounded<R: Rng + ?Sized>(
        _rng: &mut R,
        _hi: Self,
        _range: &Range<Self>,
    ) -> Result<Self, String> {
        Err(format!(
            "{} data does not support missing values defined by an upper-bounded semi-interval",
            Self::TYPE_NAME
        ))
    }

    fn sample_right_unbounded<R: Rng + ?Sized>(
        _rng: &mut R,
        _lo: Self,
        _range: &Range<Self>,
    ) -> Result<Self, String> {
        Err(format!(
            "{} data does not support missing values defined by a lower-bounded semi-interval",
            Self::TYPE_NAME
        ))
    }
}

impl DataValue for f64 {
    const TYPE_NAME: &'static str = "real";

    fn range_width(min: Self, max: Self) -> Self {
        max - min
    }

    /// The mean, real values almost never repeat.
    fn central_estimate(sorted: &[Self]) -> Self {
        sorted.iter().sum::<f64>() / sorted.len() as f64
    }

    fn sample_missing<R: Rng + ?Sized>(rng: &mut R, range: &Range<Self>) -> Result<Self, String> {
        Ok(uniform(rng, range.min, range.max))
    }

    fn sample_interval<R: Rng + ?Sized>(
        rng: &mut R,
        lo: Self,
        hi: Self,
        range: &Range<Self>,
    ) -> Result<Self, String> {
        let (lo, hi) = if range.has_range {
            (lo.max(range.min), hi.min(range.max))
        } else {
            (lo, hi)
        };
        Ok(uniform(rng, lo, hi))
    }

    fn sample_left_unbounded<R: Rng + ?Sized>(
        rng: &mut R,
        hi: Self,
        range: &Range<Self>,
    ) -> Result<Self, String> {
        if range.min < hi {
            Ok(uniform(rng, range.min, hi))
        } else {
            Ok(hi)
        }
    }

    fn sample_right_unbounded<R: Rng + ?Sized>(
        rng: &mut R,
        lo: Self,
        range: &Range<Self>,
    ) -> Result<Self, String> {
        if lo < range.max {
            Ok(uniform(rng, lo, range.max))
        } else {
            Ok(lo)
        }
    }
}

impl DataValue for i64 {
    const TYPE_NAME: &'static str = "integer";

    fn range_width(min: Self, max: Self) -> Self {
        max - min + 1
    }

    fn from_real(x: f64) -> Option<Self> {
        NumCast::from(x.round())
    }

    fn sample_missing<R: Rng + ?Sized>(rng: &mut R, range: &Range<Self>) -> Result<Self, String> {
        Ok(uniform_int(rng, range.min, range.max))
    }

    fn sample_finite_values<R: Rng + ?Sized>(
        rng: &mut R,
        candidates: &[Self],
        _range: &Range<Self>,
    ) -> Result<Self, String> {
        if candidates.is_empty() {
            return Err("empty list of candidate values".to_string());
        }
        Ok(candidates[rng.gen_range(0..candidates.len())])
    }

    fn sample_interval<R: Rng + ?Sized>(
        rng: &mut R,
        lo: Self,
        hi: Self,
        _range: &Range<Self>,
    ) -> Result<Self, String> {
        Ok(uniform_int(rng, lo, hi))
    }

    fn sample_left_unbounded<R: Rng + ?Sized>(
        rng: &mut R,
        hi: Self,
        range: &Range<Self>,
    ) -> Result<Self, String> {
        if range.min < hi {
            Ok(uniform_int(rng, range.min, hi))
        } else {
            Ok(hi)
        }
    }

    fn sample_right_unbounded<R: Rng + ?Sized>(
        rng: &mut R,
        lo: Self,
        range: &Range<Self>,
    ) -> Result<Self, String> {
        if lo < range.max {
            Ok(uniform_int(rng, lo, range.max))
        } else {
            Ok(lo)
        }
    }
}

/// Modalities (categorical data, class labels). Values are indices into `0..range.range`.
impl DataValue for usize {
    const TYPE_NAME: &'static str = "categorical";

    fn range_width(min: Self, max: Self) -> Self {
        max.saturating_sub(min) + 1
    }

    fn from_real(x: f64) -> Option<Self> {
        NumCast::from(x.round())
    }

    fn sample_missing<R: Rng + ?Sized>(rng: &mut R, range: &Range<Self>) -> Result<Self, String> {
        let nb_modalities = range.max + 1;
        let weights = vec![1.0; nb_modalities];
        multinomial(rng, &weights).ok_or_else(|| "no modality to sample from".to_string())
    }

    fn sample_finite_values<R: Rng + ?Sized>(
        rng: &mut R,
        candidates: &[Self],
        range: &Range<Self>,
    ) -> Result<Self, String> {
        let nb_modalities = candidates
            .iter()
            .copied()
            .max()
            .map_or(range.max + 1, |m| m.max(range.max) + 1);
        let mut weights = vec![0.0; nb_modalities];
        for &c in candidates {
            weights[c] = 1.0;
        }
        multinomial(rng, &weights).ok_or_else(|| "empty list of candidate modalities".to_string())
    }
}

/**
Completed values of one variable plus their missing-value descriptors.

Filled by the parsing layer through [`set_present`](Self::set_present) and
[`set_missing`](Self::set_missing), then completed every sampling step by
[`remove_missing`](Self::remove_missing).
*/
#[derive(Debug, Clone)]
pub struct AugmentedData<T: DataValue> {
    pub data: Vec<T>,
    pub mis_data: Vec<MisVal<T>>,
    pub data_range: Range<T>,
    mis_count: [usize; 6],
    nb_sample: usize,
    initial_data: Option<Vec<T>>,
}

impl<T: DataValue> Default for AugmentedData<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DataValue> AugmentedData<T> {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            mis_data: Vec::new(),
            data_range: Range::default(),
            mis_count: [0; 6],
            nb_sample: 0,
            initial_data: None,
        }
    }

    pub fn resize_arrays(&mut self, n: usize) {
        self.data.resize(n, T::default());
        self.mis_data.resize(n, MisVal::Missing);
    }

    /// Number of individuals that have been set so far.
    pub fn nb_sample(&self) -> usize {
        self.nb_sample
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn mis_count(&self, kind: MisType) -> usize {
        self.mis_count[kind.index()]
    }

    pub fn is_present(&self, i: usize) -> bool {
        matches!(self.mis_data[i], MisVal::Present)
    }

    pub fn set_present(&mut self, i: usize, value: T) {
        self.data[i] = value;
        self.mis_data[i] = MisVal::Present;
        self.mis_count[MisType::Present.index()] += 1;
        self.nb_sample += 1;
    }

    /// Registers a missing value. `data[i]` receives a placeholder until the first completion.
    pub fn set_missing(&mut self, i: usize, mis_val: MisVal<T>) {
        self.data[i] = T::default();
        self.mis_count[mis_val.kind().index()] += 1;
        self.mis_data[i] = mis_val;
        self.nb_sample += 1;
    }

    /// Marks every individual as completely missing, e.g. the class labels of an unsupervised run.
    pub fn set_all_missing(&mut self, n: usize) {
        self.data.clear();
        self.mis_data.clear();
        self.mis_count = [0; 6];
        self.nb_sample = 0;
        self.resize_arrays(n);
        for i in 0..n {
            self.set_missing(i, MisVal::Missing);
        }
    }

    /// Tightest bound consistent with observed values and descriptor bounds.
    ///
    /// Leaves `data_range` untouched when no individual carries any bound information.
    pub fn compute_range(&mut self) {
        let mut bounds: Option<(T, T)> = None;
        let mut update = |v: T| {
            bounds = Some(match bounds {
                None => (v, v),
                Some((min, max)) => (
                    if v < min { v } else { min },
                    if v > max { v } else { max },
                ),
            });
        };
        for (value, mis_val) in self.data.iter().zip(&self.mis_data) {
            match mis_val {
                MisVal::Present => update(*value),
                other => other.bounds().into_iter().for_each(&mut update),
            }
        }
        if let Some((min, max)) = bounds {
            self.data_range = Range::new(min, max, true);
        }
    }

    /// Overrides the range, e.g. with the class count for the latent labels.
    pub fn set_range(&mut self, min: T, max: T, has_range: bool) {
        self.data_range = Range::new(min, max, has_range);
    }

    /// Reports every descriptor kind in use that is absent from `accepted`.
    pub fn check_missing_type(&self, accepted: &[MisType]) -> Result<(), String> {
        let warn_log: String = MisType::ALL
            .iter()
            .filter(|kind| !accepted.contains(*kind) && self.mis_count(**kind) > 0)
            .map(|kind| kind.unsupported_message(self.mis_count(*kind)) + "\n")
            .collect();
        if warn_log.is_empty() {
            Ok(())
        } else {
            Err(warn_log)
        }
    }

    /// Completes `data[i]`, or restores the frozen value after [`set_fixed_initialization`](Self::set_fixed_initialization).
    pub fn remove_missing<R: Rng + ?Sized>(&mut self, i: usize, rng: &mut R) -> Result<(), String> {
        match &self.initial_data {
            Some(initial) => {
                self.data[i] = initial[i];
                Ok(())
            }
            None => self.remove_missing_sample(i, rng),
        }
    }

    /// Draws a fresh provisional value consistent with `mis_data[i]`. Present values are kept.
    pub fn remove_missing_sample<R: Rng + ?Sized>(
        &mut self,
        i: usize,
        rng: &mut R,
    ) -> Result<(), String> {
        let range = &self.data_range;
        let sampled = match &self.mis_data[i] {
            MisVal::Present => return Ok(()),
            MisVal::Missing => T::sample_missing(rng, range),
            MisVal::FiniteValues(candidates) => T::sample_finite_values(rng, candidates, range),
            MisVal::Interval(lo, hi) => T::sample_interval(rng, *lo, *hi, range),
            MisVal::LeftUnbounded(hi) => T::sample_left_unbounded(rng, *hi, range),
            MisVal::RightUnbounded(lo) => T::sample_right_unbounded(rng, *lo, range),
        };
        self.data[i] = sampled.map_err(|e| format!("individual {i}: {e}"))?;
        Ok(())
    }

    /// Freezes the current values. All individuals become `Missing` so the algorithm still
    /// runs normally, but every completion restores the frozen value.
    pub fn set_fixed_initialization(&mut self) {
        self.initial_data = Some(self.data.clone());
        let n = self.data.len();
        self.mis_count = [0; 6];
        self.nb_sample = 0;
        for i in 0..n {
            let value = self.data[i];
            self.set_missing(i, MisVal::Missing);
            self.data[i] = value;
        }
    }

    pub fn has_fixed_initialization(&self) -> bool {
        self.initial_data.is_some()
    }
}
