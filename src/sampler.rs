use crate::data::{AugmentedData, MisVal};
use crate::distributions::multinomial;
use ndarray::ArrayView1;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;

/**
Draws the class label of one individual from its posterior responsibilities.

Observed labels are kept. A completely missing label is drawn among all classes, a label
given as a list of candidates among those candidates only. An optional gate vetoes classes
that would break the partition.

# Examples

```rust
use mixtcomp::data::{AugmentedData, MisVal};
use mixtcomp::sampler::ClassSampler;
use ndarray::array;
use rand::rngs::SmallRng;
use rand::SeedableRng;

let mut zi = AugmentedData::<usize>::new();
zi.resize_arrays(1);
zi.set_missing(0, MisVal::FiniteValues(vec![1, 2]));

let mut sampler = ClassSampler::new(3, SmallRng::seed_from_u64(0));
let tik = array![0.9, 0.0, 0.1];
assert_eq!(sampler.sample_individual(&zi, 0, tik.view(), None::<fn(usize) -> bool>), Some(2));
```
*/
#[derive(Debug, Clone)]
pub struct ClassSampler {
    nb_class: usize,
    rng: SmallRng,
}

impl ClassSampler {
    pub fn new(nb_class: usize, rng: SmallRng) -> Self {
        Self { nb_class, rng }
    }

    /// Uniform random permutation, drawn from the class generator.
    pub fn shuffle(&mut self, ind: &mut [usize]) {
        ind.shuffle(&mut self.rng);
    }

    /// Returns the new label of `i`, or `None` when every admissible class has a null weight
    /// after gating, or when the label descriptor has no sampling rule.
    pub fn sample_individual<F>(
        &mut self,
        zi: &AugmentedData<usize>,
        i: usize,
        tik_row: ArrayView1<f64>,
        mut gate: Option<F>,
    ) -> Option<usize>
    where
        F: FnMut(usize) -> bool,
    {
        let mut weight = |k: usize| -> f64 {
            let t = tik_row[k];
            if t <= 0.0 {
                return 0.0;
            }
            let allowed = match gate.as_mut() {
                Some(g) => g(k),
                None => true,
            };
            if allowed {
                t
            } else {
                0.0
            }
        };

        let mut w = vec![0.0; self.nb_class];
        match &zi.mis_data[i] {
            MisVal::Present => return Some(zi.data[i]),
            MisVal::Missing => {
                for (k, wk) in w.iter_mut().enumerate() {
                    *wk = weight(k);
                }
            }
            MisVal::FiniteValues(candidates) => {
                for &k in candidates.iter().filter(|&&k| k < self.nb_class) {
                    w[k] = weight(k);
                }
            }
            MisVal::Interval(..) | MisVal::LeftUnbounded(_) | MisVal::RightUnbounded(_) => {
                return None
            }
        }
        multinomial(&mut self.rng, &w)
    }
}
