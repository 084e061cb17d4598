mod error;
mod param_gen;
mod random;

use std::{cell::RefCell, rc::Rc};

use rand::Rng;

pub use error::RandErr;
pub use param_gen::{ConstParamGen, ParamGen};
pub use random::RandParamGen;

use crate::{
    Result,
    params::{ParamEntry, ParamKind, ParameterLayout},
};

/// Generates the initial values for every entry of `layout`, in layout order.
///
/// Convolution and dense tensors are drawn from `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`,
/// batch-norm scales and running variances start at one and every shift and running
/// mean starts at zero.
///
/// # Arguments
/// * `layout` - The layout of the flat parameter buffer.
/// * `rng` - The random number generator shared by every random generator.
///
/// # Returns
/// The flat parameter buffer or an error if a distribution could not be built.
pub fn init_layout<R: Rng + 'static>(
    layout: &ParameterLayout,
    rng: Rc<RefCell<R>>,
) -> Result<Vec<f32>> {
    let mut values = vec![0.; layout.total()];

    for entry in layout.iter() {
        param_gen_for(entry, &rng)?.fill(&mut values[entry.range.clone()]);
    }

    Ok(values)
}

fn param_gen_for<R: Rng + 'static>(
    entry: &ParamEntry,
    rng: &Rc<RefCell<R>>,
) -> Result<Box<dyn ParamGen>> {
    let param_gen: Box<dyn ParamGen> = match (entry.kind, entry.fan_in) {
        (ParamKind::Weight | ParamKind::Bias, Some(fan_in)) => {
            Box::new(RandParamGen::fan_in_uniform(Rc::clone(rng), fan_in)?)
        }
        (ParamKind::Weight | ParamKind::RunningVar, _) => Box::new(ConstParamGen(1.)),
        (ParamKind::Bias | ParamKind::RunningMean, _) => Box::new(ConstParamGen(0.)),
    };

    Ok(param_gen)
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::params::ParamSpec;

    fn layout() -> ParameterLayout {
        ParameterLayout::new([
            ("conv.weight", ParamSpec::new(ParamKind::Weight, vec![2, 1, 3, 3], Some(9))),
            ("conv.bias", ParamSpec::new(ParamKind::Bias, vec![2], Some(9))),
            ("bn.weight", ParamSpec::new(ParamKind::Weight, vec![2], None)),
            ("bn.bias", ParamSpec::new(ParamKind::Bias, vec![2], None)),
            ("bn.running_mean", ParamSpec::new(ParamKind::RunningMean, vec![2], None)),
            ("bn.running_var", ParamSpec::new(ParamKind::RunningVar, vec![2], None)),
        ])
        .unwrap()
    }

    #[test]
    fn follows_the_default_scheme() {
        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(0)));
        let values = init_layout(&layout(), rng).unwrap();

        assert_eq!(values.len(), 18 + 2 + 8);
        assert!(values[..20].iter().all(|v| v.abs() <= 1. / 3.));
        assert_eq!(&values[20..], &[1., 1., 0., 0., 0., 0., 1., 1.]);
    }

    #[test]
    fn is_reproducible() {
        let init = |seed| {
            let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(seed)));
            init_layout(&layout(), rng)
        };

        assert_eq!(init(3).unwrap(), init(3).unwrap());
        assert_ne!(init(3).unwrap(), init(4).unwrap());
    }
}
