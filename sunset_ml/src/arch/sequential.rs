use ndarray::ArrayD;

use super::{Mode, layers::Layer};
use crate::{
    MlErr, Result,
    params::{ParamSpec, StateUpdate},
};

/// What a forward pass through a `Sequential` produced.
#[derive(Debug)]
pub struct Forward {
    pub output: ArrayD<f32>,
    /// Buffer writes, relative to the start of the sequential's parameter slice.
    pub updates: Vec<StateUpdate>,
}

/// A sequential stack: information flows through its layers in order, each one reading
/// its own consecutive slice of the parameter buffer.
#[derive(Debug, Clone)]
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// The amount of scalars the whole stack reads from the parameter buffer.
    pub fn size(&self) -> usize {
        self.layers.iter().map(Layer::size).sum()
    }

    /// Propagates `input` through every layer's shape rule.
    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        self.layers
            .iter()
            .try_fold(input.to_vec(), |shape, layer| layer.output_shape(&shape))
    }

    /// Names every tensor of the stack as `{prefix}.{layer index}.{suffix}`, in buffer order.
    pub fn param_specs(&self, prefix: &str) -> Vec<(String, ParamSpec)> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(i, layer)| {
                layer
                    .param_specs()
                    .into_iter()
                    .map(move |spec| (format!("{prefix}.{i}.{}", spec.kind.suffix()), spec))
            })
            .collect()
    }

    /// Makes a forward pass through the stack.
    ///
    /// # Arguments
    /// * `params` - This stack's slice of the parameter buffer.
    /// * `x` - The input data.
    /// * `mode` - Whether dropout and batch normalization behave as in training.
    ///
    /// # Returns
    /// The output and the buffer writes the pass produced, or an error if occurred.
    pub fn forward(
        &self,
        params: &[f32],
        mut x: ArrayD<f32>,
        mode: &mut Mode<'_>,
    ) -> Result<Forward> {
        let nlayers = self.layers.len();
        let mut rest = params;
        let mut offset = 0;
        let mut updates = Vec::new();

        for (i, layer) in self.layers.iter().enumerate() {
            let size = layer.size();
            let (layer_params, tail) =
                rest.split_at_checked(size).ok_or_else(|| MlErr::SizeMismatch {
                    what: "layers",
                    got: i,
                    expected: nlayers,
                })?;

            let out = layer.forward(layer_params, x, mode)?;
            x = out.x;
            updates.extend(out.update.map(|update| update.shifted(offset)));

            rest = tail;
            offset += size;
        }

        if !rest.is_empty() {
            return Err(MlErr::SizeMismatch {
                what: "sequential parameters",
                got: params.len(),
                expected: offset,
            });
        }

        Ok(Forward { output: x, updates })
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, Array4};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn small_stack() -> Sequential {
        Sequential::new([
            Layer::conv2d(1, 2, 3, 1).unwrap(),
            Layer::relu(),
            Layer::batch_norm2d(2, 1e-5, 0.1).unwrap(),
            Layer::max_pool2d(2, 2).unwrap(),
            Layer::flatten(),
            Layer::dense((8, 1)).unwrap(),
        ])
    }

    fn params_for(stack: &Sequential) -> Vec<f32> {
        let mut params = vec![0.1; stack.size()];
        // batch norm running var starts at one
        let bn_start = 2 * 9 + 2;
        params[bn_start + 6..bn_start + 8].fill(1.);
        params
    }

    #[test]
    fn size_is_sum_of_layers() {
        let stack = small_stack();
        assert_eq!(stack.size(), (2 * 9 + 2) + 4 * 2 + (8 + 1));
    }

    #[test]
    fn shapes_propagate() {
        let stack = small_stack();
        assert_eq!(stack.output_shape(&[3, 1, 4, 4]).unwrap(), [3, 1]);
        assert!(stack.output_shape(&[3, 1, 6, 6]).is_err());
    }

    #[test]
    fn names_follow_layer_positions() {
        let names: Vec<_> = small_stack()
            .param_specs("features")
            .into_iter()
            .map(|(name, _)| name)
            .collect();

        assert_eq!(
            names,
            [
                "features.0.weight",
                "features.0.bias",
                "features.2.weight",
                "features.2.bias",
                "features.2.running_mean",
                "features.2.running_var",
                "features.5.weight",
                "features.5.bias",
            ]
        );
    }

    #[test]
    fn eval_forward_has_no_updates() {
        let stack = small_stack();
        let params = params_for(&stack);
        let x = Array4::<f32>::ones((2, 1, 4, 4)).into_dyn();

        let out = stack.forward(&params, x, &mut Mode::Eval).unwrap();

        assert_eq!(out.output.shape(), &[2, 1]);
        assert!(out.updates.is_empty());
    }

    #[test]
    fn train_updates_are_offset_into_the_stack() {
        let stack = small_stack();
        let params = params_for(&stack);
        let x = Array4::from_shape_fn((2, 1, 4, 4), |(n, _, i, j)| (n + i * j) as f32);
        let mut rng = StdRng::seed_from_u64(7);

        let out = stack
            .forward(&params, x.into_dyn(), &mut Mode::train(&mut rng))
            .unwrap();

        assert_eq!(out.updates.len(), 1);
        assert_eq!(out.updates[0].offset, 2 * 9 + 2 + 2 * 2);
        assert_eq!(out.updates[0].values.len(), 4);
    }

    #[test]
    fn rejects_wrong_param_len() {
        let stack = small_stack();
        let x = Array4::<f32>::zeros((1, 1, 4, 4)).into_dyn();

        let short = vec![0.; stack.size() - 1];
        assert!(matches!(
            stack.forward(&short, x.clone(), &mut Mode::Eval),
            Err(MlErr::SizeMismatch { .. })
        ));

        let long = vec![0.; stack.size() + 1];
        assert!(matches!(
            stack.forward(&long, x, &mut Mode::Eval),
            Err(MlErr::SizeMismatch { .. })
        ));
    }

    #[test]
    fn dense_only_stack_is_affine() {
        let stack = Sequential::new([Layer::dense((2, 1)).unwrap()]);
        let x = Array2::from_shape_vec((1, 2), vec![1., 2.]).unwrap().into_dyn();

        let out = stack.forward(&[3., 4., 0.5], x, &mut Mode::Eval).unwrap();

        assert_eq!(out.output.iter().copied().collect::<Vec<_>>(), [11.5]);
    }
}
