/// A `ParamGen` writes the initial values of one tensor of the flat parameter buffer.
pub trait ParamGen {
    /// Fills `out` entirely.
    fn fill(&mut self, out: &mut [f32]);
}

/// Writes the same value everywhere. Batch norm scales and running variances start at
/// one, shifts and running means at zero.
#[derive(Debug, Clone, Copy)]
pub struct ConstParamGen(pub f32);

impl ParamGen for ConstParamGen {
    fn fill(&mut self, out: &mut [f32]) {
        out.fill(self.0);
    }
}
