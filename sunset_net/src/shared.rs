use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use ndarray::{Array2, ArrayView4};
use parking_lot::{RwLock, RwLockReadGuard};
use rand::RngCore;
use sunset_ml::{arch::Mode, params::Params};

use crate::{Result, SunsetNet, Weather};

/// A model shared between threads.
///
/// Predictions take the read lock and run concurrently. Training passes, parameter
/// updates and checkpoint loads take the write lock, so there is a single writer at a time.
#[derive(Debug, Clone)]
pub struct SharedSunsetNet {
    inner: Arc<RwLock<SunsetNet>>,
}

impl SharedSunsetNet {
    pub fn new(net: SunsetNet) -> Self {
        Self {
            inner: Arc::new(RwLock::new(net)),
        }
    }

    pub fn weather(&self) -> Weather {
        self.inner.read().weather()
    }

    pub fn predict(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>> {
        self.inner.read().predict(batch)
    }

    /// Makes a training-mode pass and commits its batch norm updates.
    pub fn train_forward(
        &self,
        batch: ArrayView4<'_, f32>,
        rng: &mut dyn RngCore,
    ) -> Result<Array2<f32>> {
        self.inner.write().forward(batch, &mut Mode::train(rng))
    }

    /// Runs `f` with exclusive access to the parameters.
    pub fn update_params<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut Params) -> T,
    {
        f(self.inner.write().params_mut())
    }

    /// Locks the model for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, SunsetNet> {
        self.inner.read()
    }

    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf> {
        self.inner.read().save(dir)
    }

    pub fn load<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        self.inner.write().load(dir)
    }
}

impl From<SunsetNet> for SharedSunsetNet {
    fn from(net: SunsetNet) -> Self {
        Self::new(net)
    }
}
