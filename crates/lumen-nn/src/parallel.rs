use lumen_blob::{Blob, BlobAllocator};
use rayon::prelude::*;

/// Controls how per-channel kernels are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionStrategy {
    /// Use the global Rayon thread pool, one task per output plane.
    #[default]
    Parallel,

    /// Run sequentially on the current thread.
    ///
    /// Useful for small blobs or when the caller already runs layers in parallel.
    Serial,
}

/// Apply `f` to every plane of `blob` with the given strategy.
///
/// The closure receives the channel index and the `w * h` values of that plane.
/// Planes are disjoint, so no synchronization is needed between calls.
pub fn for_each_plane_mut<A, F>(blob: &mut Blob<A>, strategy: ExecutionStrategy, f: F)
where
    A: BlobAllocator,
    F: Fn(usize, &mut [f32]) + Send + Sync,
{
    match strategy {
        ExecutionStrategy::Serial => {
            blob.planes_mut()
                .enumerate()
                .for_each(|(p, plane)| f(p, plane));
        }
        ExecutionStrategy::Parallel => {
            blob.par_planes_mut()
                .enumerate()
                .for_each(|(p, plane)| f(p, plane));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_blob::CpuAllocator;

    #[test]
    fn test_for_each_plane_strategies_agree() -> Result<(), lumen_blob::BlobError> {
        let mut serial = Blob::new(3, 3, 5, CpuAllocator)?;
        let mut parallel = Blob::new(3, 3, 5, CpuAllocator)?;

        let kernel = |p: usize, plane: &mut [f32]| {
            plane
                .iter_mut()
                .enumerate()
                .for_each(|(i, v)| *v = (p * 10 + i) as f32);
        };

        for_each_plane_mut(&mut serial, ExecutionStrategy::Serial, kernel);
        for_each_plane_mut(&mut parallel, ExecutionStrategy::Parallel, kernel);

        assert_eq!(serial.to_packed_vec(), parallel.to_packed_vec());
        assert_eq!(serial.plane(4)[8], 48.0);
        Ok(())
    }
}
