//! Row-parallel iteration with or without rayon.
//!
//! With the `parallel` feature, row loops over per-cell maps (FCPG ratio,
//! D8 to D-infinity, decay weights) use rayon. Without it, `into_par_iter`
//! falls back to a plain iterator so the same code compiles sequentially.

#[cfg(feature = "parallel")]
pub use rayon::prelude::*;

#[cfg(not(feature = "parallel"))]
mod sequential {
    pub trait IntoParallelIterator {
        type Iter;
        type Item;
        fn into_par_iter(self) -> Self::Iter;
    }

    impl<I: IntoIterator> IntoParallelIterator for I {
        type Iter = I::IntoIter;
        type Item = I::Item;
        fn into_par_iter(self) -> Self::Iter {
            self.into_iter()
        }
    }
}

#[cfg(not(feature = "parallel"))]
pub use sequential::*;
