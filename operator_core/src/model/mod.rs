//! Complete neural-operator networks built from [`crate::layers`].

pub mod fno;

pub use fno::{FnoParams, FourierNeuralOperator};
