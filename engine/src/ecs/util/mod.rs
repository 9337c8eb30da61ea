mod macros;

pub(crate) use macros::{all_tuples, tuple_impls};
