/// Invoke `$m!` once per suffix of the identifier list:
/// `tuple_impls!(m; A, B, C)` expands to `m!(A, B, C); m!(B, C); m!(C);`.
macro_rules! tuple_impls {
    ($m:ident; $head:ident) => {
        $m!($head);
    };
    ($m:ident; $head:ident, $($tail:ident),+) => {
        $m!($head, $($tail),+);
        $crate::ecs::util::tuple_impls!($m; $($tail),+);
    };
}

/// Invoke `$m!` for every tuple arity from 1 to 16.
macro_rules! all_tuples {
    ($m:ident) => {
        $crate::ecs::util::tuple_impls!($m; A, B, C, D, E, F, G, H, I, J, K, L, M, N, O, P);
    };
}

pub(crate) use {all_tuples, tuple_impls};
