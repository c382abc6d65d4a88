//! `invariant!` panics with a message when a state-corruption condition is
//! hit (double-invalidation, allocating past a full block, an out-of-range
//! address). These are fatal, not recoverable errors, so they surface as
//! an assertion failure rather than a `Result`.
macro_rules! invariant {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            panic!("ftl-core invariant violated: {}", format_args!($($arg)*));
        }
    };
}

pub(crate) use invariant;
