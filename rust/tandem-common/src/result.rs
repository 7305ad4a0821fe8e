/// Result of any fallible tandem operation.
pub type Result<T> = std::result::Result<T, crate::error::Error>;

/// Returns early with `InvalidArgument` unless `$cond` holds.
///
/// The error names the argument and quotes the failed condition verbatim, so
/// `verify_arg!(capacity, capacity >= 1)` reports `invalid argument capacity: capacity >= 1`.
/// Usable in any function returning [`Result`].
#[macro_export]
macro_rules! verify_arg {
    ($name:ident, $cond:expr) => {
        if !$cond {
            return Err($crate::error::Error::invalid_arg(
                stringify!($name),
                stringify!($cond),
            ));
        }
    };
}
