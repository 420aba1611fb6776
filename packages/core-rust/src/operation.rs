use std::fmt::Debug;

/// Identifier of a service operation, typically a fieldless enum with one
/// variant per endpoint.
///
/// Observers receive the operation by value, so implementations must be cheap
/// to copy.
pub trait Operation: Copy + Debug + Send + Sync + 'static {
    /// Canonical name of the operation, e.g. `"LIST_PETS"`.
    fn name(&self) -> &'static str;

    /// Name used in log output: lower-cased with `_` replaced by `-`.
    fn logging_name(&self) -> String {
        self.name().to_ascii_lowercase().replace('_', "-")
    }
}
