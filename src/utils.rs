//! # Utility Functions Module
//!
//! Small helpers for building external tool command lines.

/// Converts an iterable of string-like items to `Vec<String>`.
///
/// Tool argument lists mix literals, numbers and paths; this avoids a
/// `.to_string()` on every element.
///
/// # Example
/// ```rust
/// use imageoptim_task::utils::to_string_vec;
///
/// let level = 4;
/// let args = to_string_vec(["-o", &level.to_string(), "--strip", "safe"]);
/// assert_eq!(args[1], "4");
/// ```
pub fn to_string_vec<T, I>(items: I) -> Vec<String>
where
    T: ToString,
    I: IntoIterator<Item = T>,
{
    items.into_iter().map(|item| item.to_string()).collect()
}

/// Builds a tool argument vector from heterogeneous expressions.
///
/// # Example
/// ```rust
/// use imageoptim_task::args;
///
/// let level = 4;
/// let args = args!["-o", level, "--strip", "safe"];
/// assert_eq!(args, vec!["-o", "4", "--strip", "safe"]);
/// ```
#[macro_export]
macro_rules! args {
    [$($item:expr),* $(,)?] => {
        vec![$($item.to_string()),*] as Vec<String>
    };
}
