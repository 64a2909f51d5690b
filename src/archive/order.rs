//! Page order prefixes.
//!
//! Reader apps sort pages by entry name, so page order inside a container is
//! expressed as a numeric prefix: exactly four ASCII digits and an
//! underscore (`0003_page.jpg`). A longer numeric lead (`12345_x.jpg`) is part
//! of the page's own name and is never stripped.

/// Width of an order prefix's digit run
const PREFIX_DIGITS: usize = 4;

/// True if the name starts with exactly four digits followed by `_`
pub fn has_order_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() > PREFIX_DIGITS
        && bytes[..PREFIX_DIGITS].iter().all(u8::is_ascii_digit)
        && bytes[PREFIX_DIGITS] == b'_'
}

/// Remove an order prefix if present
pub fn strip_order_prefix(name: &str) -> &str {
    if has_order_prefix(name) {
        &name[PREFIX_DIGITS + 1..]
    } else {
        name
    }
}

/// Replace any existing order prefix with `index`.
///
/// Only the final path component is prefixed, so `pages/b.jpg` at index 2
/// becomes `pages/0002_b.jpg`. Indices above 9999 keep their full width.
pub fn apply_order_prefix(name: &str, index: usize) -> String {
    let (dir, base) = match name.rfind('/') {
        Some(idx) => name.split_at(idx + 1),
        None => ("", name),
    };
    format!(
        "{}{:0width$}_{}",
        dir,
        index,
        strip_order_prefix(base),
        width = PREFIX_DIGITS
    )
}
