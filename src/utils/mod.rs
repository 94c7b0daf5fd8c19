mod path;
mod string;

pub use path::{canonical_locator, is_under, normalize_path};
pub use string::{last_segment, normalize_entry, unquote_string};
