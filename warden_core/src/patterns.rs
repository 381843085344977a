//! Shared regular expressions for key and identifier validation.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Matches a synthetic group-inheritance key (`group.<name>`).
    pub static ref GROUP_MATCH: Regex = Regex::new(r"^group\..+$").unwrap();

    /// Matches one shorthand range segment, e.g. the `(a|b|c)` in `chat.(say|me)`.
    pub static ref SHORTHAND: Regex = Regex::new(r"\(([^.()|]+(?:\|[^.()|]+)+)\)").unwrap();

    /// Characters a permission key must never contain.
    pub static ref INVALID_KEY_CHARS: Regex = Regex::new(r"[/$\s]").unwrap();

    /// Reserved delimiters disallowed in server and world names.
    pub static ref INVALID_NAME_CHARS: Regex = Regex::new(r"[/$.\-\s]").unwrap();
}
