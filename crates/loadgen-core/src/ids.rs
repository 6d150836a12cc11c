//! Identifier formats enforced where IDs cross trust boundaries.
//!
//! Internally every identifier is a plain `String`; these helpers centralize
//! the regex shapes from the external-interfaces section rather than
//! scattering `Regex::new` calls across handlers.

use std::sync::OnceLock;

use regex::Regex;

fn pattern(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static id pattern is valid"))
}

macro_rules! id_kind {
    ($check_fn:ident, $make_fn:ident, $prefix:expr, $pattern:expr) => {
        pub fn $check_fn(id: &str) -> bool {
            static RE: OnceLock<Regex> = OnceLock::new();
            pattern(&RE, $pattern).is_match(id)
        }

        pub fn $make_fn() -> String {
            format!("{}{}", $prefix, hex_counter_seed())
        }
    };
}

/// Generates a random 16-hex-digit suffix for newly minted identifiers.
/// Monotonic per-run counters (event ids) are handled separately by the
/// owning component under its lock; this is only used for globally unique
/// ids (run, worker, execution, session).
fn hex_counter_seed() -> String {
    let bytes: [u8; 8] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

id_kind!(is_valid_run_id, new_run_id, "run_", r"^run_[0-9a-f]{16,64}$");
id_kind!(is_valid_worker_id, new_worker_id, "wkr_", r"^wkr_[0-9a-f]{8,64}$");
id_kind!(
    is_valid_execution_id,
    new_execution_id,
    "exe_",
    r"^exe_[0-9a-f]{8,64}$"
);

pub fn is_valid_stage_id(id: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    pattern(&RE, r"^stg_[0-9a-f]{3,81}$").is_match(id)
}

pub fn is_valid_event_id(id: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    pattern(&RE, r"^evt_[0-9a-f]+$").is_match(id)
}

/// Formats an event id from a per-run monotonic counter, zero-padded to 16
/// hex digits so lexical and numeric ordering agree.
pub fn format_event_id(counter: u64) -> String {
    format!("evt_{counter:016x}")
}

/// Parses the hex counter back out of an event id produced by
/// [`format_event_id`]. Returns `None` for malformed ids.
pub fn parse_event_counter(event_id: &str) -> Option<u64> {
    let hex = event_id.strip_prefix("evt_")?;
    u64::from_str_radix(hex, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrips_validation() {
        let id = new_run_id();
        assert!(is_valid_run_id(&id));
    }

    #[test]
    fn run_id_rejects_bad_shapes() {
        assert!(!is_valid_run_id("run_"));
        assert!(!is_valid_run_id("run_XYZ"));
        assert!(!is_valid_run_id("wkr_0123456789abcdef"));
    }

    #[test]
    fn event_id_format_and_parse_roundtrip() {
        let id = format_event_id(42);
        assert!(is_valid_event_id(&id));
        assert_eq!(parse_event_counter(&id), Some(42));
    }

    #[test]
    fn event_id_lexical_order_matches_numeric_order() {
        let a = format_event_id(1);
        let b = format_event_id(2);
        let c = format_event_id(16);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn event_log_single_entry_since_boundary() {
        // Event log containing evt_0000000000000001 only: since=0 returns it;
        // since=1 returns nothing. The store filters on counter > since.
        let counter = parse_event_counter(&format_event_id(1)).unwrap();
        assert!(counter > 0);
        assert!(!(counter > 1));
    }

    #[test]
    fn stage_id_validation() {
        assert!(is_valid_stage_id("stg_abc"));
        assert!(!is_valid_stage_id("stg_"));
        assert!(!is_valid_stage_id("stg_xyz")); // not hex
    }

    #[test]
    fn worker_and_execution_id_generation() {
        let w = new_worker_id();
        let e = new_execution_id();
        assert!(is_valid_worker_id(&w));
        assert!(is_valid_execution_id(&e));
    }
}
