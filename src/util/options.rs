//! Runtime-selectable collector tunables.
//!
//! Options are plain typed values with validators. They can be set in bulk
//! from `key=value` strings and from `EMBER_GC_`-prefixed environment
//! variables (`EMBER_GC_ALWAYS_COMPACT=true`), and are read through `Deref`
//! (`*options.always_compact`).

use std::fmt::Debug;

use crate::util::constants::{BYTES_IN_KBYTE, BYTES_IN_PAGE};

fn always_valid<T>(_: &T) -> bool {
    true
}

/// A single option value with its validator.
#[derive(Clone)]
pub struct GcOption<T: Debug + Clone> {
    value: T,
    validator: fn(&T) -> bool,
}

impl<T: Debug + Clone> GcOption<T> {
    pub fn new(value: T, validator: fn(&T) -> bool) -> Self {
        GcOption { value, validator }
    }

    /// Set the option. Returns false (leaving the value unchanged) if the
    /// new value does not validate.
    pub fn set(&mut self, value: T) -> bool {
        if (self.validator)(&value) {
            self.value = value;
            return true;
        }
        false
    }
}

impl<T: Debug + Clone> std::ops::Deref for GcOption<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

macro_rules! options {
    ($($(#[$outer:meta])* $name:ident: $type:ty [$validator:expr] = $default:expr),* $(,)?) => {
        /// All collector tunables.
        #[derive(Clone)]
        pub struct Options {
            $($(#[$outer])* pub $name: GcOption<$type>),*
        }

        impl Options {
            fn new() -> Self {
                Options {
                    $($name: GcOption::new($default, $validator)),*
                }
            }

            /// Set one option from its string representation. Returns false
            /// for unknown keys, unparsable values and validation failures.
            pub fn set_from_str(&mut self, key: &str, val: &str) -> bool {
                match key {
                    $(stringify!($name) => match val.parse::<$type>() {
                        Ok(typed) => {
                            let ok = self.$name.set(typed);
                            if !ok {
                                warn!("unable to set {}={:?}: invalid value", key, val);
                            }
                            ok
                        }
                        Err(_) => {
                            warn!("unable to set {}={:?}: cannot parse value", key, val);
                            false
                        }
                    },)*
                    _ => {
                        warn!("unknown option {}", key);
                        false
                    }
                }
            }

            /// Bulk-set options from whitespace- or comma-separated
            /// `key=value` pairs. Returns true only if every pair applied.
            pub fn set_bulk_from_str(&mut self, options: &str) -> bool {
                let mut ok = true;
                for opt in options.replace(',', " ").split_ascii_whitespace() {
                    match opt.split_once('=') {
                        Some((key, val)) => ok &= self.set_from_str(key, val),
                        None => ok = false,
                    }
                }
                ok
            }

            /// Apply `EMBER_GC_*` environment variables to self.
            pub fn read_env_var_settings(&mut self) {
                const PREFIX: &str = "EMBER_GC_";
                for (key, val) in std::env::vars() {
                    if let Some(rest_of_key) = key.strip_prefix(PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => {
                                self.set_from_str(lowercase, &val);
                            })*
                            _ => {}
                        }
                    }
                }
            }
        }

        impl Default for Options {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

options! {
    /// Force a compacting collection every cycle.
    always_compact: bool [always_valid] = false,
    /// Forbid compaction outright; overrides `always_compact` and the
    /// fragmentation heuristic.
    never_compact: bool [always_valid] = false,
    /// Clear dead transitions out of surviving class descriptors. Forced off
    /// for a cycle that finalizes incremental marking.
    collect_maps: bool [always_valid] = true,
    /// Age and drop the code of uncalled compiled functions. Forced off
    /// while a debugger is attached.
    flush_code: bool [always_valid] = true,
    /// Allow incremental marking cycles between collections.
    incremental_marking: bool [always_valid] = false,
    /// Sweep the movable old spaces precisely rather than conservatively.
    sweep_precisely: bool [always_valid] = false,
    /// Drop per-descriptor code caches while marking.
    cleanup_caches_in_maps_at_gc: bool [always_valid] = true,
    /// Marking stack capacity in words; 0 means the whole idle semispace.
    marking_stack_size: usize [always_valid] = 0,
    /// Default filter for the built-in logger, in `env_logger` syntax;
    /// `RUST_LOG` still takes precedence.
    log_filter: String [|v: &String| !v.is_empty()] = String::from("info"),
    /// Size of each nursery semispace in bytes.
    semispace_size: usize [|v: &usize| v.is_power_of_two() && *v >= 4 * BYTES_IN_KBYTE && *v <= BYTES_IN_PAGE / 2]
        = 512 * BYTES_IN_KBYTE,
    /// Upper bound on pages per paged old space.
    max_old_space_pages: usize [|v: &usize| *v >= 1] = 16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = Options::default();
        assert!(!*options.always_compact);
        assert!(*options.collect_maps);
        assert_eq!(*options.semispace_size, 512 * BYTES_IN_KBYTE);
        assert_eq!(options.log_filter.as_str(), "info");
    }

    #[test]
    fn log_filter_accepts_module_specs() {
        let mut options = Options::default();
        assert!(options.set_from_str("log_filter", "ember_gc::collector=trace"));
        assert_eq!(options.log_filter.as_str(), "ember_gc::collector=trace");
        assert!(!options.set_from_str("log_filter", ""));
    }

    #[test]
    fn set_from_str() {
        let mut options = Options::default();
        assert!(options.set_from_str("always_compact", "true"));
        assert!(*options.always_compact);
        assert!(!options.set_from_str("always_compact", "yes"));
        assert!(!options.set_from_str("no_such_option", "1"));
    }

    #[test]
    fn bulk_set() {
        let mut options = Options::default();
        assert!(options.set_bulk_from_str("flush_code=false, marking_stack_size=4"));
        assert!(!*options.flush_code);
        assert_eq!(*options.marking_stack_size, 4);
        assert!(!options.set_bulk_from_str("flush_code"));
    }

    #[test]
    fn validators_reject_bad_values() {
        let mut options = Options::default();
        // Not a power of two.
        assert!(!options.set_from_str("semispace_size", "100000"));
        assert_eq!(*options.semispace_size, 512 * BYTES_IN_KBYTE);
        assert!(!options.set_from_str("max_old_space_pages", "0"));
    }
}
