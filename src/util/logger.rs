//! Built-in logging setup.
//!
//! The collector logs through the `log` facade everywhere. With the
//! default-on "builtin_env_logger" Cargo feature, creating a
//! [`crate::heap::Heap`] installs `env_logger` configured from the heap's
//! own options: the `log_filter` option supplies the filter (so an
//! embedder can ask one heap for `"debug"` or a per-module spec like
//! `"ember_gc::collector=trace"`), and the `RUST_LOG` environment variable
//! still overrides it. Embedders with their own logging framework disable
//! the feature and register their own `log` implementation instead.

use crate::util::options::Options;

/// Install the built-in logger for this heap's options, if the feature is
/// compiled in and no logger is registered yet.
#[cfg(feature = "builtin_env_logger")]
pub(crate) fn try_init(options: &Options) {
    let env = env_logger::Env::default().default_filter_or(options.log_filter.as_str());
    if env_logger::Builder::from_env(env).try_init().is_err() {
        // Someone (perhaps another heap in this process) installed a logger
        // first; every heap logs through that one.
        trace!("logger already installed, keeping the existing one");
    }
}

#[cfg(not(feature = "builtin_env_logger"))]
pub(crate) fn try_init(_options: &Options) {}
