//! Thin `log`-facade init helper: this crate only needs a way for its own
//! tests and any binary linking it to install a backend. Library code
//! never calls this itself — only tests and downstream binaries do; the
//! binary linking this crate owns its own logger setup.

/// Installs an `env_logger` backend if one isn't already installed.
/// Safe to call from multiple tests; later calls are no-ops.
///
/// `env_logger` is a dev-dependency only, so this is `cfg(test)`-gated:
/// it is unavailable (and unneeded) outside `cargo test`.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
