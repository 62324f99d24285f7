//! Small shared helpers for this workspace's test suites: one-time tracing init, and a
//! scratch-directory helper for Stores that need real files on disk.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]

use once_cell::sync::OnceCell;

static INIT: OnceCell<()> = OnceCell::new();

/// Install an `env_filter`-driven tracing subscriber once per process.
///
/// Controlled by the `RUST_LOG` environment variable; tests that want to see
/// logs run with `RUST_LOG=debug cargo test -- --nocapture`.
pub fn maybe_start_logging() {
    INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Create a fresh temporary directory for a test, auto-removed on drop.
pub fn scratch_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("failed to create scratch dir")
}
