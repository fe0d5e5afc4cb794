//! Shared helpers for the integration suite.

use std::sync::Once;

use varhydrate::Variable;

/// Initialize test logging once; respects `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A query variable whose id and name are both `name`.
pub fn query_var(name: &str, query: &str) -> Variable {
    Variable::query(name, name, query, "flux")
}
