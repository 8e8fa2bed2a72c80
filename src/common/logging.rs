use std::io::Write;

use env_logger::Builder;

/// Installs the global logger. Level filtering follows `RUST_LOG`.
/// Calling this more than once is harmless.
pub fn init_log() {
    let _ = Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}:{}] {}",
                record.level(),
                record.file().unwrap_or("?"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .try_init();
}
