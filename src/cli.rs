//! 命令行辅助
//!
//! 兼容 `-time 5`、`-server_ip 10.0.0.3` 这类单横线长参数：在交给 clap 之前
//! 把已知名字改写成 `--time`。

use std::ffi::OsString;

/// 把 `-name` / `-name=value` 改写为 `--name` / `--name=value`，只处理 `known` 中的名字
pub fn normalize_legacy_flags<I, T>(args: I, known: &[&str]) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    args.into_iter()
        .map(Into::into)
        .map(|arg| {
            let Some(s) = arg.to_str() else {
                return arg;
            };
            let Some(rest) = s.strip_prefix('-') else {
                return arg;
            };
            if rest.starts_with('-') {
                return arg;
            }
            let name = rest.split('=').next().unwrap_or(rest);
            if known.contains(&name) {
                OsString::from(format!("-{s}"))
            } else {
                arg
            }
        })
        .collect()
}

/// 初始化 tracing，默认 info 级别，可用 `RUST_LOG` 覆盖
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
