//! Common test utilities for rar-hunter integration tests
//!
//! `/bin/sh -c SCRIPT <archive>` stands in for unrar, with the archive name
//! arriving as `$0`. Every archive "contains" one file, `<stem>.mkv`, where
//! the stem is the name up to the first dot. Archives with `corrupt` in their
//! name fail to extract.

#![allow(dead_code)]

use rar_hunter::CliArchiver;
use rar_hunter::config::{BusConfig, Config};
use std::path::{Path, PathBuf};
use std::time::Duration;

const LIST_SCRIPT: &str = r#"echo "${0%%.*}.mkv""#;

const EXTRACT_SCRIPT: &str = r#"
case "$0" in
    *corrupt*) echo "Extracting $0"; echo "CRC failed in $0" >&2; exit 3 ;;
esac
: > "${0%%.*}.mkv"
echo "All OK"
"#;

/// Archiver backed by `/bin/sh` that behaves like a tiny unrar
pub fn fake_unrar() -> CliArchiver {
    CliArchiver::new("/bin/sh")
        .with_list_args(["-c", LIST_SCRIPT])
        .with_extract_args(["-c", EXTRACT_SCRIPT])
}

/// Config tuned for tests: more workers, short timeouts
pub fn test_config() -> Config {
    let mut config = Config {
        bus: BusConfig {
            workers: 2,
            ..BusConfig::default()
        },
        ..Config::default()
    };
    config.hunt.verdict_timeout = Duration::from_secs(10);
    config.hunt.shutdown_timeout = Duration::from_secs(2);
    config.runner.collect_timeout = Some(Duration::from_secs(30));
    config
}

/// `<root>/<rel>/` containing `<name>.rar`, `<name>.r00` and a manifest listing both
pub fn complete_release(root: &Path, rel: &str, name: &str) -> PathBuf {
    let dir = root.join(rel);
    std::fs::create_dir_all(&dir).expect("create release dir");
    std::fs::write(dir.join(format!("{name}.rar")), b"rar").expect("write rar");
    std::fs::write(dir.join(format!("{name}.r00")), b"r00").expect("write r00");
    std::fs::write(
        dir.join(format!("{name}.sfv")),
        format!("; test manifest\n{name}.rar 1a2b3c4d\n{name}.r00 5e6f7a8b\n"),
    )
    .expect("write sfv");
    dir
}

/// Like [`complete_release`] but with the `.r00` volume missing
pub fn incomplete_release(root: &Path, rel: &str, name: &str) -> PathBuf {
    let dir = complete_release(root, rel, name);
    std::fs::remove_file(dir.join(format!("{name}.r00"))).expect("remove r00");
    dir
}

/// A complete release whose contents were already extracted
pub fn extracted_release(root: &Path, rel: &str, name: &str) -> PathBuf {
    let dir = complete_release(root, rel, name);
    std::fs::write(dir.join(format!("{name}.mkv")), b"video").expect("write mkv");
    dir
}

/// A directory with no manifest
pub fn plain_dir(root: &Path, rel: &str) -> PathBuf {
    let dir = root.join(rel);
    std::fs::create_dir_all(&dir).expect("create plain dir");
    std::fs::write(dir.join("readme.txt"), b"nothing to see").expect("write readme");
    dir
}
