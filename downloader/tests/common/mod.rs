//! Fake transfer and extraction tools for orchestrator tests.
//!
//! Each fake is a small POSIX shell script written into a scratch
//! directory and configured in place of aria2c, curl or 7z.
#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use storegame_downloader::{DownloadEvent, DownloadHandle, DownloaderConfig};

const FAKE_ARIA2C: &str = r#"#!/bin/sh
if [ "$1" = "--version" ]; then
  echo "aria2 version 1.37.0"
  exit 0
fi
dir=""
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --dir) dir="$2"; shift 2 ;;
    --out) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
echo "[#1 120KiB/1.0MiB(12%) CN:10 DL:1.2MiB ETA:1s]"
echo "some chatter without progress"
@DELAY@
echo "[#1 584KiB/1.0MiB(@FINAL@%) CN:10 DL:2.0MiB ETA:1s]"
printf 'archive' > "$dir/$out"
exit @EXIT@
"#;

const FAKE_CURL: &str = r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
echo "curl: fetching" >&2
printf 'archive' > "$out"
exit 0
"#;

/// Invoked as `7z x <archive> -o<dir> -mmt=on -y`.
const FAKE_7Z: &str = r#"#!/bin/sh
touch "@MARKER@"
archive="$2"
dir=$(printf '%s' "$3" | cut -c3-)
[ -f "$archive" ] || exit 2
base=$(basename "$archive" .zip)
printf 'rom' > "$dir/$base.nes"
exit @EXIT@
"#;

/// Marker file the fake 7z touches whenever it runs.
pub const EXTRACT_MARKER: &str = "7z-invoked";

/// Scratch download root plus a directory of fake tools.
pub struct Fixture {
    pub root: tempfile::TempDir,
    pub tools: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
            tools: tempfile::tempdir().unwrap(),
        }
    }

    /// Fake aria2c that reports 12% and 57% then exits with `exit_code`.
    /// `delay_secs` is slept between the two progress lines.
    pub fn aria2c(&self, exit_code: i32, delay_secs: u64) -> String {
        self.aria2c_reaching(57, exit_code, delay_secs)
    }

    /// Like [`Fixture::aria2c`] but the second readout shows `final_percent`.
    pub fn aria2c_reaching(&self, final_percent: u8, exit_code: i32, delay_secs: u64) -> String {
        let delay = if delay_secs > 0 {
            format!("sleep {}", delay_secs)
        } else {
            String::new()
        };
        let script = FAKE_ARIA2C
            .replace("@DELAY@", &delay)
            .replace("@FINAL@", &final_percent.to_string())
            .replace("@EXIT@", &exit_code.to_string());
        self.write_tool("aria2c", &script)
    }

    pub fn curl(&self) -> String {
        self.write_tool("curl", FAKE_CURL)
    }

    /// Fake 7z that unpacks `<name>.zip` into `<name>.nes`.
    pub fn seven_zip(&self, exit_code: i32) -> String {
        let script = FAKE_7Z
            .replace("@MARKER@", &self.extract_marker().to_string_lossy())
            .replace("@EXIT@", &exit_code.to_string());
        self.write_tool("7z", &script)
    }

    pub fn extract_marker(&self) -> PathBuf {
        self.tools.path().join(EXTRACT_MARKER)
    }

    pub fn category_dir(&self, category: &str) -> PathBuf {
        self.root.path().join(category)
    }

    /// Config pointing at this fixture's root, with tools unset.
    pub fn config(&self) -> DownloaderConfig {
        DownloaderConfig {
            download_root: self.root.path().to_path_buf(),
            turbo_tool: missing_tool(self.tools.path(), "aria2c"),
            fallback_tool: missing_tool(self.tools.path(), "curl"),
            extract_tool: missing_tool(self.tools.path(), "7z"),
            ..DownloaderConfig::default()
        }
    }

    fn write_tool(&self, name: &str, script: &str) -> String {
        let path = self.tools.path().join(name);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }
}

fn missing_tool(dir: &Path, name: &str) -> String {
    dir.join(format!("missing-{}", name)).to_string_lossy().to_string()
}

/// Drain a handle's events until its stream closes.
pub async fn collect_events(handle: &mut DownloadHandle) -> Vec<DownloadEvent> {
    tokio::time::timeout(Duration::from_secs(20), async {
        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            events.push(event);
        }
        events
    })
    .await
    .expect("download did not finish in time")
}

/// Wait until an event with at least `percent` arrives.
pub async fn wait_for_percent(handle: &mut DownloadHandle, percent: i32) {
    tokio::time::timeout(Duration::from_secs(20), async {
        while let Some(event) = handle.next_event().await {
            if event.percent() >= percent {
                return;
            }
        }
        panic!("event stream closed before reaching {}%", percent);
    })
    .await
    .expect("progress did not arrive in time")
}
