//! Test utilities: a scripted stand-in for the TeX engine.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tokio::sync::mpsc::UnboundedReceiver;

/// Fake engine.
///
/// - Last argument is a file: a cold run. Logs `cold` to `runs.log`.
/// - Last argument is `--jobname=…`: a primed process. Prints a banner and
///   saves stdin to `stdin.txt` once it hits EOF. Logs `warm` if a body
///   arrived, `drained` if stdin closed after the preamble alone.
///
/// A `slow` file makes primed runs take a second after stdin closes.
/// A `close-stdin` file makes primed runs close their input without reading.
/// An `exit-code` file sets the exit status.
const FAKE_ENGINE: &str = r#"#!/bin/sh
last=""
for arg in "$@"; do last="$arg"; done
echo "args: $*" >> calls.log
case "$last" in
  --jobname=*)
    echo "primed $last"
    if [ -f close-stdin ]; then
      exec 0<&-
      sleep 1
      exit 0
    fi
    cat > stdin.partial
    mv stdin.partial stdin.txt
    if grep -q 'begin{document}' stdin.txt; then
      [ -f slow ] && sleep 1
      echo warm >> runs.log
      echo "warm body received"
    else
      [ -f slow ] && sleep 1
      echo drained >> runs.log
    fi
    ;;
  *)
    echo cold >> runs.log
    echo "This is FakeTeX, typesetting $last"
    echo "fake warning" >&2
    ;;
esac
if [ -f exit-code ]; then exit "$(cat exit-code)"; fi
exit 0
"#;

pub const PREAMBLE: &str = "\\documentclass{article}\n\\usepackage{amsmath}\n";
pub const BODY: &str = "\\begin{document}\nHello.\n\\end{document}\n";

/// Path of the fake engine, written once per test binary.
///
/// Call this before spawning anything so no forked child can inherit the
/// script's write handle.
pub fn fake_engine() -> &'static Path {
    static ENGINE: OnceLock<PathBuf> = OnceLock::new();
    ENGINE.get_or_init(|| {
        let dir = std::env::temp_dir().join(format!("warmtex-fake-engine-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("fake-tex");
        std::fs::write(&path, FAKE_ENGINE).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    })
}

pub fn write_document(dir: &Path, name: &str, preamble: &str, body: &str) {
    std::fs::write(dir.join(name), format!("{}{}", preamble, body)).unwrap();
}

/// Lines of `runs.log`, in order.
pub fn runs(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("runs.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

pub fn collect(output: &mut UnboundedReceiver<Vec<u8>>) -> String {
    let mut bytes = Vec::new();
    while let Ok(chunk) = output.try_recv() {
        bytes.extend(chunk);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

pub fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
