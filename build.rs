//! Build script — locates and links `libespeak-ng` when the `espeak`
//! feature is enabled.  Without it there is nothing to link.
//!
//! ## Resolution order
//!
//! 1. **`ESPEAK_LIB_DIR`** env var — explicit directory containing
//!    `libespeak-ng.{a,so,dylib}`.
//!
//! 2. **pkg-config** — on macOS the search is augmented with Homebrew's
//!    pkgconfig directories so that a plain `brew install espeak-ng` is
//!    sufficient.
//!
//! 3. **Platform path walk** — `brew --prefix espeak-ng` and the Homebrew
//!    prefixes on macOS; the multi-arch directory, `/usr/lib64`, `/usr/lib`
//!    and `/usr/local/lib` elsewhere.
//!
//! A static archive is preferred at every step; when one is linked the C++
//! standard library is added too, because espeak-ng is a C++ project.

use std::path::{Path, PathBuf};
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=ESPEAK_LIB_DIR");
    println!("cargo:rerun-if-env-changed=PKG_CONFIG_PATH");

    if std::env::var_os("CARGO_FEATURE_ESPEAK").is_none() {
        return;
    }

    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let target_arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();

    // ── 1. Explicit override ──────────────────────────────────────────────────
    if let Ok(dir) = std::env::var("ESPEAK_LIB_DIR") {
        link_from_dir(&dir, &target_os);
        return;
    }

    // ── 2. pkg-config ─────────────────────────────────────────────────────────
    if let Some(dir) = try_pkg_config(&target_os) {
        if !dir.is_empty() {
            println!("cargo:rustc-link-search=native={dir}");
        }
        return;
    }

    // ── 3. Platform path walk ─────────────────────────────────────────────────
    let candidates = candidate_dirs(&target_os, &target_arch);
    let dylib = if target_os == "macos" { "libespeak-ng.dylib" } else { "libespeak-ng.so" };
    let found = candidates
        .iter()
        .find(|dir| Path::new(dir).join("libespeak-ng.a").exists())
        .or_else(|| candidates.iter().find(|dir| Path::new(dir).join(dylib).exists()));
    if let Some(dir) = found {
        link_from_dir(dir, &target_os);
        return;
    }

    // ── 4. Nothing found ──────────────────────────────────────────────────────
    panic!(
        "\n\n\
         glados-tts: the `espeak` feature needs libespeak-ng.\n\
         \n\
         Install it with:\n\
         \n\
         \t  macOS   :  brew install espeak-ng\n\
         \t  Ubuntu  :  sudo apt install libespeak-ng-dev\n\
         \t  Fedora  :  sudo dnf install espeak-ng-devel\n\
         \t  Alpine  :  apk add espeak-ng-dev\n\
         \n\
         Or point the build script at the library:\n\
         \n\
         \t  ESPEAK_LIB_DIR=/your/path/lib cargo build --features espeak\n\n"
    );
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Prefers `libespeak-ng.a`; falls back to the shared library.
fn link_from_dir(dir: &str, target_os: &str) {
    println!("cargo:rustc-link-search=native={dir}");
    if Path::new(dir).join("libespeak-ng.a").exists() {
        println!("cargo:rustc-link-lib=static=espeak-ng");
        if target_os == "macos" {
            println!("cargo:rustc-link-lib=dylib=c++");
        } else {
            println!("cargo:rustc-link-lib=dylib=stdc++");
        }
    } else {
        println!("cargo:rustc-link-lib=dylib=espeak-ng");
    }
}

/// Run pkg-config with Homebrew's directories prepended on macOS.  Returns
/// the libdir (possibly empty) once link flags have been emitted.
fn try_pkg_config(target_os: &str) -> Option<String> {
    let mut paths: Vec<String> = Vec::new();
    if target_os == "macos" {
        if let Some(keg) = brew_prefix("espeak-ng") {
            paths.push(format!("{keg}/lib/pkgconfig"));
        }
        for prefix in ["/opt/homebrew", "/usr/local"] {
            paths.push(format!("{prefix}/lib/pkgconfig"));
        }
        paths.retain(|p| Path::new(p).is_dir());
    }
    let existing = std::env::var("PKG_CONFIG_PATH").unwrap_or_default();
    if !existing.is_empty() {
        paths.push(existing);
    }
    let pkg_path = paths.join(":");

    let out = Command::new("pkg-config")
        .args(["--libs", "espeak-ng"])
        .env("PKG_CONFIG_PATH", &pkg_path)
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }

    for token in String::from_utf8(out.stdout).ok()?.split_whitespace() {
        if let Some(path) = token.strip_prefix("-L") {
            println!("cargo:rustc-link-search=native={path}");
        } else if let Some(lib) = token.strip_prefix("-l") {
            println!("cargo:rustc-link-lib=dylib={lib}");
        }
    }

    let libdir = Command::new("pkg-config")
        .args(["--variable=libdir", "espeak-ng"])
        .env("PKG_CONFIG_PATH", &pkg_path)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_owned())
        .unwrap_or_default();
    Some(libdir)
}

fn brew_prefix(formula: &str) -> Option<String> {
    let out = Command::new("brew").args(["--prefix", formula]).output().ok()?;
    if out.status.success() {
        Some(String::from_utf8(out.stdout).ok()?.trim().to_owned())
    } else {
        None
    }
}

fn candidate_dirs(target_os: &str, target_arch: &str) -> Vec<String> {
    let mut dirs: Vec<String> = Vec::new();

    if target_os == "macos" {
        if let Some(keg) = brew_prefix("espeak-ng") {
            dirs.push(format!("{keg}/lib"));
        }
        for prefix in ["/opt/homebrew", "/usr/local"] {
            dirs.push(format!("{prefix}/opt/espeak-ng/lib"));
            dirs.push(format!("{prefix}/lib"));
        }
    } else {
        let multiarch = match target_arch {
            "x86_64" => "x86_64-linux-gnu",
            "aarch64" => "aarch64-linux-gnu",
            "arm" => "arm-linux-gnueabihf",
            _ => "",
        };
        if !multiarch.is_empty() {
            dirs.push(format!("/usr/lib/{multiarch}"));
        }
        dirs.extend(["/usr/lib64", "/usr/lib", "/usr/local/lib"].map(String::from));
    }

    dirs.into_iter()
        .map(PathBuf::from)
        .filter(|p| p.is_dir())
        .map(|p| p.to_string_lossy().into_owned())
        .collect()
}
