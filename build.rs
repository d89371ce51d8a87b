//! Build script for gpupool.
//!
//! Reports feature combinations that are likely mistakes.

use std::env;

fn main() {
    // Re-run if features change
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_DEBUG");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_DIAGNOSTICS");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_GPU_VULKAN");

    let debug_enabled = env::var("CARGO_FEATURE_DEBUG").is_ok();
    let diagnostics_enabled = env::var("CARGO_FEATURE_DIAGNOSTICS").is_ok();
    let vulkan_enabled = env::var("CARGO_FEATURE_GPU_VULKAN").is_ok();

    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    let is_release = profile == "release";

    // --- Debug Features ---
    if debug_enabled && is_release {
        emit_warning("Debug features enabled in release build!");
        emit_note("Every allocation captures a backtrace for leak reports.");
        emit_note("Consider disabling 'debug' for production.");
    }

    // --- Diagnostics ---
    if diagnostics_enabled && !is_release {
        emit_note("'diagnostics' has no effect in debug builds; stderr output is already on.");
    }

    // --- Target ---
    let target = env::var("TARGET").unwrap_or_default();
    if vulkan_enabled && target.contains("wasm") {
        emit_warning("'gpu-vulkan' enabled for a WebAssembly target");
        emit_note("Use HostDevice or a WebGPU-backed MemoryDevice there instead.");
    }
}

fn emit_note(msg: &str) {
    println!("cargo:warning=[gpupool]    {}", msg);
}

fn emit_warning(msg: &str) {
    println!("cargo:warning=[gpupool] {}", msg);
}
