// HOST SUPPORT CHECK -- VERIFIES WHAT TOPOLOGY DETECTION NEEDS
// KERNEL CONFIG VIA /proc/config.gz, CACHE DESCRIPTIONS VIA SYSFS

use std::io::Read;
use std::path::Path;
use std::process::Command;

use anyhow::Result;

fn check_tool(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn check_kernel_config() -> bool {
    let file = match std::fs::File::open("/proc/config.gz") {
        Ok(f) => f,
        Err(_) => {
            println!("  /proc/config.gz       NOT FOUND (SKIPPED)");
            return true;
        }
    };
    let mut decoder = flate2::read::GzDecoder::new(file);
    let mut config = String::new();
    if decoder.read_to_string(&mut config).is_err() {
        println!("  /proc/config.gz       UNREADABLE (SKIPPED)");
        return true;
    }
    let mut ok = true;
    if config.contains("CONFIG_SMP=y") {
        println!("  CONFIG_SMP            OK");
    } else {
        println!("  CONFIG_SMP            NOT FOUND -- single-core kernel");
        ok = false;
    }
    if config.contains("CONFIG_SCHED_MC=y") {
        println!("  CONFIG_SCHED_MC       OK");
    } else {
        println!("  CONFIG_SCHED_MC       NOT FOUND -- kernel has no cache-level domains");
    }
    ok
}

pub fn run_check() -> Result<()> {
    println!("BEDLAM HOST CHECK");
    println!();

    let mut ok = true;
    let tools = ["cargo", "rustc"];
    for tool in &tools {
        if check_tool(tool) {
            println!("  {:<24}OK", tool);
        } else {
            println!("  {:<24}MISSING", tool);
            ok = false;
        }
    }
    println!();

    println!("KERNEL CONFIG:");
    if !check_kernel_config() {
        ok = false;
    }
    println!();

    let cache_path = Path::new("/sys/devices/system/cpu/cpu0/cache");
    if cache_path.exists() {
        println!("  cpu cache sysfs       AVAILABLE");
    } else {
        println!("  cpu cache sysfs       NOT AVAILABLE (synthetic topology only)");
        ok = false;
    }
    println!();

    if ok {
        println!("ALL CHECKS PASSED");
    } else {
        println!("SOME CHECKS FAILED");
        if !check_tool("cargo") || !check_tool("rustc") {
            println!("  Install Rust: https://rustup.rs");
        }
        std::process::exit(1);
    }

    Ok(())
}
