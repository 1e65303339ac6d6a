//! Bootstraps `.meta/.superblock` and `.meta/.log` on a mounted tagfs
//! device.

use std::env;
use std::path::Path;
use std::process::exit;

use tagfs_core::ioctl::KernelBinder;

fn print_usage(bin: &str) {
    eprintln!("Usage:");
    eprintln!(" {bin} <device>");
    eprintln!();
    eprintln!("Bootstraps .meta/.superblock and .meta/.log under the mount point");
    eprintln!("of <device>, which must already be mounted as tagfs.");
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let bin = args.first().map(String::as_str).unwrap_or("mkmeta");
    let a: Vec<&str> = args.iter().map(String::as_str).collect();

    let device = match a[1..] {
        ["-h"] => {
            print_usage(bin);
            exit(0);
        }
        [device] => device,
        _ => {
            print_usage(bin);
            exit(1);
        }
    };

    let binder = KernelBinder;
    match tagfs_core::mkmeta::bootstrap(Path::new(device), &binder) {
        Ok(mpt) => {
            println!("{}", mpt.display());
        }
        Err(e) => {
            eprintln!("{bin}: {device}: {e}");
            exit(1);
        }
    }
}
