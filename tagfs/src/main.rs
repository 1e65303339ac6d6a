//! `tagfs mkfile` / `tagfs mkdir` — thin wrappers over `tagfs_core::create`.

use std::env;
use std::path::Path;
use std::process::exit;

use tagfs_core::ioctl::KernelBinder;

fn print_usage(bin: &str) {
    eprintln!("Usage:");
    eprintln!(" {bin} mkfile <path> <mode> <uid> <gid> <size>");
    eprintln!(" {bin} mkdir <path> <mode> <uid> <gid>");
}

fn parse_u32(bin: &str, what: &str, s: &str) -> u32 {
    s.parse().unwrap_or_else(|_| {
        eprintln!("{bin}: invalid {what}: {s}");
        exit(1);
    })
}

fn parse_u64(bin: &str, what: &str, s: &str) -> u64 {
    s.parse().unwrap_or_else(|_| {
        eprintln!("{bin}: invalid {what}: {s}");
        exit(1);
    })
}

fn parse_mode(bin: &str, s: &str) -> u32 {
    u32::from_str_radix(s.trim_start_matches("0o"), 8).unwrap_or_else(|_| {
        eprintln!("{bin}: invalid mode: {s}");
        exit(1);
    })
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let bin = args.first().map(String::as_str).unwrap_or("tagfs");
    let a: Vec<&str> = args.iter().map(String::as_str).collect();
    let binder = KernelBinder;

    match a[1..] {
        ["-h"] | [] => {
            print_usage(bin);
            exit(if a.len() > 1 { 0 } else { 1 });
        }

        ["mkfile", path, mode, uid, gid, size] => {
            let mode = parse_mode(bin, mode);
            let uid = parse_u32(bin, "uid", uid);
            let gid = parse_u32(bin, "gid", gid);
            let size = parse_u64(bin, "size", size);
            if let Err(e) = tagfs_core::create::make_file(Path::new(path), mode, uid, gid, size, &binder) {
                eprintln!("{bin}: {path}: {e}");
                exit(1);
            }
        }

        ["mkdir", path, mode, uid, gid] => {
            let mode = parse_mode(bin, mode);
            let uid = parse_u32(bin, "uid", uid);
            let gid = parse_u32(bin, "gid", gid);
            if let Err(e) = tagfs_core::create::make_dir(Path::new(path), mode, uid, gid) {
                eprintln!("{bin}: {path}: {e}");
                exit(1);
            }
        }

        _ => {
            print_usage(bin);
            exit(1);
        }
    }
}
