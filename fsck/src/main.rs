//! Checks a tagfs device or mount for allocation collisions.
//!
//! Exits 0 iff no collisions (and no out-of-range extents) were found;
//! otherwise exits with the total error count, matching the convention of
//! the `-v` flag only affecting verbosity of the printed report.

use std::env;
use std::path::Path;
use std::process::exit;

fn print_usage(bin: &str) {
    eprintln!("Usage:");
    eprintln!(" {bin} [-v] <path-or-device>");
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let bin = args.first().map(String::as_str).unwrap_or("fsck");
    let a: Vec<&str> = args.iter().map(String::as_str).collect();

    let (verbose, target) = match a[1..] {
        ["-h"] => {
            print_usage(bin);
            exit(0);
        }
        ["-v", target] => (true, target),
        [target] => (false, target),
        _ => {
            print_usage(bin);
            exit(1);
        }
    };

    match tagfs_core::fsck::run(Path::new(target)) {
        Ok(report) => {
            println!("alloc_total:   {}", report.alloc_total);
            println!("size_total:    {}", report.size_total);
            println!("amplification: {:.4}", report.amplification);
            println!("collisions:    {}", report.collisions);
            if verbose {
                println!("out_of_range:  {}", report.out_of_range);
            }
            exit((report.collisions + report.out_of_range).min(u8::MAX as u64) as i32);
        }
        Err(e) => {
            eprintln!("{bin}: {target}: {e}");
            exit(1);
        }
    }
}
