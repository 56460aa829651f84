//! `stxxl-info`: load a disk configuration file, construct the disks it
//! describes, and print a one-line summary of each: capacity, free
//! bytes, and I/O kind.

use std::process::ExitCode;

use stxxl_core::config::DiskConfig;
use stxxl_core::registry::DiskQueues;
use stxxl_core::BlockManagerConfig;

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_target(false).init();

    let mut args = std::env::args().skip(1);
    let Some(config_path) = args.next() else {
        eprintln!("usage: stxxl-info <config-file>");
        return ExitCode::FAILURE;
    };

    match run(&config_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("stxxl-info: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: &str) -> stxxl_core::Result<()> {
    let text = std::fs::read_to_string(config_path)
        .map_err(|e| stxxl_core::Error::config(format!("reading '{config_path}': {e}")))?;
    let cfg = BlockManagerConfig::parse(&text)?;

    let registry = DiskQueues::new();
    let manager = cfg.build(&registry)?;

    for index in 0..manager.disk_count() {
        let disk = manager.disk(index);
        print_disk_summary(index, disk.config(), disk.allocator().capacity(), disk.allocator().free_bytes());
    }

    registry.shutdown_all();
    Ok(())
}

fn print_disk_summary(index: usize, config: &DiskConfig, capacity: u64, free_bytes: u64) {
    println!(
        "disk {index}: path={} io={} capacity={capacity} free={free_bytes}",
        config.path,
        config.io_kind.as_str(),
    );
}
