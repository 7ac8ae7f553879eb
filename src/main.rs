#[cfg(target_os = "linux")]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use env_logger::Env;
use log::error;
use std::process::exit;

use sync_set_bench::bench::{functionality_tests, timed_tests};
use sync_set_bench::config::set::setup;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let (config, mut output) = match setup("set_tests".to_string()) {
        Ok(setup) => setup,
        Err(e) => {
            error!("failed to open the output file: {}", e);
            exit(1);
        }
    };
    println!("{}", config);

    println!("Starting functionality tests..");
    if let Err(e) = functionality_tests(&config) {
        error!("{}", e);
        println!("Failed functionality tests!");
        exit(1);
    }
    println!("Passed functionality tests");

    if config.skip_timed {
        return;
    }

    println!("Starting timed tests..");
    if let Err(e) = timed_tests(&config, &mut output) {
        error!("{}", e);
        println!("Failed timed tests!");
        exit(1);
    }
    println!("Passed timed tests");
}
