use clap::{value_parser, Arg, ArgAction, ArgMatches, Command, ValueEnum};
use csv::Writer;
use std::fmt;
use std::fs::{create_dir_all, File, OpenOptions};
use std::path::Path;
use std::thread::available_parallelism;

/// Order in which the key sample is handed out.
#[derive(PartialEq, Eq, Debug, ValueEnum, Clone, Copy)]
pub enum Order {
    /// The sample is reshuffled before every repetition.
    Random,
    /// Keys stay in increasing order.
    #[value(alias = "continuous")]
    Sequential,
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum SetKind {
    CoarseGrained,
    Optimistic,
}

impl fmt::Display for SetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetKind::CoarseGrained => write!(f, "coarse_grained"),
            SetKind::Optimistic => write!(f, "optimistic"),
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Workload {
    Write,
    Read,
    Mixed,
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Workload::Write => write!(f, "write"),
            Workload::Read => write!(f, "read"),
            Workload::Mixed => write!(f, "mixed"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub order: Order,
    pub threads_limit: usize,
    pub sample_size: usize,
    pub write_threads: usize,
    pub read_threads: usize,
    pub repeat: usize,
    pub skip_timed: bool,
}

pub fn hardware_threads() -> usize {
    available_parallelism().map(|v| v.get()).unwrap_or(1)
}

impl Default for Config {
    fn default() -> Self {
        let hw = hardware_threads();
        Self {
            order: Order::Random,
            threads_limit: hw,
            sample_size: 2000,
            write_threads: hw.min(8),
            read_threads: hw.min(8),
            repeat: 10,
            skip_timed: false,
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "order = {}",
            self.order.to_possible_value().unwrap().get_name()
        )?;
        writeln!(f, "threads-count-limit = {}", self.threads_limit)?;
        writeln!(f, "sample-size = {}", self.sample_size)?;
        writeln!(f, "write-threads-count = {}", self.write_threads)?;
        writeln!(f, "read-threads-count = {}", self.read_threads)?;
        write!(f, "repeat-count = {}", self.repeat)
    }
}

/// One line of the results table: seconds per repetition for each set and partitioning.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableRow {
    pub write_threads: usize,
    pub read_threads: usize,
    pub random_coarse_grained: f64,
    pub even_coarse_grained: f64,
    pub random_optimistic: f64,
    pub even_optimistic: f64,
}

impl TableRow {
    pub fn header() -> String {
        format!(
            "{:>5}|{:>5}|{:>20} {:>10}|{:>20} {:>10}|\n\
             {:>5}|{:>5}|{:>10}{:5}|{:>10}{:5}|{:>10}{:5}|{:>10}{:5}|\n\
             {:_>5}|{:_>5}|{:_>15}|{:_>15}|{:_>15}|{:_>15}|",
            "", "", "CoarseGrained", "", "Optimistic", "",
            "write", "read", "random", "", "even", "", "random", "", "even", "",
            "", "", "", "", "", "",
        )
    }

    pub fn workload(&self) -> Workload {
        match (self.write_threads, self.read_threads) {
            (_, 0) => Workload::Write,
            (0, _) => Workload::Read,
            _ => Workload::Mixed,
        }
    }

    /// `(set, random partition, seconds)` for every measured column.
    pub fn cells(&self) -> [(SetKind, bool, f64); 4] {
        [
            (SetKind::CoarseGrained, true, self.random_coarse_grained),
            (SetKind::CoarseGrained, false, self.even_coarse_grained),
            (SetKind::Optimistic, true, self.random_optimistic),
            (SetKind::Optimistic, false, self.even_optimistic),
        ]
    }
}

impl fmt::Display for TableRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>5}|{:>5}|{:>15.5e}|{:>15.5e}|{:>15.5e}|{:>15.5e}|",
            self.write_threads,
            self.read_threads,
            self.random_coarse_grained,
            self.even_coarse_grained,
            self.random_optimistic,
            self.even_optimistic,
        )
    }
}

pub struct BenchWriter {
    output: Option<Writer<File>>,
}

impl BenchWriter {
    pub fn none() -> Self {
        Self { output: None }
    }

    /// Appends one CSV record per measured cell of `row`.
    pub fn write_row(&mut self, config: &Config, row: &TableRow) -> csv::Result<()> {
        if let Some(output) = self.output.as_mut() {
            for (set, random_partition, seconds) in row.cells() {
                output.write_record(&[
                    row.workload().to_string(),
                    set.to_string(),
                    if random_partition { "random" } else { "even" }.to_string(),
                    config
                        .order
                        .to_possible_value()
                        .unwrap()
                        .get_name()
                        .to_string(),
                    row.write_threads.to_string(),
                    row.read_threads.to_string(),
                    config.sample_size.to_string(),
                    config.repeat.to_string(),
                    seconds.to_string(),
                ])?;
            }
            output.flush()?;
        }
        Ok(())
    }
}

fn open_output(output_name: &str) -> csv::Result<Writer<File>> {
    let output_path = Path::new(output_name);
    if let Some(dir) = output_path.parent() {
        create_dir_all(dir)?;
    }
    match OpenOptions::new().read(true).append(true).open(output_path) {
        Ok(f) => Ok(csv::Writer::from_writer(f)),
        Err(_) => {
            let f = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(output_path)?;
            let mut output = csv::Writer::from_writer(f);
            // NOTE: `write_record` on `BenchWriter::write_row`
            output.write_record([
                "workload",
                "set",
                "partition",
                "order",
                "write_threads",
                "read_threads",
                "sample_size",
                "repeat",
                "seconds",
            ])?;
            output.flush()?;
            Ok(output)
        }
    }
}

pub fn command(name: String) -> Command {
    Command::new(name)
        .arg(
            Arg::new("order")
                .short('O')
                .long("order")
                .value_parser(value_parser!(Order))
                .ignore_case(true)
                .help("Order of the key sample")
                .default_value("random"),
        )
        .arg(
            Arg::new("threads count limit")
                .short('t')
                .long("threads-count-limit")
                .value_parser(value_parser!(u64).range(2..))
                .help(
                    "Upper bound on writer + reader threads in mixed tests. \
                     Capped at the available parallelism.",
                ),
        )
        .arg(
            Arg::new("sample size")
                .short('s')
                .long("sample-size")
                .value_parser(value_parser!(usize))
                .help("Number of keys: [0..SAMPLE_SIZE)")
                .default_value("2000"),
        )
        .arg(
            Arg::new("write threads count")
                .short('w')
                .long("write-threads-count")
                .value_parser(value_parser!(u64).range(1..))
                .help("Writer threads of the pure write test. Capped at the available parallelism.")
                .default_value("8"),
        )
        .arg(
            Arg::new("read threads count")
                .short('r')
                .long("read-threads-count")
                .value_parser(value_parser!(u64).range(1..))
                .help("Reader threads of the pure read test. Capped at the available parallelism.")
                .default_value("8"),
        )
        .arg(
            Arg::new("repeat count")
                .short('c')
                .long("repeat-count")
                .value_parser(value_parser!(u64).range(1..))
                .help("Repetitions averaged by each timed measurement")
                .default_value("10"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .help("Output CSV filename. Appends the data if the file already exists."),
        )
        .arg(
            Arg::new("skip timed")
                .long("skip-timed")
                .action(ArgAction::SetTrue)
                .help("Run only the functionality tests"),
        )
        .arg(
            Arg::new("dry run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Check whether the arguments are parsable, without running a benchmark"),
        )
}

pub fn from_matches(m: &ArgMatches) -> Config {
    let hw = hardware_threads();
    let capped = |name: &str| (m.get_one::<u64>(name).copied().unwrap() as usize).min(hw);
    Config {
        order: m.get_one::<Order>("order").copied().unwrap(),
        threads_limit: m
            .get_one::<u64>("threads count limit")
            .map_or(hw, |&limit| (limit as usize).min(hw)),
        sample_size: m.get_one::<usize>("sample size").copied().unwrap(),
        write_threads: capped("write threads count"),
        read_threads: capped("read threads count"),
        repeat: m.get_one::<u64>("repeat count").copied().unwrap() as usize,
        skip_timed: m.get_flag("skip timed"),
    }
}

pub fn setup(name: String) -> csv::Result<(Config, BenchWriter)> {
    let m = command(name).get_matches();
    let config = from_matches(&m);

    if m.get_flag("dry run") {
        std::process::exit(0);
    }

    let output = m
        .get_one::<String>("output")
        .map(|output_name| open_output(output_name))
        .transpose()?;
    Ok((config, BenchWriter { output }))
}
