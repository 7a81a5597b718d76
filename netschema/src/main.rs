use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Check and print network configuration schemas
#[derive(Parser)]
#[clap(author, version, about)]
enum Cli {
    /// Check that schema files compile, reporting any errors
    Check {
        /// Schema files to load, in order
        #[clap(name = "SCHEMA_FILE", required = true)]
        schema_files: Vec<PathOrStdin>,
    },
    /// Compile schema files and print the resulting definitions to stdout
    #[clap(after_help = DUMP_COMMAND_AFTER_HELP)]
    Dump {
        /// Print only the definition of this type
        ///
        /// Nested types are named with dots, for example `link.address`.
        #[clap(long = "type", name = "TYPE", display_order = 0)]
        type_name: Option<String>,
        /// Schema files to load, in order
        #[clap(name = "SCHEMA_FILE", required = true)]
        schema_files: Vec<PathOrStdin>,
    },
    /// List the array notations known to the compiler
    Notations,
}

const DUMP_COMMAND_AFTER_HELP: &str = "\
Examples:

  $ netschema dump schemas/interface.xml
  $ netschema dump --type link.address schemas/interface.xml
  $ cat schemas/interface.xml | netschema dump -
";

/// The environment variable used to configure logging.
const LOG_ENV: &str = "NETSCHEMA_LOG";

#[derive(Clone, Debug)]
enum PathOrStdin {
    StdIn,
    Path(PathBuf),
}

impl std::str::FromStr for PathOrStdin {
    type Err = std::convert::Infallible;

    fn from_str(src: &str) -> Result<PathOrStdin, std::convert::Infallible> {
        match src {
            "-" => Ok(PathOrStdin::StdIn),
            _ => Ok(PathOrStdin::Path(PathBuf::from(src))),
        }
    }
}

fn unwrap_or_exit<T>(option: Option<T>) -> T {
    option.unwrap_or_else(|| std::process::exit(netschema::Status::Error.exit_code()))
}

fn load_files_or_exit(
    driver: &mut netschema::Driver,
    files: Vec<PathOrStdin>,
) -> Vec<netschema::source::FileId> {
    files
        .into_iter()
        .map(|file| {
            unwrap_or_exit(match file {
                PathOrStdin::StdIn => driver.load_source("<stdin>".to_owned(), std::io::stdin()),
                PathOrStdin::Path(path) => driver.load_source_path(&path),
            })
        })
        .collect()
}

const MAX_PRETTY_WIDTH: usize = 80;

fn get_pretty_width() -> usize {
    let term_width = termsize::get().map_or(usize::MAX, |size| usize::from(size.cols));
    std::cmp::min(term_width, MAX_PRETTY_WIDTH)
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .without_time()
        .init();
}

fn main() -> ! {
    init_logging();

    let mut driver = netschema::Driver::new();
    driver.install_panic_hook();
    driver.set_emit_width(get_pretty_width());

    let status = match Cli::parse() {
        Cli::Check { schema_files } => {
            let file_ids = load_files_or_exit(&mut driver, schema_files);
            driver.check_schemas(&file_ids)
        }
        Cli::Dump {
            type_name,
            schema_files,
        } => {
            let file_ids = load_files_or_exit(&mut driver, schema_files);
            driver.dump_schemas(&file_ids, type_name.as_deref())
        }
        Cli::Notations => driver.emit_notations(),
    };

    std::process::exit(status.exit_code());
}
