use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "converge")]
#[command(author, version, about = "Evaluate promise policies until they converge")]
pub struct Cli {
    #[arg(required = true, num_args = 1.., help = "Policy documents (JSON AST) or glob patterns")]
    pub policies: Vec<PathBuf>,

    #[arg(
        short = 'b',
        long = "bundlesequence",
        value_delimiter = ',',
        value_name = "BUNDLE",
        help = "Bundles to run, overriding the policy's bundlesequence"
    )]
    pub bundlesequence: Vec<String>,

    #[arg(short = 'D', long = "define", value_delimiter = ',', value_name = "CLASS", help = "Define extra classes")]
    pub define: Vec<String>,

    #[arg(short = 'N', long = "negate", value_delimiter = ',', value_name = "CLASS", help = "Classes that may never be defined")]
    pub negate: Vec<String>,

    #[arg(long, help = "Passes per bundle")]
    pub max_passes: Option<usize>,

    #[arg(short = 'j', long, help = "Max concurrent background promises")]
    pub jobs: Option<usize>,

    #[arg(short = 'c', long, value_name = "FILE", help = "Configuration file (default: nearest converge.toml)")]
    pub config: Option<PathBuf>,

    #[arg(short, long, help = "Verbose output")]
    pub verbose: bool,

    #[arg(short, long, help = "Debug output")]
    pub debug: bool,
}
