use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "patchbench",
    about = "Validate benchmark patches by running test suites before and after the fix",
    version
)]
pub struct Cli {
    /// Path to the dataset file (.jsonl, or a JSON array)
    pub dataset: PathBuf,

    /// Validate only these instance ids (exact id or numeric suffix)
    #[arg(long = "instance-ids", num_args = 1.., value_name = "ID")]
    pub instance_ids: Vec<String>,

    /// Skip these instance ids (exact id or numeric suffix); wins over
    /// --instance-ids
    #[arg(long = "exclude-instance-ids", num_args = 1.., value_name = "ID")]
    pub exclude_instance_ids: Vec<String>,

    /// Cap the number of instances to validate
    #[arg(long)]
    pub max_instances: Option<usize>,

    /// Directory for per-instance results and the batch summary
    #[arg(long, default_value = "validation_results")]
    pub output_dir: PathBuf,

    /// Keep containers running after each instance for manual debugging
    #[arg(long)]
    pub keep_containers: bool,

    /// Ignore previous progress and start from the beginning
    #[arg(long)]
    pub force_restart: bool,

    /// Docker context to use instead of the default
    #[arg(long)]
    pub docker_context: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
