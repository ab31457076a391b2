//! Copy command - cached file transfer into a snapshot

use crate::cli::args::CopyArgs;
use crate::config::Config;
use crate::effect::CopyFiles;
use crate::error::StratumResult;
use crate::provider::SyncOptions;

pub async fn execute(args: CopyArgs, config: &Config) -> StratumResult<()> {
    let effect = CopyFiles::new(args.src, args.dest).with_options(SyncOptions {
        delete: args.delete,
        exclude: args.exclude,
    });

    super::apply_single(config, &args.snapshot, &effect).await
}
