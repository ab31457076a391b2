//! Fingerprint command - compute a chained digest offline

use crate::cache::fingerprint;
use crate::cli::args::FingerprintArgs;
use crate::error::StratumResult;

pub fn execute(args: FingerprintArgs) -> StratumResult<()> {
    println!("{}", fingerprint(&args.parent, &args.identity));
    Ok(())
}
