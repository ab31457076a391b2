//! Run command - cached shell command on top of a snapshot

use crate::cli::args::RunArgs;
use crate::config::Config;
use crate::effect::{shell_quote, RunCommand};
use crate::error::StratumResult;

pub async fn execute(args: RunArgs, config: &Config) -> StratumResult<()> {
    let effect = RunCommand::new(command_line(&args.command))
        .background(args.background)
        .pty(!args.no_pty);

    super::apply_single(config, &args.snapshot, &effect).await
}

/// Shell command line for trailing args: a lone argument is taken as written,
/// several are quoted word by word so their argv boundaries survive `sh -c`.
fn command_line(words: &[String]) -> String {
    match words {
        [line] => line.clone(),
        _ => words
            .iter()
            .map(|word| shell_quote(word))
            .collect::<Vec<_>>()
            .join(" "),
    }
}
