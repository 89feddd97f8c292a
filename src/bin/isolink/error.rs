use std::process::ExitCode;

pub type CliResult<T> = anyhow::Result<T>;

/// Exit status for a bad configuration file or flag
const CONFIG_STATUS: u8 = 2;

/// Print a failed run to stderr and pick its exit status
///
/// Configuration problems exit with 2; everything else exits with 1.
pub fn to_exit_code(result: CliResult<()>) -> ExitCode {
    let Err(e) = result else {
        return ExitCode::SUCCESS;
    };
    eprintln!("isolink: {e}");
    for (depth, cause) in e.chain().skip(1).enumerate() {
        eprintln!("  {}: {cause}", depth + 1);
    }
    ExitCode::from(exit_status(&e))
}

fn exit_status(e: &anyhow::Error) -> u8 {
    let config_error = e.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<isolink::Error>(),
            Some(isolink::Error::ConfigError(_))
        )
    });
    if config_error { CONFIG_STATUS } else { 1 }
}
