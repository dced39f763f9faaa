//! Error display for the CLI.

use std::io;

use colored::Colorize;
use trance_relay::{RelayError, TransportError};

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    for cause in err.chain().skip(1) {
        eprintln!("  {} {}", "caused by:".dimmed(), cause);
    }

    if let Some(hint) = hint_for(err) {
        eprintln!("\n{}", format!("Hint: {hint}").yellow());
    }
}

fn hint_for(err: &anyhow::Error) -> Option<&'static str> {
    let transport = err
        .chain()
        .find_map(|cause| match cause.downcast_ref::<RelayError>() {
            Some(RelayError::Transport(inner)) => Some(inner),
            _ => cause.downcast_ref::<TransportError>(),
        })?;

    match transport {
        TransportError::Bind { source, .. } if source.kind() == io::ErrorKind::AddrInUse => {
            Some("Another process is already listening on that port.")
        }
        TransportError::Bind { source, .. }
            if source.kind() == io::ErrorKind::PermissionDenied =>
        {
            Some("Ports below 1024 usually need elevated privileges.")
        }
        TransportError::Resolve { .. } => Some("Check the remote host name."),
        _ => None,
    }
}
