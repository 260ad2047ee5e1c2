//! Output formatting for CLI commands.

use colored::Colorize;
use plfm_platform::{Platform, PlatformError};
use plfm_vmtest::DriverError;
use tabled::{Table, Tabled};

/// Print rows as a table.
pub fn print_table<T: Tabled>(data: &[T]) {
    if data.is_empty() {
        println!("{}", "No items found.".dimmed());
    } else {
        println!("{}", Table::new(data));
    }
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "Info:".blue().bold(), message);
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    let platform_err = err.downcast_ref::<PlatformError>().or_else(|| {
        match err.downcast_ref::<DriverError>() {
            Some(DriverError::Platform(e)) => Some(e),
            _ => None,
        }
    });
    if let Some(e) = platform_err {
        print_platform_hint(e);
    }

    if let Some(DriverError::NativeBinaryNotFound { binary, arch, .. }) = err.downcast_ref::<DriverError>() {
        eprintln!(
            "\n{}",
            format!("Hint: build {binary} for {arch} and place it next to vmtest or in /usr/lib/vmtest/{arch}.")
                .yellow()
        );
    }
}

fn print_platform_hint(err: &PlatformError) {
    match err {
        PlatformError::UnknownPlatform(_) => {
            let names: Vec<&str> = Platform::ALL.iter().map(Platform::as_str).collect();
            eprintln!(
                "\n{}",
                format!("Hint: use one of {}.", names.join(", ")).yellow()
            );
        }
        PlatformError::NoBackend(platform) => {
            eprintln!(
                "\n{}",
                format!("Hint: add a [{platform}] section to vmtest.toml or pass --config.").yellow()
            );
        }
        _ => {}
    }
}
