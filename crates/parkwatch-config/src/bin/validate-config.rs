//! Config validation CLI tool
//!
//! Validates a parkwatchd configuration file and reports any errors.

use parkwatch_api::VehicleClass;
use parkwatch_config::ConfigError;
use parkwatch_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a parkwatchd configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            eprintln!("  validate-config config.example.toml");
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match parkwatch_config::load_config(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", parkwatch_config::CURRENT_CONFIG_VERSION);
            println!("  Grace: {} min", config.policy.grace.num_minutes());
            println!("  Ban length: {} days", config.policy.ban_duration.num_days());
            println!(
                "  Night window: {} - {}",
                config.policy.night_window.start, config.policy.night_window.end
            );
            println!(
                "  Channels: email {}, sms {}",
                enabled(config.notifications.email.is_some()),
                enabled(config.notifications.sms.is_some())
            );
            println!("  Employees: {}", config.employees.len());

            if !config.employees.is_empty() {
                println!();
                println!("Employees:");
                for employee in &config.employees {
                    let class = match employee.vehicle_class {
                        VehicleClass::Ordinary => "ordinary",
                        VehicleClass::State => "state",
                    };
                    println!(
                        "  - {} [{}, spot {}, {} vehicle(s)]: {} {}-{}",
                        employee.id,
                        class,
                        employee.spot,
                        employee.vehicles.len(),
                        employee.name,
                        employee.schedule.start,
                        employee.schedule.end
                    );
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        parkwatch_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}

fn enabled(on: bool) -> &'static str {
    if on { "enabled" } else { "disabled" }
}
